// Rate limiting middleware for link and share endpoints
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::{ErrorMessage, HttpError};

// In-process limiter, counts are per instance
#[derive(Debug, Clone)]
pub struct RateLimiter {
    requests: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    pub fn is_allowed(&self, key: &str) -> bool {
        self.is_allowed_at(key, Instant::now())
    }

    fn is_allowed_at(&self, key: &str, now: Instant) -> bool {
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = requests.entry(key.to_string()).or_default();

        // Drop hits that fell out of the window
        entry.retain(|&timestamp| now.duration_since(timestamp) < self.window);

        if entry.len() < self.max_requests {
            entry.push(now);
            true
        } else {
            false
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let client_id = get_client_id(&request);

    if !limiter.is_allowed(&client_id) {
        tracing::warn!("Rate limit hit for client {}", client_id);
        return Err(HttpError::too_many_requests(
            ErrorMessage::TooManyRequests.to_string(),
        ));
    }

    Ok(next.run(request).await)
}

fn get_client_id(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

pub fn link_rate_limiter() -> RateLimiter {
    RateLimiter::new(3, Duration::from_secs(60)) // 3 links per minute
}

pub fn share_rate_limiter() -> RateLimiter {
    RateLimiter::new(10, Duration::from_secs(60)) // 10 shares per minute
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http};

    use super::*;

    #[test]
    fn limiter_blocks_after_max_requests() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.is_allowed_at("10.0.0.1", now));
        }
        assert!(!limiter.is_allowed_at("10.0.0.1", now));
        assert!(limiter.is_allowed_at("10.0.0.2", now));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.is_allowed_at("k", now));
        assert!(!limiter.is_allowed_at("k", now + Duration::from_secs(30)));
        assert!(limiter.is_allowed_at("k", now + Duration::from_secs(61)));
    }

    #[test]
    fn client_id_uses_first_forwarded_entry() {
        let request = http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get_client_id(&request), "203.0.113.7");

        let anonymous = http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(get_client_id(&anonymous), "unknown");
    }
}
