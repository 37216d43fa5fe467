// Database query timeout protection
use std::time::Duration;
use tokio::time::timeout;

use super::store::StoreError;

pub struct QueryTimeout;

impl QueryTimeout {
    /// Execute a query with a timeout so a slow statement surfaces as a
    /// transient failure instead of blocking the request.
    pub async fn execute_with_timeout<F, T>(
        query_fn: F,
        timeout_duration: Duration,
    ) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        match timeout(timeout_duration, query_fn).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Transient(format!(
                "Query timed out after {:?}",
                timeout_duration
            ))),
        }
    }

    /// Default timeout for most queries (5 seconds)
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Longer timeout for paged listings with counts (30 seconds)
    pub const AGGREGATION_TIMEOUT: Duration = Duration::from_secs(30);

    /// Short timeout for simple lookups (2 seconds)
    pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);
}
