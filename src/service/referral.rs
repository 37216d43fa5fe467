use rand::{distr::Alphanumeric, Rng};
use uuid::Uuid;

pub const CODE_LENGTH: usize = 8;

pub fn generate_referral_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

/// Opaque link id, 32 lowercase hex chars.
pub fn generate_link_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn generate_session_id() -> String {
    format!("ses-{}", Uuid::new_v4().simple())
}

pub fn generate_referral_link(base_url: &str, link_id: &str, code: &str) -> String {
    format!(
        "{}/{}?ref={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(link_id),
        urlencoding::encode(code)
    )
}
