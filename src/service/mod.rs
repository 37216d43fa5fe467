pub mod error;
pub mod lifecycle_service;
pub mod link_service;
pub mod referral;
pub mod state_machine;
pub mod templates;
