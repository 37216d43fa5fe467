// Middleware module
pub mod identity;
pub mod rate_limit;

pub use identity::*;
pub use rate_limit::*;
