pub mod events;
pub mod links;
pub mod referrals;
