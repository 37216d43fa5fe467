pub mod referraldtos;
