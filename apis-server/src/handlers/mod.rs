pub mod admin;
pub mod auth;
pub mod hives;
pub mod units;
