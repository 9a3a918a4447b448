//! numbr backend: virtual phone numbers for SMS verification, paid from a
//! prepaid wallet.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod numbers;
pub mod payments;
pub mod services;
pub mod workers;
