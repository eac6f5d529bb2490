//! Pitchside - commerce and subscription backend for a football-talent marketplace
//!
//! This library provides the commerce core of the Pitchside platform: Stripe
//! checkout-session creation, webhook-driven order/subscription reconciliation,
//! status queries for redirect-back polling, and the admin product catalog.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod livescore;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod rate_limit;
pub mod util;
