pub mod delivery_attempt;
pub mod health_stats;
pub mod message;
pub mod webhook_config;
