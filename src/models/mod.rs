pub mod circuit_breaker;
pub mod delivery;
pub mod fcm;
pub mod health;
pub mod message;
pub mod provider;
pub mod queue;
pub mod rate_limit;
pub mod response;
pub mod retry;
pub mod status;
pub mod validation;
