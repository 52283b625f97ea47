pub mod audit;
pub mod circuit_breaker;
pub mod database;
pub mod health;
pub mod history;
pub mod queue;
pub mod rate_limiter;
pub mod rbmq;
pub mod redis;
pub mod store;
