pub mod consumer;
pub mod dispatcher;
pub mod selector;
