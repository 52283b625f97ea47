mod common;

mod api_tests;
mod dispatcher_tests;
mod rate_limiter_tests;
mod retry_tests;
