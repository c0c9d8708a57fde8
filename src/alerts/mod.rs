/// Alert dispatch pipeline and throttles
pub mod dispatcher;
pub mod flap_suppressor;
pub mod rate_limiter;

pub use dispatcher::AlertDispatcher;
pub use flap_suppressor::FlapSuppressor;
pub use rate_limiter::RateLimiter;
