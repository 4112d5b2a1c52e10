pub mod rate_limiter;
pub mod shutdown;

pub use rate_limiter::DispatchRateLimiter;
pub use shutdown::install_shutdown_handler;
