pub mod delay;
pub mod retry_policy;

pub use delay::*;
pub use retry_policy::*;
