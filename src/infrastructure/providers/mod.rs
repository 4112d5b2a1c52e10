pub mod relay_publisher;
pub mod simulated_publisher;

pub use relay_publisher::*;
pub use simulated_publisher::*;
