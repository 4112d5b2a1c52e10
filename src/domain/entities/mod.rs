pub mod job;
pub mod platform;
pub mod post;
pub mod publish_result;

pub use job::*;
pub use platform::*;
pub use post::*;
pub use publish_result::*;
