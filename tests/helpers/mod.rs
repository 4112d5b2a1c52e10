#![allow(dead_code, unused_imports)]
pub mod dispatch;
pub mod publishers;
pub mod test_db;

pub use dispatch::*;
pub use publishers::*;
pub use test_db::*;
