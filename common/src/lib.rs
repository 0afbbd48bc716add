pub mod control;
pub mod task;
pub mod wordcount;
pub mod worker;

pub use control::*;
pub use task::*;
pub use worker::*;
