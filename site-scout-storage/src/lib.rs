pub mod checkpoint;
pub mod postgres;
pub mod repositories;

pub use checkpoint::*;
pub use repositories::*;
