pub mod ids;
pub mod config;
pub mod failure;
pub mod outcome;
pub mod checkpoint;

pub use ids::*;
pub use config::*;
pub use failure::*;
pub use outcome::*;
pub use checkpoint::*;
