pub mod collector;
pub mod context;
pub mod job;
pub mod sources;
pub mod synthesis;

pub use collector::*;
pub use context::*;
pub use job::*;
pub use sources::*;
pub use synthesis::*;
