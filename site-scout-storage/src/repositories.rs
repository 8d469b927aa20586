pub mod file;
pub mod memory;
pub mod pg_checkpoint;

pub use file::*;
pub use memory::*;
pub use pg_checkpoint::*;
