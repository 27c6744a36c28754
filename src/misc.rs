//! Miscilaneous *non core related* utilities

pub mod paths;
pub mod take;

pub use paths::DirPath;
pub use take::Take;
