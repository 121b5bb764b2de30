//! CLI command implementations.

pub mod cow;
pub mod guarded;
pub mod layout;
pub mod map;
pub mod simple;
pub mod version;
