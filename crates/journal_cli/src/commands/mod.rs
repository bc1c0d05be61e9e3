//! CLI command implementations.

pub mod inspect;
pub mod restore;
pub mod serve;
