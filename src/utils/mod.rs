//! Pure utility functions.
//!
//! Process bootstrap and the time source shared by the store and helpers.

pub mod bootstrap;
pub mod clock;
