//! Command implementations.

pub mod check;
pub mod patterns;
pub mod run;
