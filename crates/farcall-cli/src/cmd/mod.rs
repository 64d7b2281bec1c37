//! Command implementations.

pub mod call;
pub mod serve;
pub mod sign;
