//! Infrastructure layer: port traits and provider plumbing.

pub mod poll;
pub mod ports;
pub mod rate_limit;
pub mod rate_limited;
