//! Scheduler runner -- the pool handle callers interact with.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructors, accessors, metrics, and drop
//! - `admission`: task admission, placement, removal, enumeration, and shutdown

mod admission;
mod core;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;
