//! One-time enumeration of transfer units.

pub mod files;
pub mod tables;

pub use files::{FileEnumerator, WindowOutcome};
pub use tables::TableEnumerator;
