//! Backend abstraction layer
//!
//! Provides the collaborator traits the render graph is written against, plus
//! the dummy backend used for tests and headless runs.

pub mod traits;
pub mod types;

#[cfg(any(test, feature = "dummy"))]
pub mod dummy;

pub use traits::*;
pub use types::*;
