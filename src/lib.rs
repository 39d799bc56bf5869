//! ramfiller - does what it says on the tin. It fills up RAM.
//!
//! Memory is allocated as an ordered chain of fixed-size blocks, written
//! once to force physical residency, and optionally rewritten from a
//! background task until the caller asks for it back.

pub mod chain;
pub mod controller;
pub mod error;
pub mod refresher;

pub use error::{FillerError, Result};
