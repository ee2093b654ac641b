//! This module contains utilities that are useful for testing code based on cluster failure
//!  handling. They are used for testing this crate itself, but they are also exported for
//!  application testing.
//!
//! Making test utilities part of the crate's regular (non-#[cfg(test)]) code is the compromise
//!  that allows applications to use them in their own tests.

pub mod control;
pub mod event;
pub mod node;
