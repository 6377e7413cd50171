//! Command output in text or JSON.
//!
//! - `OutputWriter`: format-aware emitters for each command result
//! - `StatusOutput`: JSON shape of the `status` command

mod writer;

pub use writer::{OutputWriter, StatusOutput};
