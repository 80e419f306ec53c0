//! Extension configuration
//!
//! Supervision of ttyd/gostc/easytier is out of this crate's scope; see
//! [`types`] for the persisted config shape only.

mod types;

pub use types::*;
