//! Language-model backend protocol.
//!
//! The engine is an orchestration layer, not an LLM client: it defines the
//! [`LmBackend`] trait and drives it, while concrete providers live in the
//! `nodeflow-lm` crate. The protocol has exactly two operations: choose a
//! successor type from a union, and fill the plain fields of a target type.

pub mod timing;
pub mod traits;

pub use timing::{LmCallKind, LmTiming, TimingLm, TimingSink};
pub use traits::{Chosen, LmBackend};
