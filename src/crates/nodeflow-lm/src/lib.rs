//! LM backend implementations for nodeflow.
//!
//! This crate provides concrete implementations of the `LmBackend` trait
//! from `nodeflow-core`:
//!
//! - [`remote::ApiLm`] - an HTTP structured-output client for Anthropic-style
//!   messages APIs
//! - [`local::CliLm`] - a subprocess backend that shells out to a local
//!   model CLI, with process-group isolation and a generous timeout
//! - [`ScriptedLm`] - a deterministic backend replaying canned choices and
//!   fills, for tests and demos
//!
//! All backends share the same discipline: prompts carry the target's
//! plain-fields-only JSON schema, output that fails validation is retried
//! once with the validator message as a correction hint, and transport
//! failures are retried once after a short delay.
//!
//! # Example
//!
//! ```rust,ignore
//! use nodeflow_lm::config::RemoteLmConfig;
//! use nodeflow_lm::remote::ApiLm;
//! use std::sync::Arc;
//!
//! let config = RemoteLmConfig::from_env(
//!     "ANTHROPIC_API_KEY",
//!     "https://api.anthropic.com",
//!     "claude-sonnet-4-20250514",
//! )?;
//! let backend = Arc::new(ApiLm::new(config));
//! let record = registry.submit(graph, fields, SubmitOptions::new().with_lm(backend))?;
//! ```

pub mod config;
#[cfg(feature = "local")]
pub mod local;
pub mod prompt;
#[cfg(feature = "remote")]
pub mod remote;
pub mod scripted;
mod support;

pub use config::{CliLmConfig, RemoteLmConfig};
pub use scripted::ScriptedLm;
