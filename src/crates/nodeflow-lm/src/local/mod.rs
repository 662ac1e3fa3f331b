//! Local subprocess backends.

mod cli;

pub use cli::CliLm;
