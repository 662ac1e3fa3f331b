//! Backend configuration.

use std::time::Duration;

use anyhow::Context;

/// Default per-call timeout. Generous: complex graphs legitimately need long
/// LLM calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for a remote HTTP backend.
#[derive(Clone, Debug)]
pub struct RemoteLmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl RemoteLmConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Read the API key from an environment variable.
    pub fn from_env(
        env_var: &str,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let api_key = std::env::var(env_var)
            .with_context(|| format!("environment variable {} not set", env_var))?;
        Ok(Self::new(base_url, api_key, model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Configuration for a local CLI subprocess backend.
///
/// The prompt is passed as the final argument; the subprocess must print its
/// answer to stdout. Stdin is always detached so the child cannot steal
/// terminal input from an interactive session.
#[derive(Clone, Debug)]
pub struct CliLmConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CliLmConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
