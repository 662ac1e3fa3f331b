//! Subprocess backend shelling out to a local model CLI.
//!
//! Subprocess discipline:
//!
//! - children run in their own process group (`process_group(0)`), so an
//!   interrupt aimed at the interactive parent never reaches them;
//! - stdin is detached to the null device, so a child can never steal
//!   terminal input from the shell;
//! - on timeout the child is killed and reaped before the error is returned;
//!   `kill_on_drop` covers cancellation of the surrounding run.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use nodeflow_core::{Chosen, LmBackend, NodeDescriptor, Result};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CliLmConfig;
use crate::prompt::{choose_prompt, fill_prompt};
use crate::support::{choose_via, fill_via};

/// CLI subprocess backend. The prompt is passed as the final argument; the
/// child's stdout is the completion.
#[derive(Clone)]
pub struct CliLm {
    config: CliLmConfig,
}

impl CliLm {
    pub fn new(config: CliLmConfig) -> Self {
        Self { config }
    }

    async fn complete(&self, prompt: String) -> anyhow::Result<String> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.config.program))?;
        debug!(program = %self.config.program, "subprocess spawned");

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("subprocess stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("subprocess stderr not captured"))?;

        let outcome = {
            let collect = async {
                let mut out = Vec::new();
                let mut err_buf = Vec::new();
                let (status, _, _) = tokio::try_join!(
                    child.wait(),
                    stdout.read_to_end(&mut out),
                    stderr.read_to_end(&mut err_buf),
                )?;
                Ok::<_, std::io::Error>((status, out, err_buf))
            };
            tokio::time::timeout(self.config.timeout, collect).await
        };

        match outcome {
            Ok(Ok((status, out, err_buf))) => {
                if !status.success() {
                    return Err(anyhow!(
                        "'{}' exited with {}: {}",
                        self.config.program,
                        status,
                        String::from_utf8_lossy(&err_buf).trim()
                    ));
                }
                Ok(String::from_utf8_lossy(&out).into_owned())
            }
            Ok(Err(io_err)) => Err(io_err).context("subprocess I/O failed"),
            Err(_elapsed) => {
                warn!(program = %self.config.program, "subprocess timed out, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(anyhow!(
                    "'{}' timed out after {:?}",
                    self.config.program,
                    self.config.timeout
                ))
            }
        }
    }
}

#[async_trait]
impl LmBackend for CliLm {
    async fn choose_type(
        &self,
        candidates: &[Arc<NodeDescriptor>],
        allows_end: bool,
        context: &Map<String, Value>,
    ) -> Result<Chosen> {
        choose_via(candidates, allows_end, |hint| {
            let prompt = choose_prompt(candidates, allows_end, context, hint.as_deref());
            self.complete(prompt)
        })
        .await
    }

    async fn fill(
        &self,
        target: &Arc<NodeDescriptor>,
        context: &Map<String, Value>,
        instruction: &str,
    ) -> Result<Map<String, Value>> {
        fill_via(target, |hint| {
            let prompt = fill_prompt(target, context, instruction, hint.as_deref());
            self.complete(prompt)
        })
        .await
    }

    fn name(&self) -> &str {
        &self.config.program
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nodeflow_core::{FieldSpec, FieldType};
    use std::time::Duration;

    fn echo_backend(script: &str) -> CliLm {
        CliLm::new(
            CliLmConfig::new("sh")
                .with_args(["-c", script])
                .with_timeout(Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn fill_parses_subprocess_stdout() {
        // The prompt lands in $0 and is ignored; stdout is a fixed answer.
        let backend = echo_backend("echo '{\"x\": 7}'");
        let target = Arc::new(
            NodeDescriptor::new("T").with_field(FieldSpec::plain("x", FieldType::Int)),
        );
        let fields = backend.fill(&target, &Map::new(), "T").await.unwrap();
        assert_eq!(fields["x"], serde_json::json!(7));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_transport_error() {
        let backend = CliLm::new(
            CliLmConfig::new("sh")
                .with_args(["-c", "echo doomed >&2; exit 3"])
                .with_timeout(Duration::from_secs(5)),
        );
        let target = Arc::new(
            NodeDescriptor::new("T").with_field(FieldSpec::plain("x", FieldType::Int)),
        );
        let err = backend.fill(&target, &Map::new(), "T").await.unwrap_err();
        assert_eq!(err.kind_name(), "lm");
        assert!(err.to_string().contains("doomed"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let backend = CliLm::new(
            CliLmConfig::new("sh")
                .with_args(["-c", "sleep 30"])
                .with_timeout(Duration::from_millis(100)),
        );
        let started = std::time::Instant::now();
        let err = backend.complete("ignored".into()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
