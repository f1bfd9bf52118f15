//! # External Command Handler
//!
//! Hosts a handler implemented as external programs, described by a JSON
//! manifest:
//!
//! ```json
//! {
//!   "name": "sentiment",
//!   "working_dir": ".",
//!   "main":  { "command": "python3", "args": ["main.py"] },
//!   "setup": { "command": "python3", "args": ["setup.py"] }
//! }
//! ```
//!
//! - `main` is spawned per request. The payload is written to its stdin as
//!   JSON, the environment context becomes its process environment, and its
//!   stdout is parsed as the response. A non-zero exit is a handler failure.
//! - `setup` (optional) is spawned once. Every stdout line becomes a progress
//!   line in the status store. A non-zero exit is a setup failure.
//!
//! stderr of both is inherited, so child diagnostics land on the launcher's
//! diagnostic channel.

use super::{Capabilities, Handler};
use crate::{
    environment::Environment,
    error::ManifestError,
    protocol::{Payload, Response},
    status_store::StatusWriter,
};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::ChildStdin,
};

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Manifest describing an external-command handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Relative paths resolve against the manifest's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub main: CommandSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<CommandSpec>,
}

impl HandlerManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: HandlerManifest =
            serde_json::from_str(&contents).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), ManifestError> {
        if self.main.command.trim().is_empty() {
            return Err(ManifestError::EmptyCommand {
                path: path.to_path_buf(),
                operation: "main",
            });
        }
        if let Some(setup) = &self.setup
            && setup.command.trim().is_empty()
        {
            return Err(ManifestError::EmptyCommand {
                path: path.to_path_buf(),
                operation: "setup",
            });
        }
        Ok(())
    }
}

/// Handler backed by external programs.
#[derive(Debug, Clone)]
pub struct ExecHandler {
    name: String,
    working_dir: PathBuf,
    main: CommandSpec,
    setup: Option<CommandSpec>,
}

impl ExecHandler {
    pub fn new(manifest: HandlerManifest, base_dir: &Path) -> Self {
        let working_dir = match manifest.working_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };
        Self {
            name: manifest.name.unwrap_or_else(|| manifest.main.command.clone()),
            working_dir,
            main: manifest.main,
            setup: manifest.setup,
        }
    }

    pub fn from_manifest_file(path: &Path) -> Result<Self, ManifestError> {
        let manifest = HandlerManifest::load(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok(Self::new(manifest, base_dir))
    }

    fn command(&self, spec: &CommandSpec, env: &Environment) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&self.working_dir)
            .envs(env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

fn payload_bytes(payload: &Payload) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(payload).context("Failed to encode payload")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writes the payload on its own task, so a child that prints before it
/// reads cannot block on a full stdout pipe while we block on its stdin.
fn feed_stdin(mut stdin: ChildStdin, bytes: Vec<u8>) {
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&bytes).await {
            tracing::debug!("Handler closed stdin early: {}", e);
        }
    });
}

#[async_trait]
impl Handler for ExecHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            setup: self.setup.is_some(),
        }
    }

    async fn main(&self, payload: Payload, env: &Environment) -> Result<Response> {
        let mut child = self
            .command(&self.main, env)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.main.command))?;

        if let Some(stdin) = child.stdin.take() {
            feed_stdin(stdin, payload_bytes(&payload)?);
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for '{}'", self.main.command))?;
        if !output.status.success() {
            bail!("'{}' exited with {}", self.main.command, output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout.trim();
        if text.is_empty() {
            bail!("'{}' produced no output", self.main.command);
        }
        let value = serde_json::from_str(text)
            .with_context(|| format!("'{}' did not print valid JSON", self.main.command))?;
        Ok(Response::from_handler_output(value))
    }

    async fn setup(&self, payload: Payload, env: &Environment, status: &StatusWriter) -> Result<()> {
        let Some(spec) = &self.setup else {
            bail!("handler '{}' does not implement setup", self.name);
        };

        let mut child = self
            .command(spec, env)
            .spawn()
            .with_context(|| format!("Failed to spawn setup '{}'", spec.command))?;

        if let Some(stdin) = child.stdin.take() {
            feed_stdin(stdin, payload_bytes(&payload)?);
        }

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .context("Failed to read setup output")?
            {
                status.append(&line)?;
            }
        }

        let exit = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for setup '{}'", spec.command))?;
        if !exit.success() {
            bail!("setup '{}' exited with {}", spec.command, exit);
        }
        Ok(())
    }
}
