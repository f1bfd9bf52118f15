//! # Launcher Configuration
//!
//! Resolves the command line and the host-provided environment into a single
//! [`LauncherConfig`]. Command-line flags win over environment variables.
//!
//! | Setting | Flag | Environment |
//! |---------|------|-------------|
//! | handler | `--handler` / `--manifest` | `ACTION_LAUNCHER_HANDLER` / `ACTION_LAUNCHER_MANIFEST` |
//! | readiness line | `--wait-for-ack` | `__OW_WAIT_FOR_ACK` (any non-empty value) |
//! | code identity | `--code-hash` | `__OW_CODE_HASH` |
//! | status store location | `--scratch-dir` | `ACTION_LAUNCHER_SCRATCH_DIR` |
//! | response descriptor | `--output-fd` | |
//! | side parameter prefix | `--env-prefix` | |

use crate::{
    handler::{HandlerOptions, HandlerSource},
    shell::cli::Cli,
    status_store::DEFAULT_IDENTITY,
};
use anyhow::{Result, bail};
use std::{path::PathBuf, time::Duration};

pub const WAIT_FOR_ACK_VAR: &str = "__OW_WAIT_FOR_ACK";
pub const CODE_HASH_VAR: &str = "__OW_CODE_HASH";
pub const HANDLER_VAR: &str = "ACTION_LAUNCHER_HANDLER";
pub const MANIFEST_VAR: &str = "ACTION_LAUNCHER_MANIFEST";
pub const SCRATCH_DIR_VAR: &str = "ACTION_LAUNCHER_SCRATCH_DIR";
pub const DEBUG_VAR: &str = "ACTION_LAUNCHER_DEBUG";

/// Everything bootstrap needs, fully resolved.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub handler: HandlerSource,
    pub handler_options: HandlerOptions,
    pub output_fd: u32,
    pub wait_for_ack: bool,
    pub code_identity: String,
    pub scratch_dir: PathBuf,
    pub env_prefix: String,
}

impl LauncherConfig {
    /// Resolves against the real process environment.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        Self::resolve(cli, |name| std::env::var(name).ok())
    }

    /// Resolves with an injectable variable lookup.
    pub fn resolve(cli: &Cli, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let handler = match (&cli.handler, &cli.manifest) {
            (Some(_), Some(_)) => bail!("--handler and --manifest are mutually exclusive"),
            (Some(name), None) => HandlerSource::Builtin(name.clone()),
            (None, Some(path)) => HandlerSource::Manifest(path.clone()),
            (None, None) => match (var(HANDLER_VAR), var(MANIFEST_VAR)) {
                (Some(name), _) if !name.trim().is_empty() => {
                    HandlerSource::Builtin(name.trim().to_string())
                }
                (_, Some(path)) if !path.trim().is_empty() => {
                    HandlerSource::Manifest(PathBuf::from(path.trim()))
                }
                _ => bail!(
                    "No handler configured: pass --handler <name> or --manifest <path> (or set {HANDLER_VAR} / {MANIFEST_VAR})"
                ),
            },
        };

        let wait_for_ack =
            cli.wait_for_ack || var(WAIT_FOR_ACK_VAR).is_some_and(|v| !v.is_empty());

        let code_identity = cli
            .code_hash
            .clone()
            .or_else(|| var(CODE_HASH_VAR))
            .map(|hash| hash.trim().to_string())
            .filter(|hash| !hash.is_empty())
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_string());

        let scratch_dir = cli
            .scratch_dir
            .clone()
            .or_else(|| var(SCRATCH_DIR_VAR).map(PathBuf::from))
            .unwrap_or_else(std::env::temp_dir);

        if cli.env_prefix.is_empty() {
            bail!("--env-prefix must not be empty");
        }

        Ok(Self {
            handler,
            handler_options: HandlerOptions {
                setup_step: Duration::from_millis(cli.setup_step_ms),
            },
            output_fd: cli.output_fd,
            wait_for_ack,
            code_identity,
            scratch_dir,
            env_prefix: cli.env_prefix.clone(),
        })
    }
}

/// Truthy environment flag: `1`, `true`, `yes` or `on`, case-insensitive.
pub fn env_flag_enabled(value: Option<&str>) -> bool {
    value
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("action_launcher").chain(args.iter().copied()))
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LauncherConfig::resolve(&cli(&["--handler", "hello"]), vars(&[])).unwrap();

        assert_eq!(config.handler, HandlerSource::Builtin("hello".to_string()));
        assert_eq!(config.output_fd, 3);
        assert!(!config.wait_for_ack);
        assert_eq!(config.code_identity, DEFAULT_IDENTITY);
        assert_eq!(config.scratch_dir, std::env::temp_dir());
        assert_eq!(config.env_prefix, "__OW_");
    }

    #[test]
    fn test_host_variables() {
        let config = LauncherConfig::resolve(
            &cli(&["--manifest", "action.json"]),
            vars(&[(WAIT_FOR_ACK_VAR, "1"), (CODE_HASH_VAR, "f00d")]),
        )
        .unwrap();

        assert_eq!(
            config.handler,
            HandlerSource::Manifest(PathBuf::from("action.json"))
        );
        assert!(config.wait_for_ack);
        assert_eq!(config.code_identity, "f00d");
    }

    #[test]
    fn test_empty_ack_variable_does_not_request_ack() {
        let config = LauncherConfig::resolve(
            &cli(&["--handler", "hello"]),
            vars(&[(WAIT_FOR_ACK_VAR, "")]),
        )
        .unwrap();
        assert!(!config.wait_for_ack);
    }

    #[test]
    fn test_flags_override_variables() {
        let config = LauncherConfig::resolve(
            &cli(&["--handler", "hello", "--code-hash", "cli-hash", "--scratch-dir", "/var/scratch"]),
            vars(&[(CODE_HASH_VAR, "env-hash"), (SCRATCH_DIR_VAR, "/tmp/env")]),
        )
        .unwrap();

        assert_eq!(config.code_identity, "cli-hash");
        assert_eq!(config.scratch_dir, PathBuf::from("/var/scratch"));
    }

    #[test]
    fn test_handler_from_environment() {
        let config =
            LauncherConfig::resolve(&cli(&[]), vars(&[(HANDLER_VAR, "hello-setup")])).unwrap();
        assert_eq!(
            config.handler,
            HandlerSource::Builtin("hello-setup".to_string())
        );
    }

    #[test]
    fn test_missing_handler_is_error() {
        let err = LauncherConfig::resolve(&cli(&[]), vars(&[])).unwrap_err();
        assert!(err.to_string().contains("No handler configured"));
    }

    #[test]
    fn test_conflicting_handler_flags() {
        assert!(
            LauncherConfig::resolve(
                &cli(&["--handler", "hello", "--manifest", "a.json"]),
                vars(&[])
            )
            .is_err()
        );
    }

    #[test]
    fn test_env_flag_enabled() {
        assert!(env_flag_enabled(Some("1")));
        assert!(env_flag_enabled(Some(" TRUE ")));
        assert!(env_flag_enabled(Some("on")));
        assert!(!env_flag_enabled(Some("0")));
        assert!(!env_flag_enabled(Some("")));
        assert!(!env_flag_enabled(None));
    }
}
