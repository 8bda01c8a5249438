//! Turning a [`ServerConfig`] into a byte stream.

use rmcp::transport::TokioChildProcess;
use tokio::io::DuplexStream;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};

/// A transport ready for the protocol handshake.
pub enum Launched {
    /// A spawned child speaking over its stdin and stdout.
    Process(TokioChildProcess),
    /// An in-process stream.
    Stream(DuplexStream),
}

impl std::fmt::Debug for Launched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process(_) => f.write_str("Launched::Process"),
            Self::Stream(_) => f.write_str("Launched::Stream"),
        }
    }
}

/// Creates transports for servers.
pub trait ServerLauncher: Send + Sync {
    /// Start `config` and hand back its transport.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ConnectFailed`] if the server cannot be started.
    fn launch(&self, config: &ServerConfig) -> McpResult<Launched>;
}

/// Spawns servers as child processes.
///
/// Standard error is inherited so server diagnostics never mix with
/// protocol traffic on standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    fn command(config: &ServerConfig) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stderr(std::process::Stdio::inherit());
        cmd
    }
}

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, config: &ServerConfig) -> McpResult<Launched> {
        if config.command.trim().is_empty() {
            return Err(McpError::ConnectFailed {
                name: config.name.clone(),
                reason: "no command configured".to_string(),
            });
        }

        debug!(
            server = %config.name,
            command = %config.command,
            args = ?config.args,
            "Spawning MCP server"
        );

        let transport =
            TokioChildProcess::new(Self::command(config)).map_err(|e| McpError::ConnectFailed {
                name: config.name.clone(),
                reason: format!("failed to spawn '{}': {e}", config.command),
            })?;

        Ok(Launched::Process(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_command_fails_to_launch() {
        let config = ServerConfig::stdio("beta", "/nonexistent/definitely-missing-server");
        let err = ProcessLauncher.launch(&config).unwrap_err();
        match err {
            McpError::ConnectFailed { name, reason } => {
                assert_eq!(name, "beta");
                assert!(reason.contains("definitely-missing-server"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_command_rejected() {
        let config = ServerConfig::stdio("empty", "");
        assert!(matches!(
            ProcessLauncher.launch(&config),
            Err(McpError::ConnectFailed { .. })
        ));
    }

    #[test]
    fn test_command_carries_overlay() {
        let config = ServerConfig::stdio("x", "server")
            .with_args(["--stdio"])
            .with_env("LEVEL", "debug")
            .with_cwd("/tmp");
        let cmd = ProcessLauncher::command(&config);
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "server");
        assert_eq!(std_cmd.get_args().collect::<Vec<_>>(), vec!["--stdio"]);
        assert!(
            std_cmd
                .get_envs()
                .any(|(k, v)| k == "LEVEL" && v.is_some_and(|v| v == "debug"))
        );
        assert_eq!(
            std_cmd.get_current_dir(),
            Some(std::path::Path::new("/tmp"))
        );
    }
}
