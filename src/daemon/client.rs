//! Client side of the daemon protocol: spawn `hdlcheck daemon` and talk to
//! it over its stdin/stdout.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;

use super::protocol::{Request, Response};
use crate::facts::{Delta, Tables};
use crate::policy::EvalResult;
use crate::schema::{self, SchemaError};

/// Overrides the daemon binary. Defaults to the current executable.
pub const DAEMON_BIN_ENV: &str = "HDLCHECK_DAEMON_BIN";

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to start daemon {program}: {source} (set HDLCHECK_DAEMON_BIN to the hdlcheck binary)")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot locate the daemon binary: {0} (set HDLCHECK_DAEMON_BIN)")]
    Locate(#[source] io::Error),
    #[error("daemon exited before replying")]
    Closed,
    #[error("daemon sent an empty reply")]
    EmptyReply,
    #[error("daemon pipe failed: {0}")]
    Pipe(#[from] io::Error),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid payload: {0}")]
    Schema(#[from] SchemaError),
    #[error("daemon reported an error: {0}")]
    Remote(String),
}

/// A running daemon subprocess. The child is killed on drop.
pub struct DaemonClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl DaemonClient {
    /// Spawn the daemon named by [`DAEMON_BIN_ENV`], or this executable.
    pub fn spawn() -> Result<Self, DaemonError> {
        let program = match std::env::var_os(DAEMON_BIN_ENV).filter(|v| !v.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_exe().map_err(DaemonError::Locate)?,
        };
        Self::spawn_program(&program, &[])
    }

    /// Spawn `program daemon <extra_args>`.
    pub fn spawn_program(program: &Path, extra_args: &[&str]) -> Result<Self, DaemonError> {
        let mut child = Command::new(program)
            .arg("daemon")
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| DaemonError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(DaemonError::Closed);
        };
        tracing::debug!(program = %program.display(), pid = child.id(), "daemon started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    pub fn init(&mut self, tables: Tables) -> Result<EvalResult, DaemonError> {
        self.request(&Request::Init { tables })
    }

    pub fn delta(&mut self, delta: Delta) -> Result<EvalResult, DaemonError> {
        self.request(&Request::delta(delta))
    }

    pub fn snapshot(&mut self) -> Result<EvalResult, DaemonError> {
        self.request(&Request::Snapshot)
    }

    /// Send one request and wait for its response.
    pub fn request(&mut self, request: &Request) -> Result<EvalResult, DaemonError> {
        schema::validate_request(request)?;
        self.send_line(&request.to_line()?)
    }

    /// Send a raw line without validating it first.
    pub fn send_line(&mut self, line: &str) -> Result<EvalResult, DaemonError> {
        writeln!(self.stdin, "{}", line)?;
        self.stdin.flush()?;

        let mut reply = String::new();
        if self.stdout.read_line(&mut reply)? == 0 {
            return Err(DaemonError::Closed);
        }
        if reply.trim().is_empty() {
            return Err(DaemonError::EmptyReply);
        }
        match schema::parse_response(reply.trim_end())? {
            Response::Result(result) => Ok(result),
            Response::Error { message } => Err(DaemonError::Remote(message)),
        }
    }
}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_failure_is_typed() {
        let missing = Path::new("/nonexistent/hdlcheck-daemon");
        match DaemonClient::spawn_program(missing, &[]) {
            Err(DaemonError::Spawn { program, .. }) => assert_eq!(program, missing),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("spawned a missing binary"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_closed_pipe_is_typed() {
        // `true daemon` exits at once without reading or writing.
        let mut client = DaemonClient::spawn_program(Path::new("true"), &[]).unwrap();
        let err = client.snapshot().unwrap_err();
        assert!(matches!(err, DaemonError::Closed | DaemonError::Pipe(_)), "{}", err);
    }
}
