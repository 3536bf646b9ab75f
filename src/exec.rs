//! External command execution boundary.
//!
//! The database dump/restore tools and the platform's configuration-apply
//! tool are opaque, synchronous external processes. They are invoked through
//! the [`CommandRunner`] capability so the orchestration logic stays
//! testable without touching real system tools.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::utils::errors::{EngineError, Result};

/// Captured result of one external tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program to completion, capturing stdout and stderr.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Run a program with its stdout streamed into `dest_file`. The returned
    /// output carries an empty stdout; stderr is still captured. For tools
    /// whose output can be far larger than memory (database dumps).
    async fn run_to_file(
        &self,
        program: &str,
        args: &[String],
        dest_file: &Path,
    ) -> Result<CommandOutput>;

    /// Run a program with the contents of `stdin_file` streamed to its
    /// stdin.
    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[String],
        stdin_file: &Path,
    ) -> Result<CommandOutput>;
}

/// Production runner backed by `tokio::process`.
pub struct SystemRunner;

impl SystemRunner {
    fn finish(program: &str, output: std::process::Output, start: Instant) -> CommandOutput {
        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis(),
        };
        info!(
            program,
            status = result.status,
            duration_ms = result.duration_ms,
            "External command finished"
        );
        result
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(program, args = ?args, "Running external command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Command(format!("{program}: {e}")))?;

        Ok(Self::finish(program, output, start))
    }

    async fn run_to_file(
        &self,
        program: &str,
        args: &[String],
        dest_file: &Path,
    ) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(
            program,
            args = ?args,
            dest = %dest_file.display(),
            "Running external command with stdout to file"
        );

        // The child writes straight into the destination file; nothing of
        // its stdout passes through this process.
        // `Command::output` would override the stdout redirection with a
        // pipe, so spawn and wait explicitly to keep the file handle.
        let file = std::fs::File::create(dest_file)?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Command(format!("{program}: {e}")))?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Command(format!("{program}: {e}")))?;

        Ok(Self::finish(program, output, start))
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[String],
        stdin_file: &Path,
    ) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(
            program,
            args = ?args,
            stdin = %stdin_file.display(),
            "Running external command with stdin"
        );

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Command(format!("{program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Command(format!("{program}: stdin not captured")))?;

        // Stream the file into the child while draining its output, so an
        // input larger than memory neither buffers nor deadlocks the pipes.
        let input = stdin_file.to_path_buf();
        let feeder = tokio::spawn(async move {
            let mut file = tokio::fs::File::open(&input).await?;
            tokio::io::copy(&mut file, &mut stdin).await?;
            stdin.shutdown().await?;
            Ok::<_, std::io::Error>(())
        });

        let output = child.wait_with_output().await?;
        let fed = feeder
            .await
            .map_err(|e| EngineError::Command(format!("{program}: {e}")))?;
        let result = Self::finish(program, output, start);

        // A child that dies mid-input breaks the pipe; its exit status is
        // the authoritative failure there.
        if let Err(e) = fed {
            if result.success() {
                return Err(EngineError::Io(e));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
pub mod fake {
    //! Test double that records invocations instead of spawning processes.

    use super::{CommandOutput, CommandRunner};
    use crate::utils::errors::Result;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct Invocation {
        pub program: String,
        pub args: Vec<String>,
        pub stdin: Option<Vec<u8>>,
    }

    #[derive(Default)]
    pub struct FakeRunner {
        pub invocations: Mutex<Vec<Invocation>>,
        exit_codes: Mutex<HashMap<String, i32>>,
        stdout: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every invocation of `program` exit with `code`.
        pub fn fail_program(&self, program: &str, code: i32) {
            self.exit_codes
                .lock()
                .unwrap()
                .insert(program.to_string(), code);
        }

        /// Fix the stdout produced by invocations of `program`.
        pub fn set_stdout(&self, program: &str, data: &[u8]) {
            self.stdout
                .lock()
                .unwrap()
                .insert(program.to_string(), data.to_vec());
        }

        pub fn programs_run(&self) -> Vec<String> {
            self.invocations
                .lock()
                .unwrap()
                .iter()
                .map(|i| i.program.clone())
                .collect()
        }

        pub fn invocation_of(&self, program: &str) -> Option<Invocation> {
            self.invocations
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.program == program)
                .cloned()
        }

        fn record(&self, program: &str, args: &[String], stdin: Option<Vec<u8>>) -> CommandOutput {
            self.invocations.lock().unwrap().push(Invocation {
                program: program.to_string(),
                args: args.to_vec(),
                stdin,
            });
            CommandOutput {
                status: self
                    .exit_codes
                    .lock()
                    .unwrap()
                    .get(program)
                    .copied()
                    .unwrap_or(0),
                stdout: self
                    .stdout
                    .lock()
                    .unwrap()
                    .get(program)
                    .cloned()
                    .unwrap_or_default(),
                stderr: String::new(),
                duration_ms: 0,
            }
        }
    }

    impl CommandRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            Ok(self.record(program, args, None))
        }

        async fn run_to_file(
            &self,
            program: &str,
            args: &[String],
            dest_file: &Path,
        ) -> Result<CommandOutput> {
            let output = self.record(program, args, None);
            std::fs::write(dest_file, &output.stdout)?;
            Ok(CommandOutput {
                stdout: Vec::new(),
                ..output
            })
        }

        async fn run_with_stdin(
            &self,
            program: &str,
            args: &[String],
            stdin_file: &Path,
        ) -> Result<CommandOutput> {
            let data = std::fs::read(stdin_file)?;
            Ok(self.record(program, args, Some(data)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout_and_status() {
        let runner = SystemRunner;
        let output = runner
            .run("echo", &["hello".to_string()])
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_captured_not_an_error() {
        let runner = SystemRunner;
        let output = runner
            .run("sh", &["-c".to_string(), "exit 3".to_string()])
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.status, 3);
    }

    #[tokio::test]
    async fn test_missing_program_is_a_command_error() {
        let runner = SystemRunner;
        let result = runner.run("definitely-not-a-real-tool", &[]).await;
        assert!(matches!(result, Err(EngineError::Command(_))));
    }

    #[tokio::test]
    async fn test_run_to_file_streams_stdout_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dump.sql");

        let runner = SystemRunner;
        let output = runner
            .run_to_file(
                "sh",
                &["-c".to_string(), "printf 'CREATE TABLE t;\n'".to_string()],
                &dest,
            )
            .await
            .unwrap();

        assert!(output.success());
        // Stdout goes to the file, never through the process.
        assert!(output.stdout.is_empty());
        assert_eq!(std::fs::read(&dest).unwrap(), b"CREATE TABLE t;\n");
    }

    #[tokio::test]
    async fn test_run_to_file_captures_failure_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dump.sql");

        let runner = SystemRunner;
        let output = runner
            .run_to_file(
                "sh",
                &["-c".to_string(), "echo boom >&2; exit 5".to_string()],
                &dest,
            )
            .await
            .unwrap();

        assert_eq!(output.status, 5);
        assert_eq!(output.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn test_run_with_stdin_survives_child_exiting_early() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("big.sql");
        // Larger than the pipe buffer, so the writer outlives the reader.
        std::fs::write(&input, vec![b'x'; 1 << 20]).unwrap();

        let runner = SystemRunner;
        let output = runner
            .run_with_stdin(
                "sh",
                &["-c".to_string(), "head -c 10 >/dev/null; exit 4".to_string()],
                &input,
            )
            .await
            .unwrap();

        assert_eq!(output.status, 4);
    }

    #[tokio::test]
    async fn test_run_with_stdin_feeds_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "line one\n").unwrap();

        let runner = SystemRunner;
        let output = runner.run_with_stdin("cat", &[], &input).await.unwrap();

        assert!(output.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "line one\n");
    }
}
