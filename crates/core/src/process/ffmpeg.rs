use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::error::{Result, StreamError};
use crate::media::TranscodeCommand;
use crate::process::{ProcessHandle, ProcessStdin, Supervisor, SupervisorConfig};

/// [`Supervisor`] backed by real ffmpeg processes.
#[derive(Debug, Clone)]
pub struct FfmpegSupervisor {
    config: Arc<SupervisorConfig>,
}

impl FfmpegSupervisor {
    pub fn new(config: Arc<SupervisorConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    fn program(&self) -> String {
        self.config.ffmpeg_path.display().to_string()
    }
}

#[async_trait]
impl Supervisor for FfmpegSupervisor {
    async fn probe_codec(&self, codec: &str) -> bool {
        let output = Command::new(&self.config.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let listing = String::from_utf8_lossy(&output.stdout);
                let found = listing
                    .lines()
                    .any(|line| line.split_whitespace().any(|word| word == codec));
                tracing::debug!(codec, found, "probed transcoder encoders");
                found
            }
            Ok(output) => {
                tracing::warn!(codec, status = %output.status, "encoder probe failed");
                false
            }
            Err(e) => {
                tracing::warn!(codec, program = %self.program(), error = %e, "encoder probe could not run");
                false
            }
        }
    }

    async fn start(&self, command: &TranscodeCommand, stdin: bool) -> Result<Box<dyn ProcessHandle>> {
        let program = self.program();
        let args = command.to_args();

        tracing::debug!(%program, args = %args.join(" "), "launching transcoder");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(if stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamError::launch(&program, e))?;

        let pid = child.id();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(pid, stderr));
        }

        match tokio::time::timeout(self.config.startup_window, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::error!(%program, ?pid, %status, "transcoder exited during startup");
                return Err(StreamError::launch(program, format!("exited immediately ({status})")));
            }
            Ok(Err(e)) => return Err(StreamError::launch(program, e)),
            Err(_) => {}
        }

        tracing::info!(%program, ?pid, "transcoder started");

        Ok(Box::new(FfmpegProcess {
            child,
            pid,
            config: self.config.clone(),
        }))
    }
}

/// ffmpeg logs everything to stderr; surface it at debug level.
async fn forward_stderr(pid: Option<u32>, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(?pid, "ffmpeg: {}", line);
    }
}

/// A running ffmpeg process.
#[derive(Debug)]
pub struct FfmpegProcess {
    child: Child,
    pid: Option<u32>,
    config: Arc<SupervisorConfig>,
}

#[async_trait]
impl ProcessHandle for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdin(&mut self) -> Option<ProcessStdin> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::pin(stdin) as ProcessStdin)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            tracing::debug!(pid = ?self.pid, %status, "transcoder already exited");
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id()
                && let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            {
                tracing::debug!(pid, error = %e, "SIGTERM failed");
            }
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()?;
        }

        match tokio::time::timeout(self.config.stop_grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::debug!(pid = ?self.pid, %status, "transcoder exited");
            }
            Err(_) => {
                tracing::warn!(
                    pid = ?self.pid,
                    grace_ms = self.config.stop_grace.as_millis() as u64,
                    "transcoder ignored SIGTERM, killing"
                );
                self.child.kill().await?;
            }
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::media::Arg;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncWriteExt;

    fn supervisor(program: &str) -> FfmpegSupervisor {
        FfmpegSupervisor::new(Arc::new(SupervisorConfig {
            ffmpeg_path: program.into(),
            stop_grace: Duration::from_millis(500),
            startup_window: Duration::from_millis(100),
        }))
    }

    fn raw(args: &[&str]) -> TranscodeCommand {
        let mut cmd = TranscodeCommand::new();
        cmd.extend(args.iter().map(|arg| Arg::Raw(arg.to_string())));
        cmd
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let err = supervisor("/nonexistent/ffmpeg")
            .start(&TranscodeCommand::new(), false)
            .await
            .err()
            .expect("launch must fail");
        assert!(matches!(err, StreamError::Launch { .. }));
    }

    #[tokio::test]
    async fn immediate_exit_is_a_launch_error() {
        let err = supervisor("false")
            .start(&TranscodeCommand::new(), false)
            .await
            .err()
            .expect("launch must fail");
        assert!(err.to_string().contains("exited immediately"));
    }

    #[tokio::test]
    async fn stop_terminates_long_running_process() {
        let mut process = supervisor("sleep").start(&raw(&["30"]), false).await.unwrap();
        assert!(process.id().is_some());

        let started = Instant::now();
        process.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        // A second stop on the exited process is fine.
        process.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stdin_is_available_when_requested() {
        let mut process = supervisor("cat").start(&TranscodeCommand::new(), true).await.unwrap();
        let mut stdin = process.take_stdin().expect("stdin");
        stdin.write_all(b"v=0\n").await.unwrap();
        stdin.shutdown().await.unwrap();
        assert!(process.take_stdin().is_none());
        process.stop().await.unwrap();
    }

    #[tokio::test]
    async fn probe_of_missing_binary_is_false() {
        assert!(!supervisor("/nonexistent/ffmpeg").probe_codec("libfdk_aac").await);
    }
}
