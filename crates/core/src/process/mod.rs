//! Transcoder subprocess supervision.
//!
//! The session manager only depends on the [`Supervisor`] and
//! [`ProcessHandle`] traits. [`ffmpeg::FfmpegSupervisor`] is the production
//! implementation; tests provide an in-memory one.

pub mod ffmpeg;

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::media::TranscodeCommand;

pub use ffmpeg::FfmpegSupervisor;

/// Writable standard input of a running process.
pub type ProcessStdin = Pin<Box<dyn AsyncWrite + Send>>;

/// Process-wide tunables for launching transcoders.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Path to (or name of) the ffmpeg binary.
    pub ffmpeg_path: PathBuf,
    /// Time a process gets to exit after SIGTERM before it is killed.
    pub stop_grace: Duration,
    /// A process that exits within this window counts as a failed launch.
    pub startup_window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            stop_grace: Duration::from_secs(2),
            startup_window: Duration::from_millis(250),
        }
    }
}

/// Launches transcoder processes and answers capability questions.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Whether the transcoder binary was built with the named encoder.
    async fn probe_codec(&self, codec: &str) -> bool;

    /// Launch a process running `command`.
    ///
    /// Fails with [`StreamError::Launch`](crate::StreamError::Launch) when the
    /// binary is missing or the process exits straight away.
    async fn start(&self, command: &TranscodeCommand, stdin: bool) -> Result<Box<dyn ProcessHandle>>;
}

/// Exclusive handle to one running process.
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, if the process has not been reaped yet.
    fn id(&self) -> Option<u32>;

    /// Take the process's standard input. Returns `None` when the process was
    /// started without stdin or it was already taken.
    fn take_stdin(&mut self) -> Option<ProcessStdin>;

    /// Terminate the process: polite signal, bounded grace, then kill.
    /// Succeeds on a process that has already exited.
    async fn stop(&mut self) -> Result<()>;
}
