//! Process Supervisor (C3): spawns a runner's built command, streams its
//! stdout/stderr, and enforces idle/hard timeouts plus cancellation.
//! Grounded in the teacher's `supervisor`-style agent process management:
//! a `tokio::select!`-driven loop merging stdout/stderr readers, a
//! ring-buffer output budget, and SIGTERM→SIGKILL termination on unix.
//!
//! Adds over the teacher's shape: a periodic `sysinfo`-based resource
//! sampler emitting `SupervisorEvent::ResourceUsage`, and an
//! `output_files` listing attached to `Completed` by scanning the
//! runner command's `expected_outputs` directory.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::execution::ResourceUsage;
use crate::error::{Result, TaskGridError};
use crate::ids::ExecutionId;
use crate::runner::RunnerCommand;

/// Grace period after SIGTERM before escalating to SIGKILL.
const SIGTERM_GRACE: Duration = Duration::from_secs(3);

/// Minimum interval between resource-usage samples (spec caps this at 1 Hz).
const RESOURCE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub eid: ExecutionId,
    pub idle_timeout: Duration,
    pub hard_timeout: Duration,
    /// Maximum bytes of combined stdout/stderr to retain in memory.
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Started {
        eid: ExecutionId,
        pid: u32,
        started_at: DateTime<Utc>,
    },
    Stdout {
        eid: ExecutionId,
        line: String,
    },
    Stderr {
        eid: ExecutionId,
        line: String,
    },
    ResourceUsage {
        eid: ExecutionId,
        usage: ResourceUsage,
        sampled_at: DateTime<Utc>,
    },
    Completed {
        eid: ExecutionId,
        exit_code: i32,
        completed_at: DateTime<Utc>,
        output_files: Vec<String>,
    },
    Failed {
        eid: ExecutionId,
        error: String,
        failed_at: DateTime<Utc>,
    },
    TimedOut {
        eid: ExecutionId,
        reason: TimeoutReason,
        timed_out_at: DateTime<Utc>,
    },
    Cancelled {
        eid: ExecutionId,
        cancelled_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    Idle,
    Hard,
}

#[derive(Debug)]
pub struct SupervisorResult {
    pub eid: ExecutionId,
    pub exit_code: Option<i32>,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub output_files: Vec<String>,
    pub last_usage: Option<ResourceUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Completed,
    Failed,
    TimedOut(TimeoutReason),
    Cancelled,
}

/// Handle allowing the caller to cancel a running supervised process.
pub struct SupervisorHandle {
    cancel_tx: tokio::sync::oneshot::Sender<()>,
}

impl SupervisorHandle {
    pub fn cancel(self) {
        let _ = self.cancel_tx.send(());
    }
}

/// Manages a single execution's child process from spawn to a terminal event.
pub struct ExecutionSupervisor {
    config: SupervisorConfig,
}

impl ExecutionSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub async fn spawn(&self, command: RunnerCommand) -> Result<(mpsc::Receiver<SupervisorEvent>, SupervisorHandle)> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();

        let config = self.config.clone();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&command.cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| TaskGridError::Runtime(format!("failed to spawn process: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| TaskGridError::Runtime("process exited before pid was read".into()))?;

        let started_at = Utc::now();
        let _ = event_tx
            .send(SupervisorEvent::Started {
                eid: config.eid,
                pid,
                started_at,
            })
            .await;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let expected_outputs = command.expected_outputs.clone();

        tokio::spawn(async move {
            supervise_loop(config, child, pid, stdout, stderr, expected_outputs, event_tx, cancel_rx).await;
        });

        let handle = SupervisorHandle { cancel_tx };
        Ok((event_rx, handle))
    }

    pub async fn run_to_completion(&self, command: RunnerCommand) -> Result<SupervisorResult> {
        let (mut rx, _handle) = self.spawn(command).await?;

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        let mut output_files = Vec::new();
        let mut last_usage = None;
        let mut exit_code: Option<i32> = None;
        let mut status = ProcessStatus::Failed;
        let mut started_at = Utc::now();
        let mut completed_at = started_at;

        while let Some(event) = rx.recv().await {
            match event {
                SupervisorEvent::Started { started_at: ts, .. } => {
                    started_at = ts;
                }
                SupervisorEvent::Stdout { line, .. } => stdout_lines.push(line),
                SupervisorEvent::Stderr { line, .. } => stderr_lines.push(line),
                SupervisorEvent::ResourceUsage { usage, .. } => {
                    last_usage = Some(usage);
                }
                SupervisorEvent::Completed {
                    exit_code: code,
                    completed_at: ts,
                    output_files: files,
                    ..
                } => {
                    exit_code = Some(code);
                    completed_at = ts;
                    output_files = files;
                    status = if code == 0 { ProcessStatus::Completed } else { ProcessStatus::Failed };
                }
                SupervisorEvent::Failed { failed_at: ts, .. } => {
                    completed_at = ts;
                    status = ProcessStatus::Failed;
                }
                SupervisorEvent::TimedOut { reason, timed_out_at: ts, .. } => {
                    completed_at = ts;
                    status = ProcessStatus::TimedOut(reason);
                }
                SupervisorEvent::Cancelled { cancelled_at: ts, .. } => {
                    completed_at = ts;
                    status = ProcessStatus::Cancelled;
                }
            }
        }

        Ok(SupervisorResult {
            eid: self.config.eid,
            exit_code,
            status,
            started_at,
            completed_at,
            stdout_lines,
            stderr_lines,
            output_files,
            last_usage,
        })
    }
}

enum OutputLine {
    Stdout(String),
    Stderr(String),
}

#[allow(clippy::too_many_arguments)]
async fn supervise_loop(
    config: SupervisorConfig,
    mut child: tokio::process::Child,
    pid: u32,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    expected_outputs: std::path::PathBuf,
    event_tx: mpsc::Sender<SupervisorEvent>,
    cancel_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let eid = config.eid;

    let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(256);
    let stdout_tx = line_tx.clone();
    let stderr_tx = line_tx;

    let stdout_task = tokio::spawn(async move {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stdout_tx.send(OutputLine::Stdout(line)).await.is_err() {
                break;
            }
        }
    });

    let stderr_task = tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stderr_tx.send(OutputLine::Stderr(line)).await.is_err() {
                break;
            }
        }
    });

    let mut total_bytes: usize = 0;
    let mut truncated = false;
    let max_bytes = config.max_output_bytes;

    let mut ring: VecDeque<OutputLine> = VecDeque::new();
    let mut ring_bytes: usize = 0;

    let hard_deadline = tokio::time::Instant::now() + config.hard_timeout;
    let idle_dur = config.idle_timeout;

    let mut resource_ticker = tokio::time::interval(RESOURCE_SAMPLE_INTERVAL);
    resource_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sys = System::new();

    tokio::pin!(cancel_rx);

    loop {
        let idle_timeout = tokio::time::sleep(idle_dur);
        let hard_timeout = tokio::time::sleep_until(hard_deadline);

        tokio::select! {
            biased;

            _ = &mut cancel_rx => {
                debug!(%eid, "cancel signal received");
                terminate_child(&mut child).await;
                let _ = event_tx.send(SupervisorEvent::Cancelled {
                    eid,
                    cancelled_at: Utc::now(),
                }).await;
                break;
            }

            _ = hard_timeout => {
                warn!(%eid, elapsed_secs = config.hard_timeout.as_secs(), "hard timeout reached");
                terminate_child(&mut child).await;
                let _ = event_tx.send(SupervisorEvent::TimedOut {
                    eid,
                    reason: TimeoutReason::Hard,
                    timed_out_at: Utc::now(),
                }).await;
                break;
            }

            _ = idle_timeout => {
                warn!(%eid, idle_secs = idle_dur.as_secs(), "idle timeout reached");
                terminate_child(&mut child).await;
                let _ = event_tx.send(SupervisorEvent::TimedOut {
                    eid,
                    reason: TimeoutReason::Idle,
                    timed_out_at: Utc::now(),
                }).await;
                break;
            }

            _ = resource_ticker.tick() => {
                if let Some(usage) = sample_resource_usage(&mut sys, pid) {
                    let _ = event_tx.send(SupervisorEvent::ResourceUsage {
                        eid,
                        usage,
                        sampled_at: Utc::now(),
                    }).await;
                }
            }

            line = line_rx.recv() => {
                match line {
                    Some(output) => {
                        let line_bytes = match &output {
                            OutputLine::Stdout(l) | OutputLine::Stderr(l) => l.len(),
                        };
                        total_bytes += line_bytes;

                        if total_bytes > max_bytes {
                            if !truncated {
                                warn!(%eid, total_bytes, max_bytes, "output exceeds max_output_bytes; truncating older lines");
                                truncated = true;
                            }
                            ring_bytes += line_bytes;
                            ring.push_back(output);
                            while ring_bytes > max_bytes {
                                if let Some(old) = ring.pop_front() {
                                    let old_bytes = match &old {
                                        OutputLine::Stdout(l) | OutputLine::Stderr(l) => l.len(),
                                    };
                                    ring_bytes -= old_bytes;
                                }
                            }
                        } else {
                            match output {
                                OutputLine::Stdout(l) => {
                                    let _ = event_tx.send(SupervisorEvent::Stdout { eid, line: l }).await;
                                }
                                OutputLine::Stderr(l) => {
                                    let _ = event_tx.send(SupervisorEvent::Stderr { eid, line: l }).await;
                                }
                            }
                        }
                    }
                    None => {
                        match child.wait().await {
                            Ok(exit_status) => {
                                let code = exit_status.code().unwrap_or(-1);
                                debug!(%eid, code, "process exited");
                                drain_ring(&ring, eid, &event_tx).await;
                                let output_files = list_output_files(&expected_outputs).await;
                                let _ = event_tx.send(SupervisorEvent::Completed {
                                    eid,
                                    exit_code: code,
                                    completed_at: Utc::now(),
                                    output_files,
                                }).await;
                            }
                            Err(e) => {
                                drain_ring(&ring, eid, &event_tx).await;
                                let _ = event_tx.send(SupervisorEvent::Failed {
                                    eid,
                                    error: e.to_string(),
                                    failed_at: Utc::now(),
                                }).await;
                            }
                        }
                        break;
                    }
                }
            }
        }
    }

    stdout_task.abort();
    stderr_task.abort();
}

fn sample_resource_usage(sys: &mut System, pid: u32) -> Option<ResourceUsage> {
    let sys_pid = Pid::from_u32(pid);
    if !sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::everything()) {
        return None;
    }
    let process = sys.process(sys_pid)?;
    Some(ResourceUsage {
        cpu_time_ms: (process.cpu_usage() as u64).saturating_mul(10),
        memory_used_bytes: process.memory(),
        disk_used_bytes: process.disk_usage().total_written_bytes + process.disk_usage().total_read_bytes,
    })
}

async fn drain_ring(ring: &VecDeque<OutputLine>, eid: ExecutionId, event_tx: &mpsc::Sender<SupervisorEvent>) {
    for item in ring {
        match item {
            OutputLine::Stdout(l) => {
                let _ = event_tx.send(SupervisorEvent::Stdout { eid, line: l.clone() }).await;
            }
            OutputLine::Stderr(l) => {
                let _ = event_tx.send(SupervisorEvent::Stderr { eid, line: l.clone() }).await;
            }
        }
    }
}

/// Lists relative paths of files written under the sandbox's output
/// directory, tolerating a missing directory (nothing was produced).
async fn list_output_files(dir: &std::path::Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return out,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(file_type) = entry.file_type().await {
            if file_type.is_file() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    out
}

#[cfg(unix)]
async fn terminate_child(child: &mut tokio::process::Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;

    if let Some(pid) = child.id() {
        let pid = NixPid::from_raw(pid as i32);
        let _ = signal::kill(pid, Signal::SIGTERM);

        match tokio::time::timeout(SIGTERM_GRACE, child.wait()).await {
            Ok(_) => (),
            Err(_) => {
                warn!(?pid, "process did not exit after SIGTERM; sending SIGKILL");
                let _ = signal::kill(pid, Signal::SIGKILL);
                let _ = child.wait().await;
            }
        }
    } else {
        let _ = child.wait().await;
    }
}

#[cfg(windows)]
async fn terminate_child(child: &mut tokio::process::Child) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}
