//! CLI-process adapter — runs an external coding agent (`claude`,
//! `codex`, …) as a child process and observes its output stream.
//!
//! The backend's argument templates decide fresh vs resume invocation;
//! stdout/stderr are captured line-by-line, recorded as raw stream
//! events, and scanned opportunistically for a session id and a final
//! result payload (the `stream-json` shape both stock CLIs emit).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use adaf_domain::config::BackendConfig;

use crate::adapter::{Agent, AgentError, AgentResult, Invocation};
use crate::recorder::Recorder;

/// Longest raw-output tail kept as the fallback result text.
const OUTPUT_TAIL_CHARS: usize = 4000;

pub struct CliAgent {
    name: String,
    backend: BackendConfig,
}

impl CliAgent {
    pub fn new(name: &str, backend: BackendConfig) -> Self {
        Self {
            name: name.to_string(),
            backend,
        }
    }

    /// Expand the backend's argument templates for this invocation.
    fn build_args(&self, inv: &Invocation) -> Vec<String> {
        let resume = inv.resume_session_id.as_deref().filter(|s| !s.is_empty());
        let template = match resume {
            Some(_) if self.backend.supports_resume() => &self.backend.resume_args,
            _ => &self.backend.args,
        };

        let mut args: Vec<String> = template
            .iter()
            .map(|a| {
                a.replace("{prompt}", &inv.prompt)
                    .replace("{session}", resume.unwrap_or(""))
            })
            .collect();

        if let Some(model) = &inv.model {
            args.extend(
                self.backend
                    .model_args
                    .iter()
                    .map(|a| a.replace("{model}", model)),
            );
        }
        args.extend(inv.extra_args.iter().cloned());
        args
    }
}

/// Accumulated observation of the child's output streams.
#[derive(Default)]
struct Capture {
    /// (stream, line) in arrival order per stream.
    lines: Vec<(&'static str, String)>,
    session_id: Option<String>,
    result_text: Option<String>,
    /// Rolling tail of raw stdout, the fallback result.
    tail: String,
}

impl Capture {
    fn push(&mut self, stream: &'static str, line: String) {
        if stream == "stdout" {
            self.scan(&line);
            self.tail.push_str(&line);
            self.tail.push('\n');
            if self.tail.len() > OUTPUT_TAIL_CHARS {
                let drain = self.tail.len() - OUTPUT_TAIL_CHARS;
                let mut boundary = drain;
                while boundary < self.tail.len() && !self.tail.is_char_boundary(boundary) {
                    boundary += 1;
                }
                self.tail.drain(..boundary);
            }
        }
        self.lines.push((stream, line));
    }

    /// Pull session id / result text out of structured output lines.
    fn scan(&mut self, line: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            return;
        };
        if let Some(sid) = value.get("session_id").and_then(|v| v.as_str()) {
            if !sid.is_empty() {
                self.session_id = Some(sid.to_string());
            }
        }
        if value.get("type").and_then(|v| v.as_str()) == Some("result") {
            if let Some(text) = value.get("result").and_then(|v| v.as_str()) {
                self.result_text = Some(text.to_string());
            }
        }
    }

    fn output(&self) -> String {
        self.result_text
            .clone()
            .unwrap_or_else(|| self.tail.trim_end().to_string())
    }
}

#[async_trait::async_trait]
impl Agent for CliAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        inv: &Invocation,
        recorder: &Recorder,
    ) -> Result<AgentResult, AgentError> {
        let args = self.build_args(inv);
        let started = Instant::now();

        let mut cmd = Command::new(&self.backend.command);
        cmd.args(&args)
            .current_dir(&inv.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.backend.env {
            cmd.env(k, v);
        }
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }

        tracing::debug!(
            agent = %self.name,
            command = %self.backend.command,
            resume = inv.resume_session_id.is_some(),
            "spawning agent process"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {e}", self.backend.command)))?;

        let capture = Arc::new(Mutex::new(Capture::default()));

        // Reader tasks per stream; lines land in the shared capture and
        // are replayed into the recorder once the process is done.
        let stdout = child.stdout.take();
        let cap_out = capture.clone();
        let out_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    cap_out.lock().push("stdout", line);
                }
            }
        });

        let stderr = child.stderr.take();
        let cap_err = capture.clone();
        let err_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    cap_err.lock().push("stderr", line);
                }
            }
        });

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(agent = %self.name, "killing agent process on cancellation");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill agent process");
                }
                let _ = out_task.await;
                let _ = err_task.await;
                record_capture(recorder, &capture.lock());
                return Err(AgentError::Canceled);
            }
            status = child.wait() => status?,
        };

        let _ = out_task.await;
        let _ = err_task.await;

        let cap = capture.lock();
        record_capture(recorder, &cap);

        let exit_code = status.code().unwrap_or(-1);
        Ok(AgentResult {
            exit_code,
            duration: started.elapsed(),
            output: cap.output(),
            agent_session_id: cap.session_id.clone(),
        })
    }
}

fn record_capture(recorder: &Recorder, cap: &Capture) {
    for (stream, line) in &cap.lines {
        recorder.record_event(stream, serde_json::Value::String(line.clone()));
    }
}
