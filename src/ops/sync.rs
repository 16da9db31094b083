//! Secondary repository synchronization via an external tool.
//!
//! The synchronizer spawns `west` in its own process group with a
//! controlled environment and streams its standard output line by line.
//! Depending on tool generation the output is either plain text (where
//! `updating <name>` lines carry the progress hint) or newline-delimited
//! JSON events; both framings sit behind the [`LineDecoder`] trait and the
//! variant is chosen once, by feature detection, not per call site.
//!
//! The same streaming runner drives the managed SDK tool's own uninstall
//! during compound removal.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::ops::cancel::CancelToken;
use crate::ops::error::EnvError;
use crate::types::EnvVersion;

/// Base-path variable that would misdirect the synchronizer if inherited.
const BASE_PATH_VAR: &str = "ZEPHYR_BASE";

/// Local manifest directory passed to `west init`.
const LOCAL_MANIFEST: &str = "nrf";

/// Whether to initialize the repository tree or just bring it up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Init,
    Update,
}

/// Progress hints decoded from tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Plain-output generation: a repository is being updated.
    Updating(String),
    TaskBegin(String),
    TaskProgress { task: String, percent: u8 },
    TaskEnd(String),
}

/// One decoder per output framing.
pub trait LineDecoder: Send {
    /// Decode a single output line; `None` means informational only.
    fn decode(&mut self, line: &str) -> Option<SyncEvent>;
}

/// Plain-text framing: recognizes `updating <name>` lines.
pub struct PlainDecoder {
    pattern: Regex,
}

impl PlainDecoder {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"updating\s+(\S+)").expect("valid pattern"),
        }
    }
}

impl Default for PlainDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder for PlainDecoder {
    fn decode(&mut self, line: &str) -> Option<SyncEvent> {
        self.pattern
            .captures(line)
            .map(|caps| SyncEvent::Updating(caps[1].trim_end_matches(':').to_string()))
    }
}

#[derive(Deserialize)]
struct RawToolEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    progress: Option<u8>,
}

/// Newline-delimited JSON framing emitted by newer tool generations.
pub struct JsonEventDecoder;

impl LineDecoder for JsonEventDecoder {
    fn decode(&mut self, line: &str) -> Option<SyncEvent> {
        let raw: RawToolEvent = serde_json::from_str(line.trim()).ok()?;
        match raw.kind.as_str() {
            "task_begin" => Some(SyncEvent::TaskBegin(raw.name)),
            "task_progress" => Some(SyncEvent::TaskProgress {
                task: raw.name,
                percent: raw.progress.unwrap_or(0).min(100),
            }),
            "task_end" => Some(SyncEvent::TaskEnd(raw.name)),
            _ => None,
        }
    }
}

/// Pick the decoder for a tool generation.
pub fn decoder_for(json_events: bool) -> Box<dyn LineDecoder> {
    if json_events {
        Box::new(JsonEventDecoder)
    } else {
        Box::new(PlainDecoder::new())
    }
}

/// A subprocess to run under the streaming runner.
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Environment variables to unset in the child.
    pub clear_env: Vec<String>,
}

/// Spawn a tool, decode its stdout line by line, and wait for exit.
///
/// Cancellation kills the entire process group, not just the direct
/// child, because these tools spawn further children. Non-zero exit maps
/// to [`EnvError::Sync`] carrying the accumulated stderr.
pub async fn run_streaming(
    inv: ToolInvocation,
    mut decoder: Box<dyn LineDecoder>,
    cancel: &CancelToken,
    on_event: &mut (dyn FnMut(SyncEvent) + Send),
) -> Result<(), EnvError> {
    if cancel.is_cancelled() {
        return Err(EnvError::Aborted);
    }

    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &inv.cwd {
        cmd.current_dir(cwd);
    }
    for var in &inv.clear_env {
        cmd.env_remove(var);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| EnvError::Sync(format!("failed to spawn {}: {e}", inv.program)))?;

    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr {
            let _ = err.read_to_end(&mut buf).await;
        }
        buf
    });

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EnvError::Sync("child stdout unavailable".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    debug!(target: "sdkenv::sync", "{line}");
                    if let Some(event) = decoder.decode(&line) {
                        on_event(event);
                    }
                }
                None => break,
            },
            () = cancel.cancelled() => {
                kill_process_tree(&mut child).await;
                return Err(EnvError::Aborted);
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        () = cancel.cancelled() => {
            kill_process_tree(&mut child).await;
            return Err(EnvError::Aborted);
        }
    };

    if cancel.is_cancelled() {
        return Err(EnvError::Aborted);
    }

    if !status.success() {
        let stderr_text = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default())
            .trim()
            .to_string();
        return Err(EnvError::Sync(if stderr_text.is_empty() {
            format!("{} exited with {status}", inv.program)
        } else {
            stderr_text
        }));
    }

    Ok(())
}

async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child leads its own process group; a negative pid signals
        // every process in it.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Initialize or update the repository tree under `env_dir`.
pub async fn sync_repositories(
    west_program: &str,
    env_dir: &Path,
    mode: SyncMode,
    cancel: &CancelToken,
    on_event: &mut (dyn FnMut(SyncEvent) + Send),
) -> Result<(), EnvError> {
    let args = match mode {
        SyncMode::Init => vec!["init".to_string(), "-l".to_string(), LOCAL_MANIFEST.to_string()],
        SyncMode::Update => vec!["update".to_string()],
    };

    let inv = ToolInvocation {
        program: west_program.to_string(),
        args,
        cwd: Some(env_dir.to_path_buf()),
        clear_env: vec![BASE_PATH_VAR.to_string()],
    };
    run_streaming(inv, Box::new(PlainDecoder::new()), cancel, on_event).await
}

/// Run the managed SDK tool's own uninstall for a compound removal.
pub async fn managed_uninstall(
    tool_program: &str,
    install_root: &Path,
    version: &EnvVersion,
    json_events: bool,
    cancel: &CancelToken,
    on_event: &mut (dyn FnMut(SyncEvent) + Send),
) -> Result<(), EnvError> {
    let inv = ToolInvocation {
        program: tool_program.to_string(),
        args: vec![
            "remove".to_string(),
            "--install-dir".to_string(),
            install_root.to_string_lossy().into_owned(),
            "--ncs-version".to_string(),
            version.as_str().to_string(),
        ],
        cwd: None,
        clear_env: Vec::new(),
    };
    run_streaming(inv, decoder_for(json_events), cancel, on_event)
        .await
        .map_err(|e| match e {
            EnvError::Sync(msg) => EnvError::Sync(format!("uninstall tool failed: {msg}")),
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_decoder_matches_updating_lines() {
        let mut decoder = PlainDecoder::new();
        assert_eq!(
            decoder.decode("=== updating zephyr (zephyr):"),
            Some(SyncEvent::Updating("zephyr".into()))
        );
        assert_eq!(decoder.decode("HEAD is now at deadbeef"), None);
    }

    #[test]
    fn test_json_decoder_event_types() {
        let mut decoder = JsonEventDecoder;
        assert_eq!(
            decoder.decode(r#"{"type":"task_begin","name":"fetch"}"#),
            Some(SyncEvent::TaskBegin("fetch".into()))
        );
        assert_eq!(
            decoder.decode(r#"{"type":"task_progress","name":"fetch","progress":42}"#),
            Some(SyncEvent::TaskProgress {
                task: "fetch".into(),
                percent: 42
            })
        );
        assert_eq!(
            decoder.decode(r#"{"type":"task_end","name":"fetch"}"#),
            Some(SyncEvent::TaskEnd("fetch".into()))
        );
        // Informational and malformed lines are passed over.
        assert_eq!(decoder.decode("plain log line"), None);
        assert_eq!(decoder.decode(r#"{"type":"log","name":"x"}"#), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_streaming_decodes_stdout() {
        let inv = ToolInvocation {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "echo '=== updating nrf (nrf):'; echo noise; echo '=== updating zephyr (zephyr):'"
                    .into(),
            ],
            cwd: None,
            clear_env: vec![],
        };

        let mut seen = Vec::new();
        run_streaming(
            inv,
            Box::new(PlainDecoder::new()),
            &CancelToken::new(),
            &mut |ev| seen.push(ev),
        )
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![
                SyncEvent::Updating("nrf".into()),
                SyncEvent::Updating("zephyr".into())
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let inv = ToolInvocation {
            program: "sh".into(),
            args: vec!["-c".into(), "echo 'manifest not found' >&2; exit 3".into()],
            cwd: None,
            clear_env: vec![],
        };

        let err = run_streaming(
            inv,
            Box::new(PlainDecoder::new()),
            &CancelToken::new(),
            &mut |_| {},
        )
        .await
        .unwrap_err();

        match err {
            EnvError::Sync(msg) => assert!(msg.contains("manifest not found")),
            other => panic!("expected Sync error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_subprocess() {
        let inv = ToolInvocation {
            program: "sh".into(),
            args: vec!["-c".into(), "sleep 30".into()],
            cwd: None,
            clear_env: vec![],
        };

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.signal();
        });

        let start = std::time::Instant::now();
        let err = run_streaming(
            inv,
            Box::new(PlainDecoder::new()),
            &cancel,
            &mut |_| {},
        )
        .await
        .unwrap_err();

        assert!(err.is_aborted());
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }
}
