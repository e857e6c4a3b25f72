//! Server side of one tunnelled program run.
//!
//! A [`Session`] is handed an already authenticated, upgraded connection. It
//! prepares the working directory, starts the program, wires the pumps and
//! the liveness monitor to it, and drives termination before returning.

use crate::close::CloseProtocol;
use crate::codec::decode_into;
use crate::config::{ActionKind, ProcessConfig, SessionTimings};
use crate::liveness::{LivenessMonitor, ReadDeadline};
use crate::pump::{DiagnosticPump, InboundEnd, InboundPump, OutboundPump, OutboundReport};
use crate::signal::CompletionSignal;
use crate::supervisor::{EscalationOutcome, LaunchSpec, ProcessSupervisor};
use crate::transport::{ConnectionWriter, Frame, FrameSink, FrameSource};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The program ran and was reaped.
    Completed {
        inbound: InboundEnd,
        outbound: Option<OutboundReport>,
        escalation: EscalationOutcome,
    },
    /// The peer went away before sending its request.
    Abandoned,
    /// The session failed before the program was started.
    Failed(String),
}

/// Summary returned by [`Session::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub action: ActionKind,
    pub files_received: usize,
    pub outcome: SessionOutcome,
}

/// One program run bound to one connection.
#[derive(Debug, Clone)]
pub struct Session {
    action: ActionKind,
    program: PathBuf,
    timings: SessionTimings,
}

/// What the upload phase of a receive-files session produced.
enum Upload {
    Request { first_line: String, files: usize },
    Abandoned,
}

impl Session {
    pub fn new(action: ActionKind, program: impl Into<PathBuf>, timings: SessionTimings) -> Self {
        Self {
            action,
            program: program.into(),
            timings,
        }
    }

    /// Run the session to completion over `sink` and `source`.
    pub async fn run(self, sink: impl FrameSink, source: impl FrameSource) -> SessionReport {
        let writer = ConnectionWriter::new(sink, self.timings.write_wait);

        let report = self.run_inner(&writer, Box::new(source)).await;
        writer.force_close().await;

        info!("Session {} finished: {:?}", self.action, report.outcome);
        report
    }

    async fn run_inner(
        &self,
        writer: &ConnectionWriter,
        mut source: Box<dyn FrameSource>,
    ) -> SessionReport {
        let mut report = SessionReport {
            action: self.action,
            files_received: 0,
            outcome: SessionOutcome::Abandoned,
        };

        let work_dir = if self.action.takes_directory() {
            match tempfile::Builder::new()
                .prefix(ProcessConfig::TEMP_DIR_PREFIX)
                .tempdir()
            {
                Ok(dir) => Some(dir),
                Err(e) => {
                    let message = e.to_string();
                    internal_error(writer, "tempdir:", &message).await;
                    report.outcome = SessionOutcome::Failed(message);
                    return report;
                }
            }
        } else {
            None
        };

        let mut deadline = ReadDeadline::start(self.timings.pong_wait);

        let mut pending_line = None;
        if self.action.receives_files() {
            let Some(dir) = work_dir.as_ref() else {
                return report;
            };
            match receive_upload(source.as_mut(), &mut deadline, dir.path()).await {
                Upload::Request { first_line, files } => {
                    report.files_received = files;
                    pending_line = Some(first_line);
                }
                Upload::Abandoned => return report,
            }
        }

        let mut launch = LaunchSpec::new(&self.program);
        if let Some(dir) = &work_dir {
            launch = launch.arg(dir.path());
        }

        let (mut supervisor, pipes) = match ProcessSupervisor::start(&launch) {
            Ok(started) => started,
            Err(e) => {
                let message = e.to_string();
                internal_error(writer, "start:", &message).await;
                report.outcome = SessionOutcome::Failed(message);
                return report;
            }
        };

        let stdout_done = CompletionSignal::new();
        let stderr_done = CompletionSignal::new();
        let inbound_done = CompletionSignal::new();

        let close = CloseProtocol::new(
            writer.clone(),
            self.timings.close_grace,
            inbound_done.clone(),
        );
        let result_dir = work_dir
            .as_ref()
            .filter(|_| self.action.sends_files())
            .map(|dir| dir.path().to_path_buf());
        let outbound = OutboundPump::new(writer.clone(), stdout_done.clone(), close)
            .with_result_dir(result_dir);
        let outbound_handle = tokio::spawn(outbound.run(pipes.stdout));

        let monitor = LivenessMonitor::new(writer.clone(), self.timings.ping_period)
            .spawn(stdout_done.clone());

        let diagnostic = DiagnosticPump::new(self.action, stderr_done.clone());
        let diagnostic_handle = tokio::spawn(diagnostic.run(pipes.stderr));

        let inbound = InboundPump::new(
            source,
            deadline,
            self.timings.max_message_size,
            writer.closed(),
            inbound_done,
        )
        .with_pending_line(pending_line)
        .run(pipes.stdin);
        tokio::pin!(inbound);

        let data_done = async {
            stdout_done.wait().await;
            stderr_done.wait().await;
        };

        let early_end = tokio::select! {
            end = &mut inbound => Some(end),
            _ = data_done => None,
        };

        let escalation = supervisor
            .escalate(&stdout_done, &stderr_done, self.timings.kill_grace)
            .await;

        let inbound_end = match early_end {
            Some(end) => end,
            None => inbound.await,
        };

        let outbound_report = match outbound_handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Outbound pump failed: {}", e);
                None
            }
        };
        if let Err(e) = diagnostic_handle.await {
            error!("Diagnostic pump failed: {}", e);
        }
        if let Err(e) = monitor.await {
            error!("Liveness monitor failed: {}", e);
        }

        // Everything that reads the working directory is done now.
        drop(work_dir);

        report.outcome = SessionOutcome::Completed {
            inbound: inbound_end,
            outbound: outbound_report,
            escalation,
        };
        report
    }
}

/// Receive file payloads until the first text message.
async fn receive_upload(
    source: &mut dyn FrameSource,
    deadline: &mut ReadDeadline,
    dir: &Path,
) -> Upload {
    let mut files = 0;

    loop {
        let received = tokio::time::timeout_at(deadline.instant(), source.recv()).await;
        let frame = match received {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                warn!("Receiving upload: {}", e);
                return Upload::Abandoned;
            }
            Ok(None) => return Upload::Abandoned,
            Err(_) => {
                warn!("Timed out waiting for upload");
                return Upload::Abandoned;
            }
        };

        match frame {
            Frame::Text(first_line) => {
                debug!("< {}", first_line);
                return Upload::Request { first_line, files };
            }
            Frame::Binary(payload) => {
                let dest = dir.to_path_buf();
                match tokio::task::spawn_blocking(move || decode_into(payload, &dest)).await {
                    Ok(Ok(entries)) => {
                        info!("Received {} files", entries.len());
                        files += entries.len();
                    }
                    Ok(Err(e)) => warn!("Decoding upload: {}", e),
                    Err(e) => warn!("Decoding task failed: {}", e),
                }
            }
            Frame::Pong(_) => deadline.renew(),
            Frame::Ping(_) => {}
            Frame::Close { .. } => return Upload::Abandoned,
        }
    }
}

async fn internal_error(writer: &ConnectionWriter, context: &str, message: &str) {
    error!("{} {}", context, message);
    if let Err(e) = writer.send_text(ProcessConfig::INTERNAL_ERROR_MESSAGE).await {
        debug!("Reporting internal error: {}", e);
    }
    if let Err(e) = writer.send(Frame::normal_close("internal error")).await {
        debug!("write close: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::codec::encode_files;
    use crate::config::TransportConfig;
    use crate::transport::channel::{channel_pair, ChannelSink, ChannelSource};
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("program");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn timings() -> SessionTimings {
        SessionTimings::default()
            .with_close_grace(Duration::from_secs(2))
            .with_kill_grace(Duration::from_millis(300))
    }

    /// Collect frames like a WebSocket peer would, answering the close frame.
    async fn collect_until_close(
        mut sink: ChannelSink,
        mut source: ChannelSource,
    ) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(Ok(frame)) = source.recv().await {
            let is_close = matches!(frame, Frame::Close { .. });
            frames.push(frame);
            if is_close {
                let _ = sink.send(Frame::normal_close("")).await;
                sink.close().await.unwrap();
                break;
            }
        }
        frames
    }

    fn texts(frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_check_session_relays_one_version() {
        let temp_dir = TempDir::new().unwrap();
        let program = script(&temp_dir, "read request\necho '{\"version\":{\"ref\":\"2\"}}'");

        let ((sink, source), (mut peer_sink, peer_source)) = channel_pair();
        peer_sink
            .send(Frame::Text(r#"{"source":{},"version":{"ref":"1"}}"#.into()))
            .await
            .unwrap();

        let session = Session::new(ActionKind::Check, &program, timings());
        let session_handle = tokio::spawn(session.run(sink, source));
        let frames = collect_until_close(peer_sink, peer_source).await;

        assert_eq!(texts(&frames), vec![r#"{"version":{"ref":"2"}}"#.to_string()]);
        assert_eq!(
            frames.last().unwrap(),
            &Frame::normal_close(TransportConfig::STDOUT_CLOSED_REASON)
        );

        let report = tokio::time::timeout(Duration::from_secs(5), session_handle)
            .await
            .unwrap()
            .unwrap();
        let SessionOutcome::Completed {
            outbound,
            escalation,
            ..
        } = report.outcome
        else {
            panic!("session did not complete: {:?}", report.outcome);
        };
        assert!(!escalation.killed);
        assert!(outbound.unwrap().close_acknowledged);
    }

    #[tokio::test]
    async fn test_non_utf8_stderr_keeps_program_alive() {
        let temp_dir = TempDir::new().unwrap();
        let program = script(
            &temp_dir,
            "read request\nprintf 'caf\\351\\n' >&2\nsleep 0.3\necho more >&2\necho '{\"version\":{\"ref\":\"2\"}}'",
        );

        let ((sink, source), (mut peer_sink, peer_source)) = channel_pair();
        peer_sink.send(Frame::Text("{}".into())).await.unwrap();

        let handle =
            tokio::spawn(Session::new(ActionKind::Check, &program, timings()).run(sink, source));
        let frames = collect_until_close(peer_sink, peer_source).await;
        let report = handle.await.unwrap();

        assert_eq!(texts(&frames), vec![r#"{"version":{"ref":"2"}}"#.to_string()]);
        let SessionOutcome::Completed { escalation, .. } = report.outcome else {
            panic!("session did not complete: {:?}", report.outcome);
        };
        assert!(escalation.exit.unwrap().success());
    }

    #[tokio::test]
    async fn test_in_session_sends_directory_last() {
        let temp_dir = TempDir::new().unwrap();
        let program = script(
            &temp_dir,
            "read request\necho fetched > \"$1/artifact.txt\"\necho '{\"version\":{\"ref\":\"3\"}}'",
        );

        let ((sink, source), (mut peer_sink, peer_source)) = channel_pair();
        peer_sink.send(Frame::Text("{}".into())).await.unwrap();

        let handle =
            tokio::spawn(Session::new(ActionKind::In, &program, timings()).run(sink, source));
        let frames = collect_until_close(peer_sink, peer_source).await;
        handle.await.unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::Text(r#"{"version":{"ref":"3"}}"#.into()));
        let Frame::Binary(payload) = &frames[1] else {
            panic!("expected file payload, got {:?}", frames[1]);
        };

        let dest = TempDir::new().unwrap();
        let entries = decode_into(payload.clone(), dest.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("artifact.txt")).unwrap(),
            "fetched\n"
        );
    }

    #[tokio::test]
    async fn test_out_session_materializes_files_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let program = script(&temp_dir, "read request\necho \"$request\"\ncat \"$1/sub/input.txt\"");

        let ((sink, source), (mut peer_sink, peer_source)) = channel_pair();
        let upload = encode_files(&[("sub/input.txt", b"uploaded content\n".as_slice())]);
        peer_sink.send(Frame::Binary(upload.into())).await.unwrap();
        peer_sink.send(Frame::Text("{\"params\":{}}".into())).await.unwrap();

        let handle =
            tokio::spawn(Session::new(ActionKind::Out, &program, timings()).run(sink, source));
        let frames = collect_until_close(peer_sink, peer_source).await;
        let report = handle.await.unwrap();

        assert_eq!(report.files_received, 1);
        assert_eq!(
            texts(&frames),
            vec!["{\"params\":{}}".to_string(), "uploaded content".to_string()]
        );
    }

    #[tokio::test]
    async fn test_start_failure_reports_internal_error() {
        let ((sink, source), (_peer_sink, mut peer_source)) = channel_pair();

        let report = Session::new(ActionKind::Check, "/nonexistent/program", timings())
            .run(sink, source)
            .await;

        assert!(matches!(report.outcome, SessionOutcome::Failed(_)));
        assert_eq!(
            peer_source.recv().await.unwrap().unwrap(),
            Frame::Text(ProcessConfig::INTERNAL_ERROR_MESSAGE.into())
        );
    }

    #[tokio::test]
    async fn test_peer_disconnect_kills_stubborn_program_once() {
        let temp_dir = TempDir::new().unwrap();
        let program = script(&temp_dir, "trap '' INT\nexec sleep 30");

        let ((sink, source), (peer_sink, _peer_source)) = channel_pair();
        let handle =
            tokio::spawn(Session::new(ActionKind::Check, &program, timings()).run(sink, source));

        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(peer_sink);

        let report = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        let SessionOutcome::Completed {
            inbound,
            escalation,
            ..
        } = report.outcome
        else {
            panic!("session did not complete: {:?}", report.outcome);
        };
        assert_eq!(inbound, InboundEnd::Disconnected);
        assert!(escalation.interrupted);
        assert!(escalation.killed);
    }

    #[tokio::test]
    async fn test_out_session_abandoned_without_request() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("started");
        let program = script(&temp_dir, &format!("touch '{}'", marker.display()));

        let ((sink, source), (peer_sink, _peer_source)) = channel_pair();
        drop(peer_sink);

        let report = Session::new(ActionKind::Out, &program, timings())
            .run(sink, source)
            .await;

        assert_eq!(report.outcome, SessionOutcome::Abandoned);
        assert!(!marker.exists());
    }
}
