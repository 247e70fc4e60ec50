// ABOUTME: Worker — the accepting side of the protocol (§4.6): listens for one supervisor
// ABOUTME: connection, rejects any second dialer, and renders/uploads frames on request.

use crate::connection::{Connection, ConnectionError};
use crate::message::{Message, MessageError};
use crate::renderer::{RenderOutcome, Renderer};
use crate::settings::RenderSettings;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("received an unrecognized or malformed message: {0}")]
    BadMessage(#[from] MessageError),
}

impl SessionError {
    pub fn description(&self) -> &'static str {
        match self {
            SessionError::Connection(ConnectionError::Io(_)) => "Connection lost or rejected",
            SessionError::Connection(ConnectionError::Timeout) => "Connection timed out",
            SessionError::Connection(ConnectionError::Format(_)) => {
                "Received an invalid message (is this an ARMB server?)"
            }
            SessionError::BadMessage(_) => "Received an unknown message (check version)",
        }
    }
}

/// Render state for the frame the supervisor currently has assigned to this
/// worker, mirroring `handle_render_cancel`'s retry bookkeeping (§4.6).
struct RenderTask {
    frame: i64,
    started: bool,
    remote_cancelled: bool,
    attempts: u32,
}

impl RenderTask {
    fn new(frame: i64) -> Self {
        RenderTask {
            frame,
            started: false,
            remote_cancelled: false,
            attempts: 0,
        }
    }

    fn failed(&self) -> bool {
        self.attempts >= MAX_ATTEMPTS
    }
}

/// A short human-readable status line for a UI to poll, matching the
/// original's `status_message` (§4.6).
pub fn status_message(worker: &Worker) -> String {
    if let Some(err) = worker.error.as_ref() {
        format!("Internal Error: {err}")
    } else if let Some(task) = worker.task.as_ref() {
        format!("Rendering frame {}", task.frame)
    } else if worker.connected() {
        format!("Ready on port {}", worker.port)
    } else {
        format!("Waiting on port {}", worker.port)
    }
}

/// Accepts exactly one supervisor connection at a time on `port`, renders
/// whatever frames it is asked to, and uploads the results back (§4.6).
pub struct Worker {
    output_dir: PathBuf,
    port: u16,
    msg_timeout: Duration,
    listener: TcpListener,
    connection: Option<Connection>,
    peer_identity: Option<String>,
    render_settings: Option<RenderSettings>,
    original_render_settings: RenderSettings,
    renderer: Box<dyn Renderer>,
    task: Option<RenderTask>,
    error: Option<SessionError>,
    closed: bool,
}

impl Worker {
    pub async fn bind(port: u16, output_dir: PathBuf, msg_timeout: Duration, renderer: Box<dyn Renderer>) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let original_render_settings = renderer.create_render_settings();
        Ok(Worker {
            output_dir,
            port,
            msg_timeout,
            listener,
            connection: None,
            peer_identity: None,
            render_settings: None,
            original_render_settings,
            renderer,
            task: None,
            error: None,
            closed: false,
        })
    }

    pub fn connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.ok()) && !self.closed
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    fn verified(&self) -> bool {
        self.peer_identity.is_some()
    }

    fn fail(&mut self, err: SessionError) {
        warn!(error = %err, "worker entering error state");
        self.error = Some(err);
    }

    /// Stop accepting connections and tear down the current one, restoring
    /// whatever render settings were in place before any job touched them.
    pub fn stop(&mut self) {
        self.closed = true;
        self.renderer.apply_render_settings(&self.original_render_settings);
        if let Some(c) = self.connection.as_mut() {
            c.close();
        }
    }

    /// Non-blocking accept: takes over a fresh connection if idle, otherwise
    /// immediately drops the dialer (§4.6 `reject_connection`). Polls the
    /// listener exactly once per tick, same as `Connection::update`'s
    /// try_read/try_write — no awaiting.
    fn try_accept(&mut self) {
        use std::task::Poll;
        let waker = noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);

        match self.listener.poll_accept(&mut cx) {
            Poll::Ready(Ok((socket, addr))) => {
                if self.connected() {
                    info!(%addr, "rejecting second supervisor connection");
                    drop(socket);
                } else {
                    info!(%addr, "accepted supervisor connection");
                    let mut connection = Connection::new(socket, self.msg_timeout);
                    let (command, _) = Message::Identity {
                        hostname: whoami(),
                    }
                    .encode();
                    connection.send(command, None);
                    self.connection = Some(connection);
                    self.peer_identity = None;
                    self.task = None;
                }
            }
            Poll::Ready(Err(e)) => warn!(error = %e, "accept failed"),
            Poll::Pending => {}
        }
    }

    /// One tick (§4.6): accept/reject, advance the connection, dispatch one
    /// round of inbound messages, and drive the render task forward.
    pub fn tick(&mut self) {
        if !self.ok() || self.closed {
            return;
        }

        self.try_accept();

        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        connection.update();

        if let Some(err) = connection.error() {
            let err = clone_connection_error(err);
            self.fail(SessionError::Connection(err));
            return;
        }

        while let Some(incoming) = self.connection.as_mut().unwrap().receive() {
            let command = match std::str::from_utf8(&incoming.command) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    self.fail(SessionError::BadMessage(MessageError::UnknownVerb(String::new())));
                    return;
                }
            };
            let message = match Message::parse(&command, incoming.payload) {
                Ok(m) => m,
                Err(e) => {
                    self.fail(SessionError::BadMessage(e));
                    return;
                }
            };
            self.handle_message(message);
        }

        self.advance_render_task();
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Identity { hostname } => {
                self.peer_identity = Some(hostname);
            }
            Message::Synchronize { sync_id, settings } => {
                self.render_settings = Some(RenderSettings::deserialize(&settings));
                self.send(Message::ConfirmSynchronize { sync_id });
            }
            Message::Render { frame } => {
                if !self.verified() || self.task.is_some() {
                    self.send(Message::RejectRender { frame });
                } else {
                    self.task = Some(RenderTask::new(frame));
                }
            }
            Message::Upload { frame } => self.handle_upload(frame),
            Message::Cancel => {
                if let Some(task) = self.task.as_mut() {
                    task.remote_cancelled = true;
                } else {
                    self.send(Message::ConfirmCancel);
                }
            }
            Message::Cleanup => self.cleanup_output_dir(),
            other => {
                self.fail(SessionError::BadMessage(MessageError::Malformed {
                    verb: "unexpected",
                    command: format!("{other:?}"),
                }));
            }
        }
    }

    /// Remove every rendered frame file in the output directory, then remove
    /// the directory itself if nothing else is left in it (§4.2 `CLEANUP`).
    /// Only files matching `[0-9]+<extension>` are considered frame output —
    /// anything else a user dropped in there is left alone.
    fn cleanup_output_dir(&mut self) {
        let extension = self.renderer.filename_extension().to_string();
        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, dir = %self.output_dir.display(), "cleanup failed to read output dir");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if is_rendered_frame_file(&path, &extension) {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(error = %e, path = %path.display(), "cleanup failed to remove frame file");
                }
            }
        }

        match std::fs::read_dir(&self.output_dir) {
            Ok(mut remaining) => {
                if remaining.next().is_none() {
                    if let Err(e) = std::fs::remove_dir(&self.output_dir) {
                        warn!(error = %e, dir = %self.output_dir.display(), "cleanup failed to remove empty output dir");
                    }
                }
            }
            Err(e) => warn!(error = %e, dir = %self.output_dir.display(), "cleanup failed to recheck output dir"),
        }
    }

    fn handle_upload(&mut self, frame: i64) {
        let path = self.renderer.rendered_frame_path(frame, &self.output_dir);
        if !self.verified() {
            self.send(Message::RejectUpload { frame });
            return;
        }
        match std::fs::read(&path) {
            Ok(bytes) => {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let (command, payload) = Message::CompleteUpload { frame, filename, payload: bytes }.encode();
                if let Some(c) = self.connection.as_mut() {
                    c.send(command, Some(payload));
                }
            }
            Err(_) => {
                warn!(path = %path.display(), "unable to open rendered frame for upload");
                self.send(Message::RejectUpload { frame });
            }
        }
    }

    fn advance_render_task(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.started) {
            if let Some(settings) = self.render_settings.clone() {
                self.renderer.apply_render_settings(&settings);
            }
            let frame = self.task.as_ref().unwrap().frame;
            let path = self.renderer.rendered_frame_path(frame, &self.output_dir);
            match self.renderer.render_frame(frame, &path) {
                RenderOutcome::Started => self.task.as_mut().unwrap().started = true,
                RenderOutcome::Cancelled => self.on_render_cancel(),
            }
        } else if self.task.as_ref().is_some_and(|t| t.started) {
            if let Some(outcome) = self.renderer.poll_render() {
                match outcome {
                    RenderOutcome::Completed => self.on_render_complete(),
                    RenderOutcome::Cancelled => self.on_render_cancel(),
                    RenderOutcome::Started => {}
                }
            }
        }
    }

    fn on_render_complete(&mut self) {
        let task = self.task.take().unwrap();
        if task.remote_cancelled {
            self.send(Message::ConfirmCancel);
        } else {
            self.send(Message::CompleteRender { frame: task.frame });
        }
        self.renderer.apply_render_settings(&self.original_render_settings);
    }

    fn on_render_cancel(&mut self) {
        let mut task = self.task.take().unwrap();
        if task.remote_cancelled {
            self.send(Message::ConfirmCancel);
        } else {
            task.started = false;
            task.attempts += 1;
            if task.failed() {
                self.send(Message::RejectRender { frame: task.frame });
            } else {
                self.task = Some(task);
            }
        }
        self.renderer.apply_render_settings(&self.original_render_settings);
    }

    fn send(&mut self, message: Message) {
        let (command, payload) = message.encode();
        if let Some(c) = self.connection.as_mut() {
            c.send(command, if payload.is_empty() { None } else { Some(payload) });
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("port", &self.port)
            .field("connected", &self.connected())
            .finish()
    }
}

/// A rendered frame file is named `<digits><extension>` with no other
/// characters (§4.2 `CLEANUP`), matching `paths::frame_path`'s own output.
fn is_rendered_frame_file(path: &std::path::Path, extension: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(stem) = name.strip_suffix(extension) else {
        return false;
    };
    !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit())
}

fn whoami() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "worker".to_string())
}

fn clone_connection_error(err: &ConnectionError) -> ConnectionError {
    match err {
        ConnectionError::Io(e) => ConnectionError::Io(io::Error::new(e.kind(), e.to_string())),
        ConnectionError::Timeout => ConnectionError::Timeout,
        ConnectionError::Format(e) => ConnectionError::Format(*e),
    }
}

/// A waker that does nothing when woken. `poll_accept` is called exactly
/// once per tick regardless, so there is nothing useful for a wake-up to
/// trigger — the next tick polls again either way.
fn noop_waker() -> std::task::Waker {
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn no_op(_: *const ()) {}
    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}
