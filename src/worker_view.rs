// ABOUTME: WorkerView — the supervisor's handle on one remote worker connection
// ABOUTME: (§4.5): tracks identity/settings sync, dispatches inbound messages, drives requests.

use crate::connection::{Connection, ConnectionError};
use crate::job::{Assignee, RenderJob};
use crate::message::{Message, MessageError};
use crate::paths::{extension_of, frame_path};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Initializing,
    Synchronizing,
    Ready,
    Rendering,
    Uploading,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("received an unrecognized or malformed message: {0}")]
    BadMessage(#[from] MessageError),
}

impl SessionError {
    /// A short, user-facing phrase, mirroring the original's
    /// `error_description` mapping.
    pub fn description(&self) -> &'static str {
        match self {
            SessionError::Connection(ConnectionError::Io(e))
                if e.kind() == std::io::ErrorKind::ConnectionRefused =>
            {
                "Unable to connect"
            }
            SessionError::Connection(ConnectionError::Io(_)) => "Connection lost or rejected",
            SessionError::Connection(ConnectionError::Timeout) => "Connection timed out",
            SessionError::Connection(ConnectionError::Format(_)) => {
                "Received an invalid message (check ARMB versions)"
            }
            SessionError::BadMessage(_) => "Received an unknown message (is this an ARMB worker?)",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Initializing => "INITIALIZING",
            Status::Synchronizing => "SYNCHRONIZING",
            Status::Ready => "READY",
            Status::Rendering => "RENDERING",
            Status::Uploading => "UPLOADING",
            Status::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A supervisor's view of a single worker: an outbound connection, the
/// worker-reported identity once `IDENTITY` arrives, and the last settings
/// synchronization id it confirmed (§4.5).
pub struct WorkerView {
    pub address: SocketAddr,
    output_dir: PathBuf,
    status: Status,
    identity: Option<String>,
    settings_id: Option<u32>,
    connection: Option<Connection>,
    error: Option<SessionError>,
}

impl WorkerView {
    pub fn new(address: SocketAddr, output_dir: PathBuf) -> Self {
        WorkerView {
            address,
            output_dir,
            status: Status::Initializing,
            identity: None,
            settings_id: None,
            connection: None,
            error: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn verified(&self) -> bool {
        self.identity.is_some()
    }

    pub fn attach_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
        self.connection
            .as_mut()
            .unwrap()
            .send(Message::Identity { hostname: whoami() }.encode().0, None);
    }

    pub fn set_connect_error(&mut self, err: ConnectionError) {
        self.error = Some(SessionError::Connection(err));
        self.status = Status::Error;
    }

    /// True once the underlying socket is attached and healthy.
    pub fn connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.ok())
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    fn fail(&mut self, err: SessionError) {
        warn!(address = %self.address, error = %err, "worker view entering error state");
        self.error = Some(err);
        self.status = Status::Error;
    }

    pub fn stop(&mut self) {
        if let Some(c) = self.connection.as_mut() {
            c.close();
        }
    }

    /// Advance the underlying socket, then drain and dispatch every message
    /// that completed as a result. `job` is the active job, if any — several
    /// handlers need it to update frame assignment state.
    pub fn tick(&mut self, job: Option<&mut RenderJob>) {
        if self.connection.is_none() {
            return;
        }
        self.connection.as_mut().unwrap().update();

        if let Some(err) = self.connection.as_ref().unwrap().error() {
            let err = clone_connection_error(err);
            self.fail(SessionError::Connection(err));
            return;
        }

        let mut job = job;
        while let Some(incoming) = self.connection.as_mut().unwrap().receive() {
            let command = match std::str::from_utf8(&incoming.command) {
                Ok(s) => s,
                Err(_) => {
                    self.fail(SessionError::BadMessage(MessageError::UnknownVerb(String::new())));
                    return;
                }
            };
            let message = match Message::parse(command, incoming.payload) {
                Ok(m) => m,
                Err(e) => {
                    self.fail(SessionError::BadMessage(e));
                    return;
                }
            };
            self.handle_message(message, job.as_deref_mut());
        }
    }

    fn handle_message(&mut self, message: Message, job: Option<&mut RenderJob>) {
        debug!(address = %self.address, ?message, "handling message from worker");
        match message {
            Message::Identity { hostname } => {
                self.identity = Some(hostname);
                self.status = Status::Ready;
            }
            Message::ConfirmSynchronize { sync_id } => {
                self.settings_id = Some(sync_id);
                self.status = Status::Ready;
            }
            Message::RejectRender { frame } => {
                if let Some(job) = job {
                    job.unassign_frame(frame);
                }
                self.status = Status::Ready;
            }
            Message::ConfirmCancel => {
                self.status = Status::Ready;
            }
            Message::CompleteRender { frame } => {
                if let Some(job) = job {
                    job.mark_rendered(frame);
                }
                self.status = Status::Ready;
            }
            Message::RejectUpload { frame } => {
                if let Some(job) = job {
                    job.mark_irretrievable(frame);
                }
                self.status = Status::Ready;
            }
            Message::CompleteUpload { frame, filename, payload } => {
                if let Some(job) = job {
                    let path = frame_path(frame, job.frame_end, &extension_of(&filename), &self.output_dir);
                    match write_frame(&path, &payload) {
                        Ok(()) => job.mark_uploaded(frame),
                        Err(e) => {
                            warn!(error = %e, path = %path.display(), "failed to write uploaded frame");
                            job.mark_irretrievable(frame);
                        }
                    }
                }
                info!(address = %self.address, frame, filename, "frame uploaded");
                self.status = Status::Ready;
            }
            other => {
                // A worker never sends RENDER, SYNCHRONIZE, UPLOAD, CANCEL or
                // CLEANUP: those are supervisor-to-worker only. Receiving one
                // back is a protocol violation.
                self.fail(SessionError::BadMessage(MessageError::Malformed {
                    verb: "unexpected",
                    command: format!("{other:?}"),
                }));
            }
        }
    }

    /// If settled on the job's current settings, ask for the next frame;
    /// otherwise push a fresh SYNCHRONIZE first (§4.5).
    pub fn request_render_frame(&mut self, job: &mut RenderJob) {
        if self.settings_id == Some(job.settings.synchronization_id) {
            if let Some(frame) = job.assign_next_frame(self) {
                self.send(Message::Render { frame });
                self.status = Status::Rendering;
            }
        } else {
            self.send(Message::Synchronize {
                sync_id: job.settings.synchronization_id,
                settings: job.settings.serialize(),
            });
            self.status = Status::Synchronizing;
        }
    }

    pub fn request_upload_frame(&mut self, job: &RenderJob) {
        if let Some(frame) = job.next_for_uploading(self) {
            self.send(Message::Upload { frame });
            self.status = Status::Uploading;
        }
    }

    pub fn cancel_task(&mut self) {
        self.send(Message::Cancel);
    }

    pub fn send_cleanup(&mut self) {
        self.send(Message::Cleanup);
    }

    fn send(&mut self, message: Message) {
        let (command, payload) = message.encode();
        if let Some(c) = self.connection.as_mut() {
            c.send(command, if payload.is_empty() { None } else { Some(payload) });
        }
    }
}

impl Assignee for WorkerView {
    fn identity(&self) -> &str {
        self.identity.as_deref().unwrap_or("")
    }

    fn ok(&self) -> bool {
        self.error.is_none() && self.connected()
    }
}

/// Write one uploaded frame's bytes to disk, creating the output directory
/// if it doesn't exist yet (§3 payload file naming).
fn write_frame(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

fn whoami() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "supervisor".to_string())
}

fn clone_connection_error(err: &ConnectionError) -> ConnectionError {
    match err {
        ConnectionError::Io(e) => ConnectionError::Io(std::io::Error::new(e.kind(), e.to_string())),
        ConnectionError::Timeout => ConnectionError::Timeout,
        ConnectionError::Format(e) => ConnectionError::Format(*e),
    }
}
