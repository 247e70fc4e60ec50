pub mod codec;
pub mod connection;
pub mod job;
pub mod local_worker;
pub mod message;
mod paths;
pub mod renderer;
pub mod settings;
pub mod supervisor;
pub mod worker;
pub mod worker_view;

pub use codec::{CodecError, FrameHeader};
pub use connection::{Connection, ConnectionError};
pub use job::{Assignee, FrameAssignment, RenderJob};
pub use local_worker::LocalWorker;
pub use message::{Message, MessageError};
pub use renderer::{RenderOutcome, Renderer};
pub use settings::{DisplayMode, RenderSettings};
pub use supervisor::Supervisor;
pub use worker::Worker;
pub use worker_view::WorkerView;

/// Error returned by the binaries' `main()`.
///
/// Every library-facing layer (codec, connection, message, session) has its
/// own `thiserror` enum with the specific detail a caller might branch on;
/// this boxed alias exists only so `main()` can bubble up any of them with
/// `?` without naming a union type nobody else needs.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;
