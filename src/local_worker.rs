// ABOUTME: LocalWorker — the supervisor's embedded render peer (§4.4): participates in
// ABOUTME: frame assignment under the fixed identity "__supervisor__", no socket involved.

use crate::job::{Assignee, RenderJob};
use crate::paths::frame_path;
use crate::renderer::{RenderOutcome, Renderer};
use std::path::PathBuf;
use tracing::{info, warn};

/// The identity a local worker always assigns under. Frame assignments use
/// plain string identities, so this is just a reserved value no real worker
/// hostname can collide with (`IDENTITY` payloads are bare hostnames, never
/// containing leading underscores paired like this).
pub const LOCAL_WORKER_IDENTITY: &str = "__supervisor__";

const MAX_ATTEMPTS: u32 = 3;

/// In-flight render state for the local worker's current frame. A task is
/// retried up to `MAX_ATTEMPTS` times before the frame is unassigned back to
/// the job for another worker to pick up (§4.4).
struct RenderTask {
    frame: i64,
    max_frame: i64,
    started: bool,
    attempts: u32,
}

impl RenderTask {
    fn new(frame: i64, max_frame: i64) -> Self {
        RenderTask {
            frame,
            max_frame,
            started: false,
            attempts: 0,
        }
    }

    fn record_failed_attempt(&mut self) {
        self.attempts += 1;
    }

    fn exhausted(&self) -> bool {
        self.attempts >= MAX_ATTEMPTS
    }
}

/// Embedded peer that renders through a `Renderer` instead of a socket. It
/// still takes frames from the same `RenderJob` via `assign_next_frame`, so
/// the supervisor's scheduling loop treats it exactly like a remote worker
/// (§4.4, §4.7).
pub struct LocalWorker {
    renderer: Box<dyn Renderer>,
    enabled: bool,
    output_dir: Option<PathBuf>,
    task: Option<RenderTask>,
}

impl LocalWorker {
    pub fn new(renderer: Box<dyn Renderer>) -> Self {
        LocalWorker {
            renderer,
            enabled: true,
            output_dir: None,
            task: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn synchronize(&mut self, output_dir: PathBuf) {
        self.output_dir = Some(output_dir);
    }

    fn ready(&self, job: &RenderJob) -> bool {
        self.enabled && self.output_dir.is_some() && self.task.is_none() && !job.rendering_complete()
    }

    fn preparing(&self) -> bool {
        self.enabled && self.task.as_ref().is_some_and(|t| !t.started)
    }

    /// Cancel the in-flight frame, if any, unassigning it back to the job.
    pub fn cancel(&mut self, job: &mut RenderJob) {
        if let Some(task) = self.task.take() {
            job.unassign_frame(task.frame);
        }
    }

    /// One tick of the local worker's tiny state machine (§4.4): pick up a
    /// frame when ready, then hand it to the renderer when preparing.
    pub fn tick(&mut self, job: &mut RenderJob) {
        if self.ready(job) {
            if let Some(frame) = job.assign_next_frame(self) {
                self.task = Some(RenderTask::new(frame, job.frame_end));
            }
        }

        if self.preparing() {
            let task = self.task.as_ref().unwrap();
            let output_dir = self.output_dir.clone().unwrap();
            let path = frame_path(task.frame, task.max_frame, self.renderer.filename_extension(), &output_dir);

            self.renderer.apply_render_settings(&job.settings);
            match self.renderer.render_frame(task.frame, &path) {
                RenderOutcome::Started => {
                    self.task.as_mut().unwrap().started = true;
                }
                RenderOutcome::Cancelled => {
                    self.handle_render_failed(job);
                }
            }
        } else if self.task.as_ref().is_some_and(|t| t.started) {
            if let Some(outcome) = self.renderer.poll_render() {
                match outcome {
                    RenderOutcome::Completed => self.handle_render_complete(job),
                    RenderOutcome::Cancelled => self.handle_render_failed(job),
                    RenderOutcome::Started => {}
                }
            }
        }
    }

    fn handle_render_complete(&mut self, job: &mut RenderJob) {
        let frame = self.task.as_ref().unwrap().frame;
        job.mark_rendered(frame);
        job.mark_uploaded(frame);
        info!(frame, "local worker finished frame");
        self.task = None;
    }

    fn handle_render_failed(&mut self, job: &mut RenderJob) {
        let task = self.task.as_mut().unwrap();
        task.started = false;
        task.record_failed_attempt();
        warn!(frame = task.frame, attempts = task.attempts, "local render attempt failed");

        if task.exhausted() {
            let frame = task.frame;
            job.unassign_frame(frame);
            self.task = None;
        }
    }
}

impl Assignee for LocalWorker {
    fn identity(&self) -> &str {
        LOCAL_WORKER_IDENTITY
    }

    fn ok(&self) -> bool {
        true
    }
}
