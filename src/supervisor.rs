// ABOUTME: Supervisor — the coordination root (§4.7): owns the worker roster, the active
// ABOUTME: job, and the local embedded worker, and drives every connection's per-tick update.

use crate::connection::Connection;
use crate::job::RenderJob;
use crate::local_worker::LocalWorker;
use crate::worker_view::{Status, WorkerView};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Coordinates a set of remote `WorkerView`s plus one embedded `LocalWorker`
/// against a single active `RenderJob`, dialing out to workers and driving
/// their connections forward once per tick (§4.7).
pub struct Supervisor {
    pub output_dir: PathBuf,
    msg_timeout: Duration,
    workers: Vec<WorkerView>,
    local_worker: LocalWorker,
    job: Option<RenderJob>,
}

impl Supervisor {
    pub fn new(output_dir: PathBuf, msg_timeout: Duration, local_worker: LocalWorker) -> Self {
        Supervisor {
            output_dir,
            msg_timeout,
            workers: Vec::new(),
            local_worker,
            job: None,
        }
    }

    pub fn workers(&self) -> &[WorkerView] {
        &self.workers
    }

    /// Dial out to a worker and register it, matching `WorkerView::start`'s
    /// non-blocking connect-then-IDENTITY handshake.
    pub async fn add_worker(&mut self, address: SocketAddr) {
        let mut view = WorkerView::new(address, self.output_dir.clone());
        match TcpStream::connect(address).await {
            Ok(socket) => {
                view.attach_connection(Connection::new(socket, self.msg_timeout));
                info!(%address, "connected to worker");
            }
            Err(e) => {
                warn!(%address, error = %e, "failed to connect to worker");
                view.set_connect_error(e.into());
            }
        }
        self.workers.push(view);
    }

    pub fn remove_worker(&mut self, index: usize) {
        let mut view = self.workers.remove(index);
        view.stop();
    }

    pub fn remove_all_workers(&mut self) {
        for view in self.workers.iter_mut() {
            view.stop();
        }
        self.workers.clear();
    }

    pub fn set_local_worker_enabled(&mut self, enabled: bool) {
        self.local_worker.set_enabled(enabled);
    }

    /// Start a new job, replacing the current one only if it is absent or
    /// already done uploading (§4.7 `start_job`).
    pub fn start_job(&mut self, job: RenderJob) {
        if self.job.as_ref().map_or(true, RenderJob::uploading_complete) {
            self.local_worker.synchronize(self.output_dir.clone());
            self.job = Some(job);
        }
    }

    pub fn stop_job(&mut self) {
        if let Some(job) = self.job.as_mut() {
            self.local_worker.cancel(job);

            if !job.uploading_complete() {
                for worker in self.workers.iter_mut() {
                    if matches!(worker.status(), Status::Rendering | Status::Uploading) {
                        worker.cancel_task();
                    }
                }
            }
            self.job = None;
        }
    }

    pub fn job_progress(&self) -> Option<f64> {
        self.job.as_ref().map(RenderJob::progress)
    }

    pub fn job(&self) -> Option<&RenderJob> {
        self.job.as_ref()
    }

    /// Ask every connected worker to delete its rendered output (§4.2
    /// `CLEANUP`), e.g. once the supervisor has pulled down every frame.
    pub fn clean_workers(&mut self) {
        for worker in self.workers.iter_mut() {
            if worker.connected() {
                worker.send_cleanup();
            }
        }
    }

    /// One coordination tick: advance the local worker, advance every
    /// worker's connection and dispatch whatever arrived, then issue the
    /// next render/upload request to any worker that is READY (§4.7).
    pub fn tick(&mut self) {
        if let Some(job) = self.job.as_mut() {
            self.local_worker.tick(job);
        }

        for worker in self.workers.iter_mut() {
            if !worker.connected() || worker.status() == Status::Error {
                // A dead or errored worker never recovers, so any frame it
                // still holds must free up now rather than wait out
                // assignment_timeout's stall clause (§3 availability).
                if let (Some(job), Some(identity)) = (self.job.as_mut(), worker.identity()) {
                    job.reap_dead_assignee(identity);
                }
                continue;
            }
            worker.tick(self.job.as_mut());

            if worker.status() == Status::Ready {
                if let Some(job) = self.job.as_mut() {
                    if !job.rendering_complete() {
                        worker.request_render_frame(job);
                    } else if !job.uploading_complete() {
                        worker.request_upload_frame(job);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::renderer::test_support::InstantRenderer;
    use crate::settings::{DisplayMode, RenderSettings};
    use tokio::net::TcpListener;

    fn supervisor() -> Supervisor {
        let renderer = InstantRenderer::new(RenderSettings::new(100, 100, 100, DisplayMode::Area));
        Supervisor::new(
            PathBuf::from("/tmp/out"),
            Duration::from_secs(10),
            LocalWorker::new(Box::new(renderer)),
        )
    }

    fn settings() -> RenderSettings {
        RenderSettings::new(320, 240, 100, DisplayMode::Area)
    }

    #[test]
    fn start_job_is_a_noop_while_a_job_is_active() {
        let mut sup = supervisor();
        sup.start_job(RenderJob::new(1, 5, settings(), Duration::from_secs(30)));
        let first_progress = sup.job_progress();

        sup.start_job(RenderJob::new(10, 20, settings(), Duration::from_secs(30)));
        assert_eq!(sup.job().unwrap().frame_start, 1);
        assert_eq!(sup.job_progress(), first_progress);
    }

    #[test]
    fn local_worker_renders_without_any_remote_workers() {
        let mut sup = supervisor();
        sup.start_job(RenderJob::new(1, 1, settings(), Duration::from_secs(30)));

        sup.tick(); // local worker picks up and starts frame 1
        sup.tick(); // local worker polls, completes frame 1

        assert!(sup.job().unwrap().rendering_complete());
        assert!(sup.job().unwrap().uploading_complete());
    }

    #[test]
    fn stop_job_clears_the_active_job() {
        let mut sup = supervisor();
        sup.start_job(RenderJob::new(1, 5, settings(), Duration::from_secs(30)));
        assert!(sup.job().is_some());

        sup.stop_job();
        assert!(sup.job().is_none());
    }

    #[test]
    fn disabling_local_worker_leaves_the_job_unstarted() {
        let mut sup = supervisor();
        sup.set_local_worker_enabled(false);
        sup.start_job(RenderJob::new(1, 1, settings(), Duration::from_secs(30)));

        sup.tick();
        assert!(!sup.job().unwrap().rendering_complete());
    }

    /// A worker that vanishes mid-render must free its frame on the very
    /// next tick, well before `assignment_timeout` (set absurdly high here)
    /// would otherwise reclaim it via the stall clause.
    #[tokio::test]
    async fn dead_worker_frees_its_frame_without_waiting_for_the_stall_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let renderer = InstantRenderer::new(settings());
        let mut sup = Supervisor::new(
            PathBuf::from("/tmp/out"),
            Duration::from_secs(9999),
            LocalWorker::new(Box::new(renderer)),
        );
        sup.set_local_worker_enabled(false);
        sup.add_worker(addr).await;
        sup.start_job(RenderJob::new(1, 1, settings(), Duration::from_secs(9999)));

        let (socket, _) = listener.accept().await.unwrap();
        let mut fake = Connection::new(socket, Duration::from_secs(5));

        // Drive the handshake from the fake worker's side until it has been
        // assigned the frame: reply IDENTITY, then CONFIRM SYNCHRONIZE, then
        // stop responding once RENDER arrives.
        let mut assigned = false;
        for _ in 0..500 {
            sup.tick();
            fake.update();
            if let Some(incoming) = fake.receive() {
                let command = String::from_utf8_lossy(&incoming.command).to_string();
                if let Ok(msg) = Message::parse(&command, incoming.payload) {
                    match msg {
                        Message::Identity { .. } => {
                            let (cmd, _) = Message::Identity {
                                hostname: "fake".to_string(),
                            }
                            .encode();
                            fake.send(cmd, None);
                        }
                        Message::Synchronize { sync_id, .. } => {
                            let (cmd, _) = Message::ConfirmSynchronize { sync_id }.encode();
                            fake.send(cmd, None);
                        }
                        Message::Render { .. } => {
                            assigned = true;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(assigned, "worker was never assigned a frame");
        assert_eq!(sup.job().unwrap().assignments()[0].assignee(), Some("fake"));

        drop(fake); // the worker vanishes while rendering

        for _ in 0..500 {
            sup.tick();
            if sup.job().unwrap().assignments()[0].assignee().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sup.job().unwrap().assignments()[0].assignee(), None);
    }
}
