// ABOUTME: RenderJob — the supervisor-side frame-assignment ledger (§3, §4.4): tracks
// ABOUTME: which worker owns each frame, render/upload progress, and per-worker statistics.

use crate::settings::RenderSettings;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

/// One frame's assignment state. `elapsed` is only set once `rendered`
/// transitions true, measured from `assigned_at` (§3 invariants).
#[derive(Debug, Clone)]
pub struct FrameAssignment {
    pub frame_number: i64,
    assignee: Option<String>,
    rendered: bool,
    uploaded: bool,
    irretrievable: bool,
    assigned_at: Option<Instant>,
    elapsed: Option<Duration>,
}

impl FrameAssignment {
    fn new(frame_number: i64) -> Self {
        FrameAssignment {
            frame_number,
            assignee: None,
            rendered: false,
            uploaded: false,
            irretrievable: false,
            assigned_at: None,
            elapsed: None,
        }
    }

    pub fn assignee(&self) -> Option<&str> {
        self.assignee.as_deref()
    }

    pub fn rendered(&self) -> bool {
        self.rendered
    }

    pub fn uploaded(&self) -> bool {
        self.uploaded
    }

    pub fn irretrievable(&self) -> bool {
        self.irretrievable
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    fn assign(&mut self, worker_identity: &str) {
        self.assignee = Some(worker_identity.to_string());
        self.assigned_at = Some(Instant::now());
        self.rendered = false;
        self.uploaded = false;
    }
}

/// Anything that can own frame assignments: a remote `WorkerView` or the
/// embedded local worker. `RenderJob` is agnostic between the two — it only
/// needs an identity to key assignments and statistics by, and a liveness
/// check to decide whether a stalled assignment should free up again.
pub trait Assignee {
    fn identity(&self) -> &str;
    fn ok(&self) -> bool;
}

/// A contiguous frame range plus the settings that produced it — the
/// supervisor's single unit of work (§3). Mutated only by the supervisor's
/// tick, through the methods below.
pub struct RenderJob {
    pub frame_start: i64,
    pub frame_end: i64,
    pub settings: RenderSettings,
    assignments: Vec<FrameAssignment>,
    frames_rendered: usize,
    frames_uploaded: usize,
    frames_irretrievable: usize,
    /// How long an assignment may sit unconfirmed before it is considered
    /// available again, guarding against a worker that accepted a RENDER
    /// and then vanished without ever reporting REJECT/COMPLETE.
    assignment_timeout: Duration,
}

impl RenderJob {
    pub fn new(frame_start: i64, frame_end: i64, settings: RenderSettings, assignment_timeout: Duration) -> Self {
        let assignments = (frame_start..=frame_end).map(FrameAssignment::new).collect();
        RenderJob {
            frame_start,
            frame_end,
            settings,
            assignments,
            frames_rendered: 0,
            frames_uploaded: 0,
            frames_irretrievable: 0,
            assignment_timeout,
        }
    }

    pub fn frame_count(&self) -> usize {
        (self.frame_end - self.frame_start + 1) as usize
    }

    pub fn frames_rendered(&self) -> usize {
        self.frames_rendered
    }

    pub fn frames_uploaded(&self) -> usize {
        self.frames_uploaded
    }

    pub fn frames_irretrievable(&self) -> usize {
        self.frames_irretrievable
    }

    pub fn assignments(&self) -> &[FrameAssignment] {
        &self.assignments
    }

    pub fn rendering_complete(&self) -> bool {
        self.frames_rendered == self.frame_count()
    }

    pub fn uploading_complete(&self) -> bool {
        self.frames_uploaded + self.frames_irretrievable == self.frame_count()
    }

    /// `[0, 1]`: render progress until rendering is complete, then upload
    /// progress (§4.4).
    pub fn progress(&self) -> f64 {
        let total = self.frame_count() as f64;
        if total == 0.0 {
            return 1.0;
        }
        if !self.rendering_complete() {
            self.frames_rendered as f64 / total
        } else {
            self.frames_uploaded as f64 / total
        }
    }

    fn index_of(&self, frame: i64) -> Option<usize> {
        if frame < self.frame_start || frame > self.frame_end {
            return None;
        }
        Some((frame - self.frame_start) as usize)
    }

    /// An assignment is available for (re-)assignment if it has never been
    /// assigned, has stalled past `assignment_timeout` without rendering, or
    /// belongs to `worker` itself but `worker` has gone bad in the meantime.
    /// Liveness of a *different* assignee is not checked here — the caller
    /// frees those via `reap_dead_assignee` once it knows a worker died.
    fn is_available_to(&self, assignment: &FrameAssignment, worker_identity: &str, worker_ok: bool) -> bool {
        match &assignment.assignee {
            None => true,
            Some(who) => {
                let stalled = !assignment.rendered
                    && assignment
                        .assigned_at
                        .is_some_and(|t| t.elapsed() > self.assignment_timeout);
                let self_reassign = who == worker_identity && !worker_ok;
                stalled || self_reassign
            }
        }
    }

    /// Scan assignments in increasing frame order for the first one that is
    /// available, by the rule in §3/§4.4, and mark it assigned to `worker`.
    pub fn assign_next_frame<A: Assignee>(&mut self, worker: &A) -> Option<i64> {
        let identity = worker.identity().to_string();
        let ok = worker.ok();
        for i in 0..self.assignments.len() {
            if self.is_available_to(&self.assignments[i], &identity, ok) {
                self.assignments[i].assign(&identity);
                return Some(self.assignments[i].frame_number);
            }
        }
        None
    }

    /// Called once per tick by the supervisor for every worker whose
    /// liveness just changed, freeing any frame it was assigned but never
    /// finished rendering. This implements the "assignee died" clause of
    /// `available` (§3) without `RenderJob` needing to know about workers.
    pub fn reap_dead_assignee(&mut self, identity: &str) {
        for assignment in self.assignments.iter_mut() {
            if assignment.assignee.as_deref() == Some(identity) && !assignment.rendered {
                assignment.assignee = None;
            }
        }
    }

    /// §4.4: clear the assignee if `f` is in range and not yet rendered.
    pub fn unassign_frame(&mut self, frame: i64) {
        if let Some(i) = self.index_of(frame) {
            if !self.assignments[i].rendered {
                self.assignments[i].assignee = None;
            }
        }
    }

    pub fn mark_rendered(&mut self, frame: i64) {
        if let Some(i) = self.index_of(frame) {
            let a = &mut self.assignments[i];
            if !a.rendered {
                a.rendered = true;
                a.elapsed = a.assigned_at.map(|t| t.elapsed());
                self.frames_rendered += 1;
                info!(frame, rendered = self.frames_rendered, total = self.frame_count(), "frame rendered");
            }
        }
    }

    pub fn mark_uploaded(&mut self, frame: i64) {
        if let Some(i) = self.index_of(frame) {
            let a = &mut self.assignments[i];
            if !a.uploaded {
                a.uploaded = true;
                self.frames_uploaded += 1;
                info!(frame, uploaded = self.frames_uploaded, total = self.frame_count(), "frame uploaded");
            }
        }
    }

    pub fn mark_irretrievable(&mut self, frame: i64) {
        if let Some(i) = self.index_of(frame) {
            let a = &mut self.assignments[i];
            if !a.irretrievable {
                a.irretrievable = true;
                self.frames_irretrievable += 1;
                info!(frame, "frame marked irretrievable");
            }
        }
    }

    /// First assignment whose `assignee == worker`, `rendered`, and neither
    /// `uploaded` nor `irretrievable` (§4.4).
    pub fn next_for_uploading<A: Assignee>(&self, worker: &A) -> Option<i64> {
        self.assignments
            .iter()
            .find(|a| {
                a.assignee.as_deref() == Some(worker.identity()) && a.rendered && !a.uploaded && !a.irretrievable
            })
            .map(|a| a.frame_number)
    }

    /// Per-worker `(count, mean_elapsed_seconds)` over rendered frames.
    pub fn worker_statistics(&self) -> HashMap<String, (usize, f64)> {
        let mut sums: HashMap<String, (usize, f64)> = HashMap::new();
        for a in &self.assignments {
            if a.rendered {
                if let (Some(who), Some(elapsed)) = (&a.assignee, a.elapsed) {
                    let entry = sums.entry(who.clone()).or_insert((0, 0.0));
                    entry.0 += 1;
                    entry.1 += elapsed.as_secs_f64();
                }
            }
        }
        sums.into_iter()
            .map(|(who, (count, total))| (who, (count, total / count as f64)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DisplayMode;

    struct FakeWorker {
        identity: String,
        alive: bool,
    }

    impl Assignee for FakeWorker {
        fn identity(&self) -> &str {
            &self.identity
        }
        fn ok(&self) -> bool {
            self.alive
        }
    }

    fn settings() -> RenderSettings {
        RenderSettings::new(100, 100, 100, DisplayMode::Area)
    }

    #[test]
    fn frame_count_and_initial_state() {
        let job = RenderJob::new(5, 8, settings(), Duration::from_secs(30));
        assert_eq!(job.frame_count(), 4);
        assert_eq!(job.frames_rendered(), 0);
        assert!(!job.rendering_complete());
        assert!(!job.uploading_complete());
    }

    #[test]
    fn assign_next_frame_is_first_available_in_order() {
        let mut job = RenderJob::new(1, 3, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };

        assert_eq!(job.assign_next_frame(&worker), Some(1));
        assert_eq!(job.assign_next_frame(&worker), Some(2));
        assert_eq!(job.assign_next_frame(&worker), Some(3));
        assert_eq!(job.assign_next_frame(&worker), None);
    }

    #[test]
    fn mark_rendered_is_idempotent() {
        let mut job = RenderJob::new(1, 1, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };
        job.assign_next_frame(&worker);

        job.mark_rendered(1);
        job.mark_rendered(1);
        job.mark_rendered(1);

        assert_eq!(job.frames_rendered(), 1);
        assert!(job.rendering_complete());
    }

    #[test]
    fn mark_uploaded_and_irretrievable_are_idempotent_and_exclusive() {
        let mut job = RenderJob::new(1, 2, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };
        job.assign_next_frame(&worker);
        job.assign_next_frame(&worker);
        job.mark_rendered(1);
        job.mark_rendered(2);

        job.mark_uploaded(1);
        job.mark_uploaded(1);
        assert_eq!(job.frames_uploaded(), 1);

        job.mark_irretrievable(2);
        job.mark_irretrievable(2);
        assert_eq!(job.frames_irretrievable(), 1);

        assert!(job.uploading_complete());
    }

    #[test]
    fn unassign_frame_only_applies_if_not_rendered() {
        let mut job = RenderJob::new(1, 1, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };
        job.assign_next_frame(&worker);
        job.mark_rendered(1);

        job.unassign_frame(1);
        assert_eq!(job.assignments()[0].assignee(), Some("a"));
    }

    #[test]
    fn reap_dead_assignee_frees_unrendered_frame() {
        let mut job = RenderJob::new(1, 1, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: false };
        job.assign_next_frame(&worker);

        job.reap_dead_assignee("a");
        assert_eq!(job.assignments()[0].assignee(), None);

        let another = FakeWorker { identity: "b".into(), alive: true };
        assert_eq!(job.assign_next_frame(&another), Some(1));
    }

    #[test]
    fn next_for_uploading_requires_rendered_and_not_yet_uploaded() {
        let mut job = RenderJob::new(1, 1, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };

        assert_eq!(job.next_for_uploading(&worker), None);
        job.assign_next_frame(&worker);
        assert_eq!(job.next_for_uploading(&worker), None);
        job.mark_rendered(1);
        assert_eq!(job.next_for_uploading(&worker), Some(1));
        job.mark_uploaded(1);
        assert_eq!(job.next_for_uploading(&worker), None);
    }

    #[test]
    fn worker_statistics_aggregates_rendered_frames() {
        let mut job = RenderJob::new(1, 3, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };
        job.assign_next_frame(&worker);
        job.assign_next_frame(&worker);
        job.assign_next_frame(&worker);
        job.mark_rendered(1);
        job.mark_rendered(2);
        job.mark_rendered(3);

        let stats = job.worker_statistics();
        assert_eq!(stats.get("a").unwrap().0, 3);
    }

    #[test]
    fn progress_tracks_render_then_upload_phase() {
        let mut job = RenderJob::new(1, 2, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };
        job.assign_next_frame(&worker);
        job.assign_next_frame(&worker);

        job.mark_rendered(1);
        assert_eq!(job.progress(), 0.5);

        job.mark_rendered(2);
        assert_eq!(job.progress(), 0.0); // switched to upload phase, none uploaded yet

        job.mark_uploaded(1);
        assert_eq!(job.progress(), 0.5);
    }

    #[test]
    fn invariant_rendered_plus_unrendered_equals_frame_count() {
        let mut job = RenderJob::new(1, 5, settings(), Duration::from_secs(30));
        let worker = FakeWorker { identity: "a".into(), alive: true };
        for _ in 0..3 {
            if let Some(f) = job.assign_next_frame(&worker) {
                job.mark_rendered(f);
            }
        }
        let unrendered = job.assignments().iter().filter(|a| !a.rendered()).count();
        assert_eq!(job.frames_rendered() + unrendered, job.frame_count());
    }
}
