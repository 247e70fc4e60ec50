// ABOUTME: The host renderer contract (§6): the external collaborator a worker process
// ABOUTME: delegates actual frame rendering to, kept behind a trait so no renderer is built in.

use crate::settings::RenderSettings;
use std::path::{Path, PathBuf};

/// Outcome of handing a frame off to the host renderer, or of polling one
/// already in flight. `Cancelled` covers a render that the host aborted on
/// its own (the equivalent of Blender's `'CANCELLED'` operator result)
/// rather than one the worker asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Started,
    Completed,
    Cancelled,
}

/// A host application capable of producing a rendered frame. A worker holds
/// one `Box<dyn Renderer>` and never reaches into the host's internals
/// directly — this is the seam a real Blender (or any other DCC) integration
/// plugs into, and the seam test doubles stand in for in unit tests (§6).
pub trait Renderer: Send {
    /// Read the host's current render settings (resolution, percentage,
    /// display mode) to seed a fresh job.
    fn create_render_settings(&self) -> RenderSettings;

    /// Push settings into the host so the next render uses them.
    fn apply_render_settings(&mut self, settings: &RenderSettings);

    /// Ask the host to begin rendering `frame` to `output_path`. Returns
    /// immediately; completion is reported later through `poll_render`.
    fn render_frame(&mut self, frame: i64, output_path: &Path) -> RenderOutcome;

    /// Non-blocking check for whether the in-flight render (if any) has
    /// finished, mirroring the host's render-complete/render-cancel
    /// callbacks. Returns `None` while still running.
    fn poll_render(&mut self) -> Option<RenderOutcome>;

    /// File extension the host writes rendered frames with, including the
    /// leading dot (e.g. `.png`).
    fn filename_extension(&self) -> &str;

    /// Join a frame number onto `root_path` using `filename_extension`.
    fn rendered_frame_path(&self, frame: i64, root_path: &Path) -> PathBuf {
        root_path.join(format!("{frame}{}", self.filename_extension()))
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A renderer double that finishes every render immediately, for tests
    /// that only care about the worker/job state machine, not actual
    /// rendering.
    pub struct InstantRenderer {
        pub settings: RenderSettings,
        pub extension: String,
        pub last_frame: Option<i64>,
    }

    impl InstantRenderer {
        pub fn new(settings: RenderSettings) -> Self {
            InstantRenderer {
                settings,
                extension: ".png".to_string(),
                last_frame: None,
            }
        }
    }

    impl Renderer for InstantRenderer {
        fn create_render_settings(&self) -> RenderSettings {
            self.settings.clone()
        }

        fn apply_render_settings(&mut self, settings: &RenderSettings) {
            self.settings = settings.clone();
        }

        fn render_frame(&mut self, frame: i64, _output_path: &Path) -> RenderOutcome {
            self.last_frame = Some(frame);
            RenderOutcome::Started
        }

        fn poll_render(&mut self) -> Option<RenderOutcome> {
            self.last_frame.take().map(|_| RenderOutcome::Completed)
        }

        fn filename_extension(&self) -> &str {
            &self.extension
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::InstantRenderer;
    use super::*;
    use crate::settings::DisplayMode;

    #[test]
    fn rendered_frame_path_appends_frame_and_extension() {
        let renderer = InstantRenderer::new(RenderSettings::new(100, 100, 100, DisplayMode::Area));
        let path = renderer.rendered_frame_path(42, Path::new("/tmp/out"));
        assert_eq!(path, Path::new("/tmp/out/42.png"));
    }

    #[test]
    fn instant_renderer_reports_started_then_completes_on_poll() {
        let mut renderer = InstantRenderer::new(RenderSettings::new(100, 100, 100, DisplayMode::Area));
        assert_eq!(renderer.render_frame(1, Path::new("/tmp")), RenderOutcome::Started);
        assert_eq!(renderer.poll_render(), Some(RenderOutcome::Completed));
        assert_eq!(renderer.poll_render(), None);
    }
}
