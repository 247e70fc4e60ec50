// ABOUTME: Zero-padded frame filenames (§3 payload naming): shared by the local
// ABOUTME: worker's render output and the supervisor's incoming COMPLETE UPLOAD writes.

use std::path::{Path, PathBuf};

fn digit_width(max_frame: i64) -> usize {
    ((max_frame.unsigned_abs() as f64).log10().floor() as usize) + 1
}

/// `<dir>/<frame, zero-padded to max_frame's width><extension>`, so frame
/// filenames within a job always sort and collide the same way regardless
/// of how many digits the final frame needs.
pub fn frame_path(frame: i64, max_frame: i64, extension: &str, dir: &Path) -> PathBuf {
    let digits = digit_width(max_frame);
    dir.join(format!("{frame:0digits$}{extension}"))
}

/// Extract a leading-dot extension from a worker-supplied basename, e.g.
/// `"5.png"` -> `".png"`. Empty if the name carries no extension.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_max_frame_width() {
        assert_eq!(frame_path(7, 250, ".png", Path::new("/tmp/out")), PathBuf::from("/tmp/out/007.png"));
    }

    #[test]
    fn handles_power_of_ten_boundary() {
        assert_eq!(frame_path(100, 100, ".png", Path::new("/tmp/out")), PathBuf::from("/tmp/out/100.png"));
    }

    #[test]
    fn extension_of_extracts_leading_dot() {
        assert_eq!(extension_of("5.png"), ".png");
        assert_eq!(extension_of("5"), "");
    }
}
