// ABOUTME: RenderSettings — the immutable render-parameter bundle synchronized between
// ABOUTME: supervisor and worker, plus its comma-separated `key=value` wire format (§3).

use rand::Rng;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Window,
    None,
    Screen,
    Area,
    Preferences,
}

impl DisplayMode {
    fn as_str(self) -> &'static str {
        match self {
            DisplayMode::Window => "WINDOW",
            DisplayMode::None => "NONE",
            DisplayMode::Screen => "SCREEN",
            DisplayMode::Area => "AREA",
            DisplayMode::Preferences => "PREFERENCES",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "WINDOW" => Some(DisplayMode::Window),
            "NONE" => Some(DisplayMode::None),
            "SCREEN" => Some(DisplayMode::Screen),
            "AREA" => Some(DisplayMode::Area),
            "PREFERENCES" => Some(DisplayMode::Preferences),
            _ => None,
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for DisplayMode {
    fn default() -> Self {
        DisplayMode::Area
    }
}

/// An immutable render-parameter bundle. Each instance carries a freshly
/// generated 32-bit `synchronization_id` (§3) that lets a worker recognize
/// it has already applied this exact bundle; the id is never expected to
/// survive a serialize/deserialize round trip (§9 Ambiguities).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub resolution_x: i32,
    pub resolution_y: i32,
    pub percentage: i32,
    pub display_mode: DisplayMode,
    pub synchronization_id: u32,
}

impl RenderSettings {
    pub fn new(resolution_x: i32, resolution_y: i32, percentage: i32, display_mode: DisplayMode) -> Self {
        RenderSettings {
            resolution_x,
            resolution_y,
            percentage,
            display_mode,
            synchronization_id: rand::thread_rng().gen(),
        }
    }

    /// Serialize to the comma-separated `key=value` wire payload (§3). The
    /// `synchronization_id` itself is not part of the payload: it travels
    /// as a separate field on the `SYNCHRONIZE` command (§4.2).
    pub fn serialize(&self) -> String {
        format!(
            "resolution_x={},resolution_y={},percentage={},display_mode={}",
            self.resolution_x, self.resolution_y, self.percentage, self.display_mode
        )
    }

    /// Deserialize, tolerating missing keys (defaults apply) and ignoring
    /// unknown keys. A fresh `synchronization_id` is generated — it is never
    /// carried over the wire via this payload.
    pub fn deserialize(serialized: &str) -> Self {
        let mut resolution_x = 1000;
        let mut resolution_y = 1000;
        let mut percentage = 100;
        let mut display_mode = DisplayMode::Area;

        for kv in serialized.split(',') {
            let Some((key, value)) = kv.split_once('=') else {
                continue;
            };
            match key {
                "resolution_x" => {
                    if let Ok(v) = value.parse() {
                        resolution_x = v;
                    }
                }
                "resolution_y" => {
                    if let Ok(v) = value.parse() {
                        resolution_y = v;
                    }
                }
                "percentage" => {
                    if let Ok(v) = value.parse() {
                        percentage = v;
                    }
                }
                "display_mode" => {
                    if let Some(mode) = DisplayMode::parse(value) {
                        display_mode = mode;
                    }
                }
                _ => {} // unknown keys are ignored, per §3
            }
        }

        RenderSettings::new(resolution_x, resolution_y, percentage, display_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_matches_wire_format() {
        let settings = RenderSettings::new(100, 100, 100, DisplayMode::Area);
        assert_eq!(
            settings.serialize(),
            "resolution_x=100,resolution_y=100,percentage=100,display_mode=AREA"
        );
    }

    #[test]
    fn fields_round_trip_but_sync_id_does_not() {
        let original = RenderSettings::new(1920, 1080, 50, DisplayMode::Window);
        let restored = RenderSettings::deserialize(&original.serialize());

        assert_eq!(restored.resolution_x, original.resolution_x);
        assert_eq!(restored.resolution_y, original.resolution_y);
        assert_eq!(restored.percentage, original.percentage);
        assert_eq!(restored.display_mode, original.display_mode);
        assert_ne!(restored.synchronization_id, original.synchronization_id);
    }

    #[test]
    fn missing_keys_get_defaults() {
        let settings = RenderSettings::deserialize("resolution_x=640");
        assert_eq!(settings.resolution_x, 640);
        assert_eq!(settings.resolution_y, 1000);
        assert_eq!(settings.percentage, 100);
        assert_eq!(settings.display_mode, DisplayMode::Area);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings = RenderSettings::deserialize("resolution_x=640,bogus_key=nonsense,percentage=50");
        assert_eq!(settings.resolution_x, 640);
        assert_eq!(settings.percentage, 50);
    }

    #[test]
    fn two_instances_get_different_sync_ids() {
        let a = RenderSettings::new(100, 100, 100, DisplayMode::Area);
        let b = RenderSettings::new(100, 100, 100, DisplayMode::Area);
        // Not a hard guarantee, but collision odds are 1 in 2^32; flags a
        // broken RNG wiring far more often than it flakes.
        assert_ne!(a.synchronization_id, b.synchronization_id);
    }
}
