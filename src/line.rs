//! Sensor line decoding and classification.
//!
//! The counter firmware logs through ESP-IDF, so a detection arrives as e.g.
//! `I (52340) tcrt5000_counter: Count: 5, Time: 52340 ms`. Classification is a pure
//! function of one line; nothing is remembered between lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Announcement printed once the sensor GPIO and ISR are configured.
pub const READY_MARKER: &str = "TCRT5000 Counter Ready";

/// Announcement printed at firmware boot.
pub const STARTING_MARKER: &str = "TCRT5000 Counter Starting";

const COUNT_MARKER: &str = "Count:";

static DETECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"Count:\s*(\d+),\s*Time:\s*(\d+)\s*ms").expect("detection pattern is valid")
});

/// One object crossing reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Device-side running count since boot
    pub count: u64,
    /// Device uptime in milliseconds at the crossing
    pub time_ms: u64,
}

/// What a serial line means to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorLine {
    /// The counter finished initialization
    Ready,
    /// The counter is booting
    Starting,
    /// An object crossed the sensor
    Detection(Detection),
    /// Anything else; logged verbatim
    Other,
}

/// Classify a decoded line.
///
/// Detection wins over the announcements; a line that mentions `Count:` without
/// the full `Count: <n>, Time: <m> ms` shape is [`SensorLine::Other`].
pub fn classify(line: &str) -> SensorLine {
    if line.contains(COUNT_MARKER) {
        return parse_detection(line)
            .map(SensorLine::Detection)
            .unwrap_or(SensorLine::Other);
    }
    if line.contains(READY_MARKER) {
        SensorLine::Ready
    } else if line.contains(STARTING_MARKER) {
        SensorLine::Starting
    } else {
        SensorLine::Other
    }
}

/// Extract the count and device time from a detection line.
pub fn parse_detection(line: &str) -> Option<Detection> {
    let caps = DETECTION_PATTERN.captures(line)?;
    let count = caps.get(1)?.as_str().parse().ok()?;
    let time_ms = caps.get(2)?.as_str().parse().ok()?;
    Some(Detection { count, time_ms })
}

/// Decode raw serial bytes, dropping invalid UTF-8 and surrounding whitespace.
///
/// Returns `None` when nothing printable is left.
pub fn decode_line(raw: &[u8]) -> Option<String> {
    let text: String = raw.utf8_chunks().map(|chunk| chunk.valid()).collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
