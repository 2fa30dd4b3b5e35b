use std::time::Instant;
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  Finished: {} (took {:.2?})", self.label, self.start.elapsed());
    }
}

/// First `max` characters of `s`, with `...` appended when cut.
/// Counts chars, not bytes, so accented text never splits mid-codepoint.
pub fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

/// Linear progress across `total` items between `from` and `to` percent.
pub fn progress_between(from: u8, to: u8, index: usize, total: usize) -> u8 {
    if total == 0 || to <= from {
        return from;
    }
    let span = usize::from(to - from);
    let step = span * index.min(total) / total;
    from + step as u8
}
