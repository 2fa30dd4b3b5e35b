use std::sync::Mutex;
use tracing::info;

/// Progress sink fed from the extraction worker.
///
/// Implementations that drive a UI are expected to marshal to their own
/// thread; `report` is always called from the worker.
pub trait StatusSink: Send + Sync {
    fn report(&self, message: &str, percent: Option<u8>);
}

impl<F> StatusSink for F
where
    F: Fn(&str, Option<u8>) + Send + Sync,
{
    fn report(&self, message: &str, percent: Option<u8>) {
        self(message, percent)
    }
}

/// Forwards every status line to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn report(&self, message: &str, percent: Option<u8>) {
        match percent {
            Some(pct) => info!(progress = pct, "{}", message),
            None => info!("{}", message),
        }
    }
}

/// Keeps every status line in memory.
#[derive(Debug, Default)]
pub struct RecordingStatus {
    lines: Mutex<Vec<(String, Option<u8>)>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(String, Option<u8>)> {
        self.lines
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|(m, _)| m).collect()
    }

    #[cfg(test)]
    pub fn contains(&self, fragment: &str) -> bool {
        self.lines().iter().any(|(m, _)| m.contains(fragment))
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.lines().iter().rev().find_map(|(_, p)| *p)
    }
}

impl StatusSink for RecordingStatus {
    fn report(&self, message: &str, percent: Option<u8>) {
        TracingStatus.report(message, percent);
        let mut lines = self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.push((message.to_string(), percent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closures_are_sinks() {
        let seen = AtomicUsize::new(0);
        let sink = |_: &str, pct: Option<u8>| {
            seen.fetch_add(pct.unwrap_or(0) as usize, Ordering::SeqCst);
        };
        sink.report("a", Some(10));
        sink.report("b", None);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_recording_status() {
        let rec = RecordingStatus::new();
        rec.report("Iniciando navegador...", Some(10));
        rec.report("sem progresso", None);
        assert!(rec.contains("navegador"));
        assert_eq!(rec.last_percent(), Some(10));
        assert_eq!(rec.messages().len(), 2);
    }
}
