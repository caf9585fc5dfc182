//! Env-gated per-section timing.
//!
//! Timing is off unless `TIT_ENABLE_PROFILER=1` is set when the first section
//! opens. Sections always emit a `tracing` span, so external subscribers see
//! them either way; the built-in accumulator only runs when enabled.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;
use std::time::Instant;

static ENABLED: OnceLock<bool> = OnceLock::new();
static SECTIONS: Mutex<Option<HashMap<&'static str, SectionStats>>> = Mutex::new(None);

#[derive(Debug, Clone, Copy, Default)]
pub struct SectionStats {
    pub calls: u64,
    pub total: Duration,
}

/// Whether the profiler accumulates timings.
pub fn enabled() -> bool {
    *ENABLED.get_or_init(|| std::env::var("TIT_ENABLE_PROFILER").as_deref() == Ok("1"))
}

/// Open a timed section; the timing is recorded when the guard drops.
pub fn section(name: &'static str) -> SectionGuard {
    SectionGuard {
        name,
        start: enabled().then(Instant::now),
        _span: tracing::debug_span!("profile", section = name).entered(),
    }
}

pub struct SectionGuard {
    name: &'static str,
    start: Option<Instant>,
    _span: tracing::span::EnteredSpan,
}

impl std::fmt::Debug for SectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionGuard")
            .field("name", &self.name)
            .field("start", &self.start)
            .finish()
    }
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        let Some(start) = self.start else { return };
        let elapsed = start.elapsed();
        let mut sections = SECTIONS.lock().unwrap();
        let stats = sections
            .get_or_insert_with(HashMap::new)
            .entry(self.name)
            .or_default();
        stats.calls += 1;
        stats.total += elapsed;
    }
}

/// Snapshot of all recorded sections, sorted by total time, slowest first.
pub fn report() -> Vec<(&'static str, SectionStats)> {
    let sections = SECTIONS.lock().unwrap();
    let mut entries: Vec<_> = sections
        .iter()
        .flat_map(|map| map.iter().map(|(&name, &stats)| (name, stats)))
        .collect();
    entries.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.total));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_are_harmless_when_disabled() {
        {
            let _guard = section("test_section");
        }
        // Whether or not the env var is set, reporting must not panic and the
        // guard must not record when disabled.
        let entries = report();
        if !enabled() {
            assert!(entries.iter().all(|(name, _)| *name != "test_section"));
        }
    }
}
