//! Self-monitoring counters for `timeseries pipe`.
//!
//! The counters live in their own RESET key package over a separate
//! [`Timeseries`], so they can go to a different backend than the piped data.
//! They are flushed once per wall-clock interval, stamped with the start of
//! the interval they cover.

use std::time::{SystemTime, UNIX_EPOCH};

use timeseries::backend::graphite::graphite_safe_node;
use timeseries::{KeyPackage, Timeseries};

/// Wall-clock seconds since the Unix epoch.
pub(crate) fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
}

/// Counters kept while piping lines through a key package.
pub(crate) struct PipeStats<'ts> {
    kp: KeyPackage<'ts>,
    interval: u32,
    /// Start of the interval currently being counted.
    time: u32,
    clock: Box<dyn FnMut() -> u32 + 'ts>,
    flush_cnt: usize,
    flushed_key_cnt: usize,
    messages_cnt: usize,
    messages_bytes: usize,
}

impl<'ts> PipeStats<'ts> {
    /// Creates the counters under `prefix.<node>...`, each node made graphite safe.
    ///
    /// `interval` must be non-zero.
    pub(crate) fn new(
        ts: &'ts Timeseries,
        prefix: &str,
        nodes: &[String],
        interval: u32,
        mut clock: Box<dyn FnMut() -> u32 + 'ts>,
    ) -> Self {
        let mut base = prefix.to_string();
        for node in nodes {
            base.push('.');
            base.push_str(&graphite_safe_node(node));
        }

        let mut kp = ts.new_key_package(true, false);
        let flush_cnt = kp.add_key(&format!("{base}.flush_cnt"));
        let flushed_key_cnt = kp.add_key(&format!("{base}.flushed_key_cnt"));
        let messages_cnt = kp.add_key(&format!("{base}.messages_cnt"));
        let messages_bytes = kp.add_key(&format!("{base}.messages_bytes"));

        let now = clock();
        Self {
            kp,
            interval,
            time: now - now % interval,
            clock,
            flush_cnt,
            flushed_key_cnt,
            messages_cnt,
            messages_bytes,
        }
    }

    fn add(&mut self, idx: usize, value: usize) {
        let value = u64::try_from(value).unwrap_or(u64::MAX);
        let old = self.kp.get(idx);
        self.kp.set(idx, old.saturating_add(value));
    }

    /// Counts one data flush of `keys` enabled keys.
    pub(crate) fn record_flush(&mut self, keys: usize) {
        self.add(self.flush_cnt, 1);
        self.add(self.flushed_key_cnt, keys);
    }

    /// Counts one accepted input line of `bytes` bytes.
    pub(crate) fn record_message(&mut self, bytes: usize) {
        self.add(self.messages_cnt, 1);
        self.add(self.messages_bytes, bytes);
    }

    /// Flushes the counters if the clock has moved past the current interval.
    pub(crate) fn maybe_flush(&mut self) {
        let now = (self.clock)();
        let now = now - now % self.interval;
        if now >= self.time.saturating_add(self.interval) {
            self.flush();
            self.time = now;
        }
    }

    /// Flushes whatever the current interval has counted.
    pub(crate) fn finish(mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        tracing::debug!("flushing pipe stats at {}", self.time);
        if let Err(e) = self.kp.flush(self.time) {
            tracing::warn!("stats flush at {} failed: {e}", self.time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeseries::backend::memory::{MemoryBackend, MemorySink};
    use timeseries::{BackendId, BackendRegistry};

    fn memory_timeseries() -> (Timeseries, MemorySink) {
        let backend = MemoryBackend::new(BackendId(1), "stats");
        let sink = backend.sink();
        let mut registry = BackendRegistry::empty();
        registry.register(Box::new(backend)).unwrap();
        let mut ts = Timeseries::with_registry(registry);
        ts.enable_backend(BackendId(1), "").unwrap();
        (ts, sink)
    }

    fn scripted_clock(ticks: Vec<u32>) -> Box<dyn FnMut() -> u32> {
        let last = ticks.last().copied().unwrap_or(0);
        let mut ticks = ticks.into_iter();
        Box::new(move || ticks.next().unwrap_or(last))
    }

    #[test]
    fn test_key_names_use_safe_nodes() {
        let (ts, sink) = memory_timeseries();
        let nodes = vec!["10.0.0.1".to_string(), "raw/bgp".to_string()];
        let stats = PipeStats::new(&ts, "systems.services.tsk", &nodes, 60, scripted_clock(vec![120]));
        stats.finish();

        let batch = sink.last_batch().unwrap();
        assert_eq!(batch.time, 120);
        assert_eq!(batch.entries[0].0, "systems.services.tsk.10-0-0-1.raw_bgp.flush_cnt");
        assert_eq!(batch.entries.len(), 4);
    }

    #[test]
    fn test_flushes_on_interval_boundary_and_resets() {
        let (ts, sink) = memory_timeseries();
        let mut stats = PipeStats::new(&ts, "p", &[], 60, scripted_clock(vec![1000, 1019, 1020, 1030]));

        stats.record_message(7);
        stats.maybe_flush(); // 1019: still in [960, 1020)
        assert!(sink.batches().is_empty());

        stats.record_flush(3);
        stats.record_message(5);
        stats.maybe_flush(); // 1020: interval over
        stats.record_message(1);
        stats.maybe_flush(); // 1030: same interval as 1020
        stats.finish();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].time, 960);
        let values: Vec<u64> = batches[0].entries.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1, 3, 2, 12]);
        assert_eq!(batches[1].time, 1020);
        let values: Vec<u64> = batches[1].entries.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 0, 1, 1]);
    }
}
