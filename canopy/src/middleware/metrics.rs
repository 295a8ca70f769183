//! Metrics middleware - per-component expansion statistics.

use super::{observe, Expansion, NextRender, RenderMiddleware};
use crate::render::RenderStream;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Collects expansion counts and settle times, keyed by expansion label
/// (component name, or `<deferred>` / `<stream>`).
pub struct MetricsMiddleware {
    stats: Arc<Mutex<HashMap<String, ExpansionStats>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpansionStats {
    pub expansions: u64,
    pub settled: u64,
    pub failures: u64,
    pub snapshots: u64,
    pub total_us: u64,
    pub max_us: u64,
}

impl ExpansionStats {
    fn record(&mut self, duration_us: u64, snapshots: u64, success: bool) {
        self.snapshots += snapshots;
        self.total_us += duration_us;
        self.max_us = self.max_us.max(duration_us);
        if success {
            self.settled += 1;
        } else {
            self.failures += 1;
        }
    }

    /// Average settle time over finished expansions.
    pub fn avg_us(&self) -> u64 {
        let finished = self.settled + self.failures;
        if finished == 0 {
            0
        } else {
            self.total_us / finished
        }
    }
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stats for one label.
    pub fn get(&self, label: &str) -> Option<ExpansionStats> {
        let stats = self.stats.lock().ok()?;
        stats.get(label).cloned()
    }

    /// Sorted copy of all stats, ready for serialisation.
    pub fn snapshot(&self) -> BTreeMap<String, ExpansionStats> {
        match self.stats.lock() {
            Ok(stats) => stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(_) => BTreeMap::new(),
        }
    }

    pub fn reset(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.clear();
        }
    }
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderMiddleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn wrap(&self, expansion: Expansion, next: NextRender) -> RenderStream {
        let label = expansion.label();
        if let Ok(mut stats) = self.stats.lock() {
            stats.entry(label.clone()).or_default().expansions += 1;
        }

        let start = Instant::now();
        let snapshots = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let (seen, errored) = (snapshots.clone(), failed.clone());
        let stats = self.stats.clone();

        observe(
            next(),
            move |snapshot| {
                seen.fetch_add(1, Ordering::Relaxed);
                if snapshot.is_err() {
                    errored.store(true, Ordering::Relaxed);
                }
            },
            move || {
                let duration_us = start.elapsed().as_micros() as u64;
                if let Ok(mut stats) = stats.lock() {
                    stats.entry(label).or_default().record(
                        duration_us,
                        snapshots.load(Ordering::Relaxed),
                        !failed.load(Ordering::Relaxed),
                    );
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::node::{Node, StreamFrame};
    use crate::render::Renderer;
    use futures::executor::block_on;

    #[test]
    fn test_stats_recording() {
        let mut stats = ExpansionStats::default();
        stats.record(100, 1, true);
        stats.record(300, 2, false);
        assert_eq!(stats.settled, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.snapshots, 3);
        assert_eq!(stats.max_us, 300);
        assert_eq!(stats.avg_us(), 200);
    }

    #[test]
    fn test_counts_per_component() {
        let metrics = Arc::new(MetricsMiddleware::new());
        let renderer = Renderer::new().with_middleware(metrics.clone());
        let hello = || Node::from_fn("Hello", |_, _| Ok(Node::text("hi")));
        let broken = Node::from_fn("Broken", |_, _| Err(RenderError::msg("boom")));
        let streamed = Node::frames(vec![
            StreamFrame::Partial(Node::text("a")),
            StreamFrame::Final(Node::text("ab")),
        ]);

        assert_eq!(block_on(renderer.render(crate::seq![hello(), hello()])).unwrap(), "hihi");
        assert!(block_on(renderer.render(broken)).is_err());
        assert_eq!(block_on(renderer.render(streamed)).unwrap(), "ab");

        let hello = metrics.get("Hello").unwrap();
        assert_eq!(hello.expansions, 2);
        assert_eq!(hello.settled, 2);
        assert_eq!(metrics.get("Broken").unwrap().failures, 1);
        assert_eq!(metrics.get("<stream>").unwrap().snapshots, 2);

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["Hello"]["expansions"], 2);

        metrics.reset();
        assert!(metrics.snapshot().is_empty());
    }
}
