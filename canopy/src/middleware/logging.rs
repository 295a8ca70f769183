//! Tracing middleware - logs expansion lifecycles.

use super::{observe, Expansion, NextRender, RenderMiddleware};
use crate::render::RenderStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Logs when every expansion starts, each snapshot it yields, and when it
/// settles or fails, with elapsed time.
#[derive(Debug, Default)]
pub struct TracingMiddleware;

impl TracingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl RenderMiddleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    fn priority(&self) -> u32 {
        0
    }

    fn wrap(&self, expansion: Expansion, next: NextRender) -> RenderStream {
        let label = expansion.label();
        let depth = expansion.depth;
        debug!(node = %label, kind = %expansion.kind, depth, "expansion started");

        let start = Instant::now();
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        let snapshot_label = label.clone();

        observe(
            next(),
            move |snapshot| {
                let index = seen.fetch_add(1, Ordering::Relaxed);
                match snapshot {
                    Ok(parts) => {
                        trace!(node = %snapshot_label, depth, index, parts = parts.len(), "snapshot")
                    }
                    Err(e) => debug!(
                        node = %snapshot_label,
                        depth,
                        error = %e,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "expansion failed"
                    ),
                }
            },
            move || {
                debug!(
                    node = %label,
                    depth,
                    snapshots = count.load(Ordering::Relaxed),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "expansion finished"
                );
            },
        )
    }
}
