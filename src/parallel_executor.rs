//! Bounded parallel processing of directory entries
//!
//! Entries are pulled from an [`EntryStream`] and handed to at most
//! `max_concurrency` tasks at a time. Results come back to the calling task
//! one by one, so the caller aggregates without any locking.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::directory::{DirectoryEntry, EntryStream};
use crate::errors::Result;

/// Statistics of one `execute_stream` run
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub total_operations: u32,
    pub successful: u32,
    /// Tasks that panicked
    pub failed: u32,
    pub total_duration_ms: u64,
    pub peak_in_flight: usize,
}

/// Configuration for parallel execution
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Maximum concurrent operations
    pub max_concurrency: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: crate::config::DEFAULT_WORKERS,
        }
    }
}

pub struct ParallelExecutor {
    config: ParallelConfig,
}

impl ParallelExecutor {
    pub fn new(config: ParallelConfig) -> Self {
        Self {
            config: ParallelConfig {
                max_concurrency: config.max_concurrency.max(1),
            },
        }
    }

    /// Run `operation` on every entry of `stream`, feeding each result to
    /// `sink` on the calling task.
    ///
    /// An enumeration error stops pulling new entries; results of tasks
    /// already started are still delivered to `sink` before the error is
    /// returned. The statistics cover every task either way.
    pub async fn execute_stream<T, F, S>(
        &self,
        stream: &mut EntryStream,
        operation: F,
        mut sink: S,
        operation_name: &str,
    ) -> (ExecutionStats, Result<()>)
    where
        T: Send + 'static,
        F: Fn(DirectoryEntry) -> T + Send + Sync + 'static,
        S: FnMut(T),
    {
        let start = Instant::now();
        let operation = Arc::new(operation);
        let mut tasks: JoinSet<T> = JoinSet::new();
        let mut run = ExecutionStats::default();

        let outcome = loop {
            if tasks.len() >= self.config.max_concurrency {
                if let Some(joined) = tasks.join_next().await {
                    Self::collect(joined, &mut sink, &mut run, operation_name);
                }
            }

            match stream.next().await {
                Ok(Some(entry)) => {
                    let operation = Arc::clone(&operation);
                    tasks.spawn(async move { operation(entry) });
                    run.total_operations += 1;
                    run.peak_in_flight = run.peak_in_flight.max(tasks.len());
                }
                Ok(None) => break Ok(()),
                Err(e) => {
                    warn!(
                        "{}: enumeration failed after {} entries, draining {} in-flight tasks",
                        operation_name,
                        stream.yielded(),
                        tasks.len()
                    );
                    break Err(e);
                }
            }
        };

        while let Some(joined) = tasks.join_next().await {
            Self::collect(joined, &mut sink, &mut run, operation_name);
        }

        let elapsed = start.elapsed();
        run.total_duration_ms = duration_ms(elapsed);

        info!(
            "{}: {}/{} entries processed in {:?} (peak concurrency {})",
            operation_name, run.successful, run.total_operations, elapsed, run.peak_in_flight
        );

        (run, outcome)
    }

    fn collect<T, S>(
        joined: std::result::Result<T, tokio::task::JoinError>,
        sink: &mut S,
        run: &mut ExecutionStats,
        operation_name: &str,
    ) where
        S: FnMut(T),
    {
        match joined {
            Ok(result) => {
                run.successful += 1;
                sink(result);
            }
            Err(e) => {
                run.failed += 1;
                warn!("{}: task failed: {}", operation_name, e);
            }
        }
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis().min(u64::MAX as u128) as u64
}
