use futures_util::future::join_all;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Default number of workers for per-node stages
pub const DEFAULT_PARALLELISM: usize = 16;

/// Runs a per-piece closure on a bounded pool of blocking workers
#[derive(Debug, Clone, Copy)]
pub struct Parallelizer {
    parallelism: usize,
}

impl Default for Parallelizer {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}

impl Parallelizer {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run `f(i)` for every `i` in `0..pieces` and wait for all workers.
    ///
    /// Workers pull the next index from a shared counter and check `token`
    /// before each piece. Pieces never started because of cancellation, or
    /// whose call panicked, come back as `None`; a panic in one piece does
    /// not affect the others.
    pub async fn until<T, F>(&self, token: &CancellationToken, pieces: usize, f: F) -> Vec<Option<T>>
    where
        T: Send + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        if pieces == 0 {
            return Vec::new();
        }

        let workers = self.parallelism.min(pieces);
        let next = Arc::new(AtomicUsize::new(0));
        let f = Arc::new(f);

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let next = next.clone();
                let f = f.clone();
                let token = token.clone();
                tokio::task::spawn_blocking(move || {
                    let mut done = Vec::new();
                    while !token.is_cancelled() {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        if i >= pieces {
                            break;
                        }
                        match catch_unwind(AssertUnwindSafe(|| f(i))) {
                            Ok(value) => done.push((i, value)),
                            Err(_) => error!("Parallel piece {} panicked", i),
                        }
                    }
                    done
                })
            })
            .collect();

        let mut results: Vec<Option<T>> = (0..pieces).map(|_| None).collect();
        for joined in join_all(handles).await {
            match joined {
                Ok(done) => {
                    for (i, value) in done {
                        results[i] = Some(value);
                    }
                }
                Err(e) => error!("Parallel worker failed: {}", e),
            }
        }
        results
    }
}
