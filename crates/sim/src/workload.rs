//! Worker-pool workload execution.
//!
//! Used by the CLI and the integration tests to put concurrent load on
//! the access layer. All workers are joined before results come back, so
//! nothing keeps running once the caller resumes.

use std::future::Future;

use tokio::task::JoinSet;

/// Run `workers` concurrent tasks, each performing `ops_per_worker`
/// sequential operations, and collect every result once all workers have
/// joined. `op` is cloned per worker and called with
/// `(worker, op_index)`; results come back in completion order.
///
/// A panic inside a worker resumes on the caller, so assertion failures
/// in test workloads surface in the test that spawned them.
pub async fn run_concurrent<F, Fut, T>(workers: usize, ops_per_worker: usize, op: F) -> Vec<T>
where
    F: Fn(usize, usize) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut pool = JoinSet::new();
    for worker in 0..workers {
        let op = op.clone();
        pool.spawn(async move {
            let mut results = Vec::with_capacity(ops_per_worker);
            for index in 0..ops_per_worker {
                results.push(op(worker, index).await);
            }
            results
        });
    }

    let mut all = Vec::with_capacity(workers * ops_per_worker);
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(results) => all.extend(results),
            Err(error) => {
                if let Ok(panic) = error.try_into_panic() {
                    std::panic::resume_unwind(panic);
                }
                // Cancellation only happens if the set is dropped early.
            }
        }
    }
    all
}
