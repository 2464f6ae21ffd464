//! Pool de workers exécutant les callbacks planifiés

use crossbeam_channel::{Sender, unbounded};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool fixe de threads alimenté par un canal crossbeam.
///
/// Les workers s'arrêtent d'eux-mêmes quand le pool est détruit
/// (fermeture du canal). Le nombre de threads est fixé à la création ; les
/// jobs en excès attendent dans le canal.
pub struct WorkerPool {
    sender: Sender<Job>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let size = size.max(1);

        for index in 0..size {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", name, index))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        // Un job qui panique ne doit pas emporter le worker
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!("Job panicked on a worker thread");
                        }
                    }
                });

            if let Err(err) = spawned {
                warn!("Failed to spawn worker {} for '{}': {}", index, name, err);
            }
        }

        debug!("Worker pool '{}' ready ({} workers)", name, size);
        Self { sender }
    }

    /// Soumet un job au pool.
    ///
    /// Si aucun worker n'est disponible (canal fermé), le job part sur un
    /// thread dédié plutôt que d'être perdu.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(err) = self.sender.send(Box::new(job)) {
            let job = err.into_inner();
            if let Err(err) = thread::Builder::new().spawn(job) {
                warn!("Dropping scheduled job, no thread available: {}", err);
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pending", &self.sender.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_jobs_share_a_fixed_set_of_threads() {
        let pool = WorkerPool::new("pool-test", 2);
        let names = Arc::new(Mutex::new(HashSet::new()));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        for _ in 0..50 {
            let (names, done_tx) = (names.clone(), done_tx.clone());
            pool.submit(move || {
                let name = thread::current().name().map(str::to_string);
                names.lock().insert(name);
                let _ = done_tx.send(());
            });
        }
        for _ in 0..50 {
            done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }

        let names = names.lock();
        assert!(names.len() <= 2, "threads used: {:?}", *names);
        assert!(names.iter().all(|n| n.as_deref().is_some_and(|n| n.starts_with("pool-test-worker-"))));
    }
}
