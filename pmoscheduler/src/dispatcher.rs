//! Boucle de dispatch des timeouts

use crate::pool::WorkerPool;
use crate::task::{DueTask, ErrorHandler, TaskEntry, TaskId, Tick, TimeoutHandle};
use anyhow::anyhow;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

/// Nombre de workers par défaut
pub const DEFAULT_WORKERS: usize = 4;

/// Horizon maximal d'une échéance ; les délais plus longs sont ramenés ici.
pub const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// `Instant::now() + delay` sans débordement.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(MAX_DELAY))
        .or_else(|| now.checked_add(Duration::from_secs(24 * 3600)))
        .unwrap_or(now)
}

struct Registry {
    tasks: HashMap<TaskId, TaskEntry>,
    next_id: u64,
    loop_running: bool,
}

impl Registry {
    /// Tâche non exécutée la plus proche de son échéance.
    fn earliest(&self) -> Option<(TaskId, Instant)> {
        self.tasks
            .iter()
            .filter(|(_, task)| !task.executing)
            .min_by_key(|(_, task)| task.next_fire)
            .map(|(id, task)| (*id, task.next_fire))
    }

    /// Sort une tâche échue du registre (one-shot) ou la marque en cours (répétitive).
    fn take_due(&mut self, id: TaskId) -> Option<DueTask> {
        let repeating = self.tasks.get(&id)?.interval.is_some();

        if !repeating {
            let entry = self.tasks.remove(&id)?;
            return Some(DueTask {
                id,
                tick: entry.tick?,
                on_error: entry.on_error,
                cancelled: entry.cancelled,
            });
        }

        let entry = self.tasks.get_mut(&id)?;
        let tick = entry.tick.take()?;
        entry.executing = true;
        Some(DueTask {
            id,
            tick,
            on_error: entry.on_error.clone(),
            cancelled: entry.cancelled.clone(),
        })
    }
}

pub(crate) struct Inner {
    name: String,
    registry: Mutex<Registry>,
    wakeup: Condvar,
    pool: WorkerPool,
}

impl Inner {
    pub(crate) fn remove(&self, id: TaskId) {
        let removed = {
            let mut registry = self.registry.lock();
            let removed = registry.tasks.remove(&id);
            if removed.is_some() {
                self.wakeup.notify_all();
            }
            removed
        };
        // Le callback est détruit hors du verrou : il peut tenir des
        // références qui rappellent le scheduler dans leur Drop.
        drop(removed);
    }

    /// Rend le callback d'une tâche répétitive après exécution.
    fn complete(&self, id: TaskId, tick: Tick) {
        let mut leftover = Some(tick);
        {
            let mut registry = self.registry.lock();
            if let Some(entry) = registry.tasks.get_mut(&id) {
                let interval = entry.interval.unwrap_or_default();
                entry.tick = leftover.take();
                entry.executing = false;
                entry.next_fire = deadline_after(interval);
                self.wakeup.notify_all();
            }
        }
        drop(leftover);
    }

    fn dispatch(self: &Arc<Self>, due: DueTask) {
        let scheduler = Arc::downgrade(self);
        self.pool.submit(move || run_due(scheduler, due));
    }
}

fn run_due(scheduler: Weak<Inner>, due: DueTask) {
    let DueTask {
        id,
        tick,
        on_error,
        cancelled,
    } = due;

    // Annulée entre la sélection et l'exécution
    if cancelled.load(Ordering::SeqCst) {
        trace!("Skipping cancelled {}", id);
        return;
    }

    match tick {
        Tick::Once(callback) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(callback));
            report(id, outcome, on_error.as_ref());
        }
        Tick::Repeating(mut callback) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback()));
            report(id, outcome, on_error.as_ref());
            if let Some(inner) = scheduler.upgrade() {
                inner.complete(id, Tick::Repeating(callback));
            }
        }
    }
}

fn report(
    id: TaskId,
    outcome: Result<anyhow::Result<()>, Box<dyn Any + Send>>,
    on_error: Option<&ErrorHandler>,
) {
    let err = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(payload) => anyhow!("{} panicked: {}", id, panic_message(payload.as_ref())),
    };

    match on_error {
        Some(handler) => {
            // Un handler qui panique ne doit pas tuer le worker
            if panic::catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                warn!("Error handler of {} panicked", id);
            }
        }
        None => warn!("Scheduled {} failed: {:#}", id, err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_loop(inner: Arc<Inner>) {
    trace!("Scheduler '{}' loop started", inner.name);
    let mut registry = inner.registry.lock();

    loop {
        if registry.tasks.is_empty() {
            registry.loop_running = false;
            trace!("Scheduler '{}' loop drained, exiting", inner.name);
            return;
        }

        let Some((id, next_fire)) = registry.earliest() else {
            // Toutes les tâches sont en cours d'exécution
            inner.wakeup.wait(&mut registry);
            continue;
        };

        let now = Instant::now();
        if next_fire > now {
            inner.wakeup.wait_for(&mut registry, next_fire - now);
            continue;
        }

        if let Some(due) = registry.take_due(id) {
            inner.dispatch(due);
        }
    }
}

/// Dispatcher de timeouts.
///
/// Chaque instance possède son propre registre, son thread de boucle (démarré
/// à la première tâche, arrêté quand le registre se vide) et son pool de
/// workers. Les moteurs SSDP et GENA reçoivent un `Arc<Scheduler>` construit
/// par l'appelant.
///
/// Détruire le scheduler annule toutes les tâches restantes.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_workers("pmoscheduler", DEFAULT_WORKERS)
    }

    /// Crée un scheduler nommé avec `workers` threads d'exécution.
    pub fn with_workers(name: &str, workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                registry: Mutex::new(Registry {
                    tasks: HashMap::new(),
                    next_id: 1,
                    loop_running: false,
                }),
                wakeup: Condvar::new(),
                pool: WorkerPool::new(name, workers),
            }),
        }
    }

    /// Exécute `tick` une fois après `timeout`.
    pub fn add<F>(&self, timeout: Duration, tick: F) -> TimeoutHandle
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule(Tick::Once(Box::new(tick)), timeout, None, None)
    }

    /// Comme [`add`](Self::add), avec un handler recevant l'erreur ou la panique du callback.
    pub fn add_with_handler<F, E>(&self, timeout: Duration, tick: F, on_error: E) -> TimeoutHandle
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
        E: Fn(anyhow::Error) + Send + Sync + 'static,
    {
        self.schedule(
            Tick::Once(Box::new(tick)),
            timeout,
            None,
            Some(Arc::new(on_error)),
        )
    }

    /// Exécute `tick` toutes les `interval`, la première fois après
    /// `initial_delay` (par défaut `interval`).
    ///
    /// Un intervalle nul donne une tâche one-shot.
    pub fn add_repeating<F>(
        &self,
        interval: Duration,
        initial_delay: Option<Duration>,
        tick: F,
    ) -> TimeoutHandle
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule_repeating(interval, initial_delay, tick, None)
    }

    pub fn add_repeating_with_handler<F, E>(
        &self,
        interval: Duration,
        initial_delay: Option<Duration>,
        tick: F,
        on_error: E,
    ) -> TimeoutHandle
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
        E: Fn(anyhow::Error) + Send + Sync + 'static,
    {
        self.schedule_repeating(interval, initial_delay, tick, Some(Arc::new(on_error)))
    }

    /// Annule toutes les tâches.
    pub fn clear(&self) {
        let drained: Vec<TaskEntry> = {
            let mut registry = self.inner.registry.lock();
            let drained = registry.tasks.drain().map(|(_, task)| task).collect();
            self.inner.wakeup.notify_all();
            drained
        };
        for task in &drained {
            task.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Nombre de tâches enregistrées (en attente ou en cours).
    pub fn len(&self) -> usize {
        self.inner.registry.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` si la tâche du handle est encore dans le registre.
    pub fn contains(&self, handle: &TimeoutHandle) -> bool {
        self.inner.registry.lock().tasks.contains_key(&handle.id())
    }

    fn schedule_repeating<F>(
        &self,
        interval: Duration,
        initial_delay: Option<Duration>,
        mut tick: F,
        on_error: Option<ErrorHandler>,
    ) -> TimeoutHandle
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let first = initial_delay.unwrap_or(interval);
        if interval.is_zero() {
            return self.schedule(Tick::Once(Box::new(move || tick())), first, None, on_error);
        }
        self.schedule(Tick::Repeating(Box::new(tick)), first, Some(interval), on_error)
    }

    fn schedule(
        &self,
        tick: Tick,
        delay: Duration,
        interval: Option<Duration>,
        on_error: Option<ErrorHandler>,
    ) -> TimeoutHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = self.inner.registry.lock();

        let id = TaskId(registry.next_id);
        registry.next_id += 1;
        registry.tasks.insert(
            id,
            TaskEntry {
                tick: Some(tick),
                on_error,
                next_fire: deadline_after(delay),
                interval,
                executing: false,
                cancelled: cancelled.clone(),
            },
        );

        if !registry.loop_running {
            registry.loop_running = true;
            let inner = self.inner.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-loop", self.inner.name))
                .spawn(move || run_loop(inner));
            if let Err(err) = spawned {
                registry.loop_running = false;
                error!("Scheduler '{}' cannot start its loop: {}", self.inner.name, err);
            }
        }

        self.inner.wakeup.notify_all();
        TimeoutHandle::new(id, cancelled, Arc::downgrade(&self.inner))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("tasks", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_zero_interval_is_one_shot() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();

        scheduler.add_repeating(Duration::ZERO, Some(Duration::from_millis(10)), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[test]
    fn test_one_shot_leaves_registry_before_firing() {
        let scheduler = Arc::new(Scheduler::new());
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let (s, observed) = (scheduler.clone(), seen.clone());

        scheduler.add(Duration::from_millis(5), move || {
            observed.store(s.len(), Ordering::SeqCst);
            Ok(())
        });

        thread::sleep(Duration::from_millis(150));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_huge_delay_is_clamped() {
        let scheduler = Scheduler::new();
        let handle = scheduler.add(Duration::from_secs(u64::MAX), || Ok(()));
        scheduler.add_repeating(Duration::MAX, None, || Ok(()));
        assert_eq!(scheduler.len(), 2);

        let before = Instant::now();
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline >= before);

        handle.dispose();
        scheduler.clear();
        assert!(scheduler.is_empty());
    }
}
