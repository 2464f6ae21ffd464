//! Tâches planifiées et handles d'annulation

use crate::dispatcher::Inner;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Handler invoqué quand un callback échoue ou panique.
pub type ErrorHandler = Arc<dyn Fn(anyhow::Error) + Send + Sync + 'static>;

/// Identifiant d'une tâche dans le registre d'un [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub(crate) enum Tick {
    Once(Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>),
    Repeating(Box<dyn FnMut() -> anyhow::Result<()> + Send + 'static>),
}

/// Entrée du registre.
///
/// `tick` vaut `None` pendant qu'une tâche répétitive est sur un worker :
/// le callback y est déplacé puis rendu à la fin de l'exécution.
pub(crate) struct TaskEntry {
    pub(crate) tick: Option<Tick>,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) next_fire: Instant,
    pub(crate) interval: Option<Duration>,
    pub(crate) executing: bool,
    pub(crate) cancelled: Arc<AtomicBool>,
}

/// Job prêt à partir sur le pool.
pub(crate) struct DueTask {
    pub(crate) id: TaskId,
    pub(crate) tick: Tick,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) cancelled: Arc<AtomicBool>,
}

/// Handle d'une tâche planifiée.
///
/// `dispose` annule la tâche. L'appel est idempotent et peut être fait depuis
/// le callback de la tâche elle-même. Détruire le handle n'annule rien : une
/// tâche dont on ignore le handle va jusqu'au bout.
pub struct TimeoutHandle {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
    scheduler: Weak<Inner>,
}

impl TimeoutHandle {
    pub(crate) fn new(id: TaskId, cancelled: Arc<AtomicBool>, scheduler: Weak<Inner>) -> Self {
        Self {
            id,
            cancelled,
            scheduler,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Annule la tâche et la retire du registre.
    pub fn dispose(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.scheduler.upgrade() {
            inner.remove(self.id);
        }
    }

    /// `true` une fois `dispose` appelé ou le registre vidé par `clear`.
    pub fn is_disposed(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TimeoutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutHandle")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
