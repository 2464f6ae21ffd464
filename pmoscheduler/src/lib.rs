//! # pmoscheduler - Ordonnanceur de timeouts
//!
//! Ce crate fournit le [`Scheduler`] utilisé par toute la pile UPnP pour piloter
//! les comportements temporisés : rafraîchissement des annonces SSDP, timeout
//! des recherches, délai aléatoire des réponses M-SEARCH et expiration des
//! abonnements GENA.
//!
//! ## Fonctionnement
//!
//! - Un registre de tâches protégé par un mutex et une condition variable
//! - Un thread de boucle démarré à la demande, arrêté quand le registre est vide
//! - Les callbacks s'exécutent sur un pool de workers, jamais sur le thread de boucle
//! - Une tâche n'est jamais exécutée deux fois en parallèle
//!
//! ## Exemple
//!
//! ```no_run
//! use pmoscheduler::Scheduler;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new();
//!
//! let handle = scheduler.add(Duration::from_millis(500), || {
//!     println!("fired");
//!     Ok(())
//! });
//!
//! // Annulation idempotente
//! handle.dispose();
//! handle.dispose();
//! ```

mod dispatcher;
mod pool;
mod task;

pub use dispatcher::{DEFAULT_WORKERS, MAX_DELAY, Scheduler};
pub use pool::WorkerPool;
pub use task::{ErrorHandler, TaskId, TimeoutHandle};
