//! Abonnement GENA

use super::message::{GenaMessage, SubscriptionTimeout};
use super::notifier::NotifySender;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use pmoscheduler::TimeoutHandle;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use url::Url;

struct Lease {
    timeout: SubscriptionTimeout,
    last_renewal: Instant,
    last_renewal_at: DateTime<Utc>,
}

/// Un abonné d'un service.
///
/// Appartient à une seule [`GenaSubscriptionList`](super::GenaSubscriptionList).
/// Le compteur SEQ démarre à 0 et croît d'une unité par notification.
pub struct GenaSubscription {
    id: String,
    callbacks: RwLock<Vec<Url>>,
    lease: Mutex<Lease>,
    seq: AtomicU32,
    pub(crate) expiry: Mutex<Option<TimeoutHandle>>,
}

impl GenaSubscription {
    pub fn new(callbacks: Vec<Url>, timeout: SubscriptionTimeout) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            callbacks: RwLock::new(callbacks),
            lease: Mutex::new(Lease {
                timeout,
                last_renewal: Instant::now(),
                last_renewal_at: Utc::now(),
            }),
            seq: AtomicU32::new(0),
            expiry: Mutex::new(None),
        }
    }

    /// Identifiant, sans préfixe `uuid:`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn callbacks(&self) -> Vec<Url> {
        self.callbacks.read().clone()
    }

    pub fn set_callbacks(&self, callbacks: Vec<Url>) {
        *self.callbacks.write() = callbacks;
    }

    pub fn timeout(&self) -> SubscriptionTimeout {
        self.lease.lock().timeout
    }

    pub fn last_renewal(&self) -> DateTime<Utc> {
        self.lease.lock().last_renewal_at
    }

    pub fn renew(&self, timeout: SubscriptionTimeout) {
        let mut lease = self.lease.lock();
        lease.timeout = timeout;
        lease.last_renewal = Instant::now();
        lease.last_renewal_at = Utc::now();
    }

    /// Temps restant avant expiration ; `None` pour un abonnement infini.
    ///
    /// Une échéance hors de portée d'`Instant` compte aussi comme infinie.
    pub fn remaining(&self) -> Option<Duration> {
        let lease = self.lease.lock();
        let timeout = lease.timeout.as_duration()?;
        let deadline = lease.last_renewal.checked_add(timeout)?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|d| d.is_zero())
    }

    /// Prochaine valeur SEQ à envoyer.
    pub fn sequence(&self) -> u32 {
        self.seq.load(Ordering::SeqCst)
    }

    fn next_sequence(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Envoie un NOTIFY aux callbacks HTTP, dans l'ordre, jusqu'au premier
    /// succès. Chaque appel consomme un numéro de séquence.
    pub fn deliver(&self, body: &str, sender: &dyn NotifySender) -> bool {
        let seq = self.next_sequence();
        let callbacks = self.callbacks();

        for callback in callbacks.iter().filter(|u| u.scheme() == "http") {
            let request = GenaMessage::notify_request(callback, &self.id, seq, body);
            match sender.send(callback, &request) {
                Ok(()) => {
                    trace!("📤 NOTIFY SEQ={} delivered to {} (SID={})", seq, callback, self.id);
                    return true;
                }
                Err(e) => {
                    debug!("NOTIFY SEQ={} to {} failed: {}", seq, callback, e);
                }
            }
        }
        false
    }
}

impl std::fmt::Debug for GenaSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenaSubscription")
            .field("id", &self.id)
            .field("callbacks", &*self.callbacks.read())
            .field("timeout", &self.timeout())
            .field("seq", &self.sequence())
            .finish()
    }
}
