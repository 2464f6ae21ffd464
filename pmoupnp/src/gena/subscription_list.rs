//! Abonnés d'un service : SUBSCRIBE, renouvellement, UNSUBSCRIBE, expiration

use super::GenaSettings;
use super::errors::GenaError;
use super::message::GenaMessage;
use super::notifier::NotifySender;
use super::property::GenaPropertySet;
use super::subscription::GenaSubscription;
use crossbeam_channel::{Receiver, bounded};
use parking_lot::Mutex;
use pmoscheduler::{Scheduler, WorkerPool};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

struct ListInner {
    service_id: String,
    scheduler: Arc<Scheduler>,
    sender: Arc<dyn NotifySender>,
    settings: GenaSettings,
    pool: Arc<WorkerPool>,
    subscriptions: Mutex<HashMap<String, Arc<GenaSubscription>>>,
}

/// Abonnements d'un service, indexés par SID.
///
/// Chaque abonnement fini a exactement une vérification d'expiration en
/// attente dans le scheduler ; c'est elle qui retire les abonnés jamais
/// renouvelés.
#[derive(Clone)]
pub struct GenaSubscriptionList {
    inner: Arc<ListInner>,
}

/// Notifications en cours d'envoi sur le pool NOTIFY, une par abonné.
pub struct NotifyDispatch {
    pending: usize,
    results: Receiver<bool>,
}

impl NotifyDispatch {
    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Attend la fin des envois ; retourne le nombre d'abonnés atteints.
    ///
    /// Un envoi qui panique ne rend pas de résultat et compte comme raté.
    pub fn wait(self) -> usize {
        self.results
            .iter()
            .take(self.pending)
            .filter(|delivered| *delivered)
            .count()
    }
}

/// SID et (NT ou CALLBACK) sont exclusifs.
fn verify_headers(request: &GenaMessage) -> Result<(), GenaError> {
    if request.sid().is_some() && (request.nt().is_some() || request.has_callback_header()) {
        return Err(GenaError::BadRequest(
            "SID header combined with NT or CALLBACK".to_string(),
        ));
    }
    Ok(())
}

impl GenaSubscriptionList {
    /// Liste avec son propre pool d'envoi (`settings.notify_workers` threads).
    pub fn new(
        service_id: impl Into<String>,
        scheduler: Arc<Scheduler>,
        sender: Arc<dyn NotifySender>,
        settings: GenaSettings,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(
            "pmoupnp-gena-notify",
            settings.notify_workers,
        ));
        Self::with_pool(service_id, scheduler, sender, settings, pool)
    }

    /// Liste partageant le pool d'envoi d'un serveur.
    pub fn with_pool(
        service_id: impl Into<String>,
        scheduler: Arc<Scheduler>,
        sender: Arc<dyn NotifySender>,
        settings: GenaSettings,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            inner: Arc::new(ListInner {
                service_id: service_id.into(),
                scheduler,
                sender,
                settings,
                pool,
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.inner.service_id
    }

    /// Crée un abonnement et retourne la réponse 200 (SID, TIMEOUT, DATE, SERVER).
    pub fn subscribe(&self, request: &GenaMessage) -> Result<GenaMessage, GenaError> {
        verify_headers(request)?;

        let callbacks = request.callbacks();
        if callbacks.is_empty() {
            return Err(GenaError::PreconditionFailed(
                "missing or invalid CALLBACK".to_string(),
            ));
        }
        let timeout = request.timeout().unwrap_or(self.inner.settings.default_timeout);
        let subscription = Arc::new(GenaSubscription::new(callbacks, timeout));

        {
            let mut subscriptions = self.inner.subscriptions.lock();
            subscriptions.insert(subscription.id().to_string(), subscription.clone());
            self.inner.schedule_expiry(&subscription);
        }

        info!(
            "✅ GENA subscribe on {}: SID=uuid:{} ({})",
            self.inner.service_id,
            subscription.id(),
            timeout
        );

        Ok(GenaMessage::subscribe_response(
            subscription.id(),
            timeout,
            &self.inner.settings.user_agent,
        ))
    }

    /// Renouvelle un abonnement existant ; SID inconnu : 412.
    pub fn renew(&self, request: &GenaMessage) -> Result<GenaMessage, GenaError> {
        verify_headers(request)?;
        let sid = request
            .sid()
            .ok_or_else(|| GenaError::PreconditionFailed("missing SID".to_string()))?;

        let subscription = {
            let subscriptions = self.inner.subscriptions.lock();
            let subscription = subscriptions
                .get(sid)
                .cloned()
                .ok_or_else(|| GenaError::PreconditionFailed(format!("unknown SID uuid:{}", sid)))?;
            let timeout = request.timeout().unwrap_or(subscription.timeout());
            subscription.renew(timeout);
            self.inner.schedule_expiry(&subscription);
            subscription
        };

        debug!(
            "GENA renew on {}: SID=uuid:{} ({})",
            self.inner.service_id,
            subscription.id(),
            subscription.timeout()
        );

        Ok(GenaMessage::subscribe_response(
            subscription.id(),
            subscription.timeout(),
            &self.inner.settings.user_agent,
        ))
    }

    /// Supprime un abonnement ; SID absent ou inconnu : 412.
    pub fn unsubscribe(&self, request: &GenaMessage) -> Result<GenaMessage, GenaError> {
        verify_headers(request)?;
        let sid = request
            .sid()
            .ok_or_else(|| GenaError::PreconditionFailed("missing SID".to_string()))?;

        let removed = self.inner.subscriptions.lock().remove(sid);
        let Some(subscription) = removed else {
            return Err(GenaError::PreconditionFailed(format!(
                "unknown SID uuid:{}",
                sid
            )));
        };
        if let Some(handle) = subscription.expiry.lock().take() {
            handle.dispose();
        }

        info!(
            "👋 GENA unsubscribe on {}: SID=uuid:{}",
            self.inner.service_id, sid
        );
        Ok(GenaMessage::unsubscribe_response())
    }

    /// Envoie le `propertyset` à tous les abonnés, en parallèle sur le pool.
    pub fn notify(&self, properties: &GenaPropertySet) -> NotifyDispatch {
        self.notify_body(properties.to_xml())
    }

    pub fn notify_body(&self, body: String) -> NotifyDispatch {
        let subscriptions: Vec<Arc<GenaSubscription>> =
            self.inner.subscriptions.lock().values().cloned().collect();
        let body = Arc::new(body);
        let pending = subscriptions.len();
        let (tx, results) = bounded(pending);

        for subscription in subscriptions {
            let body = body.clone();
            let sender = self.inner.sender.clone();
            let tx = tx.clone();
            self.inner.pool.submit(move || {
                let delivered = subscription.deliver(&body, sender.as_ref());
                let _ = tx.send(delivered);
            });
        }

        NotifyDispatch { pending, results }
    }

    pub fn get(&self, sid: &str) -> Option<Arc<GenaSubscription>> {
        let sid = sid.strip_prefix("uuid:").unwrap_or(sid);
        self.inner.subscriptions.lock().get(sid).cloned()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.get(sid).is_some()
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        self.inner.subscriptions.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retire tous les abonnés sans les prévenir.
    pub fn clear(&self) {
        let drained: Vec<Arc<GenaSubscription>> = self
            .inner
            .subscriptions
            .lock()
            .drain()
            .map(|(_, s)| s)
            .collect();
        for subscription in drained {
            if let Some(handle) = subscription.expiry.lock().take() {
                handle.dispose();
            }
        }
    }
}

impl ListInner {
    /// Remplace la vérification d'expiration en attente. À appeler avec
    /// le verrou de la liste.
    fn schedule_expiry(self: &Arc<Self>, subscription: &Arc<GenaSubscription>) {
        let next = subscription.remaining().map(|delay| {
            let list: Weak<ListInner> = Arc::downgrade(self);
            let sub: Weak<GenaSubscription> = Arc::downgrade(subscription);
            self.scheduler.add(delay, move || {
                if let (Some(list), Some(sub)) = (list.upgrade(), sub.upgrade()) {
                    list.check_expiry(&sub);
                }
                Ok(())
            })
        });

        let previous = std::mem::replace(&mut *subscription.expiry.lock(), next);
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    fn check_expiry(self: &Arc<Self>, subscription: &Arc<GenaSubscription>) {
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.get(subscription.id()) {
            Some(current) if Arc::ptr_eq(current, subscription) => {}
            _ => return,
        }

        match subscription.remaining() {
            Some(remaining) if remaining.is_zero() => {
                subscriptions.remove(subscription.id());
                subscription.expiry.lock().take();
                info!(
                    "⌛ GENA subscription expired on {}: SID=uuid:{}",
                    self.service_id,
                    subscription.id()
                );
            }
            _ => self.schedule_expiry(subscription),
        }
    }
}
