use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// One async mutex per contact, created on demand and dropped once no caller
/// holds or waits on it.
#[derive(Clone, Default)]
pub struct ContactLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl ContactLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, contact_id: &str) -> ContactGuard {
        let lock = {
            let mut locks = lock_map(&self.locks);
            Arc::clone(locks.entry(contact_id.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        ContactGuard {
            guard: Some(guard),
            lock,
            locks: Arc::clone(&self.locks),
            contact_id: contact_id.to_string(),
        }
    }

    pub fn tracked(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    match locks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct ContactGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    locks: Arc<Mutex<LockMap>>,
    contact_id: String,
}

impl Drop for ContactGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = lock_map(&self.locks);
        // The map and this guard hold the only references: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.contact_id);
        }
    }
}

/// Delivery ids already processed, per contact, kept for a bounded window.
/// Independent of sessions so a duplicate arriving after teardown is still caught.
pub struct DeliveryLedger {
    window: Duration,
    per_contact: usize,
    seen: Mutex<HashMap<String, VecDeque<(String, DateTime<Utc>)>>>,
}

impl DeliveryLedger {
    pub fn new(window: Duration, per_contact: usize) -> Self {
        Self { window, per_contact: per_contact.max(1), seen: Mutex::new(HashMap::new()) }
    }

    pub fn contains(&self, contact_id: &str, delivery_id: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.lock();
        let Some(entries) = seen.get_mut(contact_id) else {
            return false;
        };
        self.evict_expired(entries, now);
        entries.iter().any(|(id, _)| id == delivery_id)
    }

    /// Records a processed delivery id and sweeps every contact's expired ids,
    /// so contacts that never write again do not stay in the ledger.
    pub fn record(&self, contact_id: &str, delivery_id: &str, now: DateTime<Utc>) {
        let mut seen = self.lock();
        seen.retain(|_, entries| {
            self.evict_expired(entries, now);
            !entries.is_empty()
        });

        let entries = seen.entry(contact_id.to_string()).or_default();
        if entries.iter().any(|(id, _)| id == delivery_id) {
            return;
        }
        entries.push_back((delivery_id.to_string(), now));
        while entries.len() > self.per_contact {
            entries.pop_front();
        }
    }

    pub fn tracked_contacts(&self) -> usize {
        self.lock().len()
    }

    fn evict_expired(&self, entries: &mut VecDeque<(String, DateTime<Utc>)>, now: DateTime<Utc>) {
        while let Some((_, recorded_at)) = entries.front() {
            let age = now.signed_duration_since(*recorded_at).to_std().unwrap_or_default();
            if age <= self.window {
                break;
            }
            entries.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<(String, DateTime<Utc>)>>> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
