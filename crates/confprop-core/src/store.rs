//! In-memory configuration store with an ordered, replayable change log.
//!
//! Items are keyed by `(EntityType, name)`. Every effective mutation is
//! assigned the next sequence number and fanned out to live subscribers whose
//! filter accepts it. Writes that change nothing emit nothing.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::{
    ChangeLog, ChangeOperation, ChangeRecord, ConfigKey, EntityType, FilterPredicate, Result,
    ScheduleDefinition, ScheduleIndex, SequenceNumber, SpokeAccountStore,
};

struct Subscriber {
    filter: Option<FilterPredicate>,
    tx: UnboundedSender<ChangeRecord>,
}

#[derive(Default)]
struct Inner {
    items: BTreeMap<ConfigKey, Vec<u8>>,
    counter: u64,
    log: Vec<ChangeRecord>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn emit(&mut self, key: &ConfigKey, operation: ChangeOperation, payload: Vec<u8>) -> ChangeRecord {
        self.counter += 1;
        let record = ChangeRecord::new(
            key.name.clone(),
            key.entity_type,
            operation,
            SequenceNumber::from_counter(self.counter),
        )
        .with_payload(payload);

        self.log.push(record.clone());
        // Drop subscribers whose receiving side is gone
        self.subscribers.retain(|sub| {
            if sub.filter.as_ref().map_or(true, |f| f.matches(&record)) {
                sub.tx.send(record.clone()).is_ok()
            } else {
                !sub.tx.is_closed()
            }
        });
        trace!(key = %key, op = %operation, seq = %record.sequence_number, "change emitted");
        record
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    inner: RwLock<Inner>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an item. Returns `None` when the stored payload is unchanged.
    pub fn put(&self, key: ConfigKey, payload: Vec<u8>) -> Option<ChangeRecord> {
        let mut inner = self.inner.write();
        let operation = match inner.items.get(&key) {
            Some(existing) if *existing == payload => return None,
            Some(_) => ChangeOperation::Modify,
            None => ChangeOperation::Insert,
        };
        inner.items.insert(key.clone(), payload.clone());
        Some(inner.emit(&key, operation, payload))
    }

    /// Remove an item. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &ConfigKey) -> Option<ChangeRecord> {
        let mut inner = self.inner.write();
        inner.items.remove(key)?;
        Some(inner.emit(key, ChangeOperation::Delete, Vec::new()))
    }

    pub fn get(&self, key: &ConfigKey) -> Option<Vec<u8>> {
        self.inner.read().items.get(key).cloned()
    }

    pub fn contains(&self, key: &ConfigKey) -> bool {
        self.inner.read().items.contains_key(key)
    }

    /// Names of all items of one entity type, in key order.
    pub fn names(&self, entity_type: EntityType) -> Vec<String> {
        self.inner
            .read()
            .items
            .keys()
            .filter(|k| k.entity_type == entity_type)
            .map(|k| k.name.clone())
            .collect()
    }

    pub fn put_schedule(&self, schedule: &ScheduleDefinition) -> Result<Option<ChangeRecord>> {
        let payload = serde_json::to_vec(schedule)?;
        Ok(self.put(ConfigKey::schedule(schedule.name.clone()), payload))
    }

    pub fn put_period(&self, name: &str, payload: Vec<u8>) -> Option<ChangeRecord> {
        self.put(ConfigKey::period(name), payload)
    }

    pub fn last_sequence(&self) -> Option<SequenceNumber> {
        self.inner.read().log.last().map(|r| r.sequence_number.clone())
    }
}

impl ChangeLog for MemoryConfigStore {
    fn subscribe(&self, filter: Option<FilterPredicate>) -> UnboundedReceiver<ChangeRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().subscribers.push(Subscriber { filter, tx });
        rx
    }

    fn history_since(&self, after: Option<&SequenceNumber>) -> Vec<ChangeRecord> {
        let inner = self.inner.read();
        match after {
            None => inner.log.clone(),
            Some(seq) => inner
                .log
                .iter()
                .filter(|r| r.sequence_number > *seq)
                .cloned()
                .collect(),
        }
    }
}

#[async_trait]
impl SpokeAccountStore for MemoryConfigStore {
    async fn register_spoke_accounts(&self, account_ids: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        for id in account_ids {
            if self.put(ConfigKey::account(id.clone()), Vec::new()).is_some() {
                debug!(account = %id, "spoke account stored");
            }
        }
        self.spoke_accounts().await
    }

    async fn deregister_spoke_accounts(&self, account_ids: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        for id in account_ids {
            if self.delete(&ConfigKey::account(id.clone())).is_some() {
                debug!(account = %id, "spoke account removed");
            }
        }
        self.spoke_accounts().await
    }

    async fn spoke_accounts(&self) -> Result<BTreeSet<String>> {
        Ok(self.names(EntityType::Account).into_iter().collect())
    }
}

#[async_trait]
impl ScheduleIndex for MemoryConfigStore {
    async fn find_by_period(&self, period_name: &str) -> Result<Vec<ScheduleDefinition>> {
        let payloads: Vec<Vec<u8>> = {
            let inner = self.inner.read();
            inner
                .items
                .iter()
                .filter(|(k, _)| k.entity_type == EntityType::Schedule)
                .map(|(_, v)| v.clone())
                .collect()
        };

        let mut found = Vec::new();
        for payload in payloads {
            let schedule: ScheduleDefinition = serde_json::from_slice(&payload)?;
            if schedule.references_period(period_name) {
                found.push(schedule);
            }
        }
        Ok(found)
    }
}
