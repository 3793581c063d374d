//! Record identity map.
//!
//! Optional per-process registry of loaded records keyed by table and
//! primary-key signature. When enabled, lazy resolution of a single-valued
//! relation whose link targets the related table's full primary key can be
//! answered from the map without touching the executor.
//!
//! The map holds strong references; callers that enable it are expected to
//! `clear` it at unit-of-work boundaries.
//!
//! Relations satisfied from the map can go stale when the mapped record is
//! replaced or forgotten. `watch` registers the dependent (owner, relation)
//! pair in an explicit observer list; `forget`, `clear` and a replacing
//! `remember` unset the watching records' cached relation so the next access
//! re-resolves. Watchers are held weakly and never keep a record alive.

use crate::record::{Record, RecordRef};
use crate::relation::def::RelationDef;
use crate::value::key_signature;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

static GLOBAL: Lazy<Arc<IdentityMap>> = Lazy::new(|| Arc::new(IdentityMap::new()));

struct Watch {
    table: String,
    signature: String,
    owner: Weak<RwLock<Record>>,
    relation: String,
}

pub struct IdentityMap {
    enabled: RwLock<bool>,
    records: RwLock<HashMap<(String, String), RecordRef>>,
    watches: Mutex<Vec<Watch>>,
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityMap {
    /// A fresh, disabled map.
    pub fn new() -> Self {
        IdentityMap {
            enabled: RwLock::new(false),
            records: RwLock::new(HashMap::new()),
            watches: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide shared map, disabled until `enable` is called.
    pub fn global() -> Arc<IdentityMap> {
        GLOBAL.clone()
    }

    pub fn enable(&self) {
        if let Ok(mut enabled) = self.enabled.write() {
            *enabled = true;
        }
    }

    pub fn disable(&self) {
        if let Ok(mut enabled) = self.enabled.write() {
            *enabled = false;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.read().map(|enabled| *enabled).unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.write() {
            records.clear();
        }
        let stale = match self.watches.lock() {
            Ok(mut watches) => std::mem::take(&mut *watches),
            Err(_) => return,
        };
        for watch in stale {
            Self::invalidate(&watch);
        }
    }

    /// Register a loaded record. No-op when the map is disabled or the
    /// record's primary key is unset. Replacing a previously mapped instance
    /// invalidates relations cached against the old one.
    pub fn remember(&self, record: &RecordRef) {
        if !self.is_enabled() {
            return;
        }
        let (table, signature) = {
            let guard = match record.read() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            match guard.pk_signature() {
                Some(signature) => (guard.table_name().to_string(), signature),
                None => return,
            }
        };
        let replaced = match self.records.write() {
            Ok(mut records) => records
                .insert((table.clone(), signature.clone()), record.clone())
                .is_some_and(|old| !Arc::ptr_eq(&old, record)),
            Err(_) => false,
        };
        if replaced {
            self.notify(&table, &signature);
        }
    }

    /// Drop a mapped record and unset every relation that was satisfied from
    /// it, so the next access re-resolves through the executor.
    pub fn forget(&self, table: &str, signature: &str) {
        if let Ok(mut records) = self.records.write() {
            records.remove(&(table.to_string(), signature.to_string()));
        }
        self.notify(table, signature);
    }

    /// Record that `owner`'s cached `relation` was satisfied from the mapped
    /// entry for (`table`, `signature`).
    pub fn watch(&self, table: &str, signature: &str, owner: &RecordRef, relation: &str) {
        if let Ok(mut watches) = self.watches.lock() {
            watches.retain(|w| w.owner.strong_count() > 0);
            watches.push(Watch {
                table: table.to_string(),
                signature: signature.to_string(),
                owner: Arc::downgrade(owner),
                relation: relation.to_string(),
            });
        }
    }

    /// Drop `owner`'s subscriptions for `relation`.
    pub fn unwatch(&self, owner: &RecordRef, relation: &str) {
        if let Ok(mut watches) = self.watches.lock() {
            watches.retain(|w| {
                w.relation != relation || !std::ptr::eq(w.owner.as_ptr(), Arc::as_ptr(owner))
            });
        }
    }

    fn notify(&self, table: &str, signature: &str) {
        // Drain matching watches first so no lock on the list is held while
        // watcher records are being written.
        let fired = match self.watches.lock() {
            Ok(mut watches) => {
                let (fired, kept) = std::mem::take(&mut *watches)
                    .into_iter()
                    .partition(|w| w.table == table && w.signature == signature);
                *watches = kept;
                fired
            }
            Err(_) => Vec::new(),
        };
        for watch in fired {
            Self::invalidate(&watch);
        }
    }

    fn invalidate(watch: &Watch) {
        if let Some(owner) = watch.owner.upgrade() {
            if let Ok(mut guard) = owner.write() {
                guard.unset_relation(&watch.relation);
            }
        }
    }

    /// Look a record up by table and primary-key signature.
    pub fn find(&self, table: &str, signature: &str) -> Option<RecordRef> {
        if !self.is_enabled() {
            return None;
        }
        self.records
            .read()
            .ok()?
            .get(&(table.to_string(), signature.to_string()))
            .cloned()
    }

    /// The map key a relation resolves through, as seen from `owner`.
    ///
    /// Only valid for single-valued direct relations whose foreign link
    /// attributes are exactly the target's primary key; anything else needs a
    /// query and returns `None`.
    pub fn related_key(&self, def: &RelationDef, owner: &Record) -> Option<(String, String)> {
        if !self.is_enabled() || def.multiple || !def.via.is_none() {
            return None;
        }
        let target_pk = def.target.primary_key();
        let foreign = def.foreign_attrs();
        if target_pk.len() != foreign.len()
            || !target_pk.iter().all(|name| foreign.iter().any(|f| f == name))
        {
            return None;
        }
        // Order the owner's key values by the target's pk declaration order
        // so the signature matches the one `remember` computed.
        let mut keyed = crate::value::Row::new();
        for (foreign_attr, local_attr) in &def.link {
            keyed.insert(foreign_attr.clone(), owner.get(local_attr)?.clone());
        }
        let pk: Vec<String> = target_pk.iter().map(|name| (*name).to_string()).collect();
        let signature = key_signature(&keyed, &pk)?;
        Some((def.target.table_name().to_string(), signature))
    }

    /// Probe the map for the target of a relation as seen from `owner`.
    pub fn find_related(&self, def: &RelationDef, owner: &Record) -> Option<RecordRef> {
        let (table, signature) = self.related_key(def, owner)?;
        self.find(&table, &signature)
    }
}
