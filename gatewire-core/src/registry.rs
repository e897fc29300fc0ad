//! Process-wide map from access identifier to active forwarder.
//!
//! Owned by a server object and injected where needed, so several gateway
//! instances can coexist in one process. The transport session server
//! creates and removes entries; the public facade only reads.

use crate::forward::Forwarder;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gatewire_common::constants::{ACCESS_ID_LEN, ACCESS_ID_MAX_ATTEMPTS};
use gatewire_common::{GatewayError, Result};
use rand::Rng;
use std::sync::Arc;

const ACCESS_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Concurrent access-id → forwarder map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<String, Arc<Forwarder>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if the key is free. Returns `false` when occupied; the caller
    /// retries with a freshly generated id.
    pub fn put(&self, access_id: &str, forwarder: Arc<Forwarder>) -> bool {
        match self.inner.entry(access_id.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(forwarder);
                true
            }
        }
    }

    pub fn get(&self, access_id: &str) -> Option<Arc<Forwarder>> {
        self.inner.get(access_id).map(|entry| Arc::clone(&entry))
    }

    /// Remove an entry. Deleting an absent key is a no-op.
    pub fn remove(&self, access_id: &str) {
        self.inner.remove(access_id);
    }

    /// Remove `forwarder`'s entry only if it is still the registered
    /// occupant. A teardown whose key was already freed and reclaimed by a
    /// newer session must not evict that session's entry.
    pub fn remove_session(&self, forwarder: &Arc<Forwarder>) {
        self.inner
            .remove_if(forwarder.access_id(), |_, current| {
                Arc::ptr_eq(current, forwarder)
            });
    }

    pub fn for_each(&self, mut f: impl FnMut(&str, &Arc<Forwarder>)) {
        for entry in self.inner.iter() {
            f(entry.key(), entry.value());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Register a session under `preferred` if given and free, otherwise
    /// under a generated id, retrying on collision up to a fixed budget.
    ///
    /// The forwarder is built by `make` only once an id is claimed, so the
    /// id a forwarder carries always matches its registry key. Insertion is
    /// atomic from any reader's perspective.
    pub fn register_with(
        &self,
        preferred: Option<&str>,
        make: impl Fn(&str) -> Arc<Forwarder>,
    ) -> Result<(String, Arc<Forwarder>)> {
        let mut claim = |id: &str| match self.inner.entry(id.to_owned()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let forwarder = make(id);
                entry.insert(Arc::clone(&forwarder));
                Some(forwarder)
            }
        };

        if let Some(id) = preferred {
            if let Some(forwarder) = claim(id) {
                return Ok((id.to_owned(), forwarder));
            }
        }
        for _ in 0..ACCESS_ID_MAX_ATTEMPTS {
            let id = generate_access_id();
            if let Some(forwarder) = claim(&id) {
                return Ok((id, forwarder));
            }
        }
        Err(GatewayError::AccessIdExhausted(ACCESS_ID_MAX_ATTEMPTS))
    }
}

/// Pseudo-random lowercase alphanumeric access id.
pub fn generate_access_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ACCESS_ID_LEN)
        .map(|_| {
            let i = rng.gen_range(0..ACCESS_ID_CHARS.len());
            ACCESS_ID_CHARS[i] as char
        })
        .collect()
}
