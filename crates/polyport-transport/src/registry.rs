//! ConnectionRegistry — the shared table of live connections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::connection::{ConnectionRecord, Protocol};
use crate::error::{CloseAllError, CloseFailure, is_expected_disconnect};

/// Point-in-time connection counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total: usize,
    pub by_protocol: BTreeMap<Protocol, usize>,
}

/// Thread-safe map from connection id to [`ConnectionRecord`].
///
/// A single `parking_lot::RwLock` guards the map and is held only for the map
/// operation itself, never across I/O. Callers that need to talk to several
/// connections take a snapshot with [`all_connections`](Self::all_connections)
/// or look records up one at a time.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ConnectionRecord>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record. A record already stored under the same id is
    /// replaced and returned.
    pub fn add_connection(&self, record: Arc<ConnectionRecord>) -> Option<Arc<ConnectionRecord>> {
        let id = record.id.clone();
        let replaced = self.connections.write().insert(id.clone(), record);
        if replaced.is_some() {
            debug!(conn_id = %id, "connection id reused; previous record replaced");
        }
        replaced
    }

    /// Remove a record by id. Absent ids are a no-op.
    pub fn remove_connection(&self, id: &str) -> Option<Arc<ConnectionRecord>> {
        self.connections.write().remove(id)
    }

    /// Remove `record` only if it is still the one registered under its id.
    pub fn remove_record(&self, record: &Arc<ConnectionRecord>) -> bool {
        let mut connections = self.connections.write();
        match connections.get(&record.id) {
            Some(current) if Arc::ptr_eq(current, record) => {
                connections.remove(&record.id);
                true
            }
            _ => false,
        }
    }

    pub fn get_connection(&self, id: &str) -> Option<Arc<ConnectionRecord>> {
        self.connections.read().get(id).cloned()
    }

    /// Snapshot of every registered record, safe to iterate without the lock.
    pub fn all_connections(&self) -> Vec<Arc<ConnectionRecord>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    pub fn count_for(&self, protocol: Protocol) -> usize {
        self.connections
            .read()
            .values()
            .filter(|record| record.protocol == protocol)
            .count()
    }

    pub fn stats(&self) -> ConnectionStats {
        let connections = self.connections.read();
        let mut by_protocol = BTreeMap::new();
        for record in connections.values() {
            *by_protocol.entry(record.protocol).or_insert(0) += 1;
        }
        ConnectionStats {
            total: connections.len(),
            by_protocol,
        }
    }

    /// Close every registered connection and empty the registry.
    ///
    /// Closing signals each connection directly instead of waiting for the
    /// peer, so this finishes in bounded time no matter how many peers are
    /// unresponsive. Disconnect-class errors are ignored; anything else is
    /// collected into the returned error. The map is emptied either way.
    pub async fn close_all_connections(&self) -> Result<(), CloseAllError> {
        let snapshot = self.all_connections();
        if !snapshot.is_empty() {
            info!("Closing {} connection(s)", snapshot.len());
        }

        let results = join_all(snapshot.iter().map(|record| async move {
            (record.id.clone(), record.close().await)
        }))
        .await;

        self.connections.write().clear();

        let failures: Vec<CloseFailure> = results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Err(error) if !is_expected_disconnect(&error) => Some(CloseFailure { id, error }),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseAllError { failures })
        }
    }
}
