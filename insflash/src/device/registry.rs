//! Units bound during this process, keyed by model and link.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::device::DeviceKind;
use crate::discovery::DeviceIdentity;
use crate::transport::TransportKind;

/// A bound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Model.
    pub kind: DeviceKind,
    /// Link the unit answered on.
    pub transport: TransportKind,
    /// Link name (port or interface).
    pub link: String,
    /// Identity from the last ping.
    pub identity: DeviceIdentity,
    /// Whether an upgrade session owns the unit.
    pub upgrading: bool,
}

/// Registry of bound units.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: BTreeMap<(DeviceKind, TransportKind), DeviceRecord>,
}

impl DeviceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a unit, replacing any record under the same key.
    ///
    /// A re-bound record starts out idle.
    pub fn insert(
        &mut self,
        kind: DeviceKind,
        transport: TransportKind,
        link: impl Into<String>,
        identity: DeviceIdentity,
    ) -> &DeviceRecord {
        let link = link.into();
        let key = (kind, transport);
        match self.records.get(&key) {
            Some(previous) if previous.upgrading => {
                info!("Re-binding {kind} on {link}; clearing its upgrade state");
            },
            Some(_) => debug!("Re-binding {kind} on {link}"),
            None => debug!("Binding {kind} on {link}"),
        }
        self.records.insert(
            key,
            DeviceRecord {
                kind,
                transport,
                link,
                identity,
                upgrading: false,
            },
        );
        &self.records[&key]
    }

    /// Record for a key.
    pub fn get(&self, kind: DeviceKind, transport: TransportKind) -> Option<&DeviceRecord> {
        self.records.get(&(kind, transport))
    }

    /// Forget a unit.
    pub fn remove(&mut self, kind: DeviceKind, transport: TransportKind) -> Option<DeviceRecord> {
        self.records.remove(&(kind, transport))
    }

    /// Mark a unit busy or idle. Returns false when it is not bound.
    pub fn set_upgrading(
        &mut self,
        kind: DeviceKind,
        transport: TransportKind,
        upgrading: bool,
    ) -> bool {
        match self.records.get_mut(&(kind, transport)) {
            Some(record) => {
                record.upgrading = upgrading;
                true
            },
            None => false,
        }
    }

    /// Bound units in key order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    /// Number of bound units.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget every unit.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
