// Identity-keyed cache of raw data objects found during a spec walk

use log::debug;

use crate::spec::{GeoJson, Table};

/// A raw data object held by the cache.
#[derive(Debug, Clone)]
pub enum DataValue {
    Table(Table),
    GeoJson(GeoJson),
}

impl DataValue {
    /// Identity comparison: same underlying object, not equal contents.
    pub fn same_object(&self, other: &DataValue) -> bool {
        match (self, other) {
            (DataValue::Table(a), DataValue::Table(b)) => a.same_object(b),
            (DataValue::GeoJson(a), DataValue::GeoJson(b)) => a.same_object(b),
            _ => false,
        }
    }
}

/// Ordered, append-only list of raw table/geometry objects encountered
/// during one parse session.
///
/// Membership is keyed on object identity: the same object seen twice
/// reuses its index, while two structurally equal but distinct objects get
/// separate entries. One cache is created per render call and consumed
/// exactly once when the data is serialized.
#[derive(Debug, Default)]
pub struct DataCache {
    entries: Vec<DataValue>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DataValue] {
        &self.entries
    }

    /// Index of an object already in the cache, by identity.
    pub fn index_of(&self, value: &DataValue) -> Option<usize> {
        self.entries.iter().position(|e| e.same_object(value))
    }

    /// Append an object and return its index.
    pub fn register(&mut self, value: DataValue) -> usize {
        self.entries.push(value);
        let index = self.entries.len() - 1;
        debug!("registered data cache entry {}", index);
        index
    }
}
