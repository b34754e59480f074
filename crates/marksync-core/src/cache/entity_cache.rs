//! In-memory entity cache with secondary indices.
//!
//! The primary map is authoritative. Secondary indices only map a composite
//! key (the values of an ordered list of fields) to primary ids and are kept
//! in lock-step with the primary map on every mutation.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{SyncError, SyncResult};
use crate::models::{key_component, Criteria, Entity};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// At most one entity per composite key.
    Unique,
    Multi,
}

/// Definition of one secondary index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    fields: Vec<String>,
    kind: IndexKind,
    read_through: bool,
}

impl IndexSpec {
    pub fn unique(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            kind: IndexKind::Unique,
            read_through: false,
        }
    }

    pub fn multi(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            kind: IndexKind::Multi,
            read_through: false,
        }
    }

    /// Fetch through the owner's source on a cache miss.
    pub fn read_through(mut self) -> Self {
        self.read_through = true;
        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_read_through(&self) -> bool {
        self.read_through
    }

    fn matches(&self, criteria: &Criteria) -> bool {
        criteria.fields().eq(self.fields.iter().map(String::as_str))
    }

    /// Composite key for an entity's JSON form; `None` when any field is
    /// missing or not a scalar.
    fn key_of(&self, value: &Value) -> Option<Vec<String>> {
        self.fields
            .iter()
            .map(|field| value.get(field).and_then(key_component))
            .collect()
    }
}

#[derive(Debug)]
enum IndexSlots {
    Unique(HashMap<Vec<String>, String>),
    Multi(HashMap<Vec<String>, IndexSet<String>>),
}

#[derive(Debug)]
struct SecondaryIndex {
    spec: IndexSpec,
    slots: IndexSlots,
}

impl SecondaryIndex {
    fn new(spec: IndexSpec) -> Self {
        let slots = match spec.kind {
            IndexKind::Unique => IndexSlots::Unique(HashMap::new()),
            IndexKind::Multi => IndexSlots::Multi(HashMap::new()),
        };
        Self { spec, slots }
    }

    fn insert(&mut self, value: &Value, id: &str) {
        let Some(key) = self.spec.key_of(value) else {
            return;
        };
        match &mut self.slots {
            IndexSlots::Unique(map) => {
                map.insert(key, id.to_string());
            }
            IndexSlots::Multi(map) => {
                map.entry(key).or_default().insert(id.to_string());
            }
        }
    }

    /// Drop `id` from the slot `value` would occupy. A unique slot already
    /// taken over by another id is left alone.
    fn remove(&mut self, value: &Value, id: &str) {
        let Some(key) = self.spec.key_of(value) else {
            return;
        };
        match &mut self.slots {
            IndexSlots::Unique(map) => {
                if map.get(&key).is_some_and(|owner| owner == id) {
                    map.remove(&key);
                }
            }
            IndexSlots::Multi(map) => {
                if let Some(ids) = map.get_mut(&key) {
                    ids.shift_remove(id);
                    if ids.is_empty() {
                        map.remove(&key);
                    }
                }
            }
        }
    }

    fn clear(&mut self) {
        match &mut self.slots {
            IndexSlots::Unique(map) => map.clear(),
            IndexSlots::Multi(map) => map.clear(),
        }
    }

    fn lookup(&self, key: &[String]) -> Vec<String> {
        match &self.slots {
            IndexSlots::Unique(map) => map.get(key).cloned().into_iter().collect(),
            IndexSlots::Multi(map) => map
                .get(key)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    fn ids(&self) -> Vec<String> {
        match &self.slots {
            IndexSlots::Unique(map) => map.values().cloned().collect(),
            IndexSlots::Multi(map) => map.values().flat_map(|ids| ids.iter().cloned()).collect(),
        }
    }
}

#[derive(Debug)]
struct CacheState<T> {
    entities: IndexMap<String, (T, Value)>,
    indices: Vec<SecondaryIndex>,
}

impl<T: Entity> CacheState<T> {
    fn unlink(&mut self, id: &str, value: &Value) {
        for index in &mut self.indices {
            index.remove(value, id);
        }
    }

    fn link(&mut self, id: &str, value: &Value) {
        for index in &mut self.indices {
            index.insert(value, id);
        }
    }
}

/// Cache for one entity kind.
#[derive(Debug)]
pub struct EntityCache<T> {
    state: RwLock<CacheState<T>>,
}

impl<T: Entity> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new(T::index_specs())
    }
}

impl<T: Entity> EntityCache<T> {
    pub fn new(specs: Vec<IndexSpec>) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entities: IndexMap::new(),
                indices: specs.into_iter().map(SecondaryIndex::new).collect(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Cache-only exact lookup by primary id or by a unique index key.
    pub fn get(&self, criteria: &Criteria) -> SyncResult<Option<T>> {
        let state = self.state.read();
        if criteria.is_id() {
            let id = criteria.value(crate::models::ID_FIELD).unwrap_or_default();
            return Ok(state.entities.get(id).map(|(entity, _)| entity.clone()));
        }
        let index = Self::find_index(&state.indices, criteria)?;
        if index.spec.kind == IndexKind::Multi {
            return Err(SyncError::Cache(format!(
                "{} index on {criteria} is not unique; use get_group",
                T::ENTITY_NAME
            )));
        }
        Ok(index
            .lookup(&criteria.values())
            .first()
            .and_then(|id| state.entities.get(id))
            .map(|(entity, _)| entity.clone()))
    }

    /// Read-through lookup: on a miss for the primary id or a read-through
    /// index, `fetch` is invoked outside the lock and its result stored.
    pub fn get_or_fetch<F>(&self, criteria: &Criteria, fetch: F) -> SyncResult<Option<T>>
    where
        F: FnOnce(&Criteria) -> SyncResult<Option<T>>,
    {
        if let Some(hit) = self.get(criteria)? {
            return Ok(Some(hit));
        }
        if !criteria.is_id() {
            let state = self.state.read();
            let index = Self::find_index(&state.indices, criteria)?;
            if !index.spec.read_through {
                return Ok(None);
            }
        }
        debug!(entity = T::ENTITY_NAME, criteria = %criteria, "cache miss - fetching");
        match fetch(criteria)? {
            Some(entity) => Ok(Some(self.set(entity, None))),
            None => Ok(None),
        }
    }

    /// Every cached entity in a multi (or unique) index group.
    pub fn get_group(&self, criteria: &Criteria) -> SyncResult<Vec<T>> {
        let state = self.state.read();
        let index = Self::find_index(&state.indices, criteria)?;
        Ok(index
            .lookup(&criteria.values())
            .iter()
            .filter_map(|id| state.entities.get(id))
            .map(|(entity, _)| entity.clone())
            .collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached entities in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.state
            .read()
            .entities
            .values()
            .map(|(entity, _)| entity.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or replace by primary id and refresh every index.
    ///
    /// `previous` is the copy the caller merged from; its index slots are
    /// removed first, as are the slots of whatever copy is currently stored,
    /// so no index keeps a stale composite.
    pub fn set(&self, entity: T, previous: Option<&T>) -> T {
        let id = entity.id().into_owned();
        let value = match serde_json::to_value(&entity) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    entity = T::ENTITY_NAME,
                    id = %id,
                    error = %e,
                    "entity has no JSON form; cached without index slots"
                );
                Value::Null
            }
        };
        let previous_value = previous.and_then(|p| serde_json::to_value(p).ok());

        let mut state = self.state.write();
        if let Some(prev) = &previous_value {
            state.unlink(&id, prev);
        }
        if let Some(stored) = state.entities.get(&id).map(|(_, v)| v.clone()) {
            state.unlink(&id, &stored);
        }
        state.link(&id, &value);
        state.entities.insert(id, (entity.clone(), value));
        entity
    }

    pub fn set_many(&self, entities: impl IntoIterator<Item = T>) {
        for entity in entities {
            self.set(entity, None);
        }
    }

    /// Replace the whole collection.
    pub fn reset(&self, entities: impl IntoIterator<Item = T>) {
        self.invalidate();
        self.set_many(entities);
    }

    /// Drop every entry and index slot.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.entities.clear();
        for index in &mut state.indices {
            index.clear();
        }
        debug!(entity = T::ENTITY_NAME, "cache invalidated");
    }

    pub fn remove(&self, id: &str) -> Option<T> {
        let mut state = self.state.write();
        let (entity, value) = state.entities.shift_remove(id)?;
        state.unlink(id, &value);
        Some(entity)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn find_index<'a>(
        indices: &'a [SecondaryIndex],
        criteria: &Criteria,
    ) -> SyncResult<&'a SecondaryIndex> {
        indices
            .iter()
            .find(|index| index.spec.matches(criteria))
            .ok_or_else(|| {
                SyncError::Cache(format!("{} has no index on {criteria}", T::ENTITY_NAME))
            })
    }

    /// Ids referenced by any secondary index that are missing from the
    /// primary map. Empty when the cache is consistent.
    pub fn dangling_index_ids(&self) -> Vec<String> {
        let state = self.state.read();
        state
            .indices
            .iter()
            .flat_map(SecondaryIndex::ids)
            .filter(|id| !state.entities.contains_key(id))
            .collect()
    }
}
