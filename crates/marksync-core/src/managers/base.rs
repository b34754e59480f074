//! Per-kind manager: owns one entity cache and runs the resolution protocol
//! for real-time batches of that kind.

use std::sync::Arc;

use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::EntitySource;
use crate::cache::{apply_directive, decide, CacheAction, EntityCache};
use crate::errors::{SyncError, SyncResult};
use crate::guards::MAX_BATCH_ELEMENTS;
use crate::managers::session::{Resettable, SessionContext};
use crate::models::{Criteria, Entity, Incoming, RawMessage};
use crate::telemetry::ErrorReport;

/// What a skipped element contributes to the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SkipPolicy {
    /// Return the cached copy unchanged.
    Current,
    /// Return nothing.
    ChangesOnly,
}

pub struct ManagerBase<T: Entity, S: ?Sized + EntitySource<T> = dyn EntitySource<T>> {
    cache: EntityCache<T>,
    source: Arc<S>,
    context: Arc<SessionContext>,
}

impl<T: Entity, S: ?Sized + EntitySource<T>> ManagerBase<T, S> {
    pub fn new(source: Arc<S>, context: Arc<SessionContext>) -> Self {
        Self {
            cache: EntityCache::default(),
            source,
            context,
        }
    }

    pub fn cache(&self) -> &EntityCache<T> {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Cache lookup with read-through to the source for id and read-through
    /// index criteria.
    pub fn get(&self, criteria: &Criteria) -> SyncResult<Option<T>> {
        self.cache
            .get_or_fetch(criteria, |criteria| self.source.fetch(criteria))
    }

    pub fn get_by_id(&self, id: &str) -> SyncResult<Option<T>> {
        self.get(&Criteria::id(id))
    }

    /// Cache-only lookup; never touches the source.
    pub fn get_cached(&self, criteria: &Criteria) -> SyncResult<Option<T>> {
        self.cache.get(criteria)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve a real-time message, returning the current copy of every
    /// element (skipped elements come back as their cached copy).
    pub fn resolve_current(&self, message: &RawMessage) -> SyncResult<Vec<T>> {
        self.resolve_message(message, SkipPolicy::Current)
    }

    /// Resolve a real-time message, returning only elements that changed the
    /// cache. Skipped elements are omitted.
    pub fn resolve_changes(&self, message: &RawMessage) -> SyncResult<Vec<T>> {
        self.resolve_message(message, SkipPolicy::ChangesOnly)
    }

    /// Cache entities that arrived in an ordinary API response. Directives
    /// are ignored and failures are only logged.
    pub fn cache_response_entities(&self, values: &[Value]) -> Vec<T> {
        let entities: Vec<&Value> = values
            .iter()
            .filter(|value| !value.is_null() && !crate::models::directive::is_directive(value))
            .collect();
        self.context.install(|| {
            entities
                .par_iter()
                .filter_map(|value| match self.resolve_one(value, SkipPolicy::Current) {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        warn!(entity = T::ENTITY_NAME, error = %e, "failed to cache response entity");
                        None
                    }
                })
                .collect()
        })
    }

    fn resolve_message(&self, message: &RawMessage, policy: SkipPolicy) -> SyncResult<Vec<T>> {
        let elements: Vec<&Value> = message
            .elements()?
            .iter()
            .filter(|value| !value.is_null())
            .collect();
        debug!(
            entity = T::ENTITY_NAME,
            message_type = %message.message_type,
            count = elements.len(),
            "resolving batch"
        );

        let mut resolved = Vec::with_capacity(elements.len());
        let mut fetch_failure: Option<SyncError> = None;
        for chunk in elements.chunks(MAX_BATCH_ELEMENTS) {
            let outcomes: Vec<(&Value, SyncResult<Option<T>>)> = self.context.install(|| {
                chunk
                    .par_iter()
                    .map(|value| (*value, self.resolve_one(value, policy)))
                    .collect()
            });
            for (value, outcome) in outcomes {
                match outcome {
                    Ok(Some(entity)) => resolved.push(entity),
                    Ok(None) => {}
                    Err(e) => {
                        self.report_failure(message, value, &e);
                        if e.is_fetch() && fetch_failure.is_none() {
                            fetch_failure = Some(e);
                        }
                    }
                }
            }
        }
        match fetch_failure {
            Some(e) => Err(e),
            None => Ok(resolved),
        }
    }

    /// Apply the decision table to one element.
    fn resolve_one(&self, value: &Value, policy: SkipPolicy) -> SyncResult<Option<T>> {
        let incoming = Incoming::<T>::from_value(value)?;
        let criteria = incoming.criteria();
        let existing = self.cache.get(&criteria)?;

        match decide(&incoming, existing.as_ref())? {
            CacheAction::Skip => {
                debug!(entity = T::ENTITY_NAME, criteria = %criteria, "skipping stale element");
                Ok(match policy {
                    SkipPolicy::Current => existing,
                    SkipPolicy::ChangesOnly => None,
                })
            }
            CacheAction::Update => {
                let updated = match (incoming, &existing) {
                    (Incoming::Directive(directive), Some(current)) => {
                        apply_directive(current, &directive)?
                    }
                    (Incoming::Directive(directive), None) => {
                        return Err(SyncError::Protocol(format!(
                            "directive for uncached {} {}",
                            T::ENTITY_NAME,
                            directive.id
                        )))
                    }
                    (Incoming::Entity(entity), Some(current)) => T::merge(current, entity)?,
                    (Incoming::Entity(entity), None) => entity,
                };
                Ok(Some(self.cache.set(updated, existing.as_ref())))
            }
            CacheAction::Query => {
                debug!(entity = T::ENTITY_NAME, criteria = %criteria, "version gap - fetching");
                match self.source.fetch(&criteria)? {
                    Some(fetched) => Ok(Some(self.cache.set(fetched, existing.as_ref()))),
                    None => {
                        warn!(entity = T::ENTITY_NAME, criteria = %criteria, "source has no copy");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn report_failure(&self, message: &RawMessage, value: &Value, err: &SyncError) {
        error!(
            entity = T::ENTITY_NAME,
            message_type = %message.message_type,
            payload = %value,
            error = %err,
            "element resolution failed"
        );
        if self.context.config().report_resolution_errors {
            self.context.reporter().report(&ErrorReport {
                source: "resolve",
                message: format!("Error resolving {}", T::ENTITY_NAME),
                entity_name: T::ENTITY_NAME,
                message_type: Some(message.message_type.clone()),
                payload: value.clone(),
                error: err.to_string(),
            });
        }
    }
}

impl<T: Entity, S: ?Sized + EntitySource<T>> Resettable for ManagerBase<T, S> {
    fn reset(&self) {
        self.invalidate();
    }
}
