//! Unit-of-work session: identity map, request accounting, and lazy
//! batching. One session is one sequential unit of work; it is not
//! meant to be shared across threads.

pub mod document_query;
pub mod lazy;
pub mod load;
pub mod operation;

pub use document_query::DocumentQuery;
pub use lazy::Lazy;
pub use load::LoadOperation;
pub use operation::QueryOperation;

use crate::{
    conventions::DocumentConventions,
    error::{ExecutionError, QueryError},
    transport::{Command, CommandResult, QueryResult, RequestExecutor},
};
use lazy::PendingLazyOperation;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    any::type_name,
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

///
/// DocumentSession
///
/// Owns the identity map and all mutation entry points into it.
/// Queries and loads register results here; later loads for tracked or
/// known-missing ids resolve locally without a round trip.
///

pub struct DocumentSession {
    conventions: Rc<DocumentConventions>,
    executor: Rc<dyn RequestExecutor>,
    state: RefCell<SessionState>,
}

#[derive(Default)]
struct SessionState {
    // Keys are lowercased ids; the tracked document keeps its original
    // casing inside the record.
    documents_by_id: BTreeMap<String, TrackedDocument>,
    deleted_ids: BTreeSet<String>,
    known_missing_ids: BTreeSet<String>,
    number_of_requests: u32,
    pending_lazy: Vec<PendingLazyOperation>,
}

#[derive(Clone, Debug)]
struct TrackedDocument {
    id: String,
    document: Value,
}

impl DocumentSession {
    #[must_use]
    pub fn new(executor: Rc<dyn RequestExecutor>, conventions: Rc<DocumentConventions>) -> Self {
        Self {
            conventions,
            executor,
            state: RefCell::new(SessionState::default()),
        }
    }

    #[must_use]
    pub fn conventions(&self) -> &Rc<DocumentConventions> {
        &self.conventions
    }

    #[must_use]
    pub fn number_of_requests(&self) -> u32 {
        self.state.borrow().number_of_requests
    }

    // ------------------------------------------------------------------
    // query entry points
    // ------------------------------------------------------------------

    /// Dynamic query over the collection derived from `T`'s type name.
    #[must_use]
    pub fn query<T: DeserializeOwned>(&self) -> DocumentQuery<'_, T> {
        let collection = self.conventions.collection_name(type_name::<T>());
        self.query_collection(&collection)
    }

    #[must_use]
    pub fn query_collection<T: DeserializeOwned>(&self, collection: &str) -> DocumentQuery<'_, T> {
        DocumentQuery::from_collection(self, collection.to_string())
    }

    #[must_use]
    pub fn query_index<T: DeserializeOwned>(&self, index: &str) -> DocumentQuery<'_, T> {
        DocumentQuery::from_index(self, index.to_string())
    }

    pub fn raw_query<T: DeserializeOwned>(
        &self,
        query: &str,
    ) -> Result<DocumentQuery<'_, T>, QueryError> {
        let mut result = self.query::<T>();
        result.raw(query)?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // loads
    // ------------------------------------------------------------------

    pub fn load<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, QueryError> {
        let mut operation = LoadOperation::by_id(self, id);
        operation.execute()?;
        operation.get_document(id)
    }

    pub fn load_many<T: DeserializeOwned>(
        &self,
        ids: &[&str],
    ) -> Result<Vec<Option<T>>, QueryError> {
        let mut operation = LoadOperation::by_ids(self, ids);
        operation.execute()?;
        ids.iter().map(|id| operation.get_document(id)).collect()
    }

    pub fn load_with_includes<T: DeserializeOwned>(
        &self,
        id: &str,
        includes: &[&str],
    ) -> Result<Option<T>, QueryError> {
        let mut operation = LoadOperation::by_id(self, id).with_includes(includes);
        operation.execute()?;
        operation.get_document(id)
    }

    // ------------------------------------------------------------------
    // identity map
    // ------------------------------------------------------------------

    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        self.state
            .borrow()
            .documents_by_id
            .contains_key(&id.to_lowercase())
    }

    #[must_use]
    pub fn is_deleted(&self, id: &str) -> bool {
        self.state.borrow().deleted_ids.contains(&id.to_lowercase())
    }

    #[must_use]
    pub fn is_loaded_or_deleted(&self, id: &str) -> bool {
        let key = id.to_lowercase();
        let state = self.state.borrow();
        state.documents_by_id.contains_key(&key)
            || state.deleted_ids.contains(&key)
            || state.known_missing_ids.contains(&key)
    }

    /// Mark an id as deleted in this unit of work; loads for it resolve
    /// locally to absent.
    pub fn delete_by_id(&self, id: &str) {
        let key = id.to_lowercase();
        let mut state = self.state.borrow_mut();
        state.documents_by_id.remove(&key);
        state.deleted_ids.insert(key);
    }

    /// Track a document under its id. An id that is already tracked or
    /// deleted is left untouched.
    pub fn track_entity(&self, id: &str, document: Value) {
        let key = id.to_lowercase();
        let mut state = self.state.borrow_mut();
        if state.documents_by_id.contains_key(&key) || state.deleted_ids.contains(&key) {
            return;
        }

        state.known_missing_ids.remove(&key);
        state.documents_by_id.insert(
            key,
            TrackedDocument {
                id: id.to_string(),
                document,
            },
        );
    }

    pub fn register_includes(&self, includes: &BTreeMap<String, Value>) {
        for (id, document) in includes {
            if document.is_null() {
                continue;
            }
            self.track_entity(id, document.clone());
        }
    }

    /// Record every requested id that came back in neither the results
    /// nor the includes, so it is never fetched again this session.
    pub fn register_missing_includes(&self, requested_ids: &[String], results: &[Value]) {
        let returned: BTreeSet<String> = results
            .iter()
            .filter_map(document_id)
            .map(|id| id.to_lowercase())
            .collect();

        let mut state = self.state.borrow_mut();
        for id in requested_ids {
            let key = id.to_lowercase();
            if returned.contains(&key) || state.documents_by_id.contains_key(&key) {
                continue;
            }
            state.known_missing_ids.insert(key);
        }
    }

    pub(crate) fn tracked_document(&self, id: &str) -> Option<Value> {
        self.state
            .borrow()
            .documents_by_id
            .get(&id.to_lowercase())
            .map(|tracked| tracked.document.clone())
    }

    // ------------------------------------------------------------------
    // transport
    // ------------------------------------------------------------------

    /// Dispatch one command, counting it against the per-session request
    /// budget.
    pub(crate) fn execute(&self, command: &Command) -> Result<CommandResult, QueryError> {
        self.increment_request_count()?;
        Ok(self.executor.execute(command)?)
    }

    fn increment_request_count(&self) -> Result<(), ExecutionError> {
        let mut state = self.state.borrow_mut();
        let limit = self.conventions.max_number_of_requests_per_session;
        if state.number_of_requests >= limit {
            return Err(ExecutionError::MaxRequests { limit });
        }

        state.number_of_requests += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // lazy batching
    // ------------------------------------------------------------------

    pub(crate) fn add_lazy_operation(&self, operation: PendingLazyOperation) {
        self.state.borrow_mut().pending_lazy.push(operation);
    }

    #[must_use]
    pub fn has_pending_lazy_operations(&self) -> bool {
        !self.state.borrow().pending_lazy.is_empty()
    }

    /// Flush every pending lazy handle in registration order with a
    /// single multi-query round trip.
    pub fn execute_all_pending_lazy_operations(&self) -> Result<(), QueryError> {
        let pending = std::mem::take(&mut self.state.borrow_mut().pending_lazy);
        if pending.is_empty() {
            return Ok(());
        }

        let queries = pending
            .iter()
            .map(|operation| operation.index_query.clone())
            .collect();
        let results = self
            .execute(&Command::MultiQuery(queries))?
            .into_multi_query()?;

        if results.len() != pending.len() {
            return Err(ExecutionError::UnexpectedResponse {
                expected: "MultiQuery",
            }
            .into());
        }

        // FIFO: later handles may read state populated by earlier ones.
        for (operation, result) in pending.into_iter().zip(results) {
            (operation.complete)(self, result)?;
        }
        Ok(())
    }
}

/// Identity of a raw document: the metadata id when present, else the
/// conventional identity property.
pub(crate) fn document_id(document: &Value) -> Option<String> {
    if let Some(id) = document
        .get("@metadata")
        .and_then(|metadata| metadata.get("@id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_string());
    }

    document
        .get(crate::conventions::IDENTITY_PROPERTY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Fold a query response into the session: includes first, then the
/// primary results.
pub(crate) fn register_query_result(
    session: &DocumentSession,
    result: &QueryResult,
    disable_tracking: bool,
) {
    if disable_tracking {
        return;
    }

    session.register_includes(&result.includes);
    for document in &result.results {
        if let Some(id) = document_id(document) {
            session.track_entity(&id, document.clone());
        }
    }
}

#[cfg(test)]
mod tests;
