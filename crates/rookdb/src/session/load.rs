use crate::{
    error::QueryError,
    session::{DocumentSession, document_id},
    transport::Command,
};
use serde::de::DeserializeOwned;

///
/// LoadOperation
///
/// Batch load by id against the identity map. Ids are deduplicated
/// case-insensitively; ids already tracked, deleted, or known missing
/// never reach the wire, and when everything resolves locally no
/// request is built at all.
///

pub struct LoadOperation<'a> {
    session: &'a DocumentSession,
    ids: Vec<String>,
    includes: Vec<String>,
}

impl<'a> LoadOperation<'a> {
    #[must_use]
    pub fn by_id(session: &'a DocumentSession, id: &str) -> Self {
        Self::by_ids(session, &[id])
    }

    #[must_use]
    pub fn by_ids(session: &'a DocumentSession, ids: &[&str]) -> Self {
        let mut seen = Vec::new();
        let mut deduped = Vec::new();
        for id in ids {
            if id.trim().is_empty() {
                continue;
            }
            let key = id.to_lowercase();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            deduped.push((*id).to_string());
        }

        Self {
            session,
            ids: deduped,
            includes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_includes(mut self, includes: &[&str]) -> Self {
        self.includes = includes.iter().map(|path| (*path).to_string()).collect();
        self
    }

    /// Ids that still need the server, or `None` when the whole batch
    /// resolves from the identity map.
    #[must_use]
    pub fn create_request(&self) -> Option<Command> {
        let ids_to_fetch: Vec<String> = self
            .ids
            .iter()
            .filter(|id| !self.session.is_loaded_or_deleted(id))
            .cloned()
            .collect();
        if ids_to_fetch.is_empty() {
            return None;
        }

        Some(Command::GetDocuments {
            ids: ids_to_fetch,
            includes: self.includes.clone(),
        })
    }

    pub fn execute(&mut self) -> Result<(), QueryError> {
        let Some(request) = self.create_request() else {
            return Ok(());
        };

        let requested_ids = match &request {
            Command::GetDocuments { ids, .. } => ids.clone(),
            _ => Vec::new(),
        };
        let result = self.session.execute(&request)?.into_documents()?;

        // Includes first, then primary results, then record what never
        // came back.
        self.session.register_includes(&result.includes);
        for document in &result.results {
            if let Some(id) = document_id(document) {
                self.session.track_entity(&id, document.clone());
            }
        }
        self.session
            .register_missing_includes(&requested_ids, &result.results);
        Ok(())
    }

    /// Materialize one requested document from the identity map. A
    /// blank, missing, or deleted id yields `None`.
    pub fn get_document<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, QueryError> {
        if id.trim().is_empty() || self.session.is_deleted(id) {
            return Ok(None);
        }

        match self.session.tracked_document(id) {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    pub fn get_documents<T: DeserializeOwned>(&self) -> Result<Vec<Option<T>>, QueryError> {
        self.ids.iter().map(|id| self.get_document(id)).collect()
    }
}
