// Backend store contract - one client per storage technology; open, then load databases before CRUD

use crate::config::{BackendKind, DatabaseConfig};
use crate::document::{document_id, shallow_merge, Document, ID_FIELD};
use crate::error::{Result, StrataError};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// What `update_one` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// An existing document matched and was updated.
    Updated(String),
    /// Nothing matched; a new document was created from filter and update.
    Upserted(String),
    /// Nothing matched and upsert was not requested.
    NoMatch,
}

impl UpdateOutcome {
    /// The `_id` of the written document, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            UpdateOutcome::Updated(id) | UpdateOutcome::Upserted(id) => Some(id),
            UpdateOutcome::NoMatch => None,
        }
    }
}

/// A backend store for one storage technology.
///
/// Not-found outcomes are values (`None`, `false`, empty collections), never
/// errors. Writing a document whose `_id` already exists through an insert is
/// a `Conflict`.
pub trait Client: Send {
    /// The technology this client implements.
    fn kind(&self) -> BackendKind;

    /// Allocate client state. Opening an open client is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Release all state. Databases must be loaded again afterwards.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Whether the client is open and its backing resources respond.
    fn is_alive(&self) -> bool;

    /// Make a database available to the client.
    fn load_database(&mut self, config: &DatabaseConfig) -> Result<()>;

    /// Persist a database. Returns the files written.
    fn dump_database(&mut self, config: &DatabaseConfig) -> Result<Vec<PathBuf>>;

    fn has_database(&self, database: &str) -> bool;

    fn collection_names(&self, database: &str) -> Result<BTreeSet<String>>;

    /// Every document in a collection, ordered by `_id`. A missing collection
    /// is empty.
    fn all_documents(&self, database: &str, collection: &str) -> Result<Vec<Document>>;

    fn insert_one(&mut self, database: &str, collection: &str, doc: Document) -> Result<()>;

    /// Insert several documents. Nothing is written unless every `_id` is new.
    fn insert_many(&mut self, database: &str, collection: &str, docs: Vec<Document>)
        -> Result<()>;

    /// Delete a document by `_id`. Returns whether a document was removed.
    fn delete_one(&mut self, database: &str, collection: &str, id: &str) -> Result<bool>;

    /// The first document (by `_id`) whose fields all equal the filter's.
    fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>>;

    /// Merge `update`'s fields into the first document matching `filter`.
    /// With `upsert`, a missing match creates `filter` merged with `update`.
    fn update_one(
        &mut self,
        database: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateOutcome>;
}

/// Merge update fields onto a matched document. The `_id` may not change.
pub(crate) fn apply_update(existing: &Document, update: &Document) -> Result<Document> {
    if let Some(new_id) = update.get(ID_FIELD) {
        if existing.get(ID_FIELD) != Some(new_id) {
            return Err(StrataError::InvalidDocument(format!(
                "update cannot change _id to {new_id}"
            )));
        }
    }
    Ok(shallow_merge(existing, update))
}

/// The document an upsert creates: filter fields overlaid with update fields.
pub(crate) fn upserted_document(filter: &Document, update: &Document) -> Result<Document> {
    let doc = shallow_merge(filter, update);
    document_id(&doc)?;
    Ok(doc)
}
