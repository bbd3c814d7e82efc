// Remote store - one SQL `documents` table per database; writes are durable on return

use crate::client::{apply_update, upserted_document, Client, UpdateOutcome};
use crate::config::{BackendKind, DatabaseConfig};
use crate::document::{document_id, matches_filter, Document, ID_FIELD};
use crate::error::{Result, StrataError};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

/// Where a remote database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Memory,
    File(PathBuf),
}

impl Endpoint {
    /// Accepts `sqlite://<path>`, `file:<path>`, `:memory:` or a bare path.
    pub fn parse(url: &str) -> Result<Self> {
        let location = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("file:") {
            rest
        } else if let Some((scheme, _)) = url.split_once("://") {
            return Err(StrataError::Configuration(format!(
                "unsupported remote url scheme '{scheme}' in '{url}'"
            )));
        } else {
            url
        };

        match location {
            "" => Err(StrataError::Configuration(format!("empty remote url '{url}'"))),
            ":memory:" => Ok(Endpoint::Memory),
            path => Ok(Endpoint::File(PathBuf::from(path))),
        }
    }
}

/// One connected remote database.
struct RemoteDatabase {
    conn: Connection,
}

impl RemoteDatabase {
    fn connect(url: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(url)?;
        let conn = match &endpoint {
            Endpoint::Memory => Connection::open_in_memory(),
            Endpoint::File(path) => Connection::open(path),
        }
        .map_err(|e| StrataError::BackendUnavailable(format!("{url}: {e}")))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            ",
        )
        .map_err(|e| StrataError::BackendUnavailable(format!("{url}: {e}")))?;

        Ok(RemoteDatabase { conn })
    }

    fn ping(&self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn collection_names(&self) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT collection FROM documents")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = BTreeSet::new();
        for row in rows {
            names.insert(row?);
        }
        Ok(names)
    }

    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let data_json: Option<String> = self
            .conn
            .query_row(
                "SELECT data_json FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        data_json.map(|json| parse_document(&json)).transpose()
    }

    fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data_json FROM documents WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(parse_document(&row?)?);
        }
        Ok(docs)
    }

    fn contains(&self, collection: &str, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn upsert_document(&self, collection: &str, id: &str, doc: &Document) -> Result<()> {
        let data_json = serde_json::to_string(doc)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO documents (collection, id, data_json) VALUES (?1, ?2, ?3)",
            params![collection, id, data_json],
        )?;
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(removed > 0)
    }

    fn find_match(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        if let Some(Value::String(id)) = filter.get(ID_FIELD) {
            return Ok(self
                .get_document(collection, id)?
                .filter(|doc| matches_filter(doc, filter)));
        }
        Ok(self
            .list_documents(collection)?
            .into_iter()
            .find(|doc| matches_filter(doc, filter)))
    }
}

fn parse_document(json: &str) -> Result<Document> {
    match serde_json::from_str(json)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StrataError::InvalidDocument(format!(
            "stored document is not an object: {other}"
        ))),
    }
}

fn conflict(database: &str, collection: &str, id: &str) -> StrataError {
    StrataError::Conflict {
        database: database.to_string(),
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

/// A backend store holding one connection per loaded remote database.
#[derive(Default)]
pub struct RemoteClient {
    dbs: Option<HashMap<String, RemoteDatabase>>,
}

impl RemoteClient {
    pub fn new() -> Self {
        RemoteClient { dbs: None }
    }

    fn closed() -> StrataError {
        StrataError::Closed {
            backend: BackendKind::Remote.to_string(),
        }
    }

    fn database(&self, name: &str) -> Result<&RemoteDatabase> {
        self.dbs
            .as_ref()
            .ok_or_else(Self::closed)?
            .get(name)
            .ok_or_else(|| StrataError::NotLoaded {
                database: name.to_string(),
            })
    }

    fn database_mut(&mut self, name: &str) -> Result<&mut RemoteDatabase> {
        self.dbs
            .as_mut()
            .ok_or_else(Self::closed)?
            .get_mut(name)
            .ok_or_else(|| StrataError::NotLoaded {
                database: name.to_string(),
            })
    }
}

impl Client for RemoteClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn open(&mut self) -> Result<()> {
        if self.dbs.is_none() {
            log::debug!("Opening remote client");
            self.dbs = Some(HashMap::new());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(dbs) = self.dbs.take() {
            log::debug!("Closed remote client ({} connections)", dbs.len());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.dbs.is_some()
    }

    fn is_alive(&self) -> bool {
        self.dbs
            .as_ref()
            .map(|dbs| dbs.values().all(RemoteDatabase::ping))
            .unwrap_or(false)
    }

    fn load_database(&mut self, config: &DatabaseConfig) -> Result<()> {
        let url = config.endpoint()?;
        let dbs = self.dbs.as_mut().ok_or_else(Self::closed)?;
        let db = RemoteDatabase::connect(url)?;
        dbs.insert(config.name.clone(), db);
        log::info!("Connected remote database '{}' at {url}", config.name);
        Ok(())
    }

    fn dump_database(&mut self, config: &DatabaseConfig) -> Result<Vec<PathBuf>> {
        self.database(&config.name)?;
        log::debug!(
            "Remote database '{}' is written through; nothing to dump",
            config.name
        );
        Ok(Vec::new())
    }

    fn has_database(&self, database: &str) -> bool {
        self.dbs
            .as_ref()
            .map(|dbs| dbs.contains_key(database))
            .unwrap_or(false)
    }

    fn collection_names(&self, database: &str) -> Result<BTreeSet<String>> {
        self.database(database)?.collection_names()
    }

    fn all_documents(&self, database: &str, collection: &str) -> Result<Vec<Document>> {
        self.database(database)?.list_documents(collection)
    }

    fn insert_one(&mut self, database: &str, collection: &str, doc: Document) -> Result<()> {
        let id = document_id(&doc)?.to_string();
        let db = self.database(database)?;
        if db.contains(collection, &id)? {
            return Err(conflict(database, collection, &id));
        }
        db.upsert_document(collection, &id, &doc)
    }

    fn insert_many(
        &mut self,
        database: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<()> {
        let db = self.database_mut(database)?;

        let mut batch: HashSet<String> = HashSet::with_capacity(docs.len());
        let mut rows = Vec::with_capacity(docs.len());
        for doc in &docs {
            let id = document_id(doc)?.to_string();
            if db.contains(collection, &id)? || !batch.insert(id.clone()) {
                return Err(conflict(database, collection, &id));
            }
            rows.push((id, serde_json::to_string(doc)?));
        }

        let tx = db.conn.transaction()?;
        for (id, data_json) in &rows {
            tx.execute(
                "INSERT INTO documents (collection, id, data_json) VALUES (?1, ?2, ?3)",
                params![collection, id, data_json],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_one(&mut self, database: &str, collection: &str, id: &str) -> Result<bool> {
        self.database(database)?.delete_document(collection, id)
    }

    fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>> {
        self.database(database)?.find_match(collection, filter)
    }

    fn update_one(
        &mut self,
        database: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let db = self.database(database)?;

        if let Some(existing) = db.find_match(collection, filter)? {
            let updated = apply_update(&existing, update)?;
            let id = document_id(&updated)?.to_string();
            db.upsert_document(collection, &id, &updated)?;
            return Ok(UpdateOutcome::Updated(id));
        }

        if !upsert {
            return Ok(UpdateOutcome::NoMatch);
        }

        let created = upserted_document(filter, update)?;
        let id = document_id(&created)?.to_string();
        if db.contains(collection, &id)? {
            return Err(conflict(database, collection, &id));
        }
        db.upsert_document(collection, &id, &created)?;
        Ok(UpdateOutcome::Upserted(id))
    }
}
