mod format;

pub use format::CollectionFormat;

use crate::client::{apply_update, upserted_document, Client, UpdateOutcome};
use crate::config::{BackendKind, DatabaseConfig};
use crate::document::{document_id, matches_filter, Document, ID_FIELD};
use crate::error::{Result, StrataError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Documents of one collection keyed by `_id`.
type Collection = BTreeMap<String, Document>;

/// Where a collection was found on disk and in which format.
#[derive(Debug, Clone, PartialEq)]
struct CollectionFile {
    format: CollectionFormat,
    file_name: String,
}

#[derive(Debug, Default)]
struct FsDatabase {
    collections: BTreeMap<String, Collection>,
    files: HashMap<String, CollectionFile>,
}

/// A backend store that keeps each collection in one file under the
/// database's directory and serves CRUD from memory between `load` and `dump`.
#[derive(Debug, Default)]
pub struct FileSystemClient {
    dbs: Option<HashMap<String, FsDatabase>>,
}

impl FileSystemClient {
    pub fn new() -> Self {
        FileSystemClient { dbs: None }
    }

    fn closed() -> StrataError {
        StrataError::Closed {
            backend: BackendKind::Filesystem.to_string(),
        }
    }

    fn database(&self, name: &str) -> Result<&FsDatabase> {
        self.dbs
            .as_ref()
            .ok_or_else(Self::closed)?
            .get(name)
            .ok_or_else(|| StrataError::NotLoaded {
                database: name.to_string(),
            })
    }

    fn database_mut(&mut self, name: &str) -> Result<&mut FsDatabase> {
        self.dbs
            .as_mut()
            .ok_or_else(Self::closed)?
            .get_mut(name)
            .ok_or_else(|| StrataError::NotLoaded {
                database: name.to_string(),
            })
    }
}

fn default_format(config: &DatabaseConfig) -> Result<CollectionFormat> {
    match &config.format {
        Some(name) => name.parse(),
        None => Ok(CollectionFormat::Json),
    }
}

/// Find every collection file directly under `root`. A collection stored in
/// more than one file is an error.
fn discover_collections(root: &Path) -> Result<BTreeMap<String, CollectionFile>> {
    let pattern = format!("{}/*", glob::Pattern::escape(&root.to_string_lossy()));
    let paths = glob::glob(&pattern)
        .map_err(|e| StrataError::Configuration(format!("invalid database path: {e}")))?;

    let mut found: BTreeMap<String, CollectionFile> = BTreeMap::new();
    for path in paths.filter_map(|r| r.ok()) {
        if !path.is_file() {
            continue;
        }
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) else {
            log::debug!("Ignoring {}: no collection extension", path.display());
            continue;
        };
        let Some(format) = CollectionFormat::from_extension(ext) else {
            log::debug!("Ignoring {}: unknown collection format", path.display());
            continue;
        };
        let file_name = format!("{stem}.{ext}");

        if let Some(existing) = found.get(stem) {
            return Err(StrataError::Configuration(format!(
                "collection '{stem}' is stored in more than one file: {} and {file_name}",
                existing.file_name
            )));
        }
        found.insert(stem.to_string(), CollectionFile { format, file_name });
    }
    Ok(found)
}

fn index_by_id(database: &str, collection: &str, docs: Vec<Document>) -> Result<Collection> {
    let mut indexed = Collection::new();
    for doc in docs {
        let id = document_id(&doc)?.to_string();
        if indexed.contains_key(&id) {
            return Err(StrataError::Conflict {
                database: database.to_string(),
                collection: collection.to_string(),
                id,
            });
        }
        indexed.insert(id, doc);
    }
    Ok(indexed)
}

/// First document in `_id` order matching the filter.
fn find_match<'a>(collection: &'a Collection, filter: &Document) -> Option<&'a Document> {
    if let Some(Value::String(id)) = filter.get(ID_FIELD) {
        return collection
            .get(id)
            .filter(|doc| matches_filter(doc, filter));
    }
    collection.values().find(|doc| matches_filter(doc, filter))
}

fn conflict(database: &str, collection: &str, id: &str) -> StrataError {
    StrataError::Conflict {
        database: database.to_string(),
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

impl Client for FileSystemClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn open(&mut self) -> Result<()> {
        if self.dbs.is_none() {
            log::debug!("Opening filesystem client");
            self.dbs = Some(HashMap::new());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.dbs.take().is_some() {
            log::debug!("Closed filesystem client");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.dbs.is_some()
    }

    fn is_alive(&self) -> bool {
        self.is_open()
    }

    fn load_database(&mut self, config: &DatabaseConfig) -> Result<()> {
        let root = config.storage_path()?.to_path_buf();
        default_format(config)?;

        let dbs = self.dbs.as_mut().ok_or_else(Self::closed)?;
        let db = dbs.entry(config.name.clone()).or_default();

        if !root.exists() {
            log::info!(
                "Database '{}' has no directory at {} yet; starting empty",
                config.name,
                root.display()
            );
            return Ok(());
        }

        // A failed load leaves in-memory state untouched.
        let mut loaded = Vec::new();
        for (name, file) in discover_collections(&root)? {
            if let Some(previous) = db.files.get(&name) {
                if previous.format != file.format {
                    return Err(StrataError::Configuration(format!(
                        "collection '{name}' in '{}' changed format from {} to {}",
                        config.name, previous.format, file.format
                    )));
                }
            }
            let docs = file.format.read(&root.join(&file.file_name))?;
            let collection = index_by_id(&config.name, &name, docs)?;
            loaded.push((name, file, collection));
        }

        for (name, file, collection) in loaded {
            db.collections.insert(name.clone(), collection);
            db.files.insert(name, file);
        }

        log::info!(
            "Loaded database '{}' from {} ({} collections)",
            config.name,
            root.display(),
            db.collections.len()
        );
        Ok(())
    }

    fn dump_database(&mut self, config: &DatabaseConfig) -> Result<Vec<PathBuf>> {
        let root = config.storage_path()?.to_path_buf();
        let format = default_format(config)?;
        let db = self.database_mut(&config.name)?;

        let mut written = Vec::with_capacity(db.collections.len());
        for (name, collection) in &db.collections {
            let file = db.files.entry(name.clone()).or_insert_with(|| CollectionFile {
                format,
                file_name: format!("{name}.{}", format.extension()),
            });
            let path = root.join(&file.file_name);
            file.format.write(&path, collection.values())?;
            written.push(path);
        }

        log::info!(
            "Dumped database '{}' to {} ({} files)",
            config.name,
            root.display(),
            written.len()
        );
        Ok(written)
    }

    fn has_database(&self, database: &str) -> bool {
        self.dbs
            .as_ref()
            .map(|dbs| dbs.contains_key(database))
            .unwrap_or(false)
    }

    fn collection_names(&self, database: &str) -> Result<BTreeSet<String>> {
        Ok(self.database(database)?.collections.keys().cloned().collect())
    }

    fn all_documents(&self, database: &str, collection: &str) -> Result<Vec<Document>> {
        Ok(self
            .database(database)?
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn insert_one(&mut self, database: &str, collection: &str, doc: Document) -> Result<()> {
        let id = document_id(&doc)?.to_string();
        let docs = self
            .database_mut(database)?
            .collections
            .entry(collection.to_string())
            .or_default();
        if docs.contains_key(&id) {
            return Err(conflict(database, collection, &id));
        }
        docs.insert(id, doc);
        Ok(())
    }

    fn insert_many(
        &mut self,
        database: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<()> {
        let db = self.database_mut(database)?;

        let mut ids = Vec::with_capacity(docs.len());
        let mut batch: HashSet<String> = HashSet::with_capacity(docs.len());
        for doc in &docs {
            let id = document_id(doc)?.to_string();
            let exists = db
                .collections
                .get(collection)
                .map(|existing| existing.contains_key(&id))
                .unwrap_or(false);
            if exists || !batch.insert(id.clone()) {
                return Err(conflict(database, collection, &id));
            }
            ids.push(id);
        }

        db.collections
            .entry(collection.to_string())
            .or_default()
            .extend(ids.into_iter().zip(docs));
        Ok(())
    }

    fn delete_one(&mut self, database: &str, collection: &str, id: &str) -> Result<bool> {
        Ok(self
            .database_mut(database)?
            .collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>> {
        Ok(self
            .database(database)?
            .collections
            .get(collection)
            .and_then(|docs| find_match(docs, filter))
            .cloned())
    }

    fn update_one(
        &mut self,
        database: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let db = self.database_mut(database)?;

        let matched = db
            .collections
            .get(collection)
            .and_then(|docs| find_match(docs, filter))
            .map(|existing| apply_update(existing, update))
            .transpose()?;

        if let Some(updated) = matched {
            let id = document_id(&updated)?.to_string();
            db.collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), updated);
            return Ok(UpdateOutcome::Updated(id));
        }

        if !upsert {
            return Ok(UpdateOutcome::NoMatch);
        }

        let created = upserted_document(filter, update)?;
        let id = document_id(&created)?.to_string();
        let docs = db.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(conflict(database, collection, &id));
        }
        docs.insert(id.clone(), created);
        Ok(UpdateOutcome::Upserted(id))
    }
}
