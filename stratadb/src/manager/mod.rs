// Client manager - route per-database operations and chain same-named collections

use crate::chain::ChainDb;
use crate::client::{Client, UpdateOutcome};
use crate::config::{BackendKind, DatabaseConfig, RunConfig};
use crate::document::{document_id, Document, ID_FIELD};
use crate::error::{Result, StrataError};
use crate::fs_client::FileSystemClient;
use crate::remote::RemoteClient;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

fn make_client(kind: BackendKind) -> Box<dyn Client> {
    match kind {
        BackendKind::Filesystem => Box::new(FileSystemClient::new()),
        BackendKind::Remote => Box::new(RemoteClient::new()),
    }
}

fn id_filter(id: &str) -> Document {
    let mut filter = Document::new();
    filter.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    filter
}

/// The single entry point over every configured database.
///
/// Database order is priority order: in the chained view, databases
/// configured later shadow scalar fields of databases configured earlier.
pub struct ClientManager {
    databases: Vec<DatabaseConfig>,
    routes: HashMap<String, BackendKind>,
    clients: BTreeMap<BackendKind, Box<dyn Client>>,
}

impl ClientManager {
    /// Validate the database configs and build one client per technology
    /// they reference. Clients start closed.
    pub fn new(databases: Vec<DatabaseConfig>) -> Result<Self> {
        let mut routes = HashMap::with_capacity(databases.len());
        let mut clients: BTreeMap<BackendKind, Box<dyn Client>> = BTreeMap::new();

        for db in &databases {
            let kind = db.backend_kind()?;
            if routes.insert(db.name.clone(), kind).is_some() {
                return Err(StrataError::Configuration(format!(
                    "database '{}' is configured more than once",
                    db.name
                )));
            }
            clients.entry(kind).or_insert_with(|| make_client(kind));
        }

        log::debug!(
            "Configured {} databases across {} clients",
            databases.len(),
            clients.len()
        );

        Ok(ClientManager {
            databases,
            routes,
            clients,
        })
    }

    /// Build, open and load every configured database.
    pub fn connect(config: RunConfig) -> Result<Self> {
        let mut manager = Self::new(config.databases)?;
        manager.open()?;
        manager.load_all()?;
        Ok(manager)
    }

    pub fn open(&mut self) -> Result<()> {
        for client in self.clients.values_mut() {
            client.open()?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        for client in self.clients.values_mut() {
            client.close()?;
        }
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.clients.values().all(|client| client.is_alive())
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn databases(&self) -> &[DatabaseConfig] {
        &self.databases
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.name == name)
    }

    pub fn public_databases(&self) -> impl Iterator<Item = &DatabaseConfig> {
        self.databases.iter().filter(|db| db.public)
    }

    pub fn is_loaded(&self, database: &str) -> bool {
        self.client(database)
            .map(|client| client.has_database(database))
            .unwrap_or(false)
    }

    pub fn collection_names(&self, database: &str) -> Result<BTreeSet<String>> {
        self.client(database)?.collection_names(database)
    }

    // ── Routing ────────────────────────────────────────────────────

    fn route(&self, database: &str) -> Result<BackendKind> {
        self.routes
            .get(database)
            .copied()
            .ok_or_else(|| StrataError::Routing {
                database: database.to_string(),
            })
    }

    fn client(&self, database: &str) -> Result<&dyn Client> {
        let kind = self.route(database)?;
        self.clients
            .get(&kind)
            .map(|client| &**client)
            .ok_or_else(|| StrataError::Routing {
                database: database.to_string(),
            })
    }

    fn client_mut(&mut self, database: &str) -> Result<&mut Box<dyn Client>> {
        let kind = self.route(database)?;
        self.clients
            .get_mut(&kind)
            .ok_or_else(|| StrataError::Routing {
                database: database.to_string(),
            })
    }

    // ── Lifecycle per database ─────────────────────────────────────

    pub fn load_database(&mut self, config: &DatabaseConfig) -> Result<()> {
        self.client_mut(&config.name)?.load_database(config)
    }

    pub fn dump_database(&mut self, config: &DatabaseConfig) -> Result<Vec<PathBuf>> {
        self.client_mut(&config.name)?.dump_database(config)
    }

    pub fn load_all(&mut self) -> Result<()> {
        for config in self.databases.clone() {
            self.load_database(&config)?;
        }
        Ok(())
    }

    /// Dump every loaded database. Returns every file written.
    pub fn dump_all(&mut self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for config in self.databases.clone() {
            if self.is_loaded(&config.name) {
                written.extend(self.dump_database(&config)?);
            }
        }
        Ok(written)
    }

    // ── CRUD ───────────────────────────────────────────────────────

    /// Documents of one database's collection, ordered by `_id`.
    pub fn documents(&self, database: &str, collection: &str) -> Result<Vec<Document>> {
        self.client(database)?.all_documents(database, collection)
    }

    pub fn insert_one(&mut self, database: &str, collection: &str, doc: Document) -> Result<()> {
        self.client_mut(database)?
            .insert_one(database, collection, doc)
    }

    pub fn insert_many(
        &mut self,
        database: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<()> {
        self.client_mut(database)?
            .insert_many(database, collection, docs)
    }

    pub fn delete_one(&mut self, database: &str, collection: &str, id: &str) -> Result<bool> {
        self.client_mut(database)?
            .delete_one(database, collection, id)
    }

    pub fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>> {
        self.client(database)?.find_one(database, collection, filter)
    }

    pub fn update_one(
        &mut self,
        database: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        self.client_mut(database)?
            .update_one(database, collection, filter, update, upsert)
    }

    // ── Chained view ───────────────────────────────────────────────

    /// Every client must be open.
    fn ensure_open(&self) -> Result<()> {
        match self.clients.values().find(|client| !client.is_open()) {
            Some(client) => Err(StrataError::Closed {
                backend: client.kind().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Names of loaded databases, in priority order.
    fn loaded_names(&self) -> Vec<String> {
        self.databases
            .iter()
            .filter(|db| self.is_loaded(&db.name))
            .map(|db| db.name.clone())
            .collect()
    }

    /// The merged view of `collection` across every loaded database that has
    /// it. Each layer maps `_id` to document. Built fresh on every call.
    pub fn chained(&self, collection: &str) -> Result<ChainDb> {
        self.ensure_open()?;
        let mut chain = ChainDb::default();
        for name in self.loaded_names() {
            let client = self.client(&name)?;
            if !client.collection_names(&name)?.contains(collection) {
                continue;
            }

            let mut layer = Document::new();
            for doc in client.all_documents(&name, collection)? {
                let id = document_id(&doc)?.to_string();
                layer.insert(id, Value::Object(doc));
            }
            chain.push_layer(layer);
        }
        Ok(chain)
    }

    /// Every document of `collection` in the chained view, ordered by `_id`.
    /// A collection no loaded database has is empty.
    pub fn all_documents(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self
            .chained(collection)?
            .to_plain()
            .into_iter()
            .filter_map(|(_, merged)| match merged {
                Value::Object(doc) => Some(doc),
                _ => None,
            })
            .collect())
    }

    /// One document of the chained view.
    pub fn find_chained(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let chain = self.chained(collection)?;
        Ok(chain.get(id).and_then(|merged| match merged.to_plain() {
            Value::Object(doc) => Some(doc),
            _ => None,
        }))
    }

    /// Write `fields` to document `id` through the chained view.
    ///
    /// Every loaded database whose collection holds `id` gets the fields
    /// merged in. When none does, a new document is inserted into the first
    /// loaded database. Returns the names of the databases written.
    ///
    /// Writes are not transactional across databases: on failure, databases
    /// already written stay written and the error is returned.
    pub fn update_chained(
        &mut self,
        collection: &str,
        id: &str,
        fields: &Document,
    ) -> Result<Vec<String>> {
        self.ensure_open()?;
        let filter = id_filter(id);
        let loaded = self.loaded_names();

        let mut holders = Vec::new();
        for name in &loaded {
            if self.find_one(name, collection, &filter)?.is_some() {
                holders.push(name.clone());
            }
        }

        if holders.is_empty() {
            let Some(first) = loaded.into_iter().next() else {
                return Err(StrataError::Configuration(format!(
                    "no loaded database can hold {collection}/{id}"
                )));
            };
            let mut doc = fields.clone();
            doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            self.insert_one(&first, collection, doc)?;
            log::debug!("Chained write created {collection}/{id} in '{first}'");
            return Ok(vec![first]);
        }

        for name in &holders {
            self.update_one(name, collection, &filter, fields, false)?;
        }
        log::debug!(
            "Chained write updated {collection}/{id} in {}",
            holders.join(", ")
        );
        Ok(holders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn fs_databases(tmp: &TempDir, names: &[&str]) -> Vec<DatabaseConfig> {
        names
            .iter()
            .map(|name| DatabaseConfig::filesystem(*name, tmp.path().join(name)))
            .collect()
    }

    fn connected(databases: Vec<DatabaseConfig>) -> ClientManager {
        ClientManager::connect(RunConfig { databases }).unwrap()
    }

    fn three_layer_manager(tmp: &TempDir) -> ClientManager {
        let mut manager = connected(fs_databases(tmp, &["base", "group", "local"]));
        manager
            .insert_one(
                "base",
                "people",
                doc(json!({"_id": "p1", "name": "A", "email": "a@x"})),
            )
            .unwrap();
        manager
            .insert_one("group", "people", doc(json!({"_id": "p1", "email": "b@y"})))
            .unwrap();
        manager
            .insert_one("local", "people", doc(json!({"_id": "p1", "phone": "555"})))
            .unwrap();
        manager
    }

    #[test]
    fn test_one_client_per_technology() {
        let tmp = TempDir::new().unwrap();
        let mut databases = fs_databases(&tmp, &["d1", "d2"]);
        databases.push(DatabaseConfig::remote("d3", ":memory:"));

        let manager = ClientManager::new(databases).unwrap();
        assert_eq!(manager.clients.len(), 2);
        assert!(!manager.is_loaded("d1"));
    }

    #[test]
    fn test_configuration_errors() {
        let tmp = TempDir::new().unwrap();
        let duplicate = fs_databases(&tmp, &["d1", "d1"]);
        assert!(matches!(
            ClientManager::new(duplicate),
            Err(StrataError::Configuration(_))
        ));

        let mut unknown = DatabaseConfig::filesystem("d1", tmp.path());
        unknown.backend = "mongodb".to_string();
        assert!(matches!(
            ClientManager::new(vec![unknown]),
            Err(StrataError::Configuration(_))
        ));

        let mut no_url = DatabaseConfig::remote("d2", ":memory:");
        no_url.url = None;
        assert!(matches!(
            ClientManager::connect(RunConfig {
                databases: vec![no_url]
            }),
            Err(StrataError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_database_is_routing_error() {
        let tmp = TempDir::new().unwrap();
        let mut manager = connected(fs_databases(&tmp, &["d1"]));

        assert!(matches!(
            manager.insert_one("nope", "people", doc(json!({"_id": "p1"}))),
            Err(StrataError::Routing { .. })
        ));
        assert!(matches!(
            manager.collection_names("nope"),
            Err(StrataError::Routing { .. })
        ));
        let stray = DatabaseConfig::filesystem("nope", tmp.path());
        assert!(matches!(
            manager.load_database(&stray),
            Err(StrataError::Routing { .. })
        ));
    }

    #[test]
    fn test_routing_isolation() {
        let tmp = TempDir::new().unwrap();
        let mut manager = connected(vec![
            DatabaseConfig::filesystem("d1", tmp.path().join("d1")),
            DatabaseConfig::remote("d2", ":memory:"),
        ]);

        manager
            .insert_one("d1", "people", doc(json!({"_id": "p1", "name": "A"})))
            .unwrap();

        assert_eq!(manager.documents("d1", "people").unwrap().len(), 1);
        assert!(manager.documents("d2", "people").unwrap().is_empty());
        assert!(manager.collection_names("d2").unwrap().is_empty());
    }

    #[test]
    fn test_three_layer_chained_document() {
        let tmp = TempDir::new().unwrap();
        let manager = three_layer_manager(&tmp);

        let p1 = manager.find_chained("people", "p1").unwrap().unwrap();
        assert_eq!(
            Value::Object(p1),
            json!({"_id": "p1", "name": "A", "email": "b@y", "phone": "555"})
        );
        assert_eq!(manager.find_chained("people", "p2").unwrap(), None);
        assert!(manager.all_documents("grants").unwrap().is_empty());
    }

    #[test]
    fn test_chained_view_tracks_mutations() {
        let tmp = TempDir::new().unwrap();
        let mut manager = three_layer_manager(&tmp);
        assert_eq!(manager.all_documents("people").unwrap().len(), 1);

        manager
            .insert_one("group", "people", doc(json!({"_id": "p2", "name": "B"})))
            .unwrap();
        manager
            .update_one(
                "local",
                "people",
                &doc(json!({"_id": "p1"})),
                &doc(json!({"email": "c@z"})),
                false,
            )
            .unwrap();

        let people = manager.all_documents("people").unwrap();
        assert_eq!(
            people.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![
                json!({"_id": "p1", "name": "A", "email": "c@z", "phone": "555"}),
                json!({"_id": "p2", "name": "B"}),
            ]
        );

        manager.delete_one("local", "people", "p1").unwrap();
        let p1 = manager.find_chained("people", "p1").unwrap().unwrap();
        assert_eq!(p1["email"], json!("b@y"));
    }

    #[test]
    fn test_chained_view_skips_unloaded_databases() {
        let tmp = TempDir::new().unwrap();
        let databases = fs_databases(&tmp, &["base", "overlay"]);
        let mut manager = ClientManager::new(databases.clone()).unwrap();
        manager.open().unwrap();
        manager.load_database(&databases[0]).unwrap();

        manager
            .insert_one("base", "people", doc(json!({"_id": "p1", "name": "A"})))
            .unwrap();
        assert!(matches!(
            manager.insert_one("overlay", "people", doc(json!({"_id": "p1"}))),
            Err(StrataError::NotLoaded { .. })
        ));
        assert_eq!(manager.chained("people").unwrap().layers().len(), 1);
    }

    #[test]
    fn test_update_chained_writes_every_holder() {
        let tmp = TempDir::new().unwrap();
        let mut manager = connected(fs_databases(&tmp, &["base", "group", "local"]));
        manager
            .insert_one("base", "people", doc(json!({"_id": "p1", "name": "A"})))
            .unwrap();
        manager
            .insert_one("group", "people", doc(json!({"_id": "p1", "email": "b@y"})))
            .unwrap();

        let written = manager
            .update_chained("people", "p1", &doc(json!({"email": "new@x"})))
            .unwrap();
        assert_eq!(written, vec!["base".to_string(), "group".to_string()]);

        assert_eq!(
            Value::Object(manager.documents("base", "people").unwrap().remove(0)),
            json!({"_id": "p1", "name": "A", "email": "new@x"})
        );
        assert_eq!(
            Value::Object(manager.documents("group", "people").unwrap().remove(0)),
            json!({"_id": "p1", "email": "new@x"})
        );
        assert!(manager.documents("local", "people").unwrap().is_empty());
    }

    #[test]
    fn test_update_chained_creates_in_first_database() {
        let tmp = TempDir::new().unwrap();
        let mut manager = connected(fs_databases(&tmp, &["base", "overlay"]));

        let written = manager
            .update_chained("todos", "t1", &doc(json!({"title": "Write report"})))
            .unwrap();
        assert_eq!(written, vec!["base".to_string()]);
        assert_eq!(
            Value::Object(manager.find_chained("todos", "t1").unwrap().unwrap()),
            json!({"_id": "t1", "title": "Write report"})
        );
        assert!(manager.documents("overlay", "todos").unwrap().is_empty());
    }

    #[test]
    fn test_dump_all_and_reconnect() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("stratadb.yaml");
        std::fs::write(
            &config_path,
            "databases:\n  - name: base\n    path: base\n  - name: secret\n    path: secret\n    public: false\n    format: yaml\n",
        )
        .unwrap();

        let mut manager = ClientManager::connect(parse_config(&config_path).unwrap()).unwrap();
        let public: Vec<&str> = manager
            .public_databases()
            .map(|db| db.name.as_str())
            .collect();
        assert_eq!(public, vec!["base"]);

        manager
            .insert_one("base", "people", doc(json!({"_id": "p1", "name": "A"})))
            .unwrap();
        manager
            .insert_one("secret", "people", doc(json!({"_id": "p1", "salary": 10})))
            .unwrap();
        let mut written = manager.dump_all().unwrap();
        written.sort();
        assert_eq!(
            written,
            vec![
                tmp.path().join("base/people.json"),
                tmp.path().join("secret/people.yaml"),
            ]
        );
        manager.close().unwrap();
        assert!(!manager.is_alive());

        let reopened = ClientManager::connect(parse_config(&config_path).unwrap()).unwrap();
        assert!(reopened.is_alive());
        assert_eq!(
            Value::Object(reopened.find_chained("people", "p1").unwrap().unwrap()),
            json!({"_id": "p1", "name": "A", "salary": 10})
        );
    }

    #[test]
    fn test_chained_view_across_technologies() {
        let tmp = TempDir::new().unwrap();
        let mut manager = connected(vec![
            DatabaseConfig::filesystem("base", tmp.path().join("base")),
            DatabaseConfig::remote("archive", ":memory:"),
        ]);
        manager
            .insert_one(
                "base",
                "people",
                doc(json!({"_id": "p1", "name": "A", "email": "a@x", "tags": ["x"]})),
            )
            .unwrap();
        manager
            .insert_one(
                "archive",
                "people",
                doc(json!({"_id": "p1", "email": "b@y", "tags": ["y"]})),
            )
            .unwrap();

        assert_eq!(
            Value::Object(manager.find_chained("people", "p1").unwrap().unwrap()),
            json!({"_id": "p1", "name": "A", "email": "b@y", "tags": ["x", "y"]})
        );

        manager
            .insert_one("archive", "people", doc(json!({"_id": "p2", "name": "B"})))
            .unwrap();
        let ids: Vec<Value> = manager
            .all_documents("people")
            .unwrap()
            .into_iter()
            .map(|d| d["_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("p1"), json!("p2")]);

        let written = manager
            .update_chained("people", "p1", &doc(json!({"phone": "555"})))
            .unwrap();
        assert_eq!(written, vec!["base".to_string(), "archive".to_string()]);
        for database in ["base", "archive"] {
            let p1 = manager
                .find_one(database, "people", &doc(json!({"_id": "p1"})))
                .unwrap()
                .unwrap();
            assert_eq!(p1["phone"], json!("555"));
        }
        assert_eq!(
            Value::Object(manager.find_chained("people", "p1").unwrap().unwrap()),
            json!({"_id": "p1", "name": "A", "email": "b@y", "phone": "555", "tags": ["x", "y"]})
        );
    }

    #[test]
    fn test_chained_operations_on_closed_manager() {
        let tmp = TempDir::new().unwrap();
        let mut manager = connected(fs_databases(&tmp, &["d1"]));
        manager
            .insert_one("d1", "people", doc(json!({"_id": "p1", "name": "A"})))
            .unwrap();
        manager.close().unwrap();

        assert!(matches!(
            manager.all_documents("people"),
            Err(StrataError::Closed { .. })
        ));
        assert!(matches!(
            manager.find_chained("people", "p1"),
            Err(StrataError::Closed { .. })
        ));
        assert!(matches!(
            manager.update_chained("people", "p1", &doc(json!({"name": "B"}))),
            Err(StrataError::Closed { .. })
        ));
    }
}
