// Collection file formats - read/write one collection per file

use crate::document::{document_id, yaml_to_json, Document, ID_FIELD};
use crate::error::{Result, StrataError};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// On-disk serialization of a collection file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionFormat {
    /// One JSON document per line, keys sorted.
    Json,
    /// One YAML mapping of `_id` to document body.
    Yaml,
}

impl CollectionFormat {
    /// Canonical file extension for new collection files.
    pub fn extension(&self) -> &'static str {
        match self {
            CollectionFormat::Json => "json",
            CollectionFormat::Yaml => "yaml",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(CollectionFormat::Json),
            "yaml" | "yml" => Some(CollectionFormat::Yaml),
            _ => None,
        }
    }

    /// Parse every document in a collection file.
    pub fn read(&self, path: &Path) -> Result<Vec<Document>> {
        let content = std::fs::read_to_string(path)?;
        let docs = match self {
            CollectionFormat::Json => parse_json_lines(path, &content)?,
            CollectionFormat::Yaml => parse_yaml_mapping(path, &content)?,
        };
        log::debug!("Read {} documents from {}", docs.len(), path.display());
        Ok(docs)
    }

    /// Serialize documents, in the order given, to a string.
    pub fn serialize<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Result<String> {
        match self {
            CollectionFormat::Json => {
                let mut out = String::new();
                for doc in docs {
                    out.push_str(&serde_json::to_string(doc)?);
                    out.push('\n');
                }
                Ok(out)
            }
            CollectionFormat::Yaml => {
                let mut mapping = serde_yaml::Mapping::new();
                for doc in docs {
                    let id = document_id(doc)?.to_string();
                    let mut body = doc.clone();
                    body.remove(ID_FIELD);
                    mapping.insert(serde_yaml::Value::String(id), serde_yaml::to_value(&body)?);
                }
                Ok(serde_yaml::to_string(&serde_yaml::Value::Mapping(mapping))?)
            }
        }
    }

    /// Write documents to `path` through a temporary file in the same
    /// directory, renamed over the destination once complete.
    pub fn write<'a>(&self, path: &Path, docs: impl IntoIterator<Item = &'a Document>) -> Result<()> {
        let contents = self.serialize(docs)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        log::debug!("Wrote {}", path.display());
        Ok(())
    }
}

impl FromStr for CollectionFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" | "jsonl" => Ok(CollectionFormat::Json),
            "yaml" | "yml" => Ok(CollectionFormat::Yaml),
            other => Err(StrataError::Configuration(format!(
                "unknown serialization format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for CollectionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

fn parse_json_lines(path: &Path, content: &str) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line)? {
            Value::Object(doc) => docs.push(doc),
            _ => {
                return Err(StrataError::InvalidDocument(format!(
                    "{}:{}: line is not a JSON object",
                    path.display(),
                    lineno + 1
                )))
            }
        }
    }
    Ok(docs)
}

fn parse_yaml_mapping(path: &Path, content: &str) -> Result<Vec<Document>> {
    let root: serde_yaml::Value = serde_yaml::from_str(content)?;
    let mapping = match root {
        serde_yaml::Value::Null => return Ok(Vec::new()),
        serde_yaml::Value::Mapping(m) => m,
        _ => {
            return Err(StrataError::InvalidDocument(format!(
                "{}: expected a mapping of _id to document",
                path.display()
            )))
        }
    };

    let mut docs = Vec::with_capacity(mapping.len());
    for (key, body) in &mapping {
        let id = match yaml_to_json(key) {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let mut doc = match yaml_to_json(body) {
            Value::Object(doc) => doc,
            Value::Null => Document::new(),
            _ => {
                return Err(StrataError::InvalidDocument(format!(
                    "{}: entry '{id}' is not a mapping",
                    path.display()
                )))
            }
        };
        doc.insert(ID_FIELD.to_string(), Value::String(id));
        docs.push(doc);
    }
    Ok(docs)
}
