// Layered merge engine - combine ordered mappings into one view; layer 0 has the lowest priority

use crate::document::Document;
use crate::error::{Result, StrataError};
use serde_json::Value;
use std::collections::BTreeSet;

/// The outcome of merging one key across layers.
#[derive(Debug, Clone, PartialEq)]
pub enum Merged<'a> {
    /// Every layer holds a mapping for the key.
    Chain(ChainView<'a>),
    /// Every layer holds a sequence for the key.
    Sequence(Vec<&'a Value>),
    /// The highest-priority non-null value.
    Value(&'a Value),
}

impl<'a> Merged<'a> {
    /// Recursively convert the merged result into an ordinary value.
    pub fn to_plain(&self) -> Value {
        match self {
            Merged::Chain(view) => Value::Object(view.to_plain()),
            Merged::Sequence(items) => Value::Array(items.iter().map(|&v| v.clone()).collect()),
            Merged::Value(v) => (*v).clone(),
        }
    }

    /// The nested view, when the key merged into a mapping.
    pub fn as_chain(&self) -> Option<&ChainView<'a>> {
        match self {
            Merged::Chain(view) => Some(view),
            _ => None,
        }
    }
}

/// Merge `key` across `layers`:
///
/// 1. If every layer holds the key and every value is a mapping, the result is
///    a nested [`ChainView`] over those mappings.
/// 2. If every layer holds the key and every value is a sequence, the result
///    is the concatenation of all sequences in layer order.
/// 3. Otherwise the layers are scanned from last to first and the first value
///    that is present and not null wins.
///
/// `None` is the null result: the key is absent everywhere or only ever null.
pub fn merge<'a>(key: &str, layers: &[&'a Document]) -> Option<Merged<'a>> {
    if layers.is_empty() {
        return None;
    }

    let values: Vec<Option<&'a Value>> = layers.iter().map(|&layer| layer.get(key)).collect();

    if values.iter().all(Option::is_some) {
        let present: Vec<&'a Value> = values.iter().flatten().copied().collect();

        if present.iter().all(|v| v.is_object()) {
            let nested = present.iter().filter_map(|&v| v.as_object()).collect();
            return Some(Merged::Chain(ChainView::new(nested)));
        }

        if present.iter().all(|v| v.is_array()) {
            let items = present
                .iter()
                .filter_map(|&v| v.as_array())
                .flat_map(|seq| seq.iter())
                .collect();
            return Some(Merged::Sequence(items));
        }
    }

    values
        .into_iter()
        .rev()
        .flatten()
        .find(|v| !v.is_null())
        .map(Merged::Value)
}

/// Merge `key` and convert the result straight to a plain value.
pub fn merge_plain(key: &str, layers: &[&Document]) -> Value {
    merge(key, layers)
        .map(|merged| merged.to_plain())
        .unwrap_or(Value::Null)
}

/// A read-only merged view over borrowed layers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainView<'a> {
    layers: Vec<&'a Document>,
}

impl<'a> ChainView<'a> {
    pub fn new(layers: Vec<&'a Document>) -> Self {
        ChainView { layers }
    }

    pub fn layers(&self) -> &[&'a Document] {
        &self.layers
    }

    pub fn get(&self, key: &str) -> Option<Merged<'a>> {
        merge(key, &self.layers)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.layers.iter().any(|layer| layer.contains_key(key))
    }

    /// Sorted union of the keys of every layer.
    pub fn keys(&self) -> BTreeSet<&'a str> {
        self.layers
            .iter()
            .flat_map(|&layer| layer.keys().map(String::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|layer| layer.is_empty())
    }

    /// Recursively convert the view, including nested views, into a plain document.
    pub fn to_plain(&self) -> Document {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self
                    .get(key)
                    .map(|merged| merged.to_plain())
                    .unwrap_or(Value::Null);
                (key.to_string(), value)
            })
            .collect()
    }
}

/// A merged view that owns its layers and supports writes.
///
/// Writes follow the write-through rule: a key no layer defines is created in
/// the first (lowest-priority) layer, while a key that one or more layers
/// define is overwritten in every one of those layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainDb {
    maps: Vec<Document>,
}

impl ChainDb {
    pub fn new(maps: Vec<Document>) -> Self {
        ChainDb { maps }
    }

    /// Add a layer with higher priority than every existing one.
    pub fn push_layer(&mut self, map: Document) {
        self.maps.push(map);
    }

    pub fn layers(&self) -> &[Document] {
        &self.maps
    }

    pub fn into_layers(self) -> Vec<Document> {
        self.maps
    }

    pub fn view(&self) -> ChainView<'_> {
        ChainView::new(self.maps.iter().collect())
    }

    pub fn get(&self, key: &str) -> Option<Merged<'_>> {
        let layers: Vec<&Document> = self.maps.iter().collect();
        merge(key, &layers)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.maps.iter().any(|map| map.contains_key(key))
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.maps
            .iter()
            .flat_map(|map| map.keys().map(String::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.iter().all(|map| map.is_empty())
    }

    pub fn to_plain(&self) -> Document {
        self.view().to_plain()
    }

    /// Write `key = value` through every layer that defines `key`.
    pub fn insert(&mut self, key: &str, value: Value) {
        if self.maps.is_empty() {
            self.maps.push(Document::new());
        }
        write_through(self.maps.iter_mut().collect(), key, value);
    }

    /// Write into a nested merged mapping. Every key but the last must merge
    /// into a mapping (present as a mapping in every layer).
    pub fn insert_path(&mut self, path: &[&str], value: Value) -> Result<()> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| StrataError::InvalidPath("empty path".into()))?;

        if self.maps.is_empty() {
            self.maps.push(Document::new());
        }

        let mut layers: Vec<&mut Document> = self.maps.iter_mut().collect();
        for (depth, key) in parents.iter().enumerate() {
            let nested = layers
                .iter()
                .all(|layer| matches!(layer.get(*key), Some(Value::Object(_))));
            if !nested {
                return Err(StrataError::InvalidPath(format!(
                    "'{}' does not merge into a mapping",
                    path[..=depth].join(".")
                )));
            }
            layers = layers
                .into_iter()
                .filter_map(|layer| layer.get_mut(*key).and_then(Value::as_object_mut))
                .collect();
        }

        write_through(layers, last, value);
        Ok(())
    }

    /// Remove `key` from every layer that defines it. Returns whether any
    /// layer held the key.
    pub fn remove(&mut self, key: &str) -> bool {
        let mut removed = false;
        for map in &mut self.maps {
            removed |= map.remove(key).is_some();
        }
        removed
    }
}

fn write_through(layers: Vec<&mut Document>, key: &str, value: Value) {
    if layers.iter().any(|layer| layer.contains_key(key)) {
        for layer in layers {
            if layer.contains_key(key) {
                layer.insert(key.to_string(), value.clone());
            }
        }
    } else if let Some(first) = layers.into_iter().next() {
        first.insert(key.to_string(), value);
    }
}
