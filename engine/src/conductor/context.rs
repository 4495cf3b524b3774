//! Execution Context
//!
//! Bounded key/value working memory shared by every node of one execution
//! tree. Values whose serialized size reaches the compaction threshold are
//! written to a [`BulkStore`] and replaced by a [`DataReference`] carrying a
//! structural summary, so prompts built from context never carry full
//! payloads.
//!
//! Keys are `(depth,index)` for neurons and `dendrite_item_(depth,index)` for
//! the item a dendrite is working on. Inside a dendrite both are prefixed with
//! the dendrite's path, which keeps concurrent dendrites apart. A [`KeyScope`]
//! decides which entries a given node may read.

use crate::conductor::store::BulkStore;
use crate::conductor::types::NeuronId;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default compaction threshold (5 KB serialized)
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 5 * 1024;

/// Prefix of transient per-item keys
pub const TRANSIENT_PREFIX: &str = "dendrite_item_";

/// Field names that usually hold the list inside a wrapper object
const LIST_FIELDS: &[&str] = &["items", "data", "results", "records", "entries"];

/// Fields kept when a summary sample is itself large
const IMPORTANT_FIELDS: &[&str] = &[
    "id", "name", "title", "type", "sport_type", "date", "start_date", "status", "count",
    "total", "distance", "amount",
];

const SUMMARY_SAMPLES: usize = 3;
const SUMMARY_MAX_FIELDS: usize = 20;
const SUMMARY_MAX_KEYS: usize = 10;
const SAMPLE_MAX_BYTES: usize = 300;
const PREVIEW_INLINE_BYTES: usize = 300;

/// Descriptor of a payload that lives in bulk storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReference {
    pub id: String,
    pub summary: Value,
    pub size_bytes: usize,
}

/// A context value, either held inline or offloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    Inline(Value),
    Reference(DataReference),
}

impl StoredValue {
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    pub fn as_inline(&self) -> Option<&Value> {
        match self {
            Self::Inline(v) => Some(v),
            Self::Reference(_) => None,
        }
    }

    pub fn reference(&self) -> Option<&DataReference> {
        match self {
            Self::Reference(r) => Some(r),
            Self::Inline(_) => None,
        }
    }

    /// Prompt-safe rendering: small inline values as-is, anything else as a
    /// structural summary.
    pub fn preview(&self) -> Value {
        match self {
            Self::Inline(v) => bounded_view(v, PREVIEW_INLINE_BYTES),
            Self::Reference(r) => json!({
                "$ref": r.id,
                "size_bytes": r.size_bytes,
                "summary": r.summary,
            }),
        }
    }
}

/// Which context entries one node of the tree may read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyScope {
    /// Key prefix of the dendrite this node belongs to ("" at the root)
    pub path: String,
    /// Transient key of the item the enclosing dendrite is working on
    pub item_key: Option<String>,
}

impl KeyScope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn neuron_key(&self, id: NeuronId) -> String {
        format!("{}{}", self.path, id)
    }

    pub fn transient_key(&self, id: NeuronId) -> String {
        format!("{}{}{}", TRANSIENT_PREFIX, self.path, id)
    }

    /// Scope for the dendrite spawned by `parent_key` in `slot`
    pub fn child(&self, parent_key: &str, slot: usize, item_key: Option<String>) -> Self {
        Self {
            path: format!("{}#{}/", parent_key, slot),
            item_key,
        }
    }

    /// Entries from this node's own dendrite and its ancestors are visible;
    /// of the transient keys only the active item is.
    pub fn sees(&self, key: &str) -> bool {
        if is_transient(key) {
            return self.item_key.as_deref() == Some(key);
        }
        let key_path = key.rfind('/').map(|i| &key[..=i]).unwrap_or("");
        self.path.starts_with(key_path)
    }
}

pub fn is_transient(key: &str) -> bool {
    key.starts_with(TRANSIENT_PREFIX)
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    value: StoredValue,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_seq: u64,
}

/// Working memory of one execution tree
pub struct ContextStore {
    run_id: String,
    threshold: usize,
    bulk: Arc<dyn BulkStore>,
    entries: RwLock<Entries>,
}

impl ContextStore {
    pub fn new(bulk: Arc<dyn BulkStore>, threshold: usize) -> Self {
        Self::with_run_id(bulk, threshold, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_run_id(bulk: Arc<dyn BulkStore>, threshold: usize, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            threshold,
            bulk,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Store `value` under `key`, compacting it if needed. Returns what was
    /// stored: the value itself below the threshold, a reference otherwise.
    pub async fn put(&self, key: &str, value: Value) -> Result<StoredValue, EngineError> {
        let stored = self.compact(key, value).await?;

        let mut entries = self.entries.write().await;
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.map.insert(
            key.to_string(),
            Entry {
                seq,
                value: stored.clone(),
            },
        );
        Ok(stored)
    }

    /// Offload `value` to bulk storage if it reaches the threshold. Does not
    /// record anything under `key`.
    pub async fn compact(&self, key: &str, value: Value) -> Result<StoredValue, EngineError> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| EngineError::Storage(format!("failed to serialize '{}': {}", key, e)))?;

        if bytes.len() < self.threshold {
            return Ok(StoredValue::Inline(value));
        }

        let id = self.reference_id(key, &bytes);
        let size_bytes = bytes.len();
        self.bulk.put(&id, bytes).await?;
        tracing::debug!(
            "Compacted '{}' ({} bytes) into reference {}",
            key,
            size_bytes,
            &id[..12]
        );

        Ok(StoredValue::Reference(DataReference {
            id,
            summary: summarize(&value),
            size_bytes,
        }))
    }

    fn reference_id(&self, key: &str, content: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.run_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(content);
        hasher.finalize().to_hex().to_string()
    }

    pub async fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries
            .read()
            .await
            .map
            .get(key)
            .map(|e| e.value.clone())
    }

    /// Value under `key` with any reference resolved
    pub async fn get_full(&self, key: &str) -> Result<Option<Value>, EngineError> {
        match self.get(key).await {
            Some(stored) => self.materialize(&stored).await.map(Some),
            None => Ok(None),
        }
    }

    /// Load an offloaded payload
    pub async fn resolve(&self, reference: &DataReference) -> Result<Value, EngineError> {
        let bytes = self
            .bulk
            .get(&reference.id)
            .await?
            .ok_or_else(|| EngineError::ReferenceNotFound(reference.id.clone()))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            EngineError::Storage(format!("corrupt payload for {}: {}", reference.id, e))
        })
    }

    pub async fn materialize(&self, stored: &StoredValue) -> Result<Value, EngineError> {
        match stored {
            StoredValue::Inline(v) => Ok(v.clone()),
            StoredValue::Reference(r) => self.resolve(r).await,
        }
    }

    pub async fn remove(&self, key: &str) -> Option<StoredValue> {
        self.entries.write().await.map.remove(key).map(|e| e.value)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.map.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut keys: Vec<(&u64, &String)> = entries.map.iter().map(|(k, e)| (&e.seq, k)).collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k.clone()).collect()
    }

    /// Non-transient entries visible from `scope`, newest first
    pub async fn visible_entries(&self, scope: &KeyScope) -> Vec<(String, StoredValue)> {
        let entries = self.entries.read().await;
        let mut visible: Vec<(u64, String, StoredValue)> = entries
            .map
            .iter()
            .filter(|(k, _)| !is_transient(k) && scope.sees(k))
            .map(|(k, e)| (e.seq, k.clone(), e.value.clone()))
            .collect();
        visible.sort_by(|a, b| b.0.cmp(&a.0));
        visible.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    /// The item the enclosing dendrite is working on
    pub async fn active_item(&self, scope: &KeyScope) -> Result<Option<Value>, EngineError> {
        match scope.item_key.as_deref() {
            Some(key) => self.get_full(key).await,
            None => Ok(None),
        }
    }

    /// Most recent visible list-shaped value
    pub async fn latest_list(
        &self,
        scope: &KeyScope,
    ) -> Result<Option<(String, Vec<Value>)>, EngineError> {
        for (key, stored) in self.visible_entries(scope).await {
            let candidate = match &stored {
                StoredValue::Inline(v) => as_list(v).is_some(),
                StoredValue::Reference(r) => {
                    r.summary["type"] == "list" || r.summary.get("list_field").is_some()
                }
            };
            if !candidate {
                continue;
            }
            let value = self.materialize(&stored).await?;
            if let Some(items) = as_list(&value) {
                if !items.is_empty() {
                    return Ok(Some((key, items.clone())));
                }
            }
        }
        Ok(None)
    }

    /// First value of a top-level field named `name`: the active item is
    /// searched first, then visible entries newest first.
    pub async fn find_field(&self, scope: &KeyScope, name: &str) -> Result<Option<Value>, EngineError> {
        if let Some(item) = self.active_item(scope).await? {
            if let Some(v) = item.get(name) {
                return Ok(Some(v.clone()));
            }
        }

        for (_, stored) in self.visible_entries(scope).await {
            let value = match &stored {
                StoredValue::Inline(v) => v.clone(),
                // The summary lists only the first keys, so any offloaded
                // map may hold the field
                StoredValue::Reference(r) if r.summary["type"] == "object" => self.resolve(r).await?,
                StoredValue::Reference(_) => continue,
            };
            if let Some(v) = value.get(name) {
                return Ok(Some(v.clone()));
            }
        }
        Ok(None)
    }

    /// Bounded data-structure preview of what `scope` can see, for prompts
    pub async fn preview(&self, scope: &KeyScope, max_chars: usize) -> String {
        let mut lines = Vec::new();
        if let Some(key) = scope.item_key.as_deref() {
            if let Some(stored) = self.get(key).await {
                lines.push(format!("current item: {}", stored.preview()));
            }
        }
        for (key, stored) in self.visible_entries(scope).await {
            lines.push(format!("{}: {}", key, stored.preview()));
        }

        let mut out = String::new();
        for line in lines {
            if out.len() + line.len() > max_chars {
                out.push_str("...");
                break;
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn serialized_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// `value` itself when it serializes within `max_bytes`, its structural
/// summary otherwise
pub fn bounded_view(value: &Value, max_bytes: usize) -> Value {
    if serialized_len(value) <= max_bytes {
        value.clone()
    } else {
        summarize(value)
    }
}

/// Name of the field holding the list inside a wrapper object
pub fn list_field(obj: &Map<String, Value>) -> Option<&str> {
    if let Some(name) = LIST_FIELDS
        .iter()
        .find(|f| obj.get(**f).is_some_and(Value::is_array))
    {
        return Some(name);
    }
    let mut arrays = obj.iter().filter(|(_, v)| v.is_array());
    match (arrays.next(), arrays.next()) {
        (Some((name, _)), None) => Some(name.as_str()),
        _ => None,
    }
}

/// The list a value carries: the value itself, or the list field of a
/// wrapper object
pub fn as_list(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(obj) => list_field(obj).and_then(|f| obj.get(f)).and_then(Value::as_array),
        _ => None,
    }
}

/// Put `items` back where [`as_list`] found the list
pub fn replace_list(value: &mut Value, items: Vec<Value>) {
    match value {
        Value::Object(obj) => {
            if let Some(field) = list_field(obj).map(String::from) {
                obj.insert(field, Value::Array(items));
            }
        }
        other => *other = Value::Array(items),
    }
}

/// Structural summary of a value
pub fn summarize(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut fields: Vec<String> = Vec::new();
            for item in items.iter().take(SUMMARY_SAMPLES * 2) {
                if let Value::Object(obj) = item {
                    for key in obj.keys() {
                        if fields.len() < SUMMARY_MAX_FIELDS && !fields.contains(key) {
                            fields.push(key.clone());
                        }
                    }
                }
            }
            let samples: Vec<Value> = items.iter().take(SUMMARY_SAMPLES).map(sample).collect();
            json!({
                "type": "list",
                "count": items.len(),
                "element_type": items.first().map(type_name).unwrap_or("unknown"),
                "fields": fields,
                "samples": samples,
            })
        }
        Value::Object(obj) => {
            let mut summary = json!({
                "type": "object",
                "key_count": obj.len(),
                "keys": obj.keys().take(SUMMARY_MAX_KEYS).collect::<Vec<_>>(),
            });
            if let Some(field) = list_field(obj) {
                summary["list_field"] = json!(field);
                summary["list_count"] = json!(obj.get(field).and_then(Value::as_array).map_or(0, Vec::len));
            }
            summary
        }
        Value::String(s) => json!({
            "type": "string",
            "length": s.len(),
            "preview": s.chars().take(200).collect::<String>(),
        }),
        other => json!({ "type": type_name(other) }),
    }
}

/// A sample item, trimmed to important fields when large
fn sample(item: &Value) -> Value {
    if serialized_len(item) <= SAMPLE_MAX_BYTES {
        return item.clone();
    }
    match item {
        Value::Object(obj) => {
            let kept: Map<String, Value> = obj
                .iter()
                .filter(|(k, _)| IMPORTANT_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(kept)
        }
        other => json!({ "type": type_name(other) }),
    }
}
