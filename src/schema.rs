//! Schema registry access and schema documentation

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

/// Identifies one published schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub namespace: String,
    pub event_type: String,
    pub version: i64,
}

impl SchemaKey {
    pub fn new(namespace: impl Into<String>, event_type: impl Into<String>, version: i64) -> Self {
        Self {
            namespace: namespace.into(),
            event_type: event_type.into(),
            version,
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.namespace, self.event_type, self.version)
    }
}

/// Errors talking to the schema registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid registry url: {0}")]
    Url(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One event type published under a namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypeVersion {
    pub name: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamespaceEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub types: Vec<TypeVersion>,
}

/// Namespaces known to the registry, keyed by namespace name
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct NamespaceCatalog {
    pub namespaces: BTreeMap<String, NamespaceEntry>,
}

/// Outcome of checking a header against the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderCheck {
    Known,
    UnknownNamespace,
    UnknownType,
    UnknownVersion { known: Vec<i64> },
}

impl NamespaceCatalog {
    pub fn check(&self, key: &SchemaKey) -> HeaderCheck {
        let Some(entry) = self.namespaces.get(&key.namespace) else {
            return HeaderCheck::UnknownNamespace;
        };

        let mut known: Vec<i64> = entry
            .types
            .iter()
            .filter(|t| t.name == key.event_type)
            .map(|t| t.version)
            .collect();

        if known.is_empty() {
            HeaderCheck::UnknownType
        } else if known.contains(&key.version) {
            HeaderCheck::Known
        } else {
            known.sort_unstable();
            HeaderCheck::UnknownVersion { known }
        }
    }

    /// JSON Schema for standalone header documents
    pub fn header_schema(&self) -> JsonValue {
        let variants: Vec<JsonValue> = self
            .namespaces
            .iter()
            .map(|(ns, entry)| {
                let mut by_type: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
                for t in &entry.types {
                    by_type.entry(t.name.as_str()).or_default().push(t.version);
                }

                let types: Vec<JsonValue> = by_type
                    .into_iter()
                    .map(|(name, versions)| {
                        json!({
                            "properties": {
                                "type": { "const": name },
                                "version": { "enum": versions },
                            }
                        })
                    })
                    .collect();

                let mut variant = json!({
                    "properties": { "ns": { "const": ns } },
                    "oneOf": types,
                });
                if let Some(title) = &entry.title {
                    variant["title"] = json!(title);
                }
                variant
            })
            .collect();

        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "Event header",
            "type": "object",
            "required": ["ns", "type", "version"],
            "properties": {
                "ns": { "type": "string", "enum": self.namespaces.keys().collect::<Vec<_>>() },
                "type": { "type": "string" },
                "version": { "type": "integer" },
            },
            "oneOf": variants,
        })
    }
}

/// Source of schemas and namespace listings
#[tower_lsp::async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn fetch_schema(&self, key: &SchemaKey) -> Result<JsonValue, RegistryError>;

    async fn fetch_namespaces(&self) -> Result<NamespaceCatalog, RegistryError>;
}

/// Schema registry reached over HTTP
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRegistry {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RegistryError> {
        Ok(self.base_url.join(path)?)
    }

    async fn get_json(&self, url: Url) -> Result<JsonValue, RegistryError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Pull the human-readable message out of an error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| {
            ["error", "message"]
                .iter()
                .find_map(|field| v.get(*field).and_then(JsonValue::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[tower_lsp::async_trait]
impl SchemaRegistry for HttpRegistry {
    async fn fetch_schema(&self, key: &SchemaKey) -> Result<JsonValue, RegistryError> {
        let mut url = self.endpoint("api/registry/schema")?;
        url.query_pairs_mut()
            .append_pair("namespace", &key.namespace)
            .append_pair("type", &key.event_type)
            .append_pair("version", &key.version.to_string());
        self.get_json(url).await
    }

    async fn fetch_namespaces(&self) -> Result<NamespaceCatalog, RegistryError> {
        let mut url = self.endpoint("api/registry/namespaces")?;
        url.query_pairs_mut().append_pair("with-types", "true");
        let value = self.get_json(url).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Rendered schema documentation, kept for the whole session.
///
/// Published schema versions never change, so entries are never evicted.
/// Concurrent requests for one key share a single fetch; failed fetches
/// leave no entry behind.
#[derive(Default)]
pub struct SchemaDocCache {
    entries: Mutex<HashMap<SchemaKey, Arc<OnceCell<String>>>>,
}

impl SchemaDocCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch(
        &self,
        key: &SchemaKey,
        registry: &dyn SchemaRegistry,
    ) -> Result<String, RegistryError> {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.entry(key.clone()).or_default().clone()
        };

        let doc = cell
            .get_or_try_init(|| async {
                info!("Fetching schema {}", key);
                let schema = registry.fetch_schema(key).await?;
                Ok::<_, RegistryError>(render_schema_doc(key, &schema))
            })
            .await?;
        Ok(doc.clone())
    }

    /// Number of schemas rendered so far
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Render a schema as a Markdown property list
pub fn render_schema_doc(key: &SchemaKey, schema: &JsonValue) -> String {
    let title = schema
        .get("title")
        .and_then(JsonValue::as_str)
        .unwrap_or(&key.event_type);

    let mut out = format!(
        "### {}\n\n`{}` / `{}` v{}\n",
        title, key.namespace, key.event_type, key.version
    );
    if let Some(description) = schema.get("description").and_then(JsonValue::as_str) {
        out.push_str(&format!("\n{}\n", description));
    }

    let mut lines = Vec::new();
    render_properties(schema, 0, &mut lines);
    if !lines.is_empty() {
        out.push('\n');
        out.push_str(&lines.join("\n"));
        out.push('\n');
    }
    out
}

/// Nested objects are expanded this many levels below the top
const MAX_EXPANSION: usize = 1;

/// The object whose `properties` describe `schema`'s members, looking
/// through `items` for arrays
fn property_holder(schema: &JsonValue) -> Option<&JsonValue> {
    if schema.get("properties").is_some() {
        Some(schema)
    } else {
        schema.get("items").filter(|items| items.get("properties").is_some())
    }
}

fn render_properties(schema: &JsonValue, depth: usize, lines: &mut Vec<String>) {
    let Some(holder) = property_holder(schema) else {
        return;
    };
    let Some(properties) = holder.get("properties").and_then(JsonValue::as_object) else {
        return;
    };
    let required: Vec<&str> = holder
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|r| r.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default();

    let indent = "  ".repeat(depth);
    for (name, prop) in properties {
        let mut line = format!("{}- **{}**", indent, name);
        if let Some(ty) = type_label(prop) {
            line.push_str(&format!(" `{}`", ty));
        }
        if required.contains(&name.as_str()) {
            line.push_str(" *(required)*");
        }

        let text: Vec<&str> = ["title", "description"]
            .iter()
            .filter_map(|field| prop.get(*field).and_then(JsonValue::as_str))
            .collect();
        if !text.is_empty() {
            line.push_str(": ");
            line.push_str(&text.join(". "));
        }
        lines.push(line);

        if depth < MAX_EXPANSION && matches!(type_label(prop).as_deref(), Some("object" | "array")) {
            render_properties(prop, depth + 1, lines);
        }
    }
}

fn type_label(prop: &JsonValue) -> Option<String> {
    match prop.get("type")? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Array(types) => Some(
            types
                .iter()
                .filter_map(JsonValue::as_str)
                .collect::<Vec<_>>()
                .join(" | "),
        ),
        _ => None,
    }
}
