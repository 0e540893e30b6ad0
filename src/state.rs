//! Session state shared by the language server handlers

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value as JsonValue;
use tower_lsp::lsp_types::{Diagnostic, Hover, Position, Url};
use tracing::{debug, error, info};

use crate::commands::{AggIdHandler, CommandError, CommandRegistry};
use crate::diagnostics;
use crate::hover::{self, HoverTarget};
use crate::index::{CacheKey, DocumentIndex, IndexCache};
use crate::parser::ParseError;
use crate::schema::{NamespaceCatalog, RegistryError, SchemaDocCache, SchemaKey, SchemaRegistry};

/// An open document at a given revision
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    pub version: i32,
}

/// Everything one editor session knows: open documents, the index of the
/// latest revision looked at, rendered schemas and command handlers
pub struct SessionState {
    documents: RwLock<HashMap<Url, Document>>,
    index: Mutex<IndexCache>,
    schema_docs: SchemaDocCache,
    registry: RwLock<Arc<dyn SchemaRegistry>>,
    commands: RwLock<CommandRegistry>,
    catalog: RwLock<Option<NamespaceCatalog>>,
}

impl SessionState {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            index: Mutex::new(IndexCache::new()),
            schema_docs: SchemaDocCache::new(),
            registry: RwLock::new(registry),
            commands: RwLock::new(CommandRegistry::new()),
            catalog: RwLock::new(None),
        }
    }

    pub fn set_registry(&self, registry: Arc<dyn SchemaRegistry>) {
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = registry;
    }

    fn registry(&self) -> Arc<dyn SchemaRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Store the full text of `uri` at `version`, replacing any older revision
    pub fn update_document(&self, uri: Url, text: String, version: i32) {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents.insert(uri, Document { text, version });
    }

    pub fn close_document(&self, uri: &Url) {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents.remove(uri);
    }

    pub fn document(&self, uri: &Url) -> Option<Document> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents.get(uri).cloned()
    }

    /// Index of the current revision of `uri`, or `None` if it is not open
    pub fn index_for(&self, uri: &Url) -> Option<Result<Arc<DocumentIndex>, ParseError>> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let document = documents.get(uri)?;
        let key = CacheKey::new(uri.clone(), document.version);

        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        Some(index.get_or_build(&key, &document.text))
    }

    /// Number of parses performed by the index cache
    pub fn parse_count(&self) -> u64 {
        self.index.lock().unwrap_or_else(|e| e.into_inner()).parse_count()
    }

    /// Hover for `position` in `uri`. Fetch and parse failures produce no hover.
    pub async fn hover(&self, uri: &Url, position: Position) -> Option<Hover> {
        let index = match self.index_for(uri)? {
            Ok(index) => index,
            Err(e) => {
                debug!("No hover for unparsable {}: {}", uri, e);
                return None;
            }
        };

        let record = match hover::resolve_target(&index, position)? {
            HoverTarget::AggregateId(token) => return Some(hover::aggregate_id_hover(token)),
            HoverTarget::Payload(record) => record.clone(),
        };

        let key = SchemaKey::new(&record.namespace, &record.event_type, record.version);
        let registry = self.registry();
        match self.schema_docs.get_or_fetch(&key, registry.as_ref()).await {
            Ok(doc) => Some(hover::schema_hover(&record, doc)),
            Err(e) => {
                error!("Failed to fetch schema {}: {}", key, e);
                None
            }
        }
    }

    /// Diagnostics for the current revision of `uri`, or `None` if it is not open
    pub fn diagnostics(&self, uri: &Url) -> Option<Vec<Diagnostic>> {
        let index = match self.index_for(uri)? {
            Ok(index) => index,
            Err(e) => return Some(vec![diagnostics::parse_error(&e)]),
        };

        let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        Some(match catalog.as_ref() {
            Some(catalog) => diagnostics::unknown_headers(&index, catalog),
            None => Vec::new(),
        })
    }

    /// Fetch the namespace listing from the registry and keep it for the session
    pub async fn load_catalog(&self) -> Result<usize, RegistryError> {
        let registry = self.registry();
        let catalog = registry.fetch_namespaces().await?;
        let count = catalog.namespaces.len();
        info!("Loaded {} namespaces from the schema registry", count);

        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Some(catalog);
        Ok(count)
    }

    /// JSON Schema for header documents, once the catalog is loaded
    pub fn header_schema(&self) -> Option<JsonValue> {
        let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        catalog.as_ref().map(NamespaceCatalog::header_schema)
    }

    pub fn register_focus_handler(&self, handler: Arc<dyn AggIdHandler>) {
        let mut commands = self.commands.write().unwrap_or_else(|e| e.into_inner());
        commands.register_focus_handler(handler);
    }

    pub fn register_merge_handler(&self, handler: Arc<dyn AggIdHandler>) {
        let mut commands = self.commands.write().unwrap_or_else(|e| e.into_inner());
        commands.register_merge_handler(handler);
    }

    pub async fn execute_command(
        &self,
        command: &str,
        arguments: &[JsonValue],
    ) -> Result<(), CommandError> {
        let commands = self.commands.read().unwrap_or_else(|e| e.into_inner()).clone();
        commands.dispatch(command, arguments).await
    }

    /// Drop cached indexes and rendered schemas
    pub fn reset(&self) {
        self.index.lock().unwrap_or_else(|e| e.into_inner()).reset();
        self.schema_docs.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower_lsp::lsp_types::{HoverContents, MarkupContent};

    struct StaticRegistry {
        calls: AtomicUsize,
    }

    #[tower_lsp::async_trait]
    impl SchemaRegistry for StaticRegistry {
        async fn fetch_schema(&self, key: &SchemaKey) -> Result<JsonValue, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match key.event_type.as_str() {
                "Created" => Ok(json!({
                    "title": "Order created",
                    "properties": { "id": { "type": "integer", "title": "Identifier" } }
                })),
                _ => Err(RegistryError::Status {
                    status: 500,
                    message: "registry down".to_string(),
                }),
            }
        }

        async fn fetch_namespaces(&self) -> Result<NamespaceCatalog, RegistryError> {
            Ok(serde_json::from_value(json!({
                "orders": { "title": "Orders", "types": [{ "name": "Created", "version": 1 }] }
            }))?)
        }
    }

    fn session() -> (SessionState, Arc<StaticRegistry>) {
        let registry = Arc::new(StaticRegistry {
            calls: AtomicUsize::new(0),
        });
        (SessionState::new(registry.clone()), registry)
    }

    fn uri() -> Url {
        Url::parse("file:///tmp/query.json").unwrap()
    }

    fn text_of(hover: &Hover) -> &str {
        match &hover.contents {
            HoverContents::Markup(MarkupContent { value, .. }) => value,
            other => panic!("unexpected hover contents: {:?}", other),
        }
    }

    const EVENT: &str =
        r#"{"header": {"ns":"orders","type":"Created","version":1}, "payload": {"id": 5}}"#;

    #[tokio::test]
    async fn payload_hover_renders_schema() {
        let (state, registry) = session();
        state.update_document(uri(), EVENT.to_string(), 1);

        // column 71 is inside `"id"`
        let hover = state.hover(&uri(), Position::new(0, 71)).await.unwrap();
        let text = text_of(&hover);
        assert!(text.contains("id"));
        assert!(text.contains("Identifier"));

        state.hover(&uri(), Position::new(0, 71)).await.unwrap();
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.parse_count(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_yields_no_hover() {
        let (state, _registry) = session();
        let failing = EVENT.replace("Created", "Cancelled");
        state.update_document(uri(), failing, 1);
        assert!(state.hover(&uri(), Position::new(0, 73)).await.is_none());

        state.update_document(uri(), EVENT.to_string(), 2);
        assert!(state.hover(&uri(), Position::new(0, 71)).await.is_some());
    }

    #[tokio::test]
    async fn new_revision_rebuilds_and_broken_text_yields_nothing() {
        let (state, _registry) = session();
        state.update_document(uri(), r#"{"aggIds": ["a","b","c"]}"#.to_string(), 1);
        let hover = state.hover(&uri(), Position::new(0, 17)).await.unwrap();
        assert!(text_of(&hover).contains("%22b%22"));

        state.update_document(uri(), r#"{"aggIds": ["a","b","c""#.to_string(), 2);
        assert!(state.hover(&uri(), Position::new(0, 17)).await.is_none());
        assert_eq!(state.parse_count(), 2);

        let diags = state.diagnostics(&uri()).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(state.parse_count(), 2);
    }

    #[tokio::test]
    async fn unknown_documents_have_no_hover() {
        let (state, _registry) = session();
        assert!(state.hover(&uri(), Position::new(0, 0)).await.is_none());
        assert!(state.diagnostics(&uri()).is_none());

        state.update_document(uri(), "{}".to_string(), 1);
        state.close_document(&uri());
        assert!(state.document(&uri()).is_none());
    }

    #[tokio::test]
    async fn catalog_enables_header_checks() {
        let (state, _registry) = session();
        let unknown = EVENT.replace(r#""version":1"#, r#""version":2"#);
        state.update_document(uri(), unknown, 1);

        assert!(state.header_schema().is_none());
        assert!(state.diagnostics(&uri()).unwrap().is_empty());

        assert_eq!(state.load_catalog().await.unwrap(), 1);
        assert!(state.header_schema().is_some());
        let diags = state.diagnostics(&uri()).unwrap();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("no version 2"));
    }

    #[tokio::test]
    async fn commands_without_handlers_fail_loudly() {
        let (state, _registry) = session();
        let args = [json!({ "aggId": "a" })];
        assert_eq!(
            state.execute_command("eventdoc.focusAggId", &args).await,
            Err(CommandError::Unhandled("eventdoc.focusAggId".to_string()))
        );
    }
}
