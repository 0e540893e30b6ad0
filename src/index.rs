//! Position index of aggregate ids and header/payload records

use std::sync::Arc;

use tower_lsp::lsp_types::{Range, Url};
use tracing::{debug, warn};

use crate::parser::{self, Node, ParseError, SyntaxTree, Visitor};

/// Member name whose array value lists aggregate ids
const AGG_IDS_KEY: &str = "aggIds";

/// One string literal found inside an `aggIds` array
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateIdToken {
    pub value: String,
    /// Range of the string literal itself, quotes included
    pub range: Range,
}

/// One `{header, payload}` object with a complete header
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadRecord {
    pub namespace: String,
    pub event_type: String,
    pub version: i64,
    pub header_range: Range,
    pub payload_range: Range,
}

/// Facts extracted from one revision of a document, in document order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentIndex {
    pub aggregate_ids: Vec<AggregateIdToken>,
    pub payloads: Vec<PayloadRecord>,
}

/// Identifies the exact document revision an index was built from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub uri: Url,
    pub version: i32,
}

impl CacheKey {
    pub fn new(uri: Url, version: i32) -> Self {
        Self { uri, version }
    }
}

/// Parse `text` and collect its aggregate ids and payload records
pub fn build_index(text: &str) -> Result<DocumentIndex, ParseError> {
    let tree = parser::parse(text)?;
    let mut collector = Collector::default();
    parser::walk(&tree, &mut collector);
    Ok(collector.index)
}

#[derive(Default)]
struct Collector {
    index: DocumentIndex,
}

impl Visitor for Collector {
    fn enter_node(
        &mut self,
        tree: &SyntaxTree<'_>,
        node: Node<'_>,
        _parent: Option<Node<'_>>,
        key: Option<&str>,
    ) {
        if key == Some(AGG_IDS_KEY) {
            if let Some(items) = tree.elements(node) {
                self.index
                    .aggregate_ids
                    .extend(items.into_iter().filter_map(|item| {
                        tree.as_str(item).map(|value| AggregateIdToken {
                            value,
                            range: tree.range(item),
                        })
                    }));
            }
        }

        if let Some(record) = payload_record(tree, node) {
            self.index.payloads.push(record);
        }
    }
}

/// Recognize an object with exactly the members `header` and `payload`
fn payload_record(tree: &SyntaxTree<'_>, node: Node<'_>) -> Option<PayloadRecord> {
    let props = tree.properties(node)?;
    if props.len() != 2 {
        return None;
    }

    let header = tree.member(node, "header")?;
    let payload = tree.member(node, "payload")?;

    Some(PayloadRecord {
        namespace: tree.as_str(tree.member(header, "ns")?)?,
        event_type: tree.as_str(tree.member(header, "type")?)?,
        version: tree.as_i64(tree.member(header, "version")?)?,
        header_range: tree.range(header),
        payload_range: tree.range(payload),
    })
}

/// Single-slot cache holding the index of the most recently seen revision
#[derive(Debug, Default)]
pub struct IndexCache {
    slot: Option<(CacheKey, Result<Arc<DocumentIndex>, ParseError>)>,
    parses: u64,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for the revision `key`, rebuilding from `text` when the cached
    /// revision differs. A revision that fails to parse keeps failing until
    /// the key changes; the previous index is dropped either way.
    pub fn get_or_build(
        &mut self,
        key: &CacheKey,
        text: &str,
    ) -> Result<Arc<DocumentIndex>, ParseError> {
        if let Some((cached_key, index)) = &self.slot {
            if cached_key == key {
                return index.clone();
            }
        }

        self.parses += 1;
        let index = match build_index(text) {
            Ok(index) => {
                debug!(
                    "Indexed {} v{}: {} aggregate ids, {} payloads",
                    key.uri,
                    key.version,
                    index.aggregate_ids.len(),
                    index.payloads.len()
                );
                Ok(Arc::new(index))
            }
            Err(e) => {
                warn!("Failed to index {} v{}: {}", key.uri, key.version, e);
                Err(e)
            }
        };

        self.slot = Some((key.clone(), index.clone()));
        index
    }

    /// Number of times a document has been parsed by this cache
    pub fn parse_count(&self) -> u64 {
        self.parses
    }

    pub fn reset(&mut self) {
        self.slot = None;
        self.parses = 0;
    }
}
