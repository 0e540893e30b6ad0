//! JSON (with comments) parsing with position information

use thiserror::Error;
use tower_lsp::lsp_types::{Position, Range};
use tree_sitter::{Parser, Tree};

pub use tree_sitter::Node;

/// Nodes whose text is checked as a whole rather than through children
const ATOMIC_KINDS: [&str; 6] = ["string", "number", "comment", "true", "false", "null"];

/// Errors produced while parsing a document
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("failed to load the JSON grammar: {0}")]
    Language(String),
    #[error("parser produced no tree")]
    Aborted,
    #[error("document is empty")]
    Empty,
    #[error("syntax error at {}:{}", .at.line, .at.character)]
    Syntax { at: Position },
    #[error("missing {expected} at {}:{}", .at.line, .at.character)]
    Missing { expected: String, at: Position },
    #[error("invalid whitespace {found:?} at {}:{}", .at.line, .at.character)]
    InvalidWhitespace { found: char, at: Position },
    #[error("invalid string at {}:{}", .at.line, .at.character)]
    InvalidString { at: Position },
    #[error("invalid number {raw:?} at {}:{}", .at.line, .at.character)]
    InvalidNumber { raw: String, at: Position },
    #[error("trailing content at {}:{}", .at.line, .at.character)]
    TrailingContent { at: Position },
}

impl ParseError {
    /// Position the error was detected at; errors without one report the start
    pub fn position(&self) -> Position {
        match self {
            ParseError::Language(_) | ParseError::Aborted | ParseError::Empty => {
                Position::default()
            }
            ParseError::Syntax { at }
            | ParseError::Missing { at, .. }
            | ParseError::InvalidWhitespace { at, .. }
            | ParseError::InvalidString { at }
            | ParseError::InvalidNumber { at, .. }
            | ParseError::TrailingContent { at } => *at,
        }
    }
}

/// Byte offsets where each line starts. `\n`, `\r\n` and a lone `\r` all
/// end a line, as in LSP.
#[derive(Debug, Clone)]
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut starts = vec![0];
        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b'\n' => starts.push(i + 1),
                b'\r' if bytes.get(i + 1) != Some(&b'\n') => starts.push(i + 1),
                _ => {}
            }
        }
        Self { starts }
    }

    /// LSP position (UTF-16 columns) of a byte offset into `text`
    fn position(&self, text: &str, offset: usize) -> Position {
        let line = self.starts.partition_point(|&start| start <= offset).saturating_sub(1);
        let start = self.starts[line];
        let character = text
            .get(start..offset)
            .map(|prefix| prefix.encode_utf16().count())
            .unwrap_or(0);
        Position::new(line as u32, character as u32)
    }
}

/// A successfully parsed document: the tree-sitter tree plus what is needed
/// to read values and map nodes back to editor positions
pub struct SyntaxTree<'a> {
    /// Full document text as the editor sees it
    text: &'a str,
    /// Length of a leading byte order mark, which the grammar does not accept
    bom: usize,
    tree: Tree,
    lines: LineIndex,
}

/// Parse a complete document
pub fn parse(text: &str) -> Result<SyntaxTree<'_>, ParseError> {
    let bom = if text.starts_with('\u{feff}') { '\u{feff}'.len_utf8() } else { 0 };

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_json::LANGUAGE.into())
        .map_err(|e| ParseError::Language(e.to_string()))?;
    let tree = parser.parse(&text[bom..], None).ok_or(ParseError::Aborted)?;

    let syntax = SyntaxTree {
        text,
        bom,
        tree,
        lines: LineIndex::new(text),
    };
    syntax.validate()?;
    Ok(syntax)
}

impl<'a> SyntaxTree<'a> {
    /// Text the grammar was run on, without the byte order mark
    fn source(&self) -> &'a str {
        &self.text[self.bom..]
    }

    fn position(&self, byte: usize) -> Position {
        self.lines.position(self.text, self.bom + byte)
    }

    /// The single top-level value
    pub fn root(&self) -> Node<'_> {
        let document = self.tree.root_node();
        top_level_values(document)
            .into_iter()
            .next()
            .unwrap_or(document)
    }

    /// Editor range covered by `node`; string nodes include their quotes
    pub fn range(&self, node: Node<'_>) -> Range {
        Range::new(self.position(node.start_byte()), self.position(node.end_byte()))
    }

    pub fn text_of(&self, node: Node<'_>) -> &'a str {
        self.source().get(node.byte_range()).unwrap_or("")
    }

    /// Decoded value of a string node
    pub fn as_str(&self, node: Node<'_>) -> Option<String> {
        if node.kind() != "string" {
            return None;
        }
        serde_json::from_str(self.text_of(node)).ok()
    }

    /// Integer value of a number node; fractional or out-of-range numbers yield `None`
    pub fn as_i64(&self, node: Node<'_>) -> Option<i64> {
        if node.kind() != "number" {
            return None;
        }
        self.text_of(node).parse().ok()
    }

    /// Members of an object node as `(key, value)` in document order
    pub fn properties<'t>(&self, node: Node<'t>) -> Option<Vec<(String, Node<'t>)>> {
        if node.kind() != "object" {
            return None;
        }
        let mut cursor = node.walk();
        let props = node
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "pair")
            .filter_map(|pair| {
                let key = self.as_str(pair.child_by_field_name("key")?)?;
                let value = pair.child_by_field_name("value")?;
                Some((key, value))
            })
            .collect();
        Some(props)
    }

    /// Values of an array node in document order
    pub fn elements<'t>(&self, node: Node<'t>) -> Option<Vec<Node<'t>>> {
        if node.kind() != "array" {
            return None;
        }
        let mut cursor = node.walk();
        let items = node
            .named_children(&mut cursor)
            .filter(|child| child.kind() != "comment")
            .collect();
        Some(items)
    }

    /// Direct member of an object node by name (first one wins on duplicates)
    pub fn member<'t>(&self, node: Node<'t>, key: &str) -> Option<Node<'t>> {
        self.properties(node)?
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Reject anything tree-sitter recovered from or accepted beyond strict
    /// JSON plus comments
    fn validate(&self) -> Result<(), ParseError> {
        let document = self.tree.root_node();

        if document.has_error() {
            return Err(self.first_error(document));
        }

        let values = top_level_values(document);
        match values.as_slice() {
            [] => return Err(ParseError::Empty),
            [_] => {}
            [_, extra, ..] => {
                return Err(ParseError::TrailingContent {
                    at: self.position(extra.start_byte()),
                })
            }
        }

        let mut previous_end = 0;
        for token in self.tokens(document)? {
            self.check_gap(previous_end, token.start_byte())?;
            previous_end = token.end_byte();

            let at = self.position(token.start_byte());
            match token.kind() {
                "string" if self.as_str(token).is_none() => {
                    return Err(ParseError::InvalidString { at });
                }
                "number" if serde_json::from_str::<serde_json::Number>(self.text_of(token)).is_err() => {
                    return Err(ParseError::InvalidNumber {
                        raw: self.text_of(token).to_string(),
                        at,
                    });
                }
                _ => {}
            }
        }
        self.check_gap(previous_end, self.source().len())
    }

    /// Pre-order search for the first error or missing node
    fn first_error(&self, document: Node<'_>) -> ParseError {
        let mut stack = vec![document];
        while let Some(node) = stack.pop() {
            let at = self.position(node.start_byte());
            if node.is_missing() {
                return ParseError::Missing {
                    expected: node.kind().to_string(),
                    at,
                };
            }
            if node.is_error() {
                return ParseError::Syntax { at };
            }
            push_children_reversed(node, &mut stack);
        }
        ParseError::Syntax {
            at: self.position(0),
        }
    }

    /// Tokens in document order, with strings and numbers kept whole
    fn tokens<'t>(&self, document: Node<'t>) -> Result<Vec<Node<'t>>, ParseError> {
        let mut tokens = Vec::new();
        let mut stack = Vec::new();
        push_children_reversed(document, &mut stack);

        while let Some(node) = stack.pop() {
            if node.kind() == "pair" {
                if let Some(key) = node.child_by_field_name("key") {
                    if key.kind() != "string" {
                        return Err(ParseError::Syntax {
                            at: self.position(key.start_byte()),
                        });
                    }
                }
            }

            if ATOMIC_KINDS.contains(&node.kind()) || node.child_count() == 0 {
                tokens.push(node);
            } else {
                push_children_reversed(node, &mut stack);
            }
        }
        Ok(tokens)
    }

    /// Only JSON whitespace may separate tokens
    fn check_gap(&self, start: usize, end: usize) -> Result<(), ParseError> {
        let gap = self.source().get(start..end).unwrap_or("");
        match gap
            .char_indices()
            .find(|&(_, c)| !matches!(c, ' ' | '\t' | '\n' | '\r'))
        {
            Some((offset, found)) => Err(ParseError::InvalidWhitespace {
                found,
                at: self.position(start + offset),
            }),
            None => Ok(()),
        }
    }
}

fn top_level_values(document: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = document.walk();
    document
        .named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

fn push_children_reversed<'t>(node: Node<'t>, stack: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    stack.extend(children.into_iter().rev());
}

/// Receives every value node of a tree during [`walk`]
pub trait Visitor {
    /// Called once per value node, parents before children. `parent` is the
    /// enclosing object or array; `key` is the member name when the node is
    /// the value of an object property.
    fn enter_node(
        &mut self,
        tree: &SyntaxTree<'_>,
        node: Node<'_>,
        parent: Option<Node<'_>>,
        key: Option<&str>,
    );
}

/// Pre-order traversal of the values of `tree`
pub fn walk<V: Visitor>(tree: &SyntaxTree<'_>, visitor: &mut V) {
    let mut stack: Vec<(Node<'_>, Option<Node<'_>>, Option<String>)> =
        vec![(tree.root(), None, None)];

    while let Some((node, parent, key)) = stack.pop() {
        visitor.enter_node(tree, node, parent, key.as_deref());

        let children: Vec<(Node<'_>, Option<String>)> = if let Some(props) = tree.properties(node) {
            props.into_iter().map(|(key, value)| (value, Some(key))).collect()
        } else if let Some(items) = tree.elements(node) {
            items.into_iter().map(|item| (item, None)).collect()
        } else {
            continue;
        };

        for (child, key) in children.into_iter().rev() {
            stack.push((child, Some(node), key));
        }
    }
}
