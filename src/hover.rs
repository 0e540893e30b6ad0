//! Hover information provider

use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind, Position, Range};

use crate::commands::AggIdCommand;
use crate::index::{AggregateIdToken, DocumentIndex, PayloadRecord};

/// What the cursor rests on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HoverTarget<'a> {
    AggregateId(&'a AggregateIdToken),
    Payload(&'a PayloadRecord),
}

/// Find the hover target at `position`. Aggregate ids take precedence over
/// payloads; within each list the first match in document order wins.
pub fn resolve_target(index: &DocumentIndex, position: Position) -> Option<HoverTarget<'_>> {
    if let Some(token) = index
        .aggregate_ids
        .iter()
        .find(|t| contains_on_line(&t.range, position))
    {
        return Some(HoverTarget::AggregateId(token));
    }

    index
        .payloads
        .iter()
        .find(|p| contains(&p.payload_range, position))
        .map(HoverTarget::Payload)
}

/// Containment for ranges that sit on a single line, both ends inclusive
fn contains_on_line(range: &Range, position: Position) -> bool {
    range.start.line == range.end.line
        && range.start.line == position.line
        && range.start.character <= position.character
        && position.character <= range.end.character
}

/// Lexicographic `(line, character)` containment, both ends inclusive
fn contains(range: &Range, position: Position) -> bool {
    let at = (position.line, position.character);
    (range.start.line, range.start.character) <= at && at <= (range.end.line, range.end.character)
}

fn markdown_hover(value: String, range: Range) -> Hover {
    Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range: Some(range),
    }
}

/// Hover offering the focus and merge commands for an aggregate id
pub fn aggregate_id_hover(token: &AggregateIdToken) -> Hover {
    let links: Vec<String> = AggIdCommand::ALL
        .iter()
        .map(|command| command.link(&token.value))
        .collect();
    let value = format!(
        "**Aggregate** `{}`\n\n{}",
        token.value.replace('`', "'"),
        links.join(" | ")
    );
    markdown_hover(value, token.range)
}

/// Hover showing the rendered schema of a payload
pub fn schema_hover(record: &PayloadRecord, documentation: String) -> Hover {
    markdown_hover(documentation, record.payload_range)
}
