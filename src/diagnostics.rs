//! Validation and diagnostics

use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};

use crate::index::DocumentIndex;
use crate::parser::ParseError;
use crate::schema::{HeaderCheck, NamespaceCatalog, SchemaKey};

const SOURCE: &str = "eventdoc-ls";

fn diagnostic(range: Range, severity: DiagnosticSeverity, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        code: None,
        code_description: None,
        source: Some(SOURCE.to_string()),
        message,
        related_information: None,
        tags: None,
        data: None,
    }
}

/// Diagnostic for a document that does not parse
pub fn parse_error(error: &ParseError) -> Diagnostic {
    let at = error.position();
    let range = Range {
        start: at,
        end: Position::new(at.line, at.character + 1),
    };
    diagnostic(range, DiagnosticSeverity::ERROR, error.to_string())
}

/// Warnings for payload headers the registry does not know
pub fn unknown_headers(index: &DocumentIndex, catalog: &NamespaceCatalog) -> Vec<Diagnostic> {
    index
        .payloads
        .iter()
        .filter_map(|record| {
            let key = SchemaKey::new(&record.namespace, &record.event_type, record.version);
            let message = match catalog.check(&key) {
                HeaderCheck::Known => return None,
                HeaderCheck::UnknownNamespace => {
                    format!("Unknown namespace `{}`", key.namespace)
                }
                HeaderCheck::UnknownType => format!(
                    "Namespace `{}` has no event type `{}`",
                    key.namespace, key.event_type
                ),
                HeaderCheck::UnknownVersion { known } => format!(
                    "`{}/{}` has no version {} (known: {})",
                    key.namespace,
                    key.event_type,
                    key.version,
                    known
                        .iter()
                        .map(i64::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            Some(diagnostic(record.header_range, DiagnosticSeverity::WARNING, message))
        })
        .collect()
}
