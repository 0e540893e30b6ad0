//! Aggregate-id commands offered from hover links

use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::Client;
use tracing::{debug, warn};

/// Escapes everything except unreserved URI characters
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Argument passed to both commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggIdArgs {
    #[serde(rename = "aggId")]
    pub agg_id: String,
}

/// The two actions a hovered aggregate id offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggIdCommand {
    /// Narrow the current view to a single aggregate
    Focus,
    /// Add the aggregate to the current filter
    Merge,
}

impl AggIdCommand {
    pub const ALL: [AggIdCommand; 2] = [AggIdCommand::Focus, AggIdCommand::Merge];

    pub fn name(self) -> &'static str {
        match self {
            AggIdCommand::Focus => "eventdoc.focusAggId",
            AggIdCommand::Merge => "eventdoc.mergeAggId",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn title(self) -> &'static str {
        match self {
            AggIdCommand::Focus => "Focus",
            AggIdCommand::Merge => "Add to current filter",
        }
    }

    pub fn tooltip(self) -> &'static str {
        match self {
            AggIdCommand::Focus => "Replace the current filter with this aggregate id",
            AggIdCommand::Merge => "Keep the current filter and also include this aggregate id",
        }
    }

    /// Markdown link invoking this command for `agg_id`
    pub fn link(self, agg_id: &str) -> String {
        let args = serde_json::json!({ "aggId": agg_id }).to_string();
        format!(
            "[{}](command:{}?{} \"{}\")",
            self.title(),
            self.name(),
            utf8_percent_encode(&args, URI_COMPONENT),
            self.tooltip()
        )
    }
}

/// Errors from executing a command
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },
    #[error("no handler registered for command {0}")]
    Unhandled(String),
}

/// Receives aggregate ids picked from hover links
#[tower_lsp::async_trait]
pub trait AggIdHandler: Send + Sync {
    async fn handle(&self, agg_id: &str);
}

/// Handlers for the focus and merge commands
#[derive(Default, Clone)]
pub struct CommandRegistry {
    focus: Option<Arc<dyn AggIdHandler>>,
    merge: Option<Arc<dyn AggIdHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_focus_handler(&mut self, handler: Arc<dyn AggIdHandler>) {
        self.focus = Some(handler);
    }

    pub fn register_merge_handler(&mut self, handler: Arc<dyn AggIdHandler>) {
        self.merge = Some(handler);
    }

    fn handler(&self, command: AggIdCommand) -> Option<&Arc<dyn AggIdHandler>> {
        match command {
            AggIdCommand::Focus => self.focus.as_ref(),
            AggIdCommand::Merge => self.merge.as_ref(),
        }
    }

    /// Decode the arguments of `command` and pass the aggregate id to its handler
    pub async fn dispatch(&self, command: &str, arguments: &[JsonValue]) -> Result<(), CommandError> {
        let kind = AggIdCommand::from_name(command)
            .ok_or_else(|| CommandError::UnknownCommand(command.to_string()))?;

        let first = arguments.first().ok_or_else(|| CommandError::InvalidArguments {
            command: command.to_string(),
            reason: "missing argument".to_string(),
        })?;
        let args: AggIdArgs =
            serde_json::from_value(first.clone()).map_err(|e| CommandError::InvalidArguments {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let Some(handler) = self.handler(kind) else {
            warn!("No handler registered for {}", command);
            return Err(CommandError::Unhandled(command.to_string()));
        };

        debug!("Dispatching {} for {}", command, args.agg_id);
        handler.handle(&args.agg_id).await;
        Ok(())
    }
}

/// Client notification sent when the user focuses an aggregate
pub enum FocusAggId {}

impl Notification for FocusAggId {
    type Params = AggIdArgs;
    const METHOD: &'static str = "eventdoc/focusAggId";
}

/// Client notification sent when the user merges an aggregate into the filter
pub enum MergeAggId {}

impl Notification for MergeAggId {
    type Params = AggIdArgs;
    const METHOD: &'static str = "eventdoc/mergeAggId";
}

/// Handler that hands the command back to the editor as a notification
pub struct ClientForwarder {
    client: Client,
    command: AggIdCommand,
}

impl ClientForwarder {
    pub fn new(client: Client, command: AggIdCommand) -> Self {
        Self { client, command }
    }
}

#[tower_lsp::async_trait]
impl AggIdHandler for ClientForwarder {
    async fn handle(&self, agg_id: &str) {
        let params = AggIdArgs {
            agg_id: agg_id.to_string(),
        };
        match self.command {
            AggIdCommand::Focus => self.client.send_notification::<FocusAggId>(params).await,
            AggIdCommand::Merge => self.client.send_notification::<MergeAggId>(params).await,
        }
    }
}
