//! End-to-end LSP protocol tests.
//!
//! These drive a real Backend through tower-lsp's service with raw
//! JSON-RPC messages, using an in-memory schema registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventdoc_ls::schema::{NamespaceCatalog, RegistryError, SchemaKey, SchemaRegistry};
use eventdoc_ls::{Backend, HEADER_SCHEMA_METHOD};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::{Service, ServiceExt};
use tower_lsp::{ClientSocket, LspService};

struct MemoryRegistry {
    schema_calls: AtomicUsize,
}

#[tower_lsp::async_trait]
impl SchemaRegistry for MemoryRegistry {
    async fn fetch_schema(&self, _key: &SchemaKey) -> Result<Value, RegistryError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "title": "Order created",
            "properties": { "id": { "type": "integer", "title": "Identifier" } }
        }))
    }

    async fn fetch_namespaces(&self) -> Result<NamespaceCatalog, RegistryError> {
        Ok(serde_json::from_value(json!({
            "orders": { "types": [{ "name": "Created", "version": 1 }] }
        }))?)
    }
}

type ClientMessages = mpsc::UnboundedReceiver<Value>;

fn build_service() -> (LspService<Backend>, ClientMessages, Arc<MemoryRegistry>) {
    let registry = Arc::new(MemoryRegistry {
        schema_calls: AtomicUsize::new(0),
    });
    let shared: Arc<dyn SchemaRegistry> = registry.clone();
    let (service, socket) = LspService::build(move |client| Backend::with_registry(client, shared.clone()))
        .custom_method(HEADER_SCHEMA_METHOD, Backend::header_schema)
        .finish();
    (service, drain_client(socket), registry)
}

/// Keep reading server-to-client messages so the server never blocks on them
fn drain_client(mut socket: ClientSocket) -> ClientMessages {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(message) = socket.next().await {
            let message = serde_json::to_value(message).unwrap();
            if tx.send(message).is_err() {
                break;
            }
        }
    });
    rx
}

/// Next message the server sent to the client with the given method
async fn next_client_message(messages: &mut ClientMessages, method: &str) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .unwrap_or_else(|_| panic!("no {} message from the server", method))
            .expect("client socket closed");
        if message["method"] == method {
            return message;
        }
    }
}

async fn send_request(
    service: &mut LspService<Backend>,
    id: i64,
    method: &str,
    params: Value,
) -> Option<Value> {
    use tower_lsp::jsonrpc;

    let req_value = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let req: jsonrpc::Request = serde_json::from_value(req_value).unwrap();

    let resp = service.ready().await.unwrap().call(req).await.unwrap();
    resp.map(|r| serde_json::to_value(r).unwrap())
}

async fn send_notification(service: &mut LspService<Backend>, method: &str, params: Value) {
    use tower_lsp::jsonrpc;

    let req_value = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    });
    let req: jsonrpc::Request = serde_json::from_value(req_value).unwrap();
    let _ = service.ready().await.unwrap().call(req).await;
}

async fn initialize(service: &mut LspService<Backend>) -> Value {
    initialize_with(service, json!({ "forwardCommands": false })).await
}

async fn initialize_with(service: &mut LspService<Backend>, options: Value) -> Value {
    let init_params = json!({
        "processId": null,
        "capabilities": {},
        "rootUri": null,
        "initializationOptions": options
    });
    let resp = send_request(service, 1, "initialize", init_params).await;
    let resp = resp.expect("initialize should return a response");

    send_notification(service, "initialized", json!({})).await;
    resp
}

async fn open_document(service: &mut LspService<Backend>, uri: &str, text: &str) {
    send_notification(
        service,
        "textDocument/didOpen",
        json!({
            "textDocument": {
                "uri": uri,
                "languageId": "json",
                "version": 1,
                "text": text
            }
        }),
    )
    .await;
}

async fn hover(service: &mut LspService<Backend>, id: i64, uri: &str, line: u32, character: u32) -> Value {
    let resp = send_request(
        service,
        id,
        "textDocument/hover",
        json!({
            "textDocument": { "uri": uri },
            "position": { "line": line, "character": character }
        }),
    )
    .await
    .expect("hover should return a response");
    resp["result"].clone()
}

const URI: &str = "file:///tmp/result.json";

#[tokio::test]
async fn initialize_advertises_hover_and_commands() {
    let (mut service, _messages, _registry) = build_service();
    let resp = initialize(&mut service).await;

    let caps = &resp["result"]["capabilities"];
    assert_eq!(caps["hoverProvider"], json!(true));
    assert_eq!(
        caps["executeCommandProvider"]["commands"],
        json!(["eventdoc.focusAggId", "eventdoc.mergeAggId"])
    );
}

#[tokio::test]
async fn hover_over_aggregate_id_offers_commands() {
    let (mut service, _messages, _registry) = build_service();
    initialize(&mut service).await;
    open_document(&mut service, URI, r#"{"aggIds": ["a","b","c"]}"#).await;

    let result = hover(&mut service, 2, URI, 0, 17).await;
    let value = result["contents"]["value"].as_str().unwrap();
    assert!(value.contains("command:eventdoc.focusAggId?%7B%22aggId%22%3A%22b%22%7D"));
    assert_eq!(result["range"]["start"], json!({ "line": 0, "character": 16 }));

    let nothing = hover(&mut service, 3, URI, 0, 3).await;
    assert_eq!(nothing, Value::Null);
}

#[tokio::test]
async fn hover_over_payload_fetches_schema_once() {
    let (mut service, _messages, registry) = build_service();
    initialize(&mut service).await;
    open_document(
        &mut service,
        URI,
        r#"{"header": {"ns":"orders","type":"Created","version":1}, "payload": {"id": 5}}"#,
    )
    .await;

    for id in 2..4 {
        let result = hover(&mut service, id, URI, 0, 71).await;
        let value = result["contents"]["value"].as_str().unwrap();
        assert!(value.contains("Identifier"));
    }
    assert_eq!(registry.schema_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn header_schema_is_served_after_catalog_load() {
    let (mut service, _messages, _registry) = build_service();
    initialize(&mut service).await;

    // The request takes no params, so the message carries none
    let req: tower_lsp::jsonrpc::Request = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": HEADER_SCHEMA_METHOD
    }))
    .unwrap();
    let resp = service.ready().await.unwrap().call(req).await.unwrap().unwrap();
    let resp = serde_json::to_value(resp).unwrap();
    assert_eq!(resp["result"]["properties"]["ns"]["enum"], json!(["orders"]));
}

#[tokio::test]
async fn unhandled_command_shows_an_error() {
    let (mut service, mut messages, _registry) = build_service();
    initialize(&mut service).await;

    let resp = send_request(
        &mut service,
        2,
        "workspace/executeCommand",
        json!({ "command": "eventdoc.mergeAggId", "arguments": [{ "aggId": "a" }] }),
    )
    .await
    .unwrap();
    assert_eq!(resp["result"], Value::Null);

    let shown = next_client_message(&mut messages, "window/showMessage").await;
    assert_eq!(shown["params"]["type"], json!(1));
    let text = shown["params"]["message"].as_str().unwrap();
    assert!(text.contains("eventdoc.mergeAggId"), "{}", text);
}

#[tokio::test]
async fn commands_are_forwarded_to_the_client() {
    let (mut service, mut messages, _registry) = build_service();
    initialize_with(&mut service, json!({ "forwardCommands": true })).await;

    let resp = send_request(
        &mut service,
        2,
        "workspace/executeCommand",
        json!({ "command": "eventdoc.focusAggId", "arguments": [{ "aggId": "order-1" }] }),
    )
    .await
    .unwrap();
    assert_eq!(resp["result"], Value::Null);

    let forwarded = next_client_message(&mut messages, "eventdoc/focusAggId").await;
    assert_eq!(forwarded["params"], json!({ "aggId": "order-1" }));
}
