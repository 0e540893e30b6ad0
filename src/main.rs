use eventdoc_ls::{Backend, HEADER_SCHEMA_METHOD};
use std::error::Error;
use tower_lsp::{LspService, Server};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Sync + Send>> {
    // Log to stderr; stdout carries the protocol
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Create the transport for stdin/stdout communication
    let (stdin, stdout) = (tokio::io::stdin(), tokio::io::stdout());

    // Create the language server instance
    let (service, socket) = LspService::build(Backend::new)
        .custom_method(HEADER_SCHEMA_METHOD, Backend::header_schema)
        .finish();
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
