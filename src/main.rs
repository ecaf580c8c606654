use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use jsonschema_ls::{dialects::JsonSchemaDialects, server::ServerBuilder, telemetry};
use tokio::io::{stdin, stdout};
use tower_lsp::{LspService, Server};

/// Schema-aware JSON language server.
#[derive(Debug, Parser)]
#[command(name = "jsonschema-ls", version, about)]
struct Args {
    /// Talk LSP over stdin/stdout. Always on; accepted for editor compatibility.
    #[arg(long)]
    stdio: bool,

    /// Log filter, e.g. `debug` or `jsonschema_ls=trace`. Overrides JSONSCHEMA_LS_LOG.
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = telemetry::initialise(args.log_level.as_deref()) {
        eprintln!("jsonschema-ls: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!(stdio = args.stdio, version = env!("CARGO_PKG_VERSION"), "starting");

    let dialects = Arc::new(JsonSchemaDialects::new());
    let builder = ServerBuilder::new().with_default_features(dialects);

    let (service, socket) = LspService::new(|client| builder.build(client));
    Server::new(stdin(), stdout(), socket).serve(service).await;

    ExitCode::SUCCESS
}
