use anyhow::Result;
use clap::{Parser, Subcommand};
use rapport_core::{
    telemetry, Client, CredentialStore, Endpoints, KeyValueStore, LoginCredentials,
    ScriptedReply, ScriptedTransport,
};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Rapport")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and stream one reply against a scripted backend.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let transport = ScriptedTransport::new();
    script_backend(&transport);

    let credentials = CredentialStore::open(KeyValueStore::new(temp_dir.path().to_path_buf())?);
    let (client, _updates) = Client::new(
        Arc::new(transport.clone()),
        credentials,
        Endpoints::default(),
    );

    runtime.block_on(async {
        client
            .auth
            .login(&LoginCredentials::new("smoke@example.com", "smoke"))
            .await?;
        let reply = client.session.send("ping from xtask").await?;
        info!(
            "messages" = client.session.timeline().len(),
            "reply" = reply.response_text(),
            "requests" = transport.requests().len(),
            "smoke test reply streamed"
        );
        anyhow::Ok(())
    })
}

fn script_backend(transport: &ScriptedTransport) {
    transport.enqueue(
        Method::POST,
        "/auth/login",
        ScriptedReply::json(
            200,
            json!({
                "user": {
                    "id": "smoke", "email": "smoke@example.com", "name": "Smoke", "role": "MEMBER",
                    "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"
                },
                "tokens": { "accessToken": "smoke-access", "refreshToken": "smoke-refresh" }
            }),
        ),
    );
    transport.enqueue(
        Method::POST,
        "/chat/message/stream",
        ScriptedReply::events([
            "data: {\"type\":\"chunk\",\"content\":\"pong\"}\n\n",
            "data: {\"type\":\"done\",\"messageId\":\"smoke-1\"}\n\n",
        ]),
    );
}
