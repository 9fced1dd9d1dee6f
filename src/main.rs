mod api;
mod config;
mod events;
mod models;
mod panel;
mod relay;

use anyhow::Result;
use tokio::io::BufReader;

use api::{OllamaBackend, OllamaClient};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries the panel protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config::load_config()?;
    tracing::debug!(?config, "resolved config");

    let client = OllamaClient::new(config.ollama_url.clone(), config.request_timeout)?;
    check_server(&client, &config.model).await;

    let backend = OllamaBackend::new(client, config.model.clone());
    tracing::info!(model = %config.model, "panel session started");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    panel::run(stdin, stdout, &backend, config.prompt_queue).await?;

    tracing::info!("panel session ended");
    Ok(())
}

/// Warn early about problems every request would hit anyway.
async fn check_server(client: &OllamaClient, model: &str) {
    if !client.health_check().await {
        tracing::warn!(url = client.base_url(), "Ollama is not reachable; requests will fail until it is");
        return;
    }

    match client.list_models().await {
        Ok(models) if api::has_model(&models, model) => {}
        Ok(_) => tracing::warn!(model, "model is not installed; run `ollama pull {model}`"),
        Err(e) => tracing::warn!(error = %e, "could not list installed models"),
    }
}
