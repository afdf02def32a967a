use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vmprov_common::ProvisionError;
use vmprov_orchestrator::{ProvisionConfig, Provisioner};
use vmprov_providers::credentials;
use vmprov_providers::gce::GceProvider;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ProvisionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Preconditions are checked before touching the network.
    if let Err(e) = config.request.validate() {
        eprintln!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    let credentials = match credentials::discover_adc(&|key| std::env::var(key).ok()) {
        Ok(creds) => {
            tracing::info!("🔑 Using Application Default Credentials: {}", creds.describe());
            creds
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let provider = match &config.api_base_url {
        Some(url) => GceProvider::with_base_url(credentials, url.as_str()),
        None => GceProvider::new(credentials),
    };
    let provider = match provider {
        Ok(p) => p,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("🛑 Ctrl-C received, cancelling");
                cancel.cancel();
            }
        });
    }

    let provisioner = Provisioner::new(Arc::new(provider)).with_poll_policy(config.poll);
    match provisioner.create_instance(&config.request, &cancel).await {
        Ok(instance) => {
            match instance.public_ip() {
                Some(ip) => println!(
                    "Instance {} created successfully with IP: {}",
                    instance.name, ip
                ),
                None => println!(
                    "Instance {} created successfully (no external IP assigned)",
                    instance.name
                ),
            }
            ExitCode::SUCCESS
        }
        Err(ProvisionError::Cancelled { operation }) => {
            eprintln!(
                "🛑 Cancelled while waiting for {}; the instance may still be created remotely",
                operation
            );
            ExitCode::from(130)
        }
        Err(e) => {
            if let Some(api) = e.api_error() {
                if api.is_conflict() {
                    eprintln!(
                        "An instance named '{}' already exists in {}",
                        config.request.instance_name, config.request.zone
                    );
                } else if api.is_permission_denied() {
                    eprintln!(
                        "Permission denied in project {}; check the credentials' IAM roles",
                        config.request.project_id
                    );
                }
            }
            eprintln!("❌ An error occurred: {}", e);
            ExitCode::FAILURE
        }
    }
}
