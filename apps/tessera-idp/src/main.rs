//! Tessera Identity Provider launcher
//!
//! Loads configuration from the environment, validates every configuration
//! source in one pass, and keeps the engine's caches trimmed until shutdown.

mod config;
mod dispatcher;
mod logging;

use config::{read_file, Config, ConfigError, SigningSource};
use dispatcher::LoggingDispatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_saml::{
    Clock, EngineBootstrap, ProtocolEngine, SigningCredentials, SigningKeySlot, SystemClock,
};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() {
    // Load configuration (fail-fast on missing required values)
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %config.app_env,
        idp_entity_id = %config.settings.idp_entity_id,
        "Starting Tessera IdP"
    );

    match config.validate_security_config() {
        Ok(warnings) => {
            for warning in &warnings {
                tracing::warn!(target: "security", "{}", warning);
            }
            if !warnings.is_empty() {
                tracing::warn!(
                    target: "security",
                    count = warnings.len(),
                    "Insecure fallbacks in use (allowed in {} mode)",
                    config.app_env
                );
            }
        }
        Err(e) => {
            tracing::error!(target: "security", "{}", e);
            eprintln!("FATAL: {e}. Provide signing key files or use IDP_ENV=development.");
            std::process::exit(1);
        }
    }

    let engine = match start_engine(&config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "Startup validation failed");
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    info!(
        relying_parties = engine.trust_store().snapshot().len(),
        "Tessera IdP ready"
    );

    let maintenance = tokio::spawn(run_maintenance(
        Arc::clone(&engine),
        Duration::from_secs(config.maintenance_interval_secs),
    ));

    shutdown_signal().await;
    maintenance.abort();
    info!("Tessera IdP stopped");
}

/// Startup failures, each carrying every problem found in its stage.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] tessera_saml::ConfigurationError),
}

fn start_engine(config: &Config) -> Result<ProtocolEngine, StartupError> {
    let metadata_json = read_file("IDP_METADATA_FILE", &config.metadata_file)?;
    let directory_json = read_file("IDP_DIRECTORY_FILE", &config.directory_file)?;
    let (key_pem, cert_pem) = signing_pems(config)?;

    // The dispatcher signs redirect queries from the engine's own slot, so
    // it sees the validated key and any later rotation.
    let signing = SigningKeySlot::default();

    let engine = EngineBootstrap::new(config.settings.clone())
        .metadata_json(metadata_json)
        .directory_json(directory_json)
        .signing_pem(key_pem, cert_pem)
        .signing_key_slot(signing.clone())
        .build(
            Arc::new(LoggingDispatcher::new(signing)),
            Arc::new(SystemClock),
        )?;
    Ok(engine)
}

fn signing_pems(config: &Config) -> Result<(String, String), ConfigError> {
    match &config.signing {
        SigningSource::Files { key, certificate } => Ok((
            read_file("IDP_SIGNING_KEY_FILE", key)?,
            read_file("IDP_SIGNING_CERT_FILE", certificate)?,
        )),
        SigningSource::Generated => {
            let generated = |message: String| ConfigError::InvalidValue {
                var: "IDP_SIGNING_KEY_FILE".to_string(),
                message,
            };
            let credentials =
                SigningCredentials::self_signed(&config.settings.idp_entity_id, 365)
                    .map_err(|e| generated(e.to_string()))?;
            let key = credentials
                .private_key()
                .private_key_to_pem_pkcs8()
                .map_err(|e| generated(e.to_string()))?;
            let cert = credentials
                .certificate()
                .to_pem()
                .map_err(|e| generated(e.to_string()))?;
            Ok((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&cert).into_owned(),
            ))
        }
    }
}

/// Purge expired replay entries, sessions and stale failure counters on a
/// fixed interval.
async fn run_maintenance(engine: Arc<ProtocolEngine>, every: Duration) {
    let clock = SystemClock;
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let now = clock.now();
        let replay_purged = engine.replay_cache().purge_expired(now);
        let sessions_purged = engine.sessions().purge_expired(now);
        let failures_purged = engine.verifier().failures().purge_stale(Instant::now());
        tracing::debug!(
            replay_purged,
            sessions_purged,
            failures_purged,
            replay_entries = engine.replay_cache().len(),
            sessions = engine.sessions().len(),
            "Maintenance pass complete"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
