use anyhow::{Context, Result};
use clap::Parser;
use domru_api::{DomruApi, DoorApi};
use domru_auth::{AuthorizedClient, RetryPolicy, RetryingTransport, TokenManager, build_http_client};
use domru_bridge::{
    BridgeHandle, BridgeSettings, MqttSettings,
    supervisor::{NETWORK_INFO_URL, ha_network_address, supervisor_token},
};
use domru_config::Config;
use domru_proxy::AppState;
use domru_store::FileCredentialsStore;
use domru_types::{CredentialsStore, redact};
use reqwest::Url;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "domru-gateway",
    version,
    about = "domru-gateway: authenticated Dom.ru intercom proxy and MQTT door bridge"
)]
struct Cli {
    /// Path to the JSON options file.
    #[arg(short, long, value_name = "FILE", default_value = "/data/options.json")]
    config: PathBuf,
    /// Override the listening port (default: 8080).
    #[arg(short, long)]
    port: Option<u16>,
    /// Credentials file (default: /data/accounts.json).
    #[arg(long, value_name = "PATH")]
    credentials: Option<PathBuf>,
    /// Log filter, e.g. `info` or `domru_auth=debug` (RUST_LOG wins).
    #[arg(long)]
    log_level: Option<String>,
    /// Refresh token to store at startup; requires --operator-id.
    #[arg(long)]
    refresh_token: Option<String>,
    /// Operator id to store at startup; requires --refresh-token.
    #[arg(long)]
    operator_id: Option<i64>,
}

impl Cli {
    /// Flags take precedence over the file and environment layers.
    fn apply(self, config: &mut Config) {
        if let Some(p) = self.port {
            config.port = p;
        }
        if let Some(c) = self.credentials {
            config.credentials = c;
        }
        if let Some(l) = self.log_level {
            config.log_level = l;
        }
        if let Some(t) = self.refresh_token {
            config.refresh_token = Some(t);
        }
        if let Some(id) = self.operator_id {
            config.operator_id = Some(id);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(Some(&cli.config))
        .map_err(|e| anyhow::anyhow!("config error: {e}"))?;
    cli.apply(&mut config);

    init_tracing(&config.log_level);
    serve(config).await
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

async fn serve(config: Config) -> Result<()> {
    let upstream = Url::parse(&config.upstream_url)
        .with_context(|| format!("invalid upstream_url {:?}", config.upstream_url))?;

    let store: Arc<dyn CredentialsStore> =
        Arc::new(FileCredentialsStore::new(config.credentials.clone()));
    apply_credentials_override(&config, store.as_ref()).await;

    let http = build_http_client()?;
    let transport = RetryingTransport::new(http.clone(), RetryPolicy::default());
    let manager = Arc::new(TokenManager::new(store, transport.clone(), &upstream)?);
    let client = Arc::new(AuthorizedClient::with_token_manager(transport, manager));
    let api: Arc<dyn DoorApi> = Arc::new(DomruApi::new(Arc::clone(&client), upstream.clone()));

    let bridge = start_bridge(&config, api, &http).await;

    let app = domru_proxy::make_router(AppState::new(client, upstream.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, upstream = %upstream, "domru-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutting down");
            if let Some(bridge) = bridge {
                bridge.stop().await;
            }
        })
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Persist operator-supplied credentials before anything reads the store.
async fn apply_credentials_override(config: &Config, store: &dyn CredentialsStore) {
    tracing::debug!(
        refresh_token = %redact(config.refresh_token.as_deref().unwrap_or_default()),
        operator_id = config.operator_id.unwrap_or_default(),
        "checking startup credentials"
    );
    let Some(credentials) = config.credentials_override() else {
        return;
    };
    tracing::info!(
        operator_id = credentials.operator_id,
        "overriding stored credentials from configuration"
    );
    if let Err(e) = store.save(&credentials).await {
        tracing::error!(error = %e, "unable to save startup credentials");
    }
}

/// Start the MQTT bridge when a broker is configured or the supervisor provides one.
async fn start_bridge(
    config: &Config,
    api: Arc<dyn DoorApi>,
    http: &reqwest::Client,
) -> Option<BridgeHandle> {
    let token = supervisor_token();
    let Some(host) = config.mqtt.resolve_host(token.is_some()) else {
        tracing::info!("no MQTT broker configured, device bridge disabled");
        return None;
    };

    let picture_base = match token {
        Some(token) => match ha_network_address(http, NETWORK_INFO_URL, &token).await {
            Ok(addr) => Some(format!("http://{addr}:{}", config.port)),
            Err(e) => {
                tracing::warn!(error = %e, "home assistant address lookup failed, no entity pictures");
                None
            }
        },
        None => None,
    };

    let settings = BridgeSettings {
        settle_delay: config.bridge.settle_delay(),
        relock_delay: config.bridge.relock_delay(),
        picture_base,
    };
    Some(BridgeHandle::spawn(
        api,
        &MqttSettings::from_config(host, &config.mqtt),
        settings,
    ))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
