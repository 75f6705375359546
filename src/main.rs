#![warn(
    clippy::correctness,
    clippy::style,
    clippy::perf,
    clippy::complexity,
    clippy::cognitive_complexity,
    clippy::double_parens,
    clippy::len_zero,
    clippy::question_mark,
    clippy::suspicious,
    clippy::todo
)]

mod api;
mod manager;
pub mod models;
pub mod schema;
mod util;

use std::{io::stdout, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use clap::Parser;
use diesel::pg::Pg;
use diesel_async::{
    async_connection_wrapper::AsyncConnectionWrapper,
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use fred::{clients::Pool as RedisPool, prelude::*, types::config::Config as RedisConfig};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt,
};
use utoipa_scalar::{Scalar, Servable};

use crate::util::{
    jamendo::Jamendo,
    jwt::Keys,
    lastfm::LastFm,
    live::LiveHub,
    providers::Providers,
    s3::{Presigner, StorageConfig},
    tastedive::TasteDive,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// JamFind-specific user agent, sent to every external provider
pub const JAMFIND_USER_AGENT: &str = concat!(
    concat!(
        concat!(env!("CARGO_PKG_NAME"), "/"),
        env!("CARGO_PKG_VERSION")
    ),
    concat!(concat!(" (", env!("CARGO_PKG_REPOSITORY")), ")")
);

#[derive(Deserialize, Clone)]
struct Config {
    main: Main,
    #[serde(default)]
    external: External,
    #[serde(default)]
    charts: Charts,
    storage: Option<StorageConfig>,
}

#[serde_inline_default]
#[derive(Deserialize, Clone)]
struct Main {
    address: String,
    database: String,
    redis: String,
    jwt_secret: String,
    #[serde_inline_default(168)]
    token_ttl_hours: i64,
}

/// Third-party services. A provider without its key is simply left out.
#[serde_inline_default]
#[derive(Deserialize, Clone)]
struct External {
    jamendo_client_id: Option<String>,
    #[serde_inline_default(String::from("https://api.jamendo.com/v3.0"))]
    jamendo_base_url: String,
    lastfm_api_key: Option<String>,
    #[serde_inline_default(String::from("https://ws.audioscrobbler.com/2.0/"))]
    lastfm_base_url: String,
    tastedive_api_key: Option<String>,
    #[serde_inline_default(String::from("https://tastedive.com/api"))]
    tastedive_base_url: String,
    /// gRPC endpoint of an OpenTelemetry collector
    otlp_endpoint: Option<String>,
}

impl Default for External {
    fn default() -> Self {
        Self {
            jamendo_client_id: None,
            jamendo_base_url: "https://api.jamendo.com/v3.0".to_owned(),
            lastfm_api_key: None,
            lastfm_base_url: "https://ws.audioscrobbler.com/2.0/".to_owned(),
            tastedive_api_key: None,
            tastedive_base_url: "https://tastedive.com/api".to_owned(),
            otlp_endpoint: None,
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Clone)]
struct Charts {
    /// Entries per snapshot
    #[serde_inline_default(50)]
    size: i64,
    /// Events a live subscriber may fall behind before it starts skipping
    #[serde_inline_default(256)]
    live_capacity: usize,
}

impl Default for Charts {
    fn default() -> Self {
        Self {
            size: 50,
            live_capacity: 256,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    db: Pool<diesel_async::AsyncPgConnection>,
    redis: Arc<RedisPool>,
    providers: Arc<Providers>,
    jwt_keys: Arc<Keys>,
    live: Arc<LiveHub>,
    presigner: Option<Arc<Presigner>>,
}

fn run_migrations(
    connection: &mut impl MigrationHarness<Pg>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    connection.run_pending_migrations(MIGRATIONS)?;

    Ok(())
}

fn build_providers(external: &External) -> anyhow::Result<Providers> {
    let http = reqwest::Client::builder()
        .user_agent(JAMFIND_USER_AGENT)
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client!")?;

    Ok(Providers {
        jamendo: external
            .jamendo_client_id
            .as_deref()
            .map(|id| Jamendo::new(http.clone(), &external.jamendo_base_url, id))
            .transpose()
            .context("Invalid Jamendo base URL")?,
        lastfm: external
            .lastfm_api_key
            .as_deref()
            .map(|key| LastFm::new(http.clone(), &external.lastfm_base_url, key))
            .transpose()
            .context("Invalid Last.fm base URL")?,
        tastedive: external
            .tastedive_api_key
            .as_deref()
            .map(|key| TasteDive::new(http.clone(), &external.tastedive_base_url, key))
            .transpose()
            .context("Invalid TasteDive base URL")?,
    })
}

/// Builds the state without connecting to anything.
/// Pools open their connections on first use.
///
/// # Errors
/// This fails if the database or Redis URLs or a provider base URL can't be parsed.
fn build_state(config: Config) -> anyhow::Result<AppState> {
    let diesel_manager =
        AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(&config.main.database);
    let pool = Pool::builder(diesel_manager)
        .build()
        .context("Failed to build DB pool!")?;

    let redis_cfg = RedisConfig::from_url(&config.main.redis)?;
    let redis_pool = Builder::from_config(redis_cfg)
        .build_pool(3)
        .context("Failed to build Redis pool!")?;

    let providers = build_providers(&config.external)?;
    info!(
        jamendo = providers.jamendo.is_some(),
        lastfm = providers.lastfm.is_some(),
        tastedive = providers.tastedive.is_some(),
        storage = config.storage.is_some(),
        "Configured external services"
    );

    Ok(AppState {
        db: pool,
        redis: Arc::new(redis_pool),
        providers: Arc::new(providers),
        jwt_keys: Arc::new(Keys::new(config.main.jwt_secret.as_bytes())),
        live: Arc::new(LiveHub::new(config.charts.live_capacity)),
        presigner: config.storage.clone().map(|storage| Arc::new(Presigner::new(storage))),
        config: Arc::new(config),
    })
}

/// Runs pending migrations on a dedicated blocking connection
///
/// # Errors
/// Fails if Postgres can't be reached or a migration fails
async fn migrate(pg_url: String) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        use diesel::prelude::Connection;
        use diesel_async::pg::AsyncPgConnection;

        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&pg_url)
            .context("Failed to establish DB connection for migrations!")?;
        run_migrations(&mut conn)
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
        Ok(())
    })
    .await?
}

/// Reads the config, runs pending migrations and connects to Redis
///
/// # Returns
/// An `AppState` struct with all the necessary members
///
/// # Errors
/// This function can fail if the config is invalid, or the connection to Postgres or Redis fails
async fn init_state(config: Config) -> anyhow::Result<AppState> {
    migrate(config.main.database.clone()).await?;

    let state = build_state(config)?;
    state
        .redis
        .init()
        .await
        .context("Clients failed to connect to Redis!")?;

    Ok(state)
}

fn make_router(state: AppState) -> Router {
    let (api_router, openapi) = api::routes();

    Router::new()
        .nest("/api", api_router)
        .merge(Scalar::with_url("/api/docs", openapi))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn otlp_tracer_provider(endpoint: &str) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP exporter")?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(env!("CARGO_PKG_NAME"))
                .build(),
        )
        .build())
}

fn main() -> anyhow::Result<()> {
    let args = manager::Args::parse();

    let config: Config = Figment::new()
        .merge(Toml::file("JamFind.toml"))
        .merge(Env::prefixed("JAMFIND_").split("__"))
        .extract()
        .context("Config should be valid!")?;

    let file_appender = RollingFileAppender::builder()
        .filename_suffix("jamfind.log")
        .rotation(Rotation::DAILY)
        .build("./logs")
        .context("Initializing logging failed")?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            // The batch exporter needs a runtime, so tracing is set up inside it
            let tracer_provider = config
                .external
                .otlp_endpoint
                .as_deref()
                .map(otlp_tracer_provider)
                .transpose()?;
            let otel_layer = tracer_provider.as_ref().map(|provider| {
                tracing_opentelemetry::layer().with_tracer(provider.tracer(env!("CARGO_PKG_NAME")))
            });

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                        // axum logs rejections from built-in extractors with the `axum::rejection`
                        // target, at `TRACE` level. `axum::rejection=trace` enables showing those events
                        "jamfind=info,tower_http=error,axum::rejection=trace".into()
                    }),
                )
                .with(tracing_subscriber::fmt::layer().with_writer(stdout.and(non_blocking)))
                .with(otel_layer)
                .init();

            debug!("Start init");
            let state = init_state(config).await?;

            // If we have a management command, don't spin up a server
            if let Some(command) = &args.command {
                return manager::parse_command(command, state).await;
            }

            info!("JamFind starting...");

            let listener = tokio::net::TcpListener::bind(&state.config.main.address)
                .await
                .context("Listener should always be able to listen!")?;
            info!("Listening on {}", &state.config.main.address);

            let app = make_router(state);

            let served = axum::serve(listener, app.into_make_service())
                .await
                .context("Server should be able to... well, serve!");

            if let Some(provider) = tracer_provider {
                if let Err(e) = provider.shutdown() {
                    warn!("Failed to flush traces: {e}");
                }
            }
            served
        })
}

#[cfg(test)]
mod tests {
    use figment::{
        providers::{Format, Toml},
        Figment,
    };

    use super::Config;

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let config: Config = Figment::from(Toml::string(
            r#"
            [main]
            address = "0.0.0.0:8080"
            database = "postgres://localhost/jamfind"
            redis = "redis://localhost"
            jwt_secret = "secret"
            "#,
        ))
        .extract()
        .unwrap();

        assert_eq!(config.main.token_ttl_hours, 168);
        assert_eq!(config.charts.size, 50);
        assert!(config.external.jamendo_client_id.is_none());
        assert_eq!(config.external.jamendo_base_url, "https://api.jamendo.com/v3.0");
        assert!(config.storage.is_none());
    }

    #[test]
    fn providers_are_built_only_with_keys() {
        let config: Config = Figment::from(Toml::string(
            r#"
            [main]
            address = "0.0.0.0:8080"
            database = "postgres://localhost/jamfind"
            redis = "redis://localhost"
            jwt_secret = "secret"

            [external]
            lastfm_api_key = "abc"
            "#,
        ))
        .extract()
        .unwrap();

        let providers = super::build_providers(&config.external).unwrap();
        assert!(providers.lastfm.is_some());
        assert!(providers.jamendo.is_none());
        assert!(providers.tastedive.is_none());
    }
}
