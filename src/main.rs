use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guestkey::access::AccessCodeCodec;
use guestkey::cli;
use guestkey::config::{self, Config};
use guestkey::jobs;
use guestkey::lock::LoggingLockDriver;
use guestkey::metrics::Metrics;
use guestkey::notification::dead_letter::{DeadLetterSink, JsonlDeadLetterLog};
use guestkey::notification::dispatch::{DeliveryConfig, WebhookDispatcher};
use guestkey::notification::slack::SlackNotifier;
use guestkey::notification::webhook::{sign_payload, RetryPolicy};
use guestkey::state::resilient::ResilientOptions;
use guestkey::state::{ResilientBackend, StateBackend};
use guestkey::store::PgStore;
use guestkey::{AccessControl, AccessControlSettings};

/// Shared state for the HTTP handlers.
struct AppState {
    db: PgStore,
    control: AccessControl,
    backend: ResilientBackend,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("GUESTKEY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "guestkey=info,tower_http=debug".into()),
        ))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::HashCode { code, iterations }) => {
            let codec = AccessCodeCodec::new(iterations.unwrap_or(cfg.code_hash_iterations));
            println!("{}", codec.hash(&code));
            Ok(())
        }
        Some(cli::Commands::VerifyCode { code, hash }) => {
            if AccessCodeCodec::verify(&code, &hash) {
                println!("✅ code matches");
                Ok(())
            } else {
                anyhow::bail!("code does not match hash")
            }
        }
        Some(cli::Commands::Sign {
            secret,
            timestamp,
            body,
        }) => {
            let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
            println!("X-Webhook-Timestamp: {}", timestamp);
            println!("X-Webhook-Signature: {}", sign_payload(&secret, timestamp, &body));
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);

    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let backend = ResilientBackend::connect(
        cfg.redis_url.as_deref(),
        ResilientOptions {
            fallback_enabled: cfg.memory_fallback,
            max_memory_entries: cfg.memory_max_entries,
            probe_interval: Duration::from_secs(cfg.redis_probe_secs),
            ..ResilientOptions::default()
        },
        Some(metrics.clone()),
    )
    .await;

    if cfg.memory_sweep_secs > 0 {
        jobs::sweep::spawn(
            backend.memory().clone(),
            Duration::from_secs(cfg.memory_sweep_secs),
        );
        tracing::info!(every_secs = cfg.memory_sweep_secs, "state sweep job started");
    }

    let dead_letters = cfg.webhook_dead_letter_path.as_ref().map(|path| {
        tracing::info!(%path, "webhook dead-letter log enabled");
        Arc::new(JsonlDeadLetterLog::new(path)) as Arc<dyn DeadLetterSink>
    });
    let (webhooks, pool) = WebhookDispatcher::new(
        Arc::new(db.clone()),
        DeliveryConfig {
            workers: cfg.webhook_workers,
            max_attempts: cfg.webhook_max_attempts,
            base_backoff: cfg.webhook_backoff(),
            request_timeout: cfg.webhook_timeout(),
            retry_policy: if cfg.webhook_retry_on_status {
                RetryPolicy::StatusAware
            } else {
                RetryPolicy::TransportOnly
            },
        },
        metrics.clone(),
        dead_letters,
    )?;
    let workers = pool.spawn();

    let notifier = SlackNotifier::new(cfg.slack_webhook_url.clone(), cfg.webhook_timeout())?;
    let control = AccessControl::new(
        Arc::new(backend.clone()),
        Arc::new(db.clone()),
        Arc::new(LoggingLockDriver::new()),
        Arc::new(notifier),
        webhooks,
        metrics.clone(),
        AccessControlSettings::from(&cfg),
    );

    let state = Arc::new(AppState {
        db,
        control,
        backend,
        metrics,
    });

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("guestkey listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dropping the last dispatcher closes the queue; let workers drain it.
    drop(state);
    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        for worker in workers {
            let _ = worker.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("webhook workers did not drain within 10s, exiting anyway");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .is_ok();
    let mode = state.control.backend().mode();
    let body = Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "unavailable" },
        "database": db_ok,
        "stateBackend": mode.as_str(),
        "degraded": state.backend.is_degraded(),
    }));
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.remove(header::SERVER);
    resp
}
