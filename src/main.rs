use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hermes_server::config::Config;
use hermes_server::state::AppState;
use hermes_server::voice::VoiceManager;
use hermes_server::{broker, db, handlers, voice};

/// Middleware that restricts access to the metrics endpoint to loopback
/// connections only.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Build the `/api` surface.
fn api_router() -> Router<AppState> {
    Router::new()
        // Auth routes
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        // User routes
        .route("/users/@me", get(handlers::users::get_current_user))
        .route("/users/@me", patch(handlers::users::update_current_user))
        .route("/users/@me", delete(handlers::users::delete_current_user))
        .route("/users/:id", get(handlers::users::get_user))
        // Server routes
        .route("/servers", post(handlers::servers::create_server))
        .route("/servers", get(handlers::servers::list_servers))
        .route("/servers/:id", get(handlers::servers::get_server))
        .route("/servers/:id", patch(handlers::servers::update_server))
        .route("/servers/:id", delete(handlers::servers::delete_server))
        .route("/servers/:id/join", post(handlers::servers::join_server))
        .route("/servers/:id/leave", delete(handlers::servers::leave_server))
        .route(
            "/servers/:id/transfer",
            post(handlers::servers::transfer_ownership),
        )
        // Channel routes
        .route(
            "/servers/:id/channels",
            post(handlers::channels::create_channel),
        )
        .route(
            "/servers/:id/channels",
            get(handlers::channels::list_channels),
        )
        .route(
            "/servers/:id/channels/:channel_id",
            patch(handlers::channels::update_channel),
        )
        .route(
            "/servers/:id/channels/:channel_id",
            delete(handlers::channels::delete_channel),
        )
        // Message routes
        .route(
            "/servers/:id/channels/:channel_id/messages",
            post(handlers::messages::create_message),
        )
        .route(
            "/servers/:id/channels/:channel_id/messages",
            get(handlers::messages::list_messages),
        )
        .route(
            "/servers/:id/channels/:channel_id/messages/:message_id",
            patch(handlers::messages::update_message),
        )
        .route(
            "/servers/:id/channels/:channel_id/messages/:message_id",
            delete(handlers::messages::delete_message),
        )
        // Voice presence routes
        .route(
            "/servers/:id/channels/:channel_id/voice/join",
            post(handlers::voice::join_voice_channel),
        )
        .route(
            "/servers/:id/channels/:channel_id/voice/leave",
            post(handlers::voice::leave_voice_channel),
        )
        // Realtime endpoints
        .route(
            "/servers/:id/channels/:channel_id/messages/ws",
            get(broker::message_stream_handler),
        )
        .route(
            "/servers/:id/channels/:channel_id/voice/ws",
            get(voice::voice_stream_handler),
        )
}

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "hermes_server=info,tower_http=info,sqlx=warn,webrtc=warn"
            .parse()
            .unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 Hermes Server starting...");

    let config = Config::from_env().expect("Failed to load configuration");
    info!("📝 Configuration loaded");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Auto-run pending migrations on startup.
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("✅ Database migrations applied");

    db::health_check(&pool)
        .await
        .expect("Database health check failed");
    info!("✅ Database health check passed");

    // CORS: permissive in dev, origin-restricted in production.
    let cors = if config.is_dev {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "🔒 CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!(
                "🔒 CORS: production mode, allowing origins: {:?}",
                config.allowed_origins
            );
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    };

    let voice = Arc::new(VoiceManager::new().expect("Failed to initialize WebRTC stack"));

    let app_state = AppState {
        pool,
        broker: broker::Broker::new(),
        voice,
    };

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        .nest("/api", api_router())
        // ── Request deadline (WS upgrades respond immediately and are not
        //    affected once the connection is established) ───────────────────
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // ── Prometheus + CORS ──────────────────────────────────────────────
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state);

    let addr = config.server_addr();
    info!("🎧 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>`
    // in request extensions, needed by the require_loopback middleware.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}
