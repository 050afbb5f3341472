use anyhow::Context as _;
use axum::body::Body;
use axum::http::HeaderName;
use axum::response::Response;
use hyper::Request;
use octostats::cache::ResponseCache;
use octostats::config::Config;
use octostats::db::{SnapshotStore, TrafficStore, WebhookStore};
use octostats::github::Transport;
use octostats::handlers::{self, Context};
use octostats::ratelimit::RateLimiter;
use std::{env, net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{self as log, info_span};

async fn run_server(addr: SocketAddr, config: Config) -> anyhow::Result<()> {
    let transport = Arc::new(Transport::new()?);
    let cache = ResponseCache::new(
        config.cache_ttl_secs,
        config.cache_maxsize,
        config.redis_url.as_deref(),
    )
    .await;
    let traffic_store = Arc::new(
        TrafficStore::new(config.traffic_db_path.clone()).context("opening traffic store")?,
    );
    let snapshots =
        SnapshotStore::new(config.snapshots_db_path.clone()).context("opening snapshot store")?;
    let webhooks =
        WebhookStore::new(config.webhooks_db_path.clone()).context("opening webhook store")?;
    let limiter = RateLimiter::new(
        config.rate_limit_default,
        config.rate_limit_auth,
        config.rate_limit_heavy,
    );

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_headers(Any)
    };

    let ctx = Arc::new(Context {
        config,
        transport,
        cache,
        traffic_store,
        snapshots,
        webhooks,
        limiter,
    });

    // Burst flood guard in front of the per-caller quotas; generous on
    // purpose, the quota middleware enforces the advertised limits.
    let flood_guard = GovernorConfigBuilder::default()
        .per_second(1)
        .burst_size(60)
        .key_extractor(SmartIpKeyExtractor)
        .use_headers()
        .finish()
        .context("fail to create the governor configuration")?;

    const REQUEST_ID_HEADER: &str = "x-request-id";
    const X_REQUEST_ID: HeaderName = HeaderName::from_static(REQUEST_ID_HEADER);

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            X_REQUEST_ID.clone(),
            MakeRequestUuid,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request.headers().get(REQUEST_ID_HEADER);
                    if let Some(request_id) = request_id {
                        info_span!("request", request_id = ?request_id)
                    } else {
                        log::error!("could not extract request_id");
                        info_span!("request")
                    }
                })
                .on_response(|response: &Response<_>, dur, _span: &tracing::Span| {
                    log::info!("response={} in {dur:?}", response.status());
                }),
        )
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(CompressionLayer::new())
        .layer(CatchPanicLayer::new())
        .layer(cors);

    let app = handlers::router(ctx)
        .layer(GovernorLayer::new(flood_guard))
        .layer(middleware);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving")?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(env::var_os("DISABLE_COLOR").is_none())
        .try_init()
        .map_err(|e| anyhow::anyhow!("initialising tracing: {e}"))?;

    let config = Config::from_env().context("reading configuration")?;
    let addr = ([0, 0, 0, 0], config.port).into();
    run_server(addr, config)
        .await
        .context("Failed to run the server")?;
    Ok(())
}
