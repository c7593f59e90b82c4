mod config;
mod http;
mod idempotency;
mod jobs;
mod marketplace;
mod metrics;
mod models;
mod money;
mod notify;
mod resolve;
mod scrape;
mod security;
mod store;
mod wizard;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
};
use config::BotConfig;
use eyre::WrapErr;
use idempotency::IdempotencyCache;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, ChatResponse, ChatUpdate, PhoneUpdate, ResolveRequest, ResolveResponse, StatusChange,
};
use notify::Notifier;
use resolve::{ResolveError, ResolveErrorKind, Resolver};
use scrape::Scraper;
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use store::{CartLine, Order, Store, StoreError, User};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use wizard::{Wizard, WizardError, WizardSettings};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "marketbot.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = BotConfig::from_env();
    let store = Store::connect(&config.database_url)
        .await
        .wrap_err("opening database")?;
    let scraper = Scraper::new(config.scraper.clone());
    let notifier = Notifier::from_config(&config.notify);
    let wizard = Wizard::new(
        store.clone(),
        scraper.clone(),
        notifier,
        WizardSettings::from(&config),
    );
    let resolver = Resolver::new(scraper, store.clone());
    let (queue, _worker) = jobs::JobQueue::spawn(resolver.clone());
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        store,
        wizard: Arc::new(wizard),
        resolver,
        queue,
        openapi: Arc::new(load_openapi()),
        idempotency: IdempotencyCache::from_env(),
        prometheus_handle,
    };
    let auth_state = AuthState::from_env().wrap_err("loading API keys")?;
    let app = build_router(state, auth_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "marketbot.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: Store,
    wizard: Arc<Wizard<Scraper>>,
    resolver: Resolver<Scraper>,
    queue: jobs::JobQueue,
    openapi: Arc<Value>,
    idempotency: IdempotencyCache,
    prometheus_handle: PrometheusHandle,
}

fn build_router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/chat/updates", post(chat_update))
        .route("/products/resolve", post(resolve_product))
        .nest(
            "/jobs",
            Router::new()
                .route("/products", post(enqueue_resolve_job))
                .route("/{id}", get(get_job_status)),
        )
        .route("/users/{user_id}/cart", get(user_cart))
        .route("/users/{user_id}/orders", get(user_orders))
        .route("/users/{user_id}/phone", put(set_user_phone))
        .route(
            "/users/{user_id}/orders/{order_id}/cancel",
            post(cancel_user_order),
        )
        .route("/orders/{order_id}", get(get_order))
        .route("/orders/{order_id}/status", post(change_order_status))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

fn load_openapi() -> Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml")).unwrap_or_else(|err| {
        warn!(target = "marketbot.api", error = %err, "openapi document did not parse");
        json!({ "openapi": "3.0.3" })
    })
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
///
/// `active_sessions` counts chats that are mid-conversation; their drafts
/// are lost on restart.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "marketbot-api-rs",
        "active_sessions": state.wizard.sessions().active().await,
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY")
        && header_value(&headers, "X-Docs-Key") != Some(key.as_str())
    {
        return Err(AppError::Unauthorized("docs key required"));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Marketbot API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY")
        && header_value(&headers, "X-Metrics-Key") != Some(secret.as_str())
    {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Feed one chat update through the order wizard.
///
/// - Method: `POST`
/// - Path: `/chat/updates`
/// - Auth: `Authorization: Bearer <key>` or `X-Bot-Key: <key>`
/// - Body: `ChatUpdate`
/// - Response: `ChatResponse` (reply text, prompt, buttons, next state)
///
/// With an `Idempotency-Key` header a re-delivered update gets the stored
/// response back and the wizard is not advanced again.
async fn chat_update(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(update): Json<ChatUpdate>,
) -> Result<Json<Value>, AppError> {
    crate::metrics::inc_requests("/chat/updates");
    let input = update.input().map_err(AppError::BadRequest)?;
    let replay_key = header_value(&headers, "Idempotency-Key").map(str::to_string);

    if let Some(key) = &replay_key
        && let Some(existing) = state.idempotency.get(&context.client_id, key).await
    {
        info!(target = "marketbot.api", client = %context.client_id, user_id = update.user.id, "chat update replayed");
        return Ok(Json(existing));
    }

    let outcome = state.wizard.handle(&update.user, input).await?;
    let body = serde_json::to_value(ChatResponse::from(outcome))
        .map_err(|err| AppError::Internal(err.to_string()))?;
    if let Some(key) = &replay_key {
        state.idempotency.put(&context.client_id, key, &body).await;
    }
    Ok(Json(body))
}

/// Scrape a marketplace link and return the product with a stage transcript.
///
/// - Method: `POST`
/// - Path: `/products/resolve`
/// - Body: `ResolveRequest`
/// - Response: `ResolveResponse`
async fn resolve_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    crate::metrics::inc_requests("/products/resolve");
    info!(
        target = "marketbot.api",
        client = %context.client_id,
        api_key = %context.api_key_id,
        "product resolution invoked",
    );
    let response = state.resolver.resolve(payload).await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_resolve_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ResolveRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/jobs/products");
    let id = state
        .queue
        .enqueue_resolve(payload, context)
        .await
        .map_err(|err| AppError::Internal(err.detail.unwrap_or(err.error)))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    crate::metrics::inc_requests("/jobs/{id}");
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::bad_request("invalid_job_id", "job id must be a UUID"));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or_else(|| AppError::Store(StoreError::NotFound(format!("job {id}"))))
}

#[derive(Debug, Serialize)]
struct CartView {
    user_id: i64,
    items: Vec<CartLine>,
    total: money::Money,
}

async fn user_cart(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<CartView>, AppError> {
    crate::metrics::inc_requests("/users/{user_id}/cart");
    let items = state.store.get_cart_items(user_id).await?;
    let total = items.iter().map(CartLine::line_total).sum();
    Ok(Json(CartView {
        user_id,
        items,
        total,
    }))
}

async fn user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Order>>, AppError> {
    crate::metrics::inc_requests("/users/{user_id}/orders");
    Ok(Json(state.store.get_orders(user_id).await?))
}

async fn set_user_phone(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(update): Json<PhoneUpdate>,
) -> Result<Json<User>, AppError> {
    crate::metrics::inc_requests("/users/{user_id}/phone");
    let phone = update.phone.trim();
    if phone.is_empty() {
        return Err(AppError::bad_request("invalid_phone", "phone must not be empty"));
    }
    Ok(Json(state.store.update_user_phone(user_id, phone).await?))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<Order>, AppError> {
    crate::metrics::inc_requests("/orders/{order_id}");
    state
        .store
        .get_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::Store(StoreError::NotFound(format!("order {order_id}"))))
}

/// Operator-side status change, validated against the order lifecycle.
async fn change_order_status(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(order_id): Path<i64>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Order>, AppError> {
    crate::metrics::inc_requests("/orders/{order_id}/status");
    let order = state.store.set_status(order_id, change.status).await?;
    crate::metrics::order_status_changed(order.status.as_str());
    info!(
        target = "marketbot.api",
        client = %context.client_id,
        order_id,
        status = order.status.as_str(),
        "order status changed"
    );
    Ok(Json(order))
}

async fn cancel_user_order(
    State(state): State<AppState>,
    Path((user_id, order_id)): Path<(i64, i64)>,
) -> Result<Json<Order>, AppError> {
    crate::metrics::inc_requests("/users/{user_id}/orders/{order_id}/cancel");
    let not_found = || AppError::Store(StoreError::NotFound(format!("order {order_id}")));
    match state.store.get_order(order_id).await? {
        Some(order) if order.user_id == user_id => {}
        _ => return Err(not_found()),
    }
    if !state.store.cancel_order(user_id, order_id).await? {
        return Err(AppError::Conflict(
            "order_not_cancellable",
            format!("order {order_id} can only be cancelled while new or paid"),
        ));
    }
    state
        .store
        .get_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

#[derive(Debug)]
enum AppError {
    BadRequest(ApiError),
    Unauthorized(&'static str),
    Conflict(&'static str, String),
    Store(StoreError),
    Resolve(ResolveError),
    Internal(String),
}

impl AppError {
    fn bad_request(code: &str, detail: &str) -> Self {
        Self::BadRequest(ApiError {
            error: code.to_string(),
            detail: Some(detail.to_string()),
        })
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ResolveError> for AppError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

impl From<WizardError> for AppError {
    fn from(value: WizardError) -> Self {
        match value {
            WizardError::Store(err) => Self::Store(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::BadRequest(payload) => {
                return (StatusCode::BAD_REQUEST, Json(payload)).into_response();
            }
            AppError::Unauthorized(detail) => {
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string(), detail.to_string())
            }
            AppError::Conflict(code, detail) => (StatusCode::CONFLICT, code.to_string(), detail),
            AppError::Store(err) => {
                let (status, code) = match &err {
                    StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    StoreError::EmptyCart => (StatusCode::CONFLICT, "empty_cart"),
                    StoreError::InvalidTransition { .. } => {
                        (StatusCode::CONFLICT, "invalid_transition")
                    }
                    StoreError::Database(_) | StoreError::Migration(_) | StoreError::Corrupt(_) => {
                        error!(target = "marketbot.api", error = %err, "storage failure");
                        (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
                    }
                };
                (status, code.to_string(), err.to_string())
            }
            AppError::Resolve(err) => {
                let status = match err.kind() {
                    ResolveErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
                    ResolveErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                    ResolveErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.stage().to_string(), err.detail().to_string())
            }
            AppError::Internal(detail) => {
                error!(target = "marketbot.api", "internal error: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string(), detail)
            }
        };
        let payload = ApiError {
            error,
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use config::ScraperConfig;
    use std::time::Duration;
    use store::{OrderStatus, PaymentMethod};
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    // One process-wide recorder so handler counters land in what `/metrics` renders.
    fn shared_prometheus() -> PrometheusHandle {
        static HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();
        HANDLE
            .get_or_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .expect("install recorder")
            })
            .clone()
    }

    async fn app_with_limits(rate: f64, capacity: f64) -> (Router, Store) {
        let store = Store::in_memory().await.expect("store");
        let scraper = Scraper::new(ScraperConfig::default());
        let wizard = Wizard::new(
            store.clone(),
            scraper.clone(),
            Notifier::Log,
            WizardSettings::from(&BotConfig::default()),
        );
        let resolver = Resolver::new(scraper, store.clone());
        let (queue, _worker) = jobs::JobQueue::spawn(resolver.clone());
        let state = AppState {
            store: store.clone(),
            wizard: Arc::new(wizard),
            resolver,
            queue,
            openapi: Arc::new(load_openapi()),
            idempotency: IdempotencyCache::new(None, Duration::from_secs(60)),
            prometheus_handle: shared_prometheus(),
        };
        let auth = AuthState::for_tests(&format!("relay:{KEY}"), rate, capacity);
        (build_router(state, auth), store)
    }

    async fn app() -> (Router, Store) {
        app_with_limits(100.0, 100.0).await
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("X-Bot-Key", KEY)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get_authed(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
            .body(Body::empty())
            .expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn seed_order(store: &Store, user_id: i64) -> Order {
        store.ensure_user(user_id, Some("buyer")).await.expect("user");
        let product = store
            .create_product(&store::testing::product_info("Hoodie", 250_000))
            .await
            .expect("product");
        store
            .add_to_cart(user_id, product.id, 2, Some("M"), None)
            .await
            .expect("cart");
        store
            .create_order(user_id, "Pickup point 1", None, Some(PaymentMethod::Mir))
            .await
            .expect("order")
    }

    #[tokio::test]
    async fn health_and_docs_are_public() {
        let (app, _) = app().await;
        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).expect("req")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_sessions"], 0);

        let (status, body) =
            send(&app, Request::get("/openapi.json").body(Body::empty()).expect("req")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/chat/updates"].is_object());
    }

    #[tokio::test]
    async fn protected_routes_need_a_key() {
        let (app, _) = app().await;
        let request = Request::get("/users/1/cart").body(Body::empty()).expect("req");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_api_key");

        let request = Request::get("/users/1/cart")
            .header("X-Bot-Key", "wrong")
            .body(Body::empty())
            .expect("req");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_api_key");
    }

    #[tokio::test]
    async fn rate_limit_rejects_burst() {
        let (app, _) = app_with_limits(0.001, 1.0).await;
        let response = app
            .clone()
            .oneshot(get_authed("/users/1/cart"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-ratelimit-limit"));

        let response = app
            .clone()
            .oneshot(get_authed("/users/1/cart"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn chat_update_drives_the_wizard() {
        let (app, store) = app().await;
        let (status, body) = send(
            &app,
            post_json("/chat/updates", json!({"user": {"id": 42}, "text": "/start"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "awaiting_name");

        let (status, body) = send(
            &app,
            post_json("/chat/updates", json!({"user": {"id": 42}, "text": "Alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["reply"]["prompt"]["kind"], "main_menu");
        assert!(
            body["buttons"]
                .as_array()
                .expect("buttons")
                .contains(&json!("new_order"))
        );
        let user = store.get_user(42).await.expect("load").expect("user");
        assert_eq!(user.first_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn redelivered_update_is_replayed() {
        let (app, _) = app().await;
        let start = || {
            let mut request = post_json("/chat/updates", json!({"user": {"id": 7}, "text": "/start"}));
            request
                .headers_mut()
                .insert("Idempotency-Key", "upd-1".parse().expect("header"));
            request
        };
        let (_, first) = send(&app, start()).await;
        send(
            &app,
            post_json("/chat/updates", json!({"user": {"id": 7}, "callback_data": "new_order"})),
        )
        .await;
        let (status, replayed) = send(&app, start()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, replayed);
        assert_eq!(replayed["state"], "awaiting_name");
    }

    #[tokio::test]
    async fn malformed_updates_are_bad_requests() {
        let (app, _) = app().await;
        let (status, body) = send(&app, post_json("/chat/updates", json!({"user": {"id": 1}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "empty_update");

        let (status, body) = send(
            &app,
            post_json("/chat/updates", json!({"user": {"id": 1}, "callback_data": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown_action");
    }

    #[tokio::test]
    async fn resolve_maps_errors_to_status() {
        let (app, _) = app().await;
        let (status, body) = send(
            &app,
            post_json("/products/resolve", json!({"url": "https://example.com/item"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "classify");

        let (status, body) = send(
            &app,
            post_json("/products/resolve", json!({"url": "https://www.ozon.ru/product/9/"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "fetch_product");
    }

    #[tokio::test]
    async fn job_endpoints() {
        let (app, _) = app().await;
        let (status, body) = send(
            &app,
            post_json("/jobs/products", json!({"url": "https://www.ozon.ru/product/9/"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_str().expect("job id").to_string();

        let (status, body) = send(&app, get_authed(&format!("/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], job_id.as_str());

        let (status, body) = send(&app, get_authed("/jobs/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_job_id");

        let (status, _) = send(&app, get_authed(&format!("/jobs/{}", uuid::Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn order_endpoints_follow_lifecycle() {
        let (app, store) = app().await;
        let order = seed_order(&store, 9).await;

        let (status, body) = send(&app, get_authed(&format!("/orders/{}", order.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_amount"], 500_000);
        assert_eq!(body["items"].as_array().expect("items").len(), 1);

        let (status, body) = send(&app, get_authed("/users/9/orders")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().expect("orders").len(), 1);

        let (status, body) = send(&app, get_authed("/users/9/cart")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);

        let (status, body) = send(
            &app,
            post_json(&format!("/orders/{}/status", order.id), json!({"status": "shipped"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_transition");

        let (status, _) = send(&app, post_json(&format!("/users/10/orders/{}/cancel", order.id), json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, post_json(&format!("/users/9/orders/{}/cancel", order.id), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");

        let (status, body) = send(&app, post_json(&format!("/users/9/orders/{}/cancel", order.id), json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "order_not_cancellable");

        let (status, _) = send(&app, get_authed("/orders/999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn phone_update_reaches_known_users() {
        let (app, store) = app().await;
        store.ensure_user(21, Some("dora")).await.expect("user");

        let request = Request::put("/users/21/phone")
            .header("X-Bot-Key", KEY)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"phone": " +7 900 111-22-33 "}).to_string()))
            .expect("req");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phone"], "+7 900 111-22-33");
        let stored = store.get_user(21).await.expect("load").expect("user");
        assert_eq!(stored.phone.as_deref(), Some("+7 900 111-22-33"));

        let request = Request::put("/users/21/phone")
            .header("X-Bot-Key", KEY)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"phone": "  "}).to_string()))
            .expect("req");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_phone");

        let request = Request::put("/users/404/phone")
            .header("X-Bot-Key", KEY)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"phone": "+7 900"}).to_string()))
            .expect("req");
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_request_counters() {
        let (app, _) = app().await;
        let _ = send(
            &app,
            post_json("/products/resolve", json!({"url": "https://www.ozon.ru/product/9/"})),
        )
        .await;

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("req"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("body");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("marketbot_requests_total"));
        assert!(text.contains("route=\"/products/resolve\""));
        assert!(text.contains("marketbot_resolve_stage_ms"));
    }

    #[tokio::test]
    async fn status_change_advances_paid_orders() {
        let (app, store) = app().await;
        let order = seed_order(&store, 11).await;
        store.confirm_payment(11, order.id).await.expect("paid");
        let (status, body) = send(
            &app,
            post_json(&format!("/orders/{}/status", order.id), json!({"status": "shipped"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "shipped");
        let stored = store.get_order(order.id).await.expect("load").expect("order");
        assert_eq!(stored.status, OrderStatus::Shipped);
    }
}
