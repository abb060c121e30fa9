use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgPool;

use crate::auth::{self, SESSION_TTL, SessionService};
use crate::config::ServiceConfig;
use crate::error::{ErrorKind, LibError};
use crate::graph::{GraphService, RelationWriteAction};
use crate::models::{
    BackgroundPayload, DeleteRelationPayload, LoginPayload, NewPersonPayload, RelationPayload,
};
use crate::rate_limit::{RateLimiter, RatePolicy};
#[cfg(feature = "render")]
use crate::render::{ChromiumRenderer, GraphRenderer, ImageFormat, RenderStyle};
use crate::validate::{FieldRule, FieldType, Schema, parse_person_id};

const ADD_NODE_RATE: RatePolicy = RatePolicy::per_minute(30);
const ADD_EDGE_RATE: RatePolicy = RatePolicy::per_minute(50);
const UPDATE_EDGE_RATE: RatePolicy = RatePolicy::per_minute(20);
const DELETE_EDGE_RATE: RatePolicy = RatePolicy::per_minute(20);
const BACKGROUND_RATE: RatePolicy = RatePolicy::per_minute(20);
const LOGIN_RATE: RatePolicy = RatePolicy::new(10, Duration::from_secs(300));

const ADD_NODE_SCHEMA: Schema = Schema::new(&[
    FieldRule::new("name")
        .required()
        .typed(FieldType::String)
        .max_length(100),
    FieldRule::new("description")
        .typed(FieldType::String)
        .max_length(500),
    FieldRule::new("gender").typed(FieldType::String).max_length(16),
]);

const EDGE_SCHEMA: Schema = Schema::new(&[
    FieldRule::new("from").required(),
    FieldRule::new("to").required(),
    FieldRule::new("source").typed(FieldType::String).max_length(200),
]);

const DELETE_EDGE_SCHEMA: Schema = Schema::new(&[
    FieldRule::new("from").required(),
    FieldRule::new("to").required(),
]);

const LOGIN_SCHEMA: Schema = Schema::new(&[
    FieldRule::new("username")
        .required()
        .typed(FieldType::String)
        .max_length(100),
    FieldRule::new("password")
        .required()
        .typed(FieldType::String)
        .max_length(100),
]);

const BACKGROUND_SCHEMA: Schema = Schema::new(&[
    FieldRule::new("id").required(),
    FieldRule::new("birthYear").range(1000.0, 2100.0),
    FieldRule::new("body").typed(FieldType::String).max_length(1000),
]);

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Render => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, error = %self.0.source, "request failed");
        } else {
            tracing::debug!(kind = ?self.0.kind, error = %self.0.source, "request rejected");
        }

        let mut body = json!({
            "error": self.0.code,
            "message": self.0.public,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(details) = &self.0.details {
            body["details"] = json!(details);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.0.retry_after
            && let Ok(value) = retry_after.to_string().parse()
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<ServiceConfig>,
    graph: GraphService,
    sessions: SessionService,
    limiter: RateLimiter,
    #[cfg(feature = "render")]
    renderer: Arc<dyn GraphRenderer>,
}

impl AppState {
    pub fn new(config: ServiceConfig, pool: Arc<PgPool>) -> Self {
        let graph = GraphService::new(pool, config.edge_conflict);
        let sessions = SessionService::in_memory(config.admin.clone());
        Self {
            config: Arc::new(config),
            graph,
            sessions,
            limiter: RateLimiter::in_memory(),
            #[cfg(feature = "render")]
            renderer: Arc::new(ChromiumRenderer::new()),
        }
    }

    #[cfg(feature = "render")]
    pub fn with_renderer(mut self, renderer: Arc<dyn GraphRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    /// Hourly eviction of expired sessions and idle rate-limit
    /// windows.
    pub fn spawn_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let sessions = self.sessions.clone();
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
            interval.tick().await;
            loop {
                interval.tick().await;
                sessions.sweep();
                limiter.sweep();
            }
        })
    }

    fn require_api_key(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<(), AppError> {
        auth::check_api_key(self.config.api_key.as_deref(), api_key_from(headers, query))?;
        Ok(())
    }

    fn require_session(&self, headers: &HeaderMap) -> Result<String, AppError> {
        let token = session_token_from(headers).ok_or_else(|| {
            AppError(LibError::unauthorized(
                "Session token required",
                anyhow!("request carried no session token"),
            ))
        })?;
        self.sessions.verify(&token)?;
        Ok(token)
    }

    /// Combined guard: a present session token wins and must be valid;
    /// otherwise the static key is accepted.
    fn require_session_or_key(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<(), AppError> {
        if session_token_from(headers).is_some() {
            self.require_session(headers).map(|_| ())
        } else {
            self.require_api_key(headers, query)
        }
    }

    fn enforce_rate(
        &self,
        scope: &str,
        headers: &HeaderMap,
        client_addr: &SocketAddr,
        policy: RatePolicy,
    ) -> Result<(), AppError> {
        let client = client_identity(headers, client_addr);
        self.limiter.enforce(scope, &client, policy)?;
        Ok(())
    }
}

fn api_key_from<'a>(headers: &'a HeaderMap, query: &'a HashMap<String, String>) -> Option<&'a str> {
    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .or_else(|| query.get("key").map(String::as_str))
}

fn session_token_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-session-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn client_identity(headers: &HeaderMap, client_addr: &SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        && let Some(first) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty())
    {
        return first.to_string();
    }
    client_addr.ip().to_string()
}

fn accept_json(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    let Json(value) = payload.map_err(|rejection| {
        AppError(LibError::invalid(
            "Request body must be valid JSON",
            anyhow!("json rejection: {}", rejection),
        ))
    })?;
    Ok(value)
}

fn decode<T: serde::de::DeserializeOwned>(schema: Schema, value: Value) -> Result<T, AppError> {
    schema.validate(&value)?;
    serde_json::from_value(value).map_err(|err| {
        AppError(LibError::invalid(
            "Request body has an unexpected shape",
            anyhow!(err),
        ))
    })
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn get_graph(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let view = state.graph.graph_view().await?;
    Ok(Json(json!({
        "success": true,
        "nodes": view.nodes,
        "edges": view.edges,
        "counts": view.counts,
    })))
}

async fn get_persons(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let persons = state.graph.list_persons().await?;
    Ok(Json(json!({
        "success": true,
        "persons": persons,
    })))
}

async fn node_relations_response(state: &AppState, raw_id: &str) -> Result<Json<Value>, AppError> {
    let person_id = parse_person_id(&Value::String(raw_id.to_string()), "id")?;
    let report = state.graph.node_relations(person_id).await?;
    Ok(Json(json!({
        "success": true,
        "person": report.person,
        "relations": report.relations,
        "neighbors": report.neighbors,
        "degree": report.degree,
    })))
}

async fn person_relations_by_path(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    node_relations_response(&state, &raw_id).await
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

async fn person_relations_by_query(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Value>, AppError> {
    let raw_id = query.id.ok_or_else(|| {
        AppError(LibError::invalid(
            "Query parameter 'id' is required",
            anyhow!("missing id query parameter"),
        ))
    })?;
    node_relations_response(&state, &raw_id).await
}

async fn get_background(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Value>, AppError> {
    let raw_id = query.id.ok_or_else(|| {
        AppError(LibError::invalid(
            "Query parameter 'id' is required",
            anyhow!("missing id query parameter"),
        ))
    })?;
    let person_id = parse_person_id(&Value::String(raw_id), "id")?;
    let background = state.graph.get_background(person_id).await?;
    Ok(Json(json!({
        "success": true,
        "background": background,
    })))
}

async fn post_background(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.require_api_key(&headers, &query)?;
    state.enforce_rate(
        "background",
        &headers,
        &client_addr,
        BACKGROUND_RATE,
    )?;

    let value = accept_json(payload)?;
    let payload: BackgroundPayload = decode(BACKGROUND_SCHEMA, value)?;
    let background = state.graph.upsert_background(payload.normalize()?).await?;
    Ok(Json(json!({
        "success": true,
        "background": background,
    })))
}

async fn add_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    state.require_api_key(&headers, &query)?;
    state.enforce_rate("addNode", &headers, &client_addr, ADD_NODE_RATE)?;

    let value = accept_json(payload)?;
    let payload: NewPersonPayload = decode(ADD_NODE_SCHEMA, value)?;
    let person = state.graph.add_person(payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "id": person.id,
            "person": person,
        })),
    ))
}

async fn add_edge(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    state.require_api_key(&headers, &query)?;
    state.enforce_rate("addEdge", &headers, &client_addr, ADD_EDGE_RATE)?;

    let value = accept_json(payload)?;
    let payload: RelationPayload = decode(EDGE_SCHEMA, value)?;
    let write = state.graph.add_or_update_relation(payload).await?;

    let status = match write.action {
        RelationWriteAction::Created => StatusCode::CREATED,
        RelationWriteAction::Updated => StatusCode::OK,
    };
    Ok((
        status,
        Json(json!({
            "success": true,
            "action": write.action,
            "relation": write.relation,
        })),
    ))
}

async fn update_edge(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.require_session_or_key(&headers, &query)?;
    state.enforce_rate(
        "updateEdge",
        &headers,
        &client_addr,
        UPDATE_EDGE_RATE,
    )?;

    let value = accept_json(payload)?;
    let payload: RelationPayload = decode(EDGE_SCHEMA, value)?;
    let relation = state.graph.update_relation(payload).await?;
    Ok(Json(json!({
        "success": true,
        "relation": relation,
    })))
}

async fn delete_edge(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.require_api_key(&headers, &query)?;
    state.enforce_rate(
        "deleteEdge",
        &headers,
        &client_addr,
        DELETE_EDGE_RATE,
    )?;

    let value = accept_json(payload)?;
    let payload: DeleteRelationPayload = decode(DELETE_EDGE_SCHEMA, value)?;
    let pair = state.graph.delete_relation(payload).await?;
    Ok(Json(json!({
        "success": true,
        "deleted": { "from": pair.lo(), "to": pair.hi() },
    })))
}

async fn admin_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.enforce_rate("login", &headers, &client_addr, LOGIN_RATE)?;

    let value = accept_json(payload)?;
    let payload: LoginPayload = decode(LOGIN_SCHEMA, value)?;
    let (token, entry) = state
        .sessions
        .login(&payload.username, &payload.password)
        .await?;

    Ok(Json(json!({
        "success": true,
        "token": token,
        "username": entry.username,
        "expiresAt": (entry.created_at + SESSION_TTL).to_rfc3339(),
    })))
}

async fn admin_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let token = state.require_session(&headers)?;
    state.sessions.logout(&token);
    Ok(Json(json!({ "success": true })))
}

async fn admin_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let token = state.require_session(&headers)?;
    let entry = state.sessions.verify(&token)?;
    Ok(Json(json!({
        "success": true,
        "username": entry.username,
        "createdAt": entry.created_at.to_rfc3339(),
    })))
}

#[cfg(feature = "render")]
#[derive(Debug, Deserialize)]
struct RenderQuery {
    width: Option<f64>,
    nodesize: Option<f64>,
    fontsize: Option<f64>,
    opacity: Option<f64>,
}

#[cfg(feature = "render")]
impl RenderQuery {
    fn style(&self) -> RenderStyle {
        let defaults = RenderStyle::default();
        RenderStyle {
            line_width: self.width.unwrap_or(defaults.line_width),
            node_size: self.nodesize.unwrap_or(defaults.node_size),
            font_size: self.fontsize.unwrap_or(defaults.font_size),
            opacity: self.opacity.unwrap_or(defaults.opacity),
        }
        .clamped()
    }
}

#[cfg(feature = "render")]
async fn render_graph_image(
    state: &AppState,
    query: &RenderQuery,
    format: ImageFormat,
) -> Result<Response, AppError> {
    let view = state.graph.graph_view().await?;
    let bytes = state.renderer.render(&view, query.style(), format).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", format.file_name()),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(feature = "render")]
async fn render_png(
    State(state): State<AppState>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, AppError> {
    render_graph_image(&state, &query, ImageFormat::Png).await
}

#[cfg(feature = "render")]
async fn render_jpg(
    State(state): State<AppState>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, AppError> {
    render_graph_image(&state, &query, ImageFormat::Jpeg).await
}

pub fn routes(state: AppState) -> Router {
    tracing::info!("Registering route /api/graph [GET]");
    tracing::info!("Registering route /api/persons [GET]");
    tracing::info!("Registering route /api/person/{{id}}/relations [GET]");
    tracing::info!("Registering route /api/relations [GET]");
    tracing::info!("Registering route /api/background [GET,POST]");
    tracing::info!("Registering route /api/addNode [POST]");
    tracing::info!("Registering route /api/addEdge [POST]");
    tracing::info!("Registering route /api/updateEdge [PUT]");
    tracing::info!("Registering route /api/deleteEdge [DELETE]");
    tracing::info!("Registering route /api/admin/{{login,logout,verify}}");

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/graph", get(get_graph))
        .route("/api/persons", get(get_persons))
        .route("/api/person/{id}/relations", get(person_relations_by_path))
        .route("/api/relations", get(person_relations_by_query))
        .route("/api/background", get(get_background).post(post_background))
        .route("/api/addNode", post(add_node))
        .route("/api/addEdge", post(add_edge))
        .route("/api/updateEdge", put(update_edge))
        .route("/api/deleteEdge", delete(delete_edge))
        .route("/api/admin/login", post(admin_login))
        .route("/api/admin/logout", post(admin_logout))
        .route("/api/admin/verify", get(admin_verify));

    #[cfg(feature = "render")]
    let router = {
        tracing::info!("Registering route /custom.png, /custom.jpg [GET]");
        router
            .route("/custom.png", get(render_png))
            .route("/custom.jpg", get(render_jpg))
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::AdminCredentials;
    use crate::graph::EdgeConflictPolicy;

    fn test_config(api_key: Option<&str>, admin: Option<AdminCredentials>) -> ServiceConfig {
        ServiceConfig {
            database_url: "postgres://localhost/relgraph-test".to_string(),
            bind: "127.0.0.1:0".parse().expect("valid bind"),
            api_key: api_key.map(str::to_string),
            admin,
            edge_conflict: EdgeConflictPolicy::Upsert,
            max_db_connections: 1,
        }
    }

    /// Lazy pool: guard and validation paths never touch the database,
    /// so no live Postgres is needed for these tests.
    fn test_state(config: ServiceConfig) -> AppState {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        AppState::new(config, Arc::new(pool))
    }

    fn app(api_key: Option<&str>, admin: Option<AdminCredentials>) -> Router {
        let addr: SocketAddr = "127.0.0.1:7777".parse().expect("addr");
        routes(test_state(test_config(api_key, admin))).layer(MockConnectInfo(addr))
    }

    async fn response_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("body is json")
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let response = app(Some("secret"), None)
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_node_without_key_is_unauthorized() {
        let response = app(Some("secret"), None)
            .oneshot(json_request("POST", "/api/addNode", json!({"name": "Alice"})))
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response_json(response).await;
        assert_eq!(body["error"], "unauthorized");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn add_node_with_wrong_key_is_forbidden() {
        let mut request = json_request("POST", "/api/addNode", json!({"name": "Alice"}));
        request
            .headers_mut()
            .insert("x-api-key", "wrong".parse().expect("header"));

        let response = app(Some("secret"), None)
            .oneshot(request)
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unconfigured_key_is_a_server_error_not_auth_failure() {
        let mut request = json_request("POST", "/api/addNode", json!({"name": "Alice"}));
        request
            .headers_mut()
            .insert("x-api-key", "anything".parse().expect("header"));

        let response = app(None, None).oneshot(request).await.expect("router");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response_json(response).await;
        assert_eq!(body["error"], "server_misconfigured");
    }

    #[tokio::test]
    async fn key_is_accepted_via_query_parameter() {
        // Passes the guard, then fails validation before any database
        // access.
        let response = app(Some("secret"), None)
            .oneshot(json_request(
                "POST",
                "/api/addNode?key=secret",
                json!({"description": "no name"}),
            ))
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_json(response).await;
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["details"], json!(["Field 'name' is required"]));
    }

    #[tokio::test]
    async fn validation_reports_every_violation() {
        let mut request = json_request(
            "POST",
            "/api/addNode",
            json!({"name": 7, "description": "x".repeat(501)}),
        );
        request
            .headers_mut()
            .insert("x-api-key", "secret".parse().expect("header"));

        let response = app(Some("secret"), None)
            .oneshot(request)
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_json(response).await;
        let details = body["details"].as_array().expect("details array");
        assert_eq!(details.len(), 2);
    }

    #[tokio::test]
    async fn malformed_json_produces_the_error_envelope() {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/addNode")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        request
            .headers_mut()
            .insert("x-api-key", "secret".parse().expect("header"));

        let response = app(Some("secret"), None)
            .oneshot(request)
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_json(response).await;
        assert_eq!(body["error"], "invalid_input");
        assert_eq!(body["message"], "Request body must be valid JSON");
    }

    #[tokio::test]
    async fn add_edge_rejects_self_loops_before_touching_storage() {
        let mut request = json_request(
            "POST",
            "/api/addEdge",
            json!({"from": "1", "to": "1"}),
        );
        request
            .headers_mut()
            .insert("x-api-key", "secret".parse().expect("header"));

        let response = app(Some("secret"), None)
            .oneshot(request)
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_json(response).await;
        assert_eq!(body["message"], "A person cannot relate to themselves");
    }

    #[tokio::test]
    async fn add_edge_rejects_out_of_range_ids() {
        let mut request = json_request(
            "POST",
            "/api/addEdge",
            json!({"from": "2147483648", "to": "2"}),
        );
        request
            .headers_mut()
            .insert("x-api-key", "secret".parse().expect("header"));

        let response = app(Some("secret"), None)
            .oneshot(request)
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_json(response).await;
        assert_eq!(body["message"], "Invalid person ID");
    }

    #[tokio::test]
    async fn update_edge_requires_a_credential() {
        let response = app(Some("secret"), None)
            .oneshot(json_request(
                "PUT",
                "/api/updateEdge",
                json!({"from": 1, "to": 2}),
            ))
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_rate_limit_returns_retry_after() {
        // No admin is configured, so each attempt fails fast with a
        // server error until the ceiling trips.
        let router = app(Some("secret"), None);

        for _ in 0..10 {
            let response = router
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/api/admin/login",
                    json!({"username": "admin", "password": "pw"}),
                ))
                .await
                .expect("router");
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/admin/login",
                json!({"username": "admin", "password": "pw"}),
            ))
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        let body = response_json(response).await;
        assert_eq!(body["error"], "rate_limited");
    }

    #[tokio::test]
    async fn session_lifecycle_login_verify_logout() {
        let admin = AdminCredentials {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        let router = app(Some("secret"), Some(admin));

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/admin/login",
                json!({"username": "admin", "password": "hunter2"}),
            ))
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        let token = body["token"].as_str().expect("token").to_string();

        let verify = Request::builder()
            .uri("/api/admin/verify")
            .header("x-session-token", &token)
            .body(Body::empty())
            .expect("request");
        let response = router.clone().oneshot(verify).await.expect("router");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["username"], "admin");

        let logout = Request::builder()
            .method("POST")
            .uri("/api/admin/logout")
            .header("x-session-token", &token)
            .body(Body::empty())
            .expect("request");
        let response = router.clone().oneshot(logout).await.expect("router");
        assert_eq!(response.status(), StatusCode::OK);

        let verify_again = Request::builder()
            .uri("/api/admin/verify")
            .header("x-session-token", &token)
            .body(Body::empty())
            .expect("request");
        let response = router.oneshot(verify_again).await.expect("router");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn relations_query_requires_an_id() {
        let response = app(Some("secret"), None)
            .oneshot(
                Request::builder()
                    .uri("/api/relations")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn relations_query_rejects_malformed_ids() {
        for bad in ["0", "-1", "abc", "2147483648"] {
            let response = app(Some("secret"), None)
                .oneshot(
                    Request::builder()
                        .uri(format!("/api/relations?id={bad}"))
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("router");
            assert_eq!(
                response.status(),
                StatusCode::BAD_REQUEST,
                "id '{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn client_identity_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.9, 10.0.0.1".parse().expect("header"),
        );
        let addr: SocketAddr = "127.0.0.1:9999".parse().expect("addr");

        assert_eq!(client_identity(&headers, &addr), "203.0.113.9");
        assert_eq!(client_identity(&HeaderMap::new(), &addr), "127.0.0.1");
    }
}
