use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use enneagram_api::{
    CreateTeamRequest, EnneagramApi, JoinTeamRequest, JoinTeamResult, MigrateResult,
    QuestionnaireFile, SetMemberRoleRequest, SubmitRequest, TeamMemberView, TeamMembersView,
    TeamResultsView, TeamSummary, API_CONTRACT_VERSION,
};
use enneagram_core::{CoreError, PrincipalId, Questionnaire, ResultRecord, Scope, Team, TeamId};
use enneagram_store_sqlite::SchemaStatus;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};
use ulid::Ulid;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const PRINCIPAL_HEADER: &str = "x-principal-id";

#[derive(Debug, Clone)]
struct ServiceState {
    api: EnneagramApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScopeQuery {
    team_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct LatestResponse {
    result: Option<ResultRecord>,
}

#[derive(Debug, Clone, Serialize)]
struct TeamsResponse {
    teams: Vec<TeamSummary>,
}

#[derive(Debug, Parser)]
#[command(name = "enneagram-service")]
#[command(about = "Local HTTP service for Enneagram assessments")]
struct Args {
    #[arg(long, default_value = "./enneagram.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// YAML questionnaire definition; the built-in questionnaire is used when omitted.
    #[arg(long)]
    questionnaire: Option<PathBuf>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not found")
    }

    /// Classify an API failure by the core error it carries.
    fn from_api(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<CoreError>() {
            Some(CoreError::MalformedInput(_) | CoreError::Validation(_)) => {
                Self::bad_request(format!("{err:#}"))
            }
            Some(CoreError::AccessDenied) => Self::not_found(),
            Some(CoreError::UpstreamUnavailable(_)) => {
                tracing::warn!(error = %format!("{err:#}"), "membership registry unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable")
            }
            None => {
                tracing::error!(error = %format!("{err:#}"), "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

/// Principal asserted by the upstream identity proxy.
fn principal_from(headers: &HeaderMap) -> Result<PrincipalId, ServiceError> {
    let unauthorized = || ServiceError::new(StatusCode::UNAUTHORIZED, "missing principal");
    let raw = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(unauthorized)?;
    PrincipalId::parse(raw).map_err(|_| unauthorized())
}

fn parse_team_id(raw: &str) -> Result<TeamId, ServiceError> {
    Ulid::from_string(raw)
        .map(TeamId)
        .map_err(|err| ServiceError::bad_request(format!("invalid team id {raw}: {err}")))
}

fn parse_principal(raw: &str) -> Result<PrincipalId, ServiceError> {
    PrincipalId::parse(raw).map_err(|err| ServiceError::bad_request(err.to_string()))
}

fn parse_scope(query: &ScopeQuery) -> Result<Scope, ServiceError> {
    Ok(Scope::from_team(query.team_id.as_deref().map(parse_team_id).transpose()?))
}

/// Body extraction failures, including answers outside the Likert range, are bad requests.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ServiceError::bad_request(rejection.body_text()))
}

/// Run a store-backed API call off the async workers.
async fn call_api<T, F>(state: &ServiceState, call: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce(&EnneagramApi) -> Result<T> + Send + 'static,
{
    let api = state.api.clone();
    match tokio::task::spawn_blocking(move || call(&api)).await {
        Ok(result) => result.map_err(|err| ServiceError::from_api(&err)),
        Err(err) => {
            tracing::error!(error = %err, "api task failed");
            Err(ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/questionnaire", get(questionnaire_show))
        .route("/v1/results", post(result_submit))
        .route("/v1/results/me", get(result_latest))
        .route("/v1/teams", get(team_list).post(team_create))
        .route("/v1/teams/join", post(team_join))
        .route("/v1/teams/:team_id/members", get(team_members))
        .route("/v1/teams/:team_id/members/:user_id/role", post(team_set_role))
        .route("/v1/teams/:team_id/results", get(team_results))
        .route("/v1/teams/:team_id/results/:user_id", get(team_member_result))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let questionnaire = match args.questionnaire.as_deref() {
        Some(path) => QuestionnaireFile::from_file(path)?,
        None => Questionnaire::builtin()?,
    };
    let state = ServiceState { api: EnneagramApi::with_questionnaire(args.db, questionnaire) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "enneagram service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = call_api(&state, EnneagramApi::schema_status).await?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    body: Result<Json<MigrateRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let request = json_body(body)?;
    let result = call_api(&state, move |api| api.migrate(request.dry_run)).await?;
    Ok(Json(envelope(result)))
}

async fn questionnaire_show(
    State(state): State<ServiceState>,
) -> Json<ServiceEnvelope<QuestionnaireFile>> {
    Json(envelope(QuestionnaireFile::from(state.api.questionnaire())))
}

async fn result_submit(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<ResultRecord>>, ServiceError> {
    let principal = principal_from(&headers)?;
    let request = json_body(body)?;
    let record = call_api(&state, move |api| api.submit(&principal, request)).await?;
    Ok(Json(envelope(record)))
}

async fn result_latest(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<ServiceEnvelope<LatestResponse>>, ServiceError> {
    let principal = principal_from(&headers)?;
    let scope = parse_scope(&query)?;
    let result = call_api(&state, move |api| api.my_latest(&principal, scope)).await?;
    Ok(Json(envelope(LatestResponse { result })))
}

async fn team_list(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<ServiceEnvelope<TeamsResponse>>, ServiceError> {
    let principal = principal_from(&headers)?;
    let teams = call_api(&state, move |api| api.list_my_teams(&principal)).await?;
    Ok(Json(envelope(TeamsResponse { teams })))
}

async fn team_create(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Result<Json<CreateTeamRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<Team>>, ServiceError> {
    let owner = principal_from(&headers)?;
    let request = json_body(body)?;
    let team = call_api(&state, move |api| api.create_team(&owner, request)).await?;
    Ok(Json(envelope(team)))
}

async fn team_join(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Result<Json<JoinTeamRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<JoinTeamResult>>, ServiceError> {
    let principal = principal_from(&headers)?;
    let request = json_body(body)?;
    let joined = call_api(&state, move |api| api.join_team(&principal, request)).await?;
    Ok(Json(envelope(joined)))
}

async fn team_members(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(team_id): Path<String>,
) -> Result<Json<ServiceEnvelope<TeamMembersView>>, ServiceError> {
    let requester = principal_from(&headers)?;
    let team_id = parse_team_id(&team_id)?;
    let view = call_api(&state, move |api| api.team_members(&requester, team_id)).await?;
    Ok(Json(envelope(view)))
}

async fn team_set_role(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path((team_id, user_id)): Path<(String, String)>,
    body: Result<Json<SetMemberRoleRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<TeamMemberView>>, ServiceError> {
    let requester = principal_from(&headers)?;
    let team_id = parse_team_id(&team_id)?;
    let user = parse_principal(&user_id)?;
    let request = json_body(body)?;
    let member =
        call_api(&state, move |api| api.set_member_role(&requester, team_id, &user, request))
            .await?;
    Ok(Json(envelope(member)))
}

async fn team_results(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(team_id): Path<String>,
) -> Result<Json<ServiceEnvelope<TeamResultsView>>, ServiceError> {
    let requester = principal_from(&headers)?;
    let team_id = parse_team_id(&team_id)?;
    let view = call_api(&state, move |api| api.team_results(&requester, team_id)).await?;
    Ok(Json(envelope(view)))
}

async fn team_member_result(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path((team_id, user_id)): Path<(String, String)>,
) -> Result<Json<ServiceEnvelope<ResultRecord>>, ServiceError> {
    let requester = principal_from(&headers)?;
    let scope = Scope::Team(parse_team_id(&team_id)?);
    let respondent = parse_principal(&user_id)?;
    let record =
        call_api(&state, move |api| api.view_result(&requester, &respondent, scope)).await?;
    Ok(Json(envelope(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("enneagram-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_router(db_path: PathBuf) -> Router {
        let api = match EnneagramApi::new(db_path) {
            Ok(api) => api,
            Err(err) => panic!("failed to build api: {err}"),
        };
        app(ServiceState { api })
    }

    async fn response_json(response: Response) -> Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        principal: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri).method(method);
        if let Some(principal) = principal {
            builder = builder.header(PRINCIPAL_HEADER, principal);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string())),
            None => builder.body(axum::body::Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        let response = match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        let status = response.status();
        (status, response_json(response).await)
    }

    fn data_str<'a>(value: &'a Value, pointer: &str) -> &'a str {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_else(|| panic!("missing {pointer} in response: {value}"))
    }

    /// Two items per slot; slot 3 items answered with 4, the rest with 5.
    fn builtin_answers() -> Value {
        let questionnaire = match Questionnaire::builtin() {
            Ok(questionnaire) => questionnaire,
            Err(err) => panic!("builtin questionnaire should be valid: {err}"),
        };
        let mut answers = serde_json::Map::new();
        for item in questionnaire.items() {
            let value = if item.type_slot.get() == 3 { 4 } else { 5 };
            answers.insert(item.id.to_string(), Value::from(value));
        }
        Value::Object(answers)
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = test_router(unique_temp_db_path());
        let (status, value) = send(&router, "GET", "/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(data_str(&value, "/data/status"), "ok");
    }

    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = test_router(unique_temp_db_path());
        let response = match router
            .oneshot(
                Request::builder()
                    .uri("/v1/openapi")
                    .method("GET")
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/teams/{team_id}/results"));
        assert!(body.contains("x-principal-id"));
    }

    #[tokio::test]
    async fn requests_without_principal_are_unauthorized() {
        let router = test_router(unique_temp_db_path());
        let (status, value) = send(&router, "GET", "/v1/teams", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(data_str(&value, "/error"), "missing principal");

        let (status, _) = send(&router, "GET", "/v1/results/me", Some("   "), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn questionnaire_endpoint_lists_builtin_items() {
        let router = test_router(unique_temp_db_path());
        let (status, value) = send(&router, "GET", "/v1/questionnaire", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value.pointer("/data/items").and_then(Value::as_array).map(Vec::len), Some(18));
    }

    #[tokio::test]
    async fn team_flow_maps_denials_to_not_found() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let (status, created) = send(
            &router,
            "POST",
            "/v1/teams",
            Some("owner"),
            Some(serde_json::json!({ "name": "T1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let team_id = data_str(&created, "/data/team_id").to_string();
        let join_code = data_str(&created, "/data/join_code").to_string();
        let report_uri = format!("/v1/teams/{team_id}/results");
        let u1_result_uri = format!("/v1/teams/{team_id}/results/u1");

        let (status, joined) = send(
            &router,
            "POST",
            "/v1/teams/join",
            Some("u1"),
            Some(serde_json::json!({ "join_code": join_code })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined.pointer("/data/created"), Some(&Value::Bool(true)));

        let (status, submitted) = send(
            &router,
            "POST",
            "/v1/results",
            Some("u1"),
            Some(serde_json::json!({ "answers": builtin_answers(), "team_id": team_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted.pointer("/data/outcome/type_slot"), Some(&Value::from(1)));
        assert_eq!(submitted.pointer("/data/outcome/affinity_percent"), Some(&Value::from(100)));

        let (status, report) = send(&router, "GET", &report_uri, Some("owner"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_str(&report, "/data/requester_role"), "owner");
        let results = report.pointer("/data/results").and_then(Value::as_array);
        assert_eq!(results.map(Vec::len), Some(1));

        let (status, denied) = send(&router, "GET", &report_uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(data_str(&denied, "/error"), "not found");

        let (status, stranger) = send(&router, "GET", &u1_result_uri, Some("u2"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, missing) =
            send(&router, "GET", &format!("/v1/teams/{team_id}/results/u3"), Some("owner"), None)
                .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(stranger, missing);

        let (status, visible) = send(&router, "GET", &u1_result_uri, Some("owner"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(visible.pointer("/data/result_id"), submitted.pointer("/data/result_id"));

        let (status, latest) = send(
            &router,
            "GET",
            &format!("/v1/results/me?team_id={team_id}"),
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest.pointer("/data/result/result_id"), submitted.pointer("/data/result_id"));

        let (status, _) = send(
            &router,
            "POST",
            &format!("/v1/teams/{team_id}/members/u1/role"),
            Some("u1"),
            Some(serde_json::json!({ "role": "manager" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, promoted) = send(
            &router,
            "POST",
            &format!("/v1/teams/{team_id}/members/u1/role"),
            Some("owner"),
            Some(serde_json::json!({ "role": "manager" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_str(&promoted, "/data/role"), "manager");

        let (status, _) = send(&router, "GET", &report_uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, members) =
            send(&router, "GET", &format!("/v1/teams/{team_id}/members"), Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_str(&members, "/data/members/0/role"), "owner");

        let (status, teams) = send(&router, "GET", "/v1/teams", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_str(&teams, "/data/teams/0/role"), "manager");

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn malformed_requests_are_bad_requests() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let (status, value) = send(
            &router,
            "POST",
            "/v1/results",
            Some("u1"),
            Some(serde_json::json!({ "answers": { "1": 5, "2": 4 } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(data_str(&value, "/error").contains("incomplete"));

        let (status, _) =
            send(&router, "GET", "/v1/teams/not-a-ulid/results", Some("u1"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            "POST",
            "/v1/teams/join",
            Some("u1"),
            Some(serde_json::json!({ "join_code": "ZZZ-ZZZ" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            "POST",
            "/v1/teams",
            Some("owner"),
            Some(serde_json::json!({ "name": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn migrate_endpoint_supports_dry_run() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let (status, planned) = send(
            &router,
            "POST",
            "/v1/db/migrate",
            None,
            Some(serde_json::json!({ "dry_run": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(planned.pointer("/data/would_apply_versions"), Some(&serde_json::json!([1, 2])));

        let (status, applied) = send(
            &router,
            "POST",
            "/v1/db/migrate",
            None,
            Some(serde_json::json!({ "dry_run": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(applied.pointer("/data/up_to_date"), Some(&Value::Bool(true)));

        let (status, schema) = send(&router, "POST", "/v1/db/schema-version", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(schema.pointer("/data/current_version"), Some(&Value::from(2)));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn out_of_range_answer_is_a_bad_request_with_envelope() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let mut answers = builtin_answers();
        answers["1"] = Value::from(7);
        let (status, value) = send(
            &router,
            "POST",
            "/v1/results",
            Some("u1"),
            Some(serde_json::json!({ "answers": answers })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert!(data_str(&value, "/error").contains("MUST be in 1..=5, got 7"));

        let (status, latest) = send(&router, "GET", "/v1/results/me", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest.pointer("/data/result"), Some(&Value::Null));

        let (status, value) = send(
            &router,
            "POST",
            "/v1/teams/join",
            Some("u1"),
            Some(serde_json::json!({ "code": "ABC-DEF" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn membership_store_outage_is_service_unavailable() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let (status, created) = send(
            &router,
            "POST",
            "/v1/teams",
            Some("owner"),
            Some(serde_json::json!({ "name": "T1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let team_id = data_str(&created, "/data/team_id").to_string();
        let join_code = data_str(&created, "/data/join_code").to_string();
        let (status, _) = send(
            &router,
            "POST",
            "/v1/teams/join",
            Some("u1"),
            Some(serde_json::json!({ "join_code": join_code })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let conn = rusqlite::Connection::open(&db_path)
            .unwrap_or_else(|err| panic!("failed to open fixture database: {err}"));
        conn.execute_batch("ALTER TABLE team_members RENAME TO team_members_offline;")
            .unwrap_or_else(|err| panic!("failed to take membership table offline: {err}"));
        drop(conn);

        let (status, value) = send(
            &router,
            "POST",
            "/v1/results",
            Some("u1"),
            Some(serde_json::json!({ "answers": builtin_answers(), "team_id": team_id })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(data_str(&value, "/error"), "upstream unavailable");

        let (status, latest) = send(
            &router,
            "GET",
            &format!("/v1/results/me?team_id={team_id}"),
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest.pointer("/data/result"), Some(&Value::Null));

        let (status, _) = send(
            &router,
            "GET",
            &format!("/v1/teams/{team_id}/results/u1"),
            Some("u2"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let _ = std::fs::remove_file(&db_path);
    }
}
