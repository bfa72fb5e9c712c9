use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{
        Path, Request, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};

use crate::auth::{AuthError, AuthUser, IdentityProvider};
use menuplan_core::error::PlannerError;
use menuplan_core::models::{
    MealSelection, Menu, MenuDetail, NewUser, ProfileUpdate, Recipe, RecipeDetail, ShoppingList,
    ShoppingListItem, User,
};
use menuplan_core::service::PlannerService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct AppState {
    pub service: PlannerService,
    pub identity: Arc<dyn IdentityProvider>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct RegenerateRequest {
    modificacion: String,
}

#[derive(Serialize)]
struct Envelope<T> {
    message: String,
    data: T,
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn reply<T: Serialize>(message: impl Into<String>, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        message: message.into(),
        data,
    })
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

// --- Error handling ---

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Upstream {
        message: String,
        details: serde_json::Value,
    },
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            Self::Upstream { message, details } => {
                warn!(%message, "upstream failure");
                (StatusCode::INTERNAL_SERVER_ERROR, message, Some(details))
            }
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };
        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<PlannerError> for ApiError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::Validation(msg) => Self::BadRequest(msg),
            PlannerError::NotFound(msg) => Self::NotFound(msg),
            PlannerError::Forbidden(msg) => Self::Forbidden(msg),
            PlannerError::Conflict(msg) => Self::Conflict(msg),
            PlannerError::Upstream { message, failures } => {
                let details = if failures.is_empty() {
                    json!({ "cause": message })
                } else {
                    json!({ "failures": failures })
                };
                Self::Upstream { message, details }
            }
            PlannerError::Internal(err) => Self::Internal(err),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Rejected { status, message } if (400..500).contains(&status) => {
                Self::BadRequest(message)
            }
            other => Self::Internal(anyhow::Error::new(other).context("auth provider")),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

// --- Middleware ---

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let Some(token) = token else {
        return ApiError::Unauthorized("Missing bearer token".to_string()).into_response();
    };

    match state.identity.verify_token(&token).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) | Err(AuthError::Rejected { .. }) => {
            ApiError::Unauthorized("Invalid or expired token".to_string()).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers: users ---

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<User>>), ApiError> {
    let Json(req) = body?;
    let email = req.email.trim();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let account = state.identity.sign_up(email, &req.password).await?;
    let user = state.service.register_user(&NewUser {
        id: account.id.to_string(),
        email: account.email.unwrap_or_else(|| email.to_string()),
        name: req
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
    })?;
    info!(user = %user.id, "account created");
    Ok((StatusCode::CREATED, reply("User registered", user)))
}

async fn get_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<User> {
    let user = state.service.get_profile(&auth.id.to_string())?;
    Ok(reply("Profile retrieved", user))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> ApiResult<User> {
    let Json(update) = body?;
    let user = state
        .service
        .update_profile(&auth.id.to_string(), &update)?;
    Ok(reply("Profile updated", user))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<User>> {
    let users = state.service.list_users(&auth.id.to_string())?;
    Ok(reply("Users retrieved", users))
}

// --- Handlers: menus ---

async fn list_menus(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<Menu>> {
    let menus = state.service.list_menus(&auth.id.to_string())?;
    Ok(reply("Menus retrieved", menus))
}

async fn current_menu(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<MenuDetail> {
    let today = Local::now().date_naive();
    let menu = state.service.current_menu(&auth.id.to_string(), today)?;
    Ok(reply("Current week menu", menu))
}

async fn get_menu(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<MenuDetail> {
    let Path(id) = id?;
    let menu = state.service.get_menu(&auth.id.to_string(), id)?;
    Ok(reply("Menu retrieved", menu))
}

async fn generate_menu(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope<MenuDetail>>), ApiError> {
    let selection = meal_selection(&body)?;
    let today = Local::now().date_naive();
    let menu = state
        .service
        .generate_menu(&auth.id.to_string(), selection, today)
        .await?;
    Ok((StatusCode::CREATED, reply("Menu generated", menu)))
}

/// An empty body selects every meal type, like `{}` does.
fn meal_selection(body: &[u8]) -> Result<MealSelection, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(MealSelection::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid meal selection: {e}")))
}

async fn list_shopping_lists(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<ShoppingList>> {
    let lists = state.service.list_shopping_lists(&auth.id.to_string())?;
    Ok(reply("Shopping lists retrieved", lists))
}

async fn toggle_acquired(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> ApiResult<ShoppingListItem> {
    let Path((list_id, ingredient_id)) = ids?;
    let item = state
        .service
        .toggle_acquired(&auth.id.to_string(), list_id, ingredient_id)?;
    Ok(reply("Shopping list item updated", item))
}

// --- Handlers: recipes ---

async fn favorite_recipes(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<Recipe>> {
    let recipes = state.service.favorite_recipes(&auth.id.to_string())?;
    Ok(reply("Favourite recipes", recipes))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Recipe> {
    let Path(id) = id?;
    let recipe = state.service.toggle_favorite(&auth.id.to_string(), id)?;
    Ok(reply("Favourite updated", recipe))
}

async fn get_recipe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<RecipeDetail> {
    let Path(id) = id?;
    let recipe = state.service.get_recipe(&auth.id.to_string(), id)?;
    Ok(reply("Recipe retrieved", recipe))
}

async fn regenerate_recipe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<RegenerateRequest>, JsonRejection>,
) -> ApiResult<RecipeDetail> {
    let Path(id) = id?;
    let Json(req) = body?;
    let recipe = state
        .service
        .regenerate_recipe(&auth.id.to_string(), id, &req.modificacion)
        .await?;
    Ok(reply("Recipe regenerated", recipe))
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        info_span!("http_request", method = %request.method(), uri = %request.uri())
    });

    let protected = Router::new()
        .route(
            "/api/usuarios/perfil",
            get(get_profile).patch(update_profile),
        )
        .route("/api/usuarios", get(list_users))
        .route("/api/usuarios/", get(list_users))
        .route("/api/menus", get(list_menus))
        .route("/api/menus/", get(list_menus))
        .route("/api/menus/semana", get(current_menu))
        .route("/api/menus/generar", post(generate_menu))
        .route("/api/menus/listascompra", get(list_shopping_lists))
        .route(
            "/api/menus/listascompra/adquirido/{list_id}/{ingredient_id}",
            patch(toggle_acquired),
        )
        .route("/api/menus/{id}", get(get_menu))
        .route("/api/recetas/favoritas", get(favorite_recipes))
        .route("/api/recetas/favorito/{id}", patch(toggle_favorite))
        .route("/api/recetas/regenerar/{id}", post(regenerate_recipe))
        .route("/api/recetas/{id}", get(get_recipe))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/api/usuarios/registro", post(register))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(trace_layer)
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(state: AppState, port: u16, bind: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!(%bind, "listening on a non-loopback address");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
