use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::auth::{AuthError, Claims, TokenVerifier};
use crate::db::{
    is_unique_violation, ArticleFilter, ArticleUpdate, Database, NewArticle, SortField, SortOrder,
};
use crate::error::IngestError;
use crate::ingest::{Ingestor, Trigger};
use crate::slug::slugify;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Arc<Ingestor>,
    /// `None` disables the article write routes.
    pub auth: Option<TokenVerifier>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/articles", get(list_articles).post(create_article))
        .route("/api/articles/search", get(search_articles))
        .route("/api/articles/stats", get(article_stats))
        .route("/api/articles/advanced", get(advanced_articles))
        .route("/api/articles/scrape", post(start_scrape))
        .route("/api/articles/scrape/status", get(scrape_status))
        .route("/api/articles/category/:slug", get(articles_by_category))
        .route(
            "/api/articles/:id",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route("/api/categories", get(list_categories))
        .with_state(state)
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Request failed: {:#}", self.0);
        json_error(StatusCode::INTERNAL_SERVER_ERROR, &format!("Error: {}", self.0))
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

/// The caller of a write route, taken from a verified bearer token.
pub struct AuthUser(pub Claims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let result = match &state.auth {
            Some(verifier) => verifier.verify_headers(&parts.headers),
            None => Err(AuthError::NotConfigured),
        };

        result.map(AuthUser).map_err(|e| {
            warn!("Rejected {} {}: {}", parts.method, parts.uri.path(), e);
            json_error(StatusCode::UNAUTHORIZED, &e.to_string())
        })
    }
}

/// Numeric `:id` segment; a bad value gets the JSON error body.
pub struct ArticleId(pub i64);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ArticleId {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<i64>::from_request_parts(parts, state).await {
            Ok(Path(id)) => Ok(ArticleId(id)),
            Err(rejection) => Err(json_error(
                rejection.status(),
                &format!("invalid article id: {}", rejection.body_text()),
            )),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);

        Self {
            page,
            limit,
            offset: (page - 1).saturating_mul(limit),
        }
    }
}

impl From<&PageQuery> for Pagination {
    fn from(query: &PageQuery) -> Self {
        Pagination::new(query.page, query.limit)
    }
}

// Route handlers
pub async fn health() -> impl IntoResponse {
    "OK"
}

pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let pagination = Pagination::from(&query);
    let total = state.db.get_article_count().await?;
    let articles = state
        .db
        .get_articles(pagination.limit, pagination.offset)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": articles,
        "total": total,
        "pagination": pagination,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn search_articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, AppError> {
    let keyword = match query.keyword.as_deref().map(str::trim) {
        Some(k) if !k.is_empty() => k.to_string(),
        _ => return Ok(json_error(StatusCode::BAD_REQUEST, "keyword is required")),
    };

    let pagination = Pagination::new(query.page, query.limit);
    let articles = state
        .db
        .search_articles(&keyword, pagination.limit, pagination.offset)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": articles,
        "keyword": keyword,
        "pagination": pagination,
    }))
    .into_response())
}

pub async fn article_stats(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let stats = state.db.get_stats().await?;
    Ok(Json(json!({ "success": true, "data": stats })).into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct AdvancedQuery {
    pub keyword: Option<String>,
    pub category: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn sort_field(param: Option<&str>) -> SortField {
    match param {
        Some("views") => SortField::Views,
        Some("title") => SortField::Title,
        _ => SortField::PublishedAt,
    }
}

fn sort_order(param: Option<&str>) -> SortOrder {
    match param {
        Some(o) if o.eq_ignore_ascii_case("asc") => SortOrder::Asc,
        _ => SortOrder::Desc,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn advanced_articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdvancedQuery>,
) -> Result<Response, AppError> {
    let pagination = Pagination::new(query.page, query.limit);
    let filter = ArticleFilter {
        sort: sort_field(query.sort.as_deref()),
        order: sort_order(query.order.as_deref()),
        keyword: non_blank(query.keyword),
        category_slug: non_blank(query.category),
        limit: pagination.limit,
        offset: pagination.offset,
    };

    let (articles, total) = state.db.list_articles(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "data": articles,
        "total": total,
        "pagination": pagination,
    }))
    .into_response())
}

pub async fn articles_by_category(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let Some(category) = state.db.find_category_by_slug(&slug).await? else {
        return Ok(json_error(StatusCode::NOT_FOUND, "Category not found"));
    };

    let pagination = Pagination::from(&query);
    let total = state.db.get_article_count_for_category(category.id).await?;
    let articles = state
        .db
        .get_articles_for_category(category.id, pagination.limit, pagination.offset)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": articles,
        "total": total,
        "category": category.slug,
        "pagination": pagination,
    }))
    .into_response())
}

pub async fn get_article(
    State(state): State<Arc<AppState>>,
    ArticleId(id): ArticleId,
) -> Result<Response, AppError> {
    match state.db.get_article(id).await? {
        Some(article) => Ok(Json(json!({ "success": true, "data": article })).into_response()),
        None => Ok(json_error(StatusCode::NOT_FOUND, "Article not found")),
    }
}

pub async fn create_article(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(mut article): Json<NewArticle>,
) -> Result<Response, AppError> {
    if article.title.trim().is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "title is required"));
    }
    if article.slug.trim().is_empty() {
        article.slug = slugify(&article.title);
    }
    if article.slug.is_empty() {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            "could not derive a slug from the title",
        ));
    }

    match state.db.create_article(&article).await {
        Ok(created) => Ok((
            StatusCode::CREATED,
            Json(json!({ "success": true, "data": created })),
        )
            .into_response()),
        Err(e) if is_unique_violation(&e) => Ok(json_error(
            StatusCode::CONFLICT,
            &format!("slug '{}' already exists", article.slug),
        )),
        Err(e) => Err(e.into()),
    }
}

pub async fn update_article(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ArticleId(id): ArticleId,
    Json(update): Json<ArticleUpdate>,
) -> Result<Response, AppError> {
    match state.db.update_article(id, &update).await {
        Ok(Some(article)) => Ok(Json(json!({ "success": true, "data": article })).into_response()),
        Ok(None) => Ok(json_error(StatusCode::NOT_FOUND, "Article not found")),
        Err(e) if is_unique_violation(&e) => {
            Ok(json_error(StatusCode::CONFLICT, "slug already exists"))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_article(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ArticleId(id): ArticleId,
) -> Result<Response, AppError> {
    if state.db.delete_article(id).await? {
        info!("Article {} deleted by {}", id, user.id);
        Ok(Json(json!({ "success": true })).into_response())
    } else {
        Ok(json_error(StatusCode::NOT_FOUND, "Article not found"))
    }
}

pub async fn start_scrape(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    match state.ingestor.try_start(Trigger::Manual) {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "message": "started" })),
        )
            .into_response()),
        Err(IngestError::AlreadyRunning) => Ok(json_error(
            StatusCode::CONFLICT,
            "run already in progress",
        )),
        Err(e) => Err(e.into()),
    }
}

pub async fn scrape_status(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let last_run = state.ingestor.last_report().await;
    Ok(Json(json!({
        "success": true,
        "running": state.ingestor.is_running(),
        "last_run": last_run,
    }))
    .into_response())
}

pub async fn list_categories(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let categories = state.db.get_all_categories().await?;
    let total = state.db.get_category_count().await?;
    Ok(Json(json!({ "success": true, "data": categories, "total": total })).into_response())
}
