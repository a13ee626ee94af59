//! HTTP surface.
//!
//! Client and user credentials travel in the `clientId`, `username`,
//! `accessToken` and `password` headers. Vote and phrase submissions carry
//! the user's credentials in the JSON body instead.

use crate::auth::Authenticator;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::engine::AnnotationEngine;
use crate::error::AppError;
use crate::i18n::Language;
use crate::lexicon::LexicalSource;
use crate::metrics::TranslationMetrics;
use crate::model::{ProviderSet, UserIdentity};
use crate::monitor::{BroadcastSink, EventSink, FanoutSink, LogSink};
use crate::selection::PhraseSelector;
use crate::store::{AccountStore, PhraseStore};
use crate::translation::Translator;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Identities listed by `/phrase/hashes`
const HASH_LISTING_LIMIT: usize = 50;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: Authenticator,
    pub engine: AnnotationEngine,
    pub catalog: Catalog,
    pub selector: PhraseSelector,
    pub phrases: Arc<dyn PhraseStore>,
    pub monitor: BroadcastSink,
}

impl AppState {
    pub fn new(
        config: &Config,
        phrases: Arc<dyn PhraseStore>,
        accounts: Arc<dyn AccountStore>,
        translator: Translator,
        lexicon: Arc<dyn LexicalSource>,
    ) -> Self {
        let monitor = BroadcastSink::new(config.monitor_buffer);
        let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new(vec![
            Arc::new(LogSink),
            Arc::new(monitor.clone()),
        ]));

        Self {
            auth: Authenticator::new(accounts, &config.client_id, &config.admin_secret),
            engine: AnnotationEngine::new(phrases.clone(), sink),
            catalog: Catalog::new(phrases.clone(), translator),
            selector: PhraseSelector::new(phrases.clone(), lexicon, config.selection_top_k),
            phrases,
            monitor,
        }
    }

    /// Client check plus access-token authorization from request headers.
    async fn caller(&self, headers: &HeaderMap) -> Result<UserIdentity, AppError> {
        self.auth.authenticate_client(header(headers, "clientid"))?;
        self.auth
            .authorize(header(headers, "username"), header(headers, "accesstoken"))
            .await
    }

    async fn admin(&self, headers: &HeaderMap) -> Result<UserIdentity, AppError> {
        let user = self.caller(headers).await?;
        if !user.is_admin {
            return Err(AppError::Unauthorized(
                "Administrator access required".to_string(),
            ));
        }
        Ok(user)
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/user", get(login).post(create_user))
        .route("/user/token", put(renew_token))
        .route("/user/annotations", get(user_annotations))
        .route("/user/monitor", get(monitor_stream))
        .route("/phrase", get(next_phrase).post(add_phrase).put(submit_vote))
        .route("/phrase/annotations", get(phrase_annotations))
        .route("/phrase/hashes", get(phrase_hashes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn run(config: &Config, state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on {}", addr);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn parse_language(code: Option<&str>) -> Result<Language, AppError> {
    let code = code
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Request must contain a language".to_string()))?;
    Language::from_code(code).map_err(|e| AppError::BadRequest(e.to_string()))
}

// ==================== Status ====================

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Connected to the phrase annotation server" }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "translations": TranslationMetrics::global().report(),
    }))
}

// ==================== Users ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    username: Option<String>,
    password: Option<String>,
    application_secret: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.authenticate_client(header(&headers, "clientid"))?;
    let request = body(payload)?;

    let credentials = state
        .auth
        .create_user(
            request.username.as_deref(),
            request.password.as_deref(),
            request.application_secret.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User account created successfully",
            "accessToken": credentials.access_token,
            "refreshToken": credentials.refresh_token,
        })),
    ))
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    state.auth.authenticate_client(header(&headers, "clientid"))?;

    let credentials = state
        .auth
        .login(header(&headers, "username"), header(&headers, "password"))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Successful authentication",
            "accessToken": credentials.access_token,
            "refreshToken": credentials.refresh_token,
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewTokenRequest {
    username: Option<String>,
    refresh_token: Option<String>,
}

async fn renew_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RenewTokenRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.authenticate_client(header(&headers, "clientid"))?;
    let request = body(payload)?;

    let access_token = state
        .auth
        .renew_token(request.username.as_deref(), request.refresh_token.as_deref())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accessToken": access_token })),
    ))
}

#[derive(Debug, Deserialize)]
struct AnnotationsQuery {
    user: Option<String>,
}

async fn user_annotations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AnnotationsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let caller = state.caller(&headers).await?;

    let target = match query.user.map(|u| u.to_lowercase()) {
        Some(user) if user != caller.username => {
            if !caller.is_admin {
                return Err(AppError::Unauthorized(
                    "Only administrators may view other users' annotations".to_string(),
                ));
            }
            if !state.auth.user_exists(&user).await? {
                return Err(AppError::NotFound(format!("User {} not found", user)));
            }
            user
        }
        _ => caller.username,
    };

    let annotations = state.phrases.user_ledger(&target).await?;
    Ok(Json(json!({
        "username": target,
        "annotations": annotations,
    })))
}

async fn monitor_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let admin = state.admin(&headers).await?;
    info!("{} opened a monitoring stream", admin.username);
    Ok(state.monitor.sse_stream())
}

// ==================== Phrases ====================

async fn next_phrase(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let caller = state.caller(&headers).await?;
    let language = parse_language(header(&headers, "language"))?;

    let selected = state.selector.select_phrase().await?;
    let translated = state
        .catalog
        .translations_for(&selected.text, language)
        .await?;

    info!(
        "Serving {} ({}) to {}",
        translated.identity, language, caller.username
    );
    Ok(Json(json!({
        "phrase": translated.phrase,
        "hash": translated.identity,
        "targetLanguage": language,
        "azureTranslation": translated.translations.azure,
        "googleTranslation": translated.translations.google,
        "yandexTranslation": translated.translations.yandex,
        "isNew": selected.is_new_external,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPhraseRequest {
    username: Option<String>,
    access_token: Option<String>,
    phrase: Option<String>,
}

async fn add_phrase(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AddPhraseRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.authenticate_client(header(&headers, "clientid"))?;
    let request = body(payload)?;
    state
        .auth
        .authorize(request.username.as_deref(), request.access_token.as_deref())
        .await?;

    let added = state
        .catalog
        .add_phrase(request.phrase.as_deref().unwrap_or_default())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Source text added",
            "phrase": added.phrase,
            "hash": added.identity,
        })),
    ))
}

/// A judgement sent either as a JSON boolean or as "true"/"false".
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Judgement {
    Flag(bool),
    Text(String),
}

impl Judgement {
    fn value(&self) -> Option<bool> {
        match self {
            Judgement::Flag(flag) => Some(*flag),
            Judgement::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    username: Option<String>,
    access_token: Option<String>,
    hash: Option<String>,
    language_abr: Option<String>,
    is_azure_correct: Option<Judgement>,
    is_google_correct: Option<Judgement>,
    is_yandex_correct: Option<Judgement>,
}

impl VoteRequest {
    fn judgements(&self) -> Result<ProviderSet<bool>, AppError> {
        let judgement = |field: &Option<Judgement>| {
            field.as_ref().and_then(Judgement::value).ok_or_else(|| {
                AppError::BadRequest(
                    "Request must contain true/false judgements for every provider".to_string(),
                )
            })
        };

        Ok(ProviderSet {
            azure: judgement(&self.is_azure_correct)?,
            google: judgement(&self.is_google_correct)?,
            yandex: judgement(&self.is_yandex_correct)?,
        })
    }
}

async fn submit_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.authenticate_client(header(&headers, "clientid"))?;
    let request = body(payload)?;
    let user = state
        .auth
        .authorize(request.username.as_deref(), request.access_token.as_deref())
        .await?;

    let identity = request
        .hash
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AppError::BadRequest("Request must contain a phrase hash".to_string()))?;
    let language = parse_language(request.language_abr.as_deref())?;
    let judgements = request.judgements()?;

    let outcome = state
        .engine
        .submit_vote(&user, identity, language, judgements)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Annotation recorded",
            "outcome": outcome,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct PhraseQuery {
    hash: Option<String>,
}

async fn phrase_annotations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PhraseQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.admin(&headers).await?;

    let identity = query
        .hash
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Request must contain a phrase hash".to_string()))?;

    let phrase = state
        .phrases
        .find_phrase(&identity)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Phrase {} not found", identity)))?;

    Ok(Json(phrase))
}

async fn phrase_hashes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    state.admin(&headers).await?;

    let phrases = state.phrases.list_phrases(HASH_LISTING_LIMIT).await?;
    Ok(Json(json!({ "hashes": phrases })))
}
