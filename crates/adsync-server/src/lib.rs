//! HTTP trigger service for adsync.
//!
//! Exposes an axum [`Router`] that runs reconciliations on demand, plus the
//! production backends: a reqwest GraphQL client and an ldap3 directory
//! connection.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/trigger/all` | Every person, bounded concurrency |
//! | `POST` | `/trigger/{uuid}` | One person; 404 if unknown |
//! | `GET`  | `/health` | Liveness |
//! | `GET`  | `/health/ad` | Runs a trivial directory search |

pub mod error;
pub mod graphql;
pub mod ldap;

use std::sync::Arc;

use adsync_core::backend::{DirectorySearch, GraphqlExecutor, SearchRequest, SearchScope};
use adsync_sync::{
  SyncContext, dataloaders::load_all_person_uuids, reconcile_all, reconcile_person,
};
use axum::{
  Json, Router,
  extract::{Path, State},
  routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub use error::ApiError;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Where the trigger service listens. Read from the same sources as
/// [`adsync_core::config::Settings`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
}

fn default_host() -> String { "0.0.0.0".to_string() }

fn default_port() -> u16 { 8000 }

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<G, D> {
  pub ctx:       SyncContext,
  /// Used directly for the unbatched all-persons query.
  pub graphql:   Arc<G>,
  /// Used directly for the health probe.
  pub directory: Arc<D>,
}

impl<G, D> Clone for AppState<G, D> {
  fn clone(&self) -> Self {
    Self {
      ctx:       self.ctx.clone(),
      graphql:   Arc::clone(&self.graphql),
      directory: Arc::clone(&self.directory),
    }
  }
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// Reconcile every person in the master-record system. Returns how many
/// people changed.
pub async fn sync_all<G, D>(state: &AppState<G, D>) -> Result<usize, ApiError>
where
  G: GraphqlExecutor,
{
  let uuids = load_all_person_uuids(state.graphql.as_ref()).await?;
  tracing::info!(persons = uuids.len(), "reconciling all persons");
  let ctx = &state.ctx;
  let changes = reconcile_all(uuids, ctx.settings.concurrency, |uuid| {
    reconcile_person(uuid, ctx)
  })
  .await?;
  tracing::info!(changes, "reconciled all persons");
  Ok(changes)
}

/// Reconcile one person. Returns 1 if anything changed, else 0.
pub async fn sync_one<G, D>(
  state: &AppState<G, D>,
  uuid: Uuid,
) -> Result<usize, ApiError> {
  let changed = reconcile_person(uuid, &state.ctx).await?;
  Ok(usize::from(changed))
}

// ─── Handlers ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
  pub status:  &'static str,
  pub changes: usize,
}

impl TriggerResponse {
  fn ok(changes: usize) -> Self { Self { status: "OK", changes } }
}

/// `POST /trigger/all`
async fn trigger_all<G, D>(
  State(state): State<AppState<G, D>>,
) -> Result<Json<TriggerResponse>, ApiError>
where
  G: GraphqlExecutor + 'static,
  D: DirectorySearch + 'static,
{
  Ok(Json(TriggerResponse::ok(sync_all(&state).await?)))
}

/// `POST /trigger/{uuid}`
async fn trigger_one<G, D>(
  State(state): State<AppState<G, D>>,
  Path(uuid): Path<Uuid>,
) -> Result<Json<TriggerResponse>, ApiError>
where
  G: GraphqlExecutor + 'static,
  D: DirectorySearch + 'static,
{
  Ok(Json(TriggerResponse::ok(sync_one(&state, uuid).await?)))
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "OK" })) }

/// `GET /health/ad`
async fn health_ad<G, D>(
  State(state): State<AppState<G, D>>,
) -> Result<Json<Value>, ApiError>
where
  G: GraphqlExecutor + 'static,
  D: DirectorySearch + 'static,
{
  let request = SearchRequest {
    base:       state.ctx.settings.ad_search_base.clone(),
    filter:     "(objectclass=*)".into(),
    scope:      SearchScope::Base,
    attributes: vec!["1.1".into()],
  };
  state
    .directory
    .search(request)
    .await
    .map_err(|e| ApiError::Unavailable(e.to_string()))?;
  Ok(Json(json!({ "status": "OK" })))
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the trigger service router.
pub fn router<G, D>(state: AppState<G, D>) -> Router
where
  G: GraphqlExecutor + 'static,
  D: DirectorySearch + 'static,
{
  Router::new()
    .route("/trigger/all", post(trigger_all::<G, D>))
    .route("/trigger/{uuid}", post(trigger_one::<G, D>))
    .route("/health", get(health))
    .route("/health/ad", get(health_ad::<G, D>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
