use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::collaborators::{Collaborators, SubmitRejection};
use super::domain::{DraftKey, EntityKind, FieldValue};
use super::engine::{EngineError, EngineSettings, ProfileCompletionEngine};
use super::pages::PageGateError;
use super::schema::{EntitySchema, SchemaError};
use super::verification::VerificationError;
use crate::config::{DraftConfig, VerificationConfig};

type SharedEngine = Arc<Mutex<ProfileCompletionEngine>>;

/// Sessions left alone this long are saved and closed unless configured otherwise.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct Session {
    engine: SharedEngine,
    touched: std::sync::Mutex<Instant>,
}

impl Session {
    fn new(engine: ProfileCompletionEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            touched: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touched(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.touched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(&self) {
        *self.touched() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.touched())
    }
}

/// Live edit sessions keyed by an opaque id. Each engine has a single logical owner: the
/// handler holding its lock.
pub struct SessionRegistry {
    agency: Arc<EntitySchema>,
    maid: Arc<EntitySchema>,
    sponsor: Arc<EntitySchema>,
    collaborators: Collaborators,
    drafts: DraftConfig,
    verification: VerificationConfig,
    idle_timeout: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new(
        collaborators: Collaborators,
        drafts: DraftConfig,
        verification: VerificationConfig,
    ) -> Result<Self, SchemaError> {
        Ok(Self {
            agency: Arc::new(EntitySchema::agency()?),
            maid: Arc::new(EntitySchema::maid()?),
            sponsor: Arc::new(EntitySchema::sponsor()?),
            collaborators,
            drafts,
            verification,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Starts a session for `owner`, resuming their stored draft when one exists.
    pub async fn open(&self, kind: EntityKind, owner: &str) -> Result<String, EngineError> {
        self.sweep_idle().await;
        let schema = self.schema(kind);
        let settings = EngineSettings::from_config(&schema, &self.drafts, &self.verification);
        let engine = ProfileCompletionEngine::resume(
            schema,
            DraftKey::for_profile(kind, owner),
            self.collaborators.clone(),
            settings,
        )
        .await?;

        let id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Session::new(engine));
        info!(session = %id, entity = kind.label(), "profile session opened");
        Ok(id)
    }

    /// Looks up a session and marks it as active.
    pub async fn get(&self, id: &str) -> Option<SharedEngine> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id)?;
        session.touch();
        Some(session.engine.clone())
    }

    pub async fn close(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Closes sessions idle for at least the timeout. Unsubmitted work is saved silently
    /// first so the owner can resume it. Returns how many sessions were closed.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, SharedEngine)> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| session.idle_for(now) >= self.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|session| (id, session.engine)))
                .collect()
        };

        for (id, engine) in &expired {
            let mut engine = engine.lock().await;
            if !engine.is_submitted() && !engine.snapshot().is_empty() {
                if let Err(err) = engine.save_now(true).await {
                    warn!(session = %id, error = %err, "could not save draft of idle session");
                }
            }
            info!(session = %id, "idle profile session closed");
        }
        expired.len()
    }

    /// Runs [`SessionRegistry::sweep_idle`] every half timeout until the registry is dropped.
    pub fn spawn_idle_sweeper(registry: &Arc<Self>) -> JoinHandle<()> {
        let period = (registry.idle_timeout / 2).max(Duration::from_secs(1));
        let registry: Weak<Self> = Arc::downgrade(registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let closed = registry.sweep_idle().await;
                if closed > 0 {
                    debug!(closed, "swept idle profile sessions");
                }
            }
        })
    }

    fn schema(&self, kind: EntityKind) -> Arc<EntitySchema> {
        match kind {
            EntityKind::Agency => self.agency.clone(),
            EntityKind::Maid => self.maid.clone(),
            EntityKind::Sponsor => self.sponsor.clone(),
        }
    }
}

/// Router exposing wizard sessions under `/api/v1`.
pub fn wizard_router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/api/v1/profiles/:entity/sessions", post(open_handler))
        .route(
            "/api/v1/sessions/:session_id",
            get(view_handler).delete(close_handler),
        )
        .route("/api/v1/sessions/:session_id/fields", patch(edit_handler))
        .route("/api/v1/sessions/:session_id/pages/next", post(next_handler))
        .route("/api/v1/sessions/:session_id/pages/prev", post(prev_handler))
        .route("/api/v1/sessions/:session_id/pages/jump", post(jump_handler))
        .route(
            "/api/v1/sessions/:session_id/verification/:field/send",
            post(send_code_handler),
        )
        .route(
            "/api/v1/sessions/:session_id/verification/:field/verify",
            post(verify_code_handler),
        )
        .route(
            "/api/v1/sessions/:session_id/verification/:field/input",
            post(code_input_handler),
        )
        .route(
            "/api/v1/sessions/:session_id/draft",
            post(save_handler).delete(discard_handler),
        )
        .route("/api/v1/sessions/:session_id/submit", post(submit_handler))
        .with_state(registry)
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenRequest {
    pub owner: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EditRequest {
    pub fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JumpRequest {
    pub page: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CodeRequestBody {
    pub code: String,
}

pub(crate) async fn open_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(entity): Path<String>,
    axum::Json(request): axum::Json<OpenRequest>,
) -> Response {
    let Some(kind) = EntityKind::parse(&entity) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown profile type '{entity}'"));
    };
    if request.owner.trim().is_empty() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "owner is required");
    }

    let id = match registry.open(kind, &request.owner).await {
        Ok(id) => id,
        Err(err) => return engine_error_response(err),
    };
    match registry.get(&id).await {
        Some(engine) => {
            let view = engine.lock().await.view();
            let payload = json!({ "session_id": id, "session": view });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        None => session_not_found(&id),
    }
}

pub(crate) async fn view_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let view = engine.lock().await.view();
    (StatusCode::OK, axum::Json(view)).into_response()
}

pub(crate) async fn close_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Response {
    if registry.close(&session_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        session_not_found(&session_id)
    }
}

pub(crate) async fn edit_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
    axum::Json(request): axum::Json<EditRequest>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let mut engine = engine.lock().await;

    let mut field_errors = BTreeMap::new();
    for (field, value) in request.fields {
        match engine.apply_edit(&field, value) {
            Ok(outcome) => {
                field_errors.insert(outcome.field, outcome.error);
            }
            Err(err) => return engine_error_response(err),
        }
    }

    let payload = json!({ "field_errors": field_errors, "session": engine.view() });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn next_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let mut engine = engine.lock().await;
    match engine.next() {
        Ok(_) => (StatusCode::OK, axum::Json(engine.view())).into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub(crate) async fn prev_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let mut engine = engine.lock().await;
    engine.prev();
    (StatusCode::OK, axum::Json(engine.view())).into_response()
}

pub(crate) async fn jump_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
    axum::Json(request): axum::Json<JumpRequest>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let mut engine = engine.lock().await;
    match engine.jump_to(request.page) {
        Ok(_) => (StatusCode::OK, axum::Json(engine.view())).into_response(),
        Err(err) => engine_error_response(err),
    }
}

/// The session lock is released while the transport call is in flight so other fields
/// and saves are not blocked behind it.
pub(crate) async fn send_code_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path((session_id, field)): Path<(String, String)>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };

    let (request, transport) = {
        let mut engine = engine.lock().await;
        match engine.begin_code_request(&field) {
            Ok(request) => (request, engine.transport()),
            Err(err) => return engine_error_response(err),
        }
    };
    let outcome = transport
        .send_code(request.channel, &request.destination)
        .await;

    let mut engine = engine.lock().await;
    match engine.finish_code_request(&request, outcome) {
        Ok(()) => (StatusCode::OK, axum::Json(engine.view())).into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub(crate) async fn verify_code_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path((session_id, field)): Path<(String, String)>,
    axum::Json(body): axum::Json<CodeRequestBody>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };

    let (check, transport) = {
        let mut engine = engine.lock().await;
        match engine.begin_code_check(&field, &body.code) {
            Ok(check) => (check, engine.transport()),
            Err(err) => return engine_error_response(err),
        }
    };
    let outcome = transport
        .check_code(check.channel, &check.destination, &check.code)
        .await;

    let mut engine = engine.lock().await;
    match engine.finish_code_check(&check, outcome) {
        Ok(()) => (StatusCode::OK, axum::Json(engine.view())).into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub(crate) async fn code_input_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path((session_id, field)): Path<(String, String)>,
    axum::Json(body): axum::Json<CodeRequestBody>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };

    let (check, transport) = {
        let mut engine = engine.lock().await;
        match engine.accepts_code_input(&field, &body.code) {
            Ok(true) => {}
            Ok(false) => return code_input_response(false, &engine),
            Err(err) => return engine_error_response(err),
        }
        match engine.begin_code_check(&field, &body.code) {
            Ok(check) => (check, engine.transport()),
            Err(err) => return engine_error_response(err),
        }
    };
    let outcome = transport
        .check_code(check.channel, &check.destination, &check.code)
        .await;

    let mut engine = engine.lock().await;
    match engine.finish_code_check(&check, outcome) {
        Ok(()) => code_input_response(true, &engine),
        Err(err) => engine_error_response(err),
    }
}

fn code_input_response(checked: bool, engine: &ProfileCompletionEngine) -> Response {
    let payload = json!({ "checked": checked, "session": engine.view() });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn save_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let mut engine = engine.lock().await;
    match engine.save_now(false).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub(crate) async fn discard_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let mut engine = engine.lock().await;
    match engine.discard().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub(crate) async fn submit_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(engine) = registry.get(&session_id).await else {
        return session_not_found(&session_id);
    };
    let submitted = engine.lock().await.submit().await;
    match submitted {
        Ok(profile_id) => {
            registry.close(&session_id).await;
            let payload = json!({ "profile_id": profile_id.0 });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(err) => engine_error_response(err),
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (status, axum::Json(payload)).into_response()
}

fn session_not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("session '{session_id}' not found"),
    )
}

pub(crate) fn engine_error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::UnknownVerificationField(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadySubmitted
        | EngineError::NotOnTerminalPage { .. }
        | EngineError::Verification(VerificationError::IllegalTransition { .. })
        | EngineError::Verification(VerificationError::Stale) => StatusCode::CONFLICT,
        EngineError::Verification(VerificationError::TransportFailure(_))
        | EngineError::Persistence(_)
        | EngineError::Submit(SubmitRejection::Unavailable(_)) => StatusCode::BAD_GATEWAY,
        EngineError::ReadOnlyField(_)
        | EngineError::Verification(_)
        | EngineError::Page(_)
        | EngineError::Submit(SubmitRejection::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
    };

    let payload = match &err {
        EngineError::Page(gate @ PageGateError::PageInvalid { .. }) => {
            json!({ "error": err.to_string(), "gate": gate })
        }
        _ => json!({ "error": err.to_string() }),
    };
    (status, axum::Json(payload)).into_response()
}
