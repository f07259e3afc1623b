//! Axum REST API handlers.
//!
//! Commands run on the blocking pool because the ledger's writer lock is a
//! synchronous, bounded wait. Each committed command wakes the flusher.

use std::sync::Arc;

use aidtrail_protocol::verify::TrailOrder;
use aidtrail_protocol::{
    Actor, AidLedger, Allocation, ChainReport, ClinicRequirement, Donation, LedgerAction,
    LedgerEntry, LedgerError, LedgerStats, Priority, Role, TrailFilter,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::{ApiError, Result};

pub const ROLE_HEADER: &str = "x-actor-role";
pub const NAME_HEADER: &str = "x-actor-name";

#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<AidLedger>,
    pub notify: Arc<Notify>,
}

impl ApiState {
    /// Run a ledger command off the async runtime and wake the flusher.
    async fn command<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&AidLedger) -> aidtrail_protocol::Result<T> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        let value = tokio::task::spawn_blocking(move || f(&*ledger))
            .await
            .map_err(|e| ApiError::Task(e.to_string()))??;
        self.notify.notify_one();
        Ok(value)
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/donations", post(create_donation).get(list_donations))
        .route("/donations/:id", get(get_donation))
        .route("/donations/:id/decision", post(decide_donation))
        .route("/requirements", post(create_requirement).get(list_requirements))
        .route("/requirements/:id", get(get_requirement))
        .route("/requirements/:id/candidates", get(get_candidates))
        .route("/requirements/:id/withdraw", post(withdraw_requirement))
        .route("/allocations", post(allocate).get(list_allocations))
        .route("/allocations/:id", get(get_allocation))
        .route("/allocations/:id/dispatch", post(dispatch_allocation))
        .route("/allocations/:id/receipt", post(confirm_receipt))
        .route("/audit", get(get_audit_trail))
        .route("/audit/verify", get(verify_chain))
        .route("/audit/stats", get(ledger_stats))
        .route("/audit/fault/clear", post(clear_fault))
        .route("/audit/:sequence", get(get_ledger_entry))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Actor extraction
// ─────────────────────────────────────────────────────────

/// The acting party, taken from `X-Actor-Role` and `X-Actor-Name`.
pub struct ActorHeaders(pub Actor);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ActorHeaders {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let raw_role = header(ROLE_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {ROLE_HEADER} header")))?;
        let role = Role::parse(raw_role)
            .ok_or_else(|| ApiError::Unauthenticated(format!("unknown role {raw_role}")))?;
        let name = header(NAME_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {NAME_HEADER} header")))?;
        Ok(Self(Actor::new(role, name)))
    }
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateDonationBody {
    /// Defaults to the acting donor.
    pub donor_ref: Option<String>,
    pub item_name: String,
    pub quantity: u64,
}

#[derive(Deserialize)]
pub struct DecisionBody {
    pub accept: bool,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateRequirementBody {
    /// Defaults to the acting clinic.
    pub clinic_ref: Option<String>,
    pub item_name: String,
    pub quantity: u64,
    pub priority: u8,
}

#[derive(Deserialize)]
pub struct AllocateBody {
    pub requirement_id: String,
    pub donation_ids: Vec<String>,
    pub quantity: Option<u64>,
}

#[derive(Deserialize)]
pub struct ReceiptBody {
    pub feedback: String,
    pub quality_rating: u8,
}

#[derive(Deserialize, Default)]
pub struct AuditQuery {
    pub q: Option<String>,
    pub participant: Option<String>,
    pub role: Option<String>,
    pub action: Option<String>,
    pub order: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn into_filter(self) -> Result<TrailFilter> {
        let mut filter = TrailFilter {
            text: self.q,
            participant: self.participant,
            limit: self.limit,
            ..TrailFilter::default()
        };
        if let Some(raw) = self.role.as_deref() {
            filter.participant_role = Some(Role::parse(raw).ok_or_else(|| {
                LedgerError::Validation(format!("unknown role filter: {raw}"))
            })?);
        }
        if let Some(raw) = self.action.as_deref() {
            filter.action = Some(raw.parse::<LedgerAction>()?);
        }
        if let Some(raw) = self.order.as_deref() {
            filter.order = match raw.trim().to_ascii_lowercase().as_str() {
                "newest" | "newest_first" | "desc" => TrailOrder::NewestFirst,
                "oldest" | "oldest_first" | "asc" => TrailOrder::OldestFirst,
                other => {
                    return Err(LedgerError::Validation(format!("unknown order: {other}")).into())
                }
            };
        }
        Ok(filter)
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub integrity_fault: Option<u64>,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub count: usize,
    pub donations: Vec<Donation>,
}

#[derive(Serialize)]
pub struct RequirementsResponse {
    pub count: usize,
    pub requirements: Vec<ClinicRequirement>,
}

#[derive(Serialize)]
pub struct AllocationsResponse {
    pub count: usize,
    pub allocations: Vec<Allocation>,
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub count: usize,
    pub entries: Vec<LedgerEntry>,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        integrity_fault: state.ledger.integrity_fault(),
    })
}

/// `POST /donations`
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
    Json(body): Json<CreateDonationBody>,
) -> Result<impl IntoResponse> {
    let donation = state
        .command(move |ledger| {
            let donor_ref = body.donor_ref.unwrap_or_else(|| actor.name.clone());
            ledger.create_donation(&actor, &donor_ref, &body.item_name, body.quantity)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

/// `GET /donations`
pub async fn list_donations(State(state): State<Arc<ApiState>>) -> Json<DonationsResponse> {
    let donations = state.ledger.donations();
    Json(DonationsResponse {
        count: donations.len(),
        donations,
    })
}

/// `GET /donations/:id`
pub async fn get_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Donation>> {
    Ok(Json(state.ledger.donation(&id)?))
}

/// `POST /donations/:id/decision`
pub async fn decide_donation(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Donation>> {
    let donation = state
        .command(move |ledger| {
            ledger.decide_donation(&actor, &id, body.accept, body.reason.as_deref())
        })
        .await?;
    Ok(Json(donation))
}

/// `POST /requirements`
pub async fn create_requirement(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
    Json(body): Json<CreateRequirementBody>,
) -> Result<impl IntoResponse> {
    let priority = Priority::new(body.priority)?;
    let requirement = state
        .command(move |ledger| {
            let clinic_ref = body.clinic_ref.unwrap_or_else(|| actor.name.clone());
            ledger.create_requirement(&actor, &clinic_ref, &body.item_name, body.quantity, priority)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(requirement)))
}

/// `GET /requirements`
///
/// Critical needs first.
pub async fn list_requirements(State(state): State<Arc<ApiState>>) -> Json<RequirementsResponse> {
    let requirements = state.ledger.requirements();
    Json(RequirementsResponse {
        count: requirements.len(),
        requirements,
    })
}

/// `GET /requirements/:id`
pub async fn get_requirement(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ClinicRequirement>> {
    Ok(Json(state.ledger.requirement(&id)?))
}

/// `GET /requirements/:id/candidates`
pub async fn get_candidates(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<DonationsResponse>> {
    let donations = state.ledger.candidate_donations(&id)?;
    Ok(Json(DonationsResponse {
        count: donations.len(),
        donations,
    }))
}

/// `POST /requirements/:id/withdraw`
pub async fn withdraw_requirement(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
    Path(id): Path<String>,
) -> Result<Json<ClinicRequirement>> {
    let requirement = state
        .command(move |ledger| ledger.withdraw_requirement(&actor, &id))
        .await?;
    Ok(Json(requirement))
}

/// `POST /allocations`
pub async fn allocate(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
    Json(body): Json<AllocateBody>,
) -> Result<impl IntoResponse> {
    let allocation = state
        .command(move |ledger| {
            ledger.allocate(&actor, &body.requirement_id, &body.donation_ids, body.quantity)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(allocation)))
}

/// `GET /allocations`
pub async fn list_allocations(State(state): State<Arc<ApiState>>) -> Json<AllocationsResponse> {
    let allocations = state.ledger.allocations();
    Json(AllocationsResponse {
        count: allocations.len(),
        allocations,
    })
}

/// `GET /allocations/:id`
pub async fn get_allocation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Allocation>> {
    Ok(Json(state.ledger.allocation(&id)?))
}

/// `POST /allocations/:id/dispatch`
pub async fn dispatch_allocation(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
    Path(id): Path<String>,
) -> Result<Json<Allocation>> {
    let allocation = state
        .command(move |ledger| ledger.mark_in_transit(&actor, &id))
        .await?;
    Ok(Json(allocation))
}

/// `POST /allocations/:id/receipt`
pub async fn confirm_receipt(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
    Path(id): Path<String>,
    Json(body): Json<ReceiptBody>,
) -> Result<Json<Allocation>> {
    let allocation = state
        .command(move |ledger| {
            ledger.confirm_receipt(&actor, &id, &body.feedback, body.quality_rating)
        })
        .await?;
    Ok(Json(allocation))
}

/// `GET /audit?q=&participant=&role=&action=&order=&limit=`
///
/// Newest entries first unless `order=oldest`.
pub async fn get_audit_trail(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditResponse>> {
    let filter = query.into_filter()?;
    let entries = state.ledger.get_audit_trail(&filter)?;
    Ok(Json(AuditResponse {
        count: entries.len(),
        entries,
    }))
}

/// `GET /audit/verify`
pub async fn verify_chain(State(state): State<Arc<ApiState>>) -> Result<Json<ChainReport>> {
    let report = tokio::task::spawn_blocking(move || state.ledger.verify_chain())
        .await
        .map_err(|e| ApiError::Task(e.to_string()))?;
    Ok(Json(report))
}

/// `GET /audit/stats`
pub async fn ledger_stats(State(state): State<Arc<ApiState>>) -> Json<LedgerStats> {
    Json(state.ledger.ledger_stats())
}

/// `GET /audit/:sequence`
pub async fn get_ledger_entry(
    State(state): State<Arc<ApiState>>,
    Path(sequence): Path<u64>,
) -> Result<Json<LedgerEntry>> {
    state
        .ledger
        .ledger_entry(sequence)?
        .map(Json)
        .ok_or(ApiError::EntryNotFound(sequence))
}

/// `POST /audit/fault/clear`
pub async fn clear_fault(
    State(state): State<Arc<ApiState>>,
    ActorHeaders(actor): ActorHeaders,
) -> Result<Json<ChainReport>> {
    let report = state
        .command(move |ledger| ledger.clear_integrity_fault(&actor))
        .await?;
    Ok(Json(report))
}
