//! JSON-over-HTTP surface. Handlers translate between wire DTOs and engine
//! calls; every rule about bookings lives in the engine.

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequest, FromRequestParts, MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error};
use ulid::Ulid;

use crate::auth::Caller;
use crate::calendar::Calendar;
use crate::engine::{BookingFilter, BookingRequest, Engine, EngineError, SpaceUpdate, StatusChange};
use crate::model::*;
use crate::observability::HTTP_REQUESTS_TOTAL;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub admin_token: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, admin_token: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            admin_token: admin_token.into(),
        }
    }

    fn calendar(&self) -> &Calendar {
        &self.engine.settings().calendar
    }
}

// ── Errors ──────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthorized(&'static str),
    AdminOnly,
    MemberOnly,
    UnknownPlan(String),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::NotFound(..) => StatusCode::NOT_FOUND,
                EngineError::Conflict(_) | EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
                EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
                EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                EngineError::InvalidPlan { .. }
                | EngineError::InvalidRange { .. }
                | EngineError::SpaceInactive(_)
                | EngineError::InvalidTransition { .. }
                | EngineError::InvalidPayment { .. }
                | EngineError::Invalid(_)
                | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::AdminOnly | ApiError::MemberOnly => StatusCode::FORBIDDEN,
            ApiError::UnknownPlan(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.kind(),
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::AdminOnly | ApiError::MemberOnly => "forbidden",
            ApiError::UnknownPlan(_) => "invalid_plan",
            ApiError::BadRequest(_) => "bad_request",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Engine(EngineError::WalError(_)) => "internal error".into(),
            ApiError::Engine(e) => e.to_string(),
            ApiError::Unauthorized(reason) => (*reason).into(),
            ApiError::AdminOnly => "administrator access required".into(),
            ApiError::MemberOnly => "only members can do this".into(),
            ApiError::UnknownPlan(plan) => format!("unknown plan type {plan:?}"),
            ApiError::BadRequest(reason) => reason.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self:?}");
        } else {
            debug!(status = status.as_u16(), "request rejected: {}", self.message());
        }
        let body = json!({ "error": self.kind(), "message": self.message() });
        (status, Json(body)).into_response()
    }
}

// ── Extractors with JSON rejections ─────────────────────────────

/// `Json<T>` whose rejection is an [`ApiError`].
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(JsonBody(value))
    }
}

/// The `:id` path segment, parsed as a ULID.
pub struct IdParam(pub Ulid);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for IdParam {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ulid::from_string(&raw)
            .map(IdParam)
            .map_err(|_| ApiError::BadRequest(format!("{raw:?} is not a valid id")))
    }
}

fn query<T>(q: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    q.map(|Query(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn parse_date(cal: &Calendar, field: &str, text: &str) -> Result<Ms, ApiError> {
    cal.parse_instant(text)
        .ok_or_else(|| ApiError::BadRequest(format!("{field}: cannot parse date {text:?}")))
}

// ── DTOs ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
        }
    }
}

fn default_capacity() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSpace {
    #[serde(rename = "type")]
    pub kind: SpaceKind,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacePatch {
    pub name: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
    pub capacity: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceView {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub kind: SpaceKind,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub capacity: u32,
    pub is_active: bool,
}

impl From<Space> for SpaceView {
    fn from(s: Space) -> Self {
        Self {
            id: s.id,
            kind: s.kind,
            name: s.name,
            price: s.price,
            capacity: s.capacity,
            is_active: s.active,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub space_id: Ulid,
    pub from_date: String,
    pub to_date: String,
    pub plan_type: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotesPatch {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceView {
    pub number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub gst_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub gst: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub issued_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub user_id: Ulid,
    pub user_name: String,
    pub user_email: String,
    pub space_id: Ulid,
    pub from_date: String,
    pub to_date: String,
    pub plan_type: PlanType,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub invoice: Option<InvoiceView>,
    pub created_at: String,
    pub updated_at: String,
}

impl BookingView {
    pub fn render(cal: &Calendar, b: Booking) -> Self {
        Self {
            id: b.id,
            user_id: b.user_id,
            user_name: b.user_name,
            user_email: b.user_email,
            space_id: b.space_id,
            from_date: cal.render(b.span.start),
            to_date: cal.render(b.span.end),
            plan_type: b.plan,
            total_amount: b.total_amount,
            status: b.status,
            payment_status: b.payment_status,
            notes: b.notes,
            invoice: b.invoice.map(|i| InvoiceView {
                number: i.number,
                amount: i.amount,
                gst_rate: i.gst_rate,
                gst: i.gst,
                total: i.total,
                issued_at: cal.render(i.issued_at),
            }),
            created_at: cal.render(b.created_at),
            updated_at: cal.render(b.updated_at),
        }
    }
}

/// Occupancy entry on a space schedule. Carries no member details.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub booking_id: Ulid,
    pub from_date: String,
    pub to_date: String,
    pub status: BookingStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingListQuery {
    pub space_id: Option<Ulid>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub from: String,
    pub to: String,
}

// ── Handlers ────────────────────────────────────────────────────

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_user(
    caller: Caller,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<NewUser>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    caller.require_admin()?;
    let user = state
        .engine
        .register_user(User {
            id: Ulid::new(),
            name: body.name,
            email: body.email,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn create_space(
    caller: Caller,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<NewSpace>,
) -> Result<(StatusCode, Json<SpaceView>), ApiError> {
    caller.require_admin()?;
    let space = state
        .engine
        .create_space(Space {
            id: Ulid::new(),
            kind: body.kind,
            name: body.name,
            price: body.price,
            capacity: body.capacity,
            active: body.is_active,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(space.into())))
}

async fn update_space(
    caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
    JsonBody(body): JsonBody<SpacePatch>,
) -> Result<Json<SpaceView>, ApiError> {
    caller.require_admin()?;
    let update = SpaceUpdate {
        name: body.name,
        price: body.price,
        capacity: body.capacity,
        active: body.is_active,
    };
    let space = state.engine.update_space(id, update).await?;
    Ok(Json(space.into()))
}

async fn list_spaces(_caller: Caller, State(state): State<AppState>) -> Json<Vec<SpaceView>> {
    let spaces = state.engine.list_spaces().await;
    Json(spaces.into_iter().map(SpaceView::from).collect())
}

async fn get_space(
    _caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> Result<Json<SpaceView>, ApiError> {
    let space = state
        .engine
        .find_space(&id)
        .await
        .ok_or(EngineError::NotFound("space", id))?;
    Ok(Json(space.into()))
}

async fn space_schedule(
    _caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
    q: Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Json<Vec<SlotView>>, ApiError> {
    let window = query(q)?;
    let cal = state.calendar();
    let from = parse_date(cal, "from", &window.from)?;
    let to = parse_date(cal, "to", &window.to)?;
    let bookings = state.engine.space_schedule(id, from, to).await?;
    let slots = bookings
        .into_iter()
        .map(|b| SlotView {
            booking_id: b.id,
            from_date: cal.render(b.span.start),
            to_date: cal.render(b.span.end),
            status: b.status,
        })
        .collect();
    Ok(Json(slots))
}

async fn create_booking(
    caller: Caller,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<NewBooking>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    let user_id = caller.require_user()?;
    let plan: PlanType = body
        .plan_type
        .parse()
        .map_err(|_| ApiError::UnknownPlan(body.plan_type.clone()))?;
    let cal = state.calendar();
    let req = BookingRequest {
        space_id: body.space_id,
        from: parse_date(cal, "fromDate", &body.from_date)?,
        to: parse_date(cal, "toDate", &body.to_date)?,
        plan,
        notes: body.notes,
    };
    let booking = state.engine.create_booking(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(BookingView::render(cal, booking))))
}

async fn list_bookings(
    caller: Caller,
    State(state): State<AppState>,
    q: Result<Query<BookingListQuery>, QueryRejection>,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    let q = query(q)?;
    let status = q
        .status
        .map(|s| s.parse::<BookingStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("status: {e}")))?;
    let filter = BookingFilter {
        space_id: q.space_id,
        status,
    };
    let cal = state.calendar();
    let bookings = state.engine.list_bookings(caller.actor(), filter).await;
    Ok(Json(
        bookings
            .into_iter()
            .map(|b| BookingView::render(cal, b))
            .collect(),
    ))
}

async fn get_booking(
    caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> Result<Json<BookingView>, ApiError> {
    let booking = state.engine.get_booking(caller.actor(), id).await?;
    Ok(Json(BookingView::render(state.calendar(), booking)))
}

async fn update_booking(
    caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
    JsonBody(body): JsonBody<NotesPatch>,
) -> Result<Json<BookingView>, ApiError> {
    let user_id = caller.require_user()?;
    let booking = state
        .engine
        .update_booking_notes(user_id, id, body.notes)
        .await?;
    Ok(Json(BookingView::render(state.calendar(), booking)))
}

async fn delete_booking(
    caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> Result<StatusCode, ApiError> {
    let user_id = caller.require_user()?;
    state.engine.delete_booking(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_booking(
    caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> Result<Json<BookingView>, ApiError> {
    let booking = state.engine.cancel_booking(caller.actor(), id).await?;
    Ok(Json(BookingView::render(state.calendar(), booking)))
}

/// Admin shortcut routes that each drive one edge of the status machine.
macro_rules! admin_action {
    ($name:ident, $method:ident) => {
        async fn $name(
            caller: Caller,
            State(state): State<AppState>,
            IdParam(id): IdParam,
        ) -> Result<Json<BookingView>, ApiError> {
            caller.require_admin()?;
            let booking = state.engine.$method(id).await?;
            Ok(Json(BookingView::render(state.calendar(), booking)))
        }
    };
}

admin_action!(approve_booking, approve_booking);
admin_action!(reject_booking, reject_booking);
admin_action!(activate_booking, activate_booking);
admin_action!(complete_booking, complete_booking);

async fn set_status(
    caller: Caller,
    State(state): State<AppState>,
    IdParam(id): IdParam,
    JsonBody(body): JsonBody<StatusPatch>,
) -> Result<Json<BookingView>, ApiError> {
    caller.require_admin()?;
    let status = body
        .status
        .map(|s| s.parse::<BookingStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("status: {e}")))?;
    let payment_status = body
        .payment_status
        .map(|s| s.parse::<PaymentStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("paymentStatus: {e}")))?;
    if status.is_none() && payment_status.is_none() {
        return Err(ApiError::BadRequest(
            "one of status or paymentStatus is required".into(),
        ));
    }
    let change = StatusChange {
        status,
        payment_status,
    };
    let booking = state.engine.change_status(id, change).await?;
    Ok(Json(BookingView::render(state.calendar(), booking)))
}

// ── Router ──────────────────────────────────────────────────────

/// Per-request span with a fresh request id, plus the request counter.
async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let span = tracing::info_span!(
        "http",
        request_id = %Ulid::new(),
        method = %req.method(),
        route = %route,
    );
    let response = next.run(req).instrument(span).await;
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/users", post(create_user))
        .route("/v1/spaces", post(create_space).get(list_spaces))
        .route("/v1/spaces/:id", get(get_space).patch(update_space))
        .route("/v1/spaces/:id/bookings", get(space_schedule))
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route(
            "/v1/bookings/:id",
            get(get_booking).patch(update_booking).delete(delete_booking),
        )
        .route("/v1/bookings/:id/cancel", post(cancel_booking))
        .route("/v1/admin/bookings/:id/approve", post(approve_booking))
        .route("/v1/admin/bookings/:id/reject", post(reject_booking))
        .route("/v1/admin/bookings/:id/activate", post(activate_booking))
        .route("/v1/admin/bookings/:id/complete", post(complete_booking))
        .route("/v1/admin/bookings/:id/status", put(set_status))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
