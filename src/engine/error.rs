use ulid::Ulid;

use crate::model::{BookingStatus, Ms, PaymentStatus, PlanType, SpaceKind};

#[derive(Debug)]
pub enum EngineError {
    NotFound(&'static str, Ulid),
    AlreadyExists(Ulid),
    InvalidPlan {
        kind: SpaceKind,
        plan: String,
    },
    InvalidRange {
        from: Ms,
        to: Ms,
    },
    /// Overlaps the cited booking.
    Conflict(Ulid),
    SpaceInactive(Ulid),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidPayment {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// The caller owns the booking but it is no longer editable.
    Forbidden(Ulid),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn invalid_plan(kind: SpaceKind, plan: PlanType) -> Self {
        EngineError::InvalidPlan {
            kind,
            plan: plan.to_string(),
        }
    }

    /// Short machine-readable tag, used for metric labels and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(..) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidPlan { .. } => "invalid_plan",
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::Conflict(_) => "conflict",
            EngineError::SpaceInactive(_) => "space_inactive",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidPayment { .. } => "invalid_payment",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Invalid(_) => "invalid",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "unexpected",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidPlan { kind, plan } => {
                write!(f, "plan {plan:?} is not available for {kind} spaces")
            }
            EngineError::InvalidRange { from, to } => {
                write!(f, "invalid date range: from ({from}) is after to ({to})")
            }
            EngineError::Conflict(id) => {
                write!(f, "space already booked for that period (conflicts with booking {id}); pick another date")
            }
            EngineError::SpaceInactive(id) => write!(f, "space {id} is not accepting bookings"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "booking cannot move from {from} to {to}")
            }
            EngineError::InvalidPayment { from, to } => {
                write!(f, "payment status cannot move from {from} to {to}")
            }
            EngineError::Forbidden(id) => {
                write!(f, "booking {id} can only be changed while pending")
            }
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
