use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_NOTES_LEN;
use crate::model::*;
use crate::notify::{Audience, Notification, NotificationMeta};

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::pricing::quote;
use super::{Engine, EngineError};

/// A booking request after boundary validation. `from`/`to` are as supplied
/// by the client; the engine decides the interval actually reserved.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub space_id: Ulid,
    pub from: Ms,
    pub to: Ms,
    pub plan: PlanType,
    pub notes: Option<String>,
}

impl Engine {
    /// Interval actually reserved for a request on a space of `kind`.
    fn resolve_span(&self, kind: SpaceKind, req: &BookingRequest) -> Result<Span, EngineError> {
        let span = match kind {
            SpaceKind::Conference => {
                if req.plan != PlanType::Daily {
                    return Err(EngineError::invalid_plan(kind, req.plan));
                }
                self.settings
                    .calendar
                    .conference_slot(req.from)
                    .ok_or(EngineError::LimitExceeded("timestamp out of range"))?
            }
            SpaceKind::Desk | SpaceKind::Cabin | SpaceKind::Utility => {
                if req.from > req.to {
                    return Err(EngineError::InvalidRange {
                        from: req.from,
                        to: req.to,
                    });
                }
                Span::new(req.from, req.to)
            }
        };
        validate_span(&span)?;
        Ok(span)
    }

    /// Admit a booking for `user_id` or reject it. Nothing is written on rejection.
    ///
    /// The space's write lock is held from the conflict check until the new
    /// booking is durable and applied, so racing requests for one space
    /// serialize and at most one of any overlapping pair wins.
    pub async fn create_booking(
        &self,
        user_id: Ulid,
        req: BookingRequest,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.admit(user_id, req).await;
        let outcome = match &result {
            Ok(_) => "admitted",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(crate::observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn admit(&self, user_id: Ulid, req: BookingRequest) -> Result<Booking, EngineError> {
        if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let user = self
            .find_user(&user_id)
            .ok_or(EngineError::NotFound("user", user_id))?;
        let ss = self
            .get_space_state(&req.space_id)
            .ok_or(EngineError::NotFound("space", req.space_id))?;

        let mut guard = ss.write().await;
        let space = &guard.space;
        if !space.active {
            return Err(EngineError::SpaceInactive(space.id));
        }
        if guard.bookings.len() >= crate::limits::MAX_BOOKINGS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many bookings on space"));
        }
        let span = self.resolve_span(space.kind, &req)?;

        if let Err(e) = check_no_conflict(&guard, &span) {
            debug!(space_id = %req.space_id, "admission rejected: {e}");
            return Err(e);
        }
        let total_amount = quote(&self.settings.calendar, space.kind, space.price, req.plan, &span)?;

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            user_id: user.id,
            user_name: user.name,
            user_email: user.email,
            space_id: req.space_id,
            span,
            plan: req.plan,
            total_amount,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            notes: req.notes,
            invoice: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let space_name = guard.space.name.clone();
        drop(guard);

        info!(
            booking_id = %booking.id,
            space_id = %booking.space_id,
            user_id = %booking.user_id,
            total = %booking.total_amount,
            "booking admitted"
        );
        self.dispatch(Notification {
            audience: Audience::Admins,
            title: "New Booking".into(),
            message: format!("{} requested {space_name}", booking.user_name),
            meta: NotificationMeta {
                booking_id: booking.id,
                space_id: booking.space_id,
                status: booking.status,
            },
        });
        Ok(booking)
    }
}
