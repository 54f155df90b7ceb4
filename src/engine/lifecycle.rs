//! Booking status machine and the owner-scoped edits that depend on it.
//!
//! ```text
//! pending ──▶ approved ──▶ active ──▶ completed
//!    └───────────┴────────────┴──▶ cancelled
//! ```
//! Admin rejection lands in `cancelled` as well.

use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_NOTES_LEN;
use crate::model::*;
use crate::notify::{Audience, Notification, NotificationMeta};

use super::conflict::now_ms;
use super::pricing::issue_invoice;
use super::{Engine, EngineError};

/// Who is asking for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Admin,
    User(Ulid),
}

/// Requested status and/or payment update. `None` leaves a field alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusChange {
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Forward edges only; self-transitions are not edges.
    pub fn can_become(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, next) {
            (Pending, Approved) | (Approved, Active) | (Active, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl PaymentStatus {
    pub fn can_become(self, next: PaymentStatus) -> bool {
        matches!((self, next), (PaymentStatus::Pending, PaymentStatus::Paid))
    }
}

/// Which admin/user action produced a change; picks the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Approve,
    Reject,
    Activate,
    Complete,
    Cancel,
    Set,
}

fn notification_for(intent: Intent, actor: Actor, booking: &Booking) -> Option<Notification> {
    let (audience, title, message) = match (intent, booking.status) {
        (Intent::Approve, _) | (Intent::Set, BookingStatus::Approved) => (
            Audience::User(booking.user_id),
            "Booking Approved",
            "Your booking request has been approved.",
        ),
        (Intent::Reject, _) => (
            Audience::User(booking.user_id),
            "Booking Rejected",
            "Your booking request has been rejected.",
        ),
        (Intent::Activate, _) | (Intent::Set, BookingStatus::Active) => (
            Audience::User(booking.user_id),
            "Payment Received",
            "Payment received; your booking is now active.",
        ),
        (Intent::Complete, _) | (Intent::Set, BookingStatus::Completed) => (
            Audience::User(booking.user_id),
            "Booking Completed",
            "Your booking has been completed.",
        ),
        (Intent::Cancel, _) | (Intent::Set, BookingStatus::Cancelled) => match actor {
            Actor::Admin => (
                Audience::User(booking.user_id),
                "Booking Cancelled",
                "Your booking has been cancelled by an administrator.",
            ),
            Actor::User(_) => (
                Audience::Admins,
                "Booking Cancelled",
                "A member cancelled their booking.",
            ),
        },
        (Intent::Set, BookingStatus::Pending) => return None,
    };
    Some(Notification {
        audience,
        title: title.into(),
        message: message.into(),
        meta: NotificationMeta {
            booking_id: booking.id,
            space_id: booking.space_id,
            status: booking.status,
        },
    })
}

impl Engine {
    pub async fn approve_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let change = StatusChange {
            status: Some(BookingStatus::Approved),
            payment_status: None,
        };
        self.transition(id, Actor::Admin, Intent::Approve, change).await
    }

    /// Admin rejection. Stored as `cancelled`.
    pub async fn reject_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let change = StatusChange {
            status: Some(BookingStatus::Cancelled),
            payment_status: None,
        };
        self.transition(id, Actor::Admin, Intent::Reject, change).await
    }

    /// Payment received: `approved → active`, marks paid and issues the invoice.
    pub async fn activate_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let change = StatusChange {
            status: Some(BookingStatus::Active),
            payment_status: Some(PaymentStatus::Paid),
        };
        self.transition(id, Actor::Admin, Intent::Activate, change).await
    }

    pub async fn complete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let change = StatusChange {
            status: Some(BookingStatus::Completed),
            payment_status: None,
        };
        self.transition(id, Actor::Admin, Intent::Complete, change).await
    }

    /// Soft cancel from any non-terminal state. Users may only cancel their own.
    /// Cancelling a cancelled or completed booking is rejected and changes nothing.
    pub async fn cancel_booking(&self, actor: Actor, id: Ulid) -> Result<Booking, EngineError> {
        let change = StatusChange {
            status: Some(BookingStatus::Cancelled),
            payment_status: None,
        };
        self.transition(id, actor, Intent::Cancel, change).await
    }

    /// Admin status endpoint. Same rules as the dedicated actions.
    pub async fn change_status(&self, id: Ulid, change: StatusChange) -> Result<Booking, EngineError> {
        self.transition(id, Actor::Admin, Intent::Set, change).await
    }

    async fn transition(
        &self,
        id: Ulid,
        actor: Actor,
        intent: Intent,
        change: StatusChange,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        if let Actor::User(user_id) = actor
            && current.user_id != user_id
        {
            return Err(EngineError::NotFound("booking", id));
        }

        let status = match change.status {
            Some(next) if current.status.can_become(next) => next,
            Some(next) => {
                return Err(EngineError::InvalidTransition {
                    from: current.status,
                    to: next,
                });
            }
            None => current.status,
        };
        let payment_status = match change.payment_status {
            Some(next) if next == current.payment_status => next,
            Some(next) if status == BookingStatus::Cancelled || !current.payment_status.can_become(next) => {
                return Err(EngineError::InvalidPayment {
                    from: current.payment_status,
                    to: next,
                });
            }
            Some(next) => next,
            None => current.payment_status,
        };
        if status == current.status && payment_status == current.payment_status {
            return Ok(current);
        }

        let now = now_ms();
        let invoice = match (payment_status, &current.invoice) {
            (PaymentStatus::Paid, None) => Some(issue_invoice(&current, self.settings.gst_rate, now)?),
            _ => None,
        };
        let event = Event::BookingStatusChanged {
            id,
            space_id: current.space_id,
            status,
            payment_status,
            invoice,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        drop(guard);

        info!(
            booking_id = %id,
            from = %current.status,
            to = %updated.status,
            payment = %updated.payment_status,
            "booking status changed"
        );
        if updated.status != current.status
            && let Some(n) = notification_for(intent, actor, &updated)
        {
            self.dispatch(n);
        }
        Ok(updated)
    }

    /// Owner check shared by user edits: someone else's booking is invisible,
    /// one's own booking is editable only while pending.
    fn check_owner_editable(booking: &Booking, user_id: Ulid) -> Result<(), EngineError> {
        if booking.user_id != user_id {
            return Err(EngineError::NotFound("booking", booking.id));
        }
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::Forbidden(booking.id));
        }
        Ok(())
    }

    /// Notes are the only field a member may change; space, dates and price are fixed.
    pub async fn update_booking_notes(
        &self,
        user_id: Ulid,
        id: Ulid,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::NotFound("booking", id))?;
        Self::check_owner_editable(current, user_id)?;
        let space_id = current.space_id;

        let event = Event::BookingNotesUpdated {
            id,
            space_id,
            notes,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))
    }

    /// Hard delete by the owner, pending only.
    pub async fn delete_booking(&self, user_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::NotFound("booking", id))?;
        Self::check_owner_editable(current, user_id)?;
        let space_id = current.space_id;

        let event = Event::BookingDeleted { id, space_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking_id = %id, %user_id, "booking withdrawn");
        Ok(())
    }
}
