use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;
pub const WEEK_MS: Ms = 7 * DAY_MS;

/// Half-open interval `[start, end)`. Zero-length spans are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `self.start < other.end && self.end > other.start`
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Value returned when a wire string names no known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value {:?}", self.0)
    }
}

/// Declares a wire-named enum with `as_str`, `Display` and `FromStr`.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

wire_enum!(
    /// What kind of physical resource a space is. Drives interval resolution and pricing.
    SpaceKind {
        Desk => "Desk",
        Cabin => "Cabin",
        Conference => "Conference",
        Utility => "Utility",
    }
);

wire_enum!(
    /// Billing granularity selected for a booking.
    PlanType {
        Daily => "Daily",
        Weekly => "Weekly",
        Monthly => "Monthly",
    }
);

wire_enum!(
    BookingStatus {
        Pending => "pending",
        Approved => "approved",
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

wire_enum!(
    PaymentStatus {
        Pending => "pending",
        Paid => "paid",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub kind: SpaceKind,
    pub name: String,
    pub price: Decimal,
    pub capacity: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub number: String,
    /// Pre-tax amount, equal to the booking total.
    pub amount: Decimal,
    pub gst_rate: Decimal,
    pub gst: Decimal,
    pub total: Decimal,
    pub issued_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    /// Snapshot of the user's name when the booking was admitted. Never re-synced.
    pub user_name: String,
    pub user_email: String,
    pub space_id: Ulid,
    pub span: Span,
    pub plan: PlanType,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub invoice: Option<Invoice>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// Cancelled bookings never block a space.
    pub fn holds_space(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }
}

/// A space and every booking ever admitted on it, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct SpaceState {
    pub space: Space,
    pub bookings: Vec<Booking>,
}

impl SpaceState {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.space.id
    }

    /// Insert a booking keeping the list sorted by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose span overlaps the query window.
    /// Everything at or after the partition point starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// WAL record format. Every state change is one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpaceCreated {
        space: Space,
    },
    SpaceUpdated {
        space: Space,
    },
    UserRegistered {
        user: User,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingNotesUpdated {
        id: Ulid,
        space_id: Ulid,
        notes: Option<String>,
        at: Ms,
    },
    BookingStatusChanged {
        id: Ulid,
        space_id: Ulid,
        status: BookingStatus,
        payment_status: PaymentStatus,
        invoice: Option<Invoice>,
        at: Ms,
    },
    BookingDeleted {
        id: Ulid,
        space_id: Ulid,
    },
}

impl Event {
    /// The space whose state this event mutates, if any.
    pub fn space_id(&self) -> Option<Ulid> {
        match self {
            Event::SpaceCreated { space } | Event::SpaceUpdated { space } => Some(space.id),
            Event::BookingCreated { booking } => Some(booking.space_id),
            Event::BookingNotesUpdated { space_id, .. }
            | Event::BookingStatusChanged { space_id, .. }
            | Event::BookingDeleted { space_id, .. } => Some(*space_id),
            Event::UserRegistered { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> Space {
        Space {
            id: Ulid::new(),
            kind: SpaceKind::Desk,
            name: "Hot desk 1".into(),
            price: Decimal::from(500),
            capacity: 1,
            active: true,
        }
    }

    fn booking_at(space_id: Ulid, start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            user_name: "Ada".into(),
            user_email: "ada@example.com".into(),
            space_id,
            span: Span::new(start, end),
            plan: PlanType::Daily,
            total_amount: Decimal::from(500),
            status,
            payment_status: PaymentStatus::Pending,
            notes: None,
            invoice: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        assert!(a.overlaps(&Span::new(150, 250)));
        assert!(!a.overlaps(&Span::new(200, 300))); // adjacent
        assert!(!Span::new(200, 300).overlaps(&a));
    }

    #[test]
    fn zero_length_span_inside_another_overlaps() {
        let point = Span::new(150, 150);
        assert!(point.overlaps(&Span::new(100, 200)));
        assert!(!point.overlaps(&Span::new(150, 200)));
        assert_eq!(point.duration_ms(), 0);
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut ss = SpaceState::new(space());
        let sid = ss.id();
        ss.insert_booking(booking_at(sid, 300, 400, BookingStatus::Pending));
        ss.insert_booking(booking_at(sid, 100, 200, BookingStatus::Pending));
        ss.insert_booking(booking_at(sid, 200, 300, BookingStatus::Pending));
        let starts: Vec<Ms> = ss.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut ss = SpaceState::new(space());
        let sid = ss.id();
        ss.insert_booking(booking_at(sid, 100, 200, BookingStatus::Pending));
        ss.insert_booking(booking_at(sid, 450, 600, BookingStatus::Approved));
        ss.insert_booking(booking_at(sid, 1000, 1100, BookingStatus::Pending));

        let hits: Vec<_> = ss.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_reports_cancelled_too() {
        let mut ss = SpaceState::new(space());
        let sid = ss.id();
        let cancelled = booking_at(sid, 100, 200, BookingStatus::Cancelled);
        assert!(!cancelled.holds_space());
        ss.insert_booking(cancelled);
        assert_eq!(ss.overlapping(&Span::new(0, 1000)).count(), 1);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut ss = SpaceState::new(space());
        let sid = ss.id();
        let b = booking_at(sid, 100, 200, BookingStatus::Pending);
        let id = b.id;
        ss.insert_booking(b);
        assert!(ss.remove_booking(Ulid::new()).is_none());
        assert_eq!(ss.remove_booking(id).map(|b| b.id), Some(id));
        assert!(ss.bookings.is_empty());
    }

    #[test]
    fn wire_names_parse_back() {
        assert_eq!("Conference".parse::<SpaceKind>(), Ok(SpaceKind::Conference));
        assert_eq!("Monthly".parse::<PlanType>(), Ok(PlanType::Monthly));
        assert_eq!("cancelled".parse::<BookingStatus>(), Ok(BookingStatus::Cancelled));
        assert_eq!(PaymentStatus::Paid.to_string(), "paid");
        assert!("Hourly".parse::<PlanType>().is_err());
        assert!("daily".parse::<PlanType>().is_err());
    }

    #[test]
    fn event_survives_bincode() {
        let sid = Ulid::new();
        let event = Event::BookingCreated {
            booking: booking_at(sid, 100, 200, BookingStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.space_id(), Some(sid));
    }
}
