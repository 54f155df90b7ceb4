use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};

use crate::model::{HOUR_MS, Ms, Span};

/// Conference rooms are only bookable for this fixed daily slot.
pub const CONFERENCE_SLOT_START_HOUR: u32 = 13;
pub const CONFERENCE_SLOT_MS: Ms = HOUR_MS;

/// Server-local calendar: a fixed UTC offset used for day/month arithmetic,
/// the conference slot, and rendering instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// `None` if the offset is a day or more away from UTC.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        Some(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// `None` only for instants chrono cannot represent.
    pub fn local(&self, t: Ms) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp_millis(t).map(|utc| utc.with_timezone(&self.offset))
    }

    fn local_ms(&self, naive: &NaiveDateTime) -> Option<Ms> {
        self.offset
            .from_local_datetime(naive)
            .single()
            .map(|dt| dt.timestamp_millis())
    }

    /// `[D 13:00, D 14:00)` where D is the local calendar day containing `t`.
    pub fn conference_slot(&self, t: Ms) -> Option<Span> {
        let day = self.local(t)?.date_naive();
        let start = self.local_ms(&day.and_hms_opt(CONFERENCE_SLOT_START_HOUR, 0, 0)?)?;
        Some(Span::new(start, start + CONFERENCE_SLOT_MS))
    }

    /// Parse an RFC 3339 instant, a local `YYYY-MM-DDTHH:MM:SS[.fff]`, or a
    /// plain `YYYY-MM-DD` (local midnight).
    pub fn parse_instant(&self, text: &str) -> Option<Ms> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.timestamp_millis());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
            return self.local_ms(&naive);
        }
        let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
        self.local_ms(&date.and_hms_opt(0, 0, 0)?)
    }

    /// RFC 3339 at the server offset, millisecond precision.
    pub fn render(&self, t: Ms) -> String {
        match self.local(t) {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, false),
            None => t.to_string(),
        }
    }
}
