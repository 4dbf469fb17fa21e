use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::{anchor, minutes};

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Appointment status ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Paid,
    CancelledByAdmin,
    CancelledByCustomer,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Paid,
        AppointmentStatus::CancelledByAdmin,
        AppointmentStatus::CancelledByCustomer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Paid => "paid",
            AppointmentStatus::CancelledByAdmin => "cancelled_by_admin",
            AppointmentStatus::CancelledByCustomer => "cancelled_by_customer",
        }
    }

    /// Whether an appointment in this status occupies its start instant.
    pub fn is_blocking(&self) -> bool {
        !matches!(
            self,
            AppointmentStatus::CancelledByAdmin | AppointmentStatus::CancelledByCustomer
        )
    }

    pub fn is_customer_cancellable(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn is_remindable(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        AppointmentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| {
                let allowed: Vec<&str> = AppointmentStatus::ALL.iter().map(|s| s.as_str()).collect();
                format!("invalid status '{s}'; allowed statuses: {}", allowed.join(", "))
            })
    }
}

// ── Stored entities ──────────────────────────────────────────────

/// Weekly recurring availability window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i64,
    pub is_active: bool,
}

impl AvailabilityRule {
    pub fn slot_duration_ms(&self) -> Ms {
        minutes(self.slot_duration_minutes)
    }

    /// The rule's window anchored to `date`.
    pub fn window_on(&self, date: NaiveDate) -> Span {
        Span::new(anchor(date, self.start_time), anchor(date, self.end_time))
    }
}

/// One-off absolute interval during which nothing may be offered or booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutTime {
    pub id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub customer_id: String,
    pub span: Span,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub reminder_sent: bool,
    pub created_at: Ms,
}

/// Contact record the reminder scanner mails to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

// ── Create / update payloads ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i64,
    pub is_active: bool,
}

/// Partial rule update: only the fields that are `Some` change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleUpdate {
    pub day_of_week: Option<u8>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub slot_duration_minutes: Option<i64>,
    pub is_active: Option<bool>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.day_of_week.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.slot_duration_minutes.is_none()
            && self.is_active.is_none()
    }

    pub fn apply_to(&self, rule: &AvailabilityRule) -> AvailabilityRule {
        AvailabilityRule {
            id: rule.id,
            day_of_week: self.day_of_week.unwrap_or(rule.day_of_week),
            start_time: self.start_time.unwrap_or(rule.start_time),
            end_time: self.end_time.unwrap_or(rule.end_time),
            slot_duration_minutes: self.slot_duration_minutes.unwrap_or(rule.slot_duration_minutes),
            is_active: self.is_active.unwrap_or(rule.is_active),
        }
    }
}

/// Raw bounds: validated before a `Span` is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlockOut {
    pub start: Ms,
    pub end: Ms,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOutUpdate {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    /// `Some(None)` clears the reason.
    pub reason: Option<Option<String>>,
}

impl BlockOutUpdate {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.reason.is_none()
    }
}

/// Admin listing filter. Date bounds are inclusive UTC calendar days.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub customer_id: Option<String>,
}

// ── WAL records ──────────────────────────────────────────────────

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RuleCreated { rule: AvailabilityRule },
    RuleUpdated { rule: AvailabilityRule },
    RuleDeleted { id: Ulid },
    BlockOutCreated { block: BlockOutTime },
    BlockOutUpdated { block: BlockOutTime },
    BlockOutDeleted { id: Ulid },
    AppointmentBooked { appointment: Appointment },
    AppointmentStatusChanged { id: Ulid, status: AppointmentStatus },
    ReminderMarked { id: Ulid },
    CustomerUpserted { customer: Customer },
}
