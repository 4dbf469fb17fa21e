use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::time::{anchor, days_inclusive};

use super::availability::resolve;
use super::slots::generate_slots;
use super::{Engine, EngineError};

/// First instant of `date` and first instant of the following day.
fn day_bounds(date: NaiveDate) -> (Ms, Ms) {
    let start = anchor(date, NaiveTime::MIN);
    let next = date
        .succ_opt()
        .map(|d| anchor(d, NaiveTime::MIN))
        .unwrap_or(Ms::MAX);
    (start, next)
}

impl Engine {
    /// Bookable slot starts for the inclusive calendar range `[from, to]`,
    /// ascending. An inverted range is empty, not an error.
    pub async fn available_slots(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Ms>, EngineError> {
        let days = days_inclusive(from, to);
        if days > MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        if days == 0 {
            return Ok(Vec::new());
        }
        if day_bounds(from).0 < MIN_VALID_TIMESTAMP_MS
            || day_bounds(to).1 > MAX_VALID_TIMESTAMP_MS + 1
        {
            return Err(EngineError::Validation("date out of range".into()));
        }

        let schedule = self.schedule.read().await;
        let rules = schedule.active_rules();
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let slots = resolve(generate_slots(&rules, from, to), &schedule, self.now());
        metrics::histogram!(observability::SLOTS_OFFERED).record(slots.len() as f64);
        Ok(slots)
    }

    /// Rules ordered by weekday, then window start.
    pub async fn list_rules(&self) -> Vec<AvailabilityRule> {
        let schedule = self.schedule.read().await;
        let mut rules: Vec<AvailabilityRule> = schedule.rules().cloned().collect();
        rules.sort_by_key(|r| (r.day_of_week, r.start_time, r.id));
        rules
    }

    pub async fn list_block_outs(&self) -> Vec<BlockOutTime> {
        self.schedule.read().await.block_outs().to_vec()
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        self.schedule.read().await.appointment(&id).cloned()
    }

    /// Every appointment owned by `customer_id`, cancelled ones included,
    /// ascending by start.
    pub async fn customer_appointments(&self, customer_id: &str) -> Vec<Appointment> {
        self.list_appointments(&AppointmentFilter {
            customer_id: Some(customer_id.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let lower = filter.from.map(|d| day_bounds(d).0).unwrap_or(Ms::MIN);
        let upper = filter.to.map(|d| day_bounds(d).1).unwrap_or(Ms::MAX);

        let schedule = self.schedule.read().await;
        let mut out: Vec<Appointment> = schedule
            .appointments()
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| {
                filter
                    .customer_id
                    .as_deref()
                    .is_none_or(|c| a.customer_id == c)
            })
            .filter(|a| lower <= a.span.start && a.span.start < upper)
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.span.start, a.created_at, a.id));
        out
    }

    /// Remindable appointments starting in `[from, to]` (both inclusive)
    /// that have not had a reminder yet.
    pub async fn reminder_candidates(&self, from: Ms, to: Ms) -> Vec<Appointment> {
        let schedule = self.schedule.read().await;
        schedule
            .blocking_between(from, to)
            .filter(|a| a.status.is_remindable() && !a.reminder_sent)
            .cloned()
            .collect()
    }

    pub fn get_customer(&self, id: &str) -> Option<Customer> {
        self.customers.get(id).map(|c| c.value().clone())
    }

    pub fn list_customers(&self) -> Vec<Customer> {
        let mut out: Vec<Customer> = self.customers.iter().map(|c| c.value().clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}
