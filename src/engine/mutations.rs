use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{
    booking_span, check_slot_free, validate_block_out, validate_instant, validate_rule,
    validate_text,
};
use super::slots::governing_rule;
use super::{Engine, EngineError};

fn no_fields() -> EngineError {
    EngineError::Validation("no update fields provided".into())
}

fn validate_customer_id(customer_id: &str) -> Result<(), EngineError> {
    if customer_id.trim().is_empty() {
        return Err(EngineError::Validation("customer id must not be empty".into()));
    }
    if customer_id.len() > MAX_CUSTOMER_ID_LEN {
        return Err(EngineError::LimitExceeded("customer id too long"));
    }
    Ok(())
}

impl Engine {
    // ── Availability rules ───────────────────────────────────

    pub async fn create_rule(&self, new: NewRule) -> Result<AvailabilityRule, EngineError> {
        validate_rule(
            new.day_of_week,
            new.start_time,
            new.end_time,
            new.slot_duration_minutes,
        )?;
        let mut schedule = self.schedule.write().await;
        if schedule.rule_count() >= MAX_RULES {
            return Err(EngineError::LimitExceeded("too many availability rules"));
        }
        let rule = AvailabilityRule {
            id: Ulid::new(),
            day_of_week: new.day_of_week,
            start_time: new.start_time,
            end_time: new.end_time,
            slot_duration_minutes: new.slot_duration_minutes,
            is_active: new.is_active,
        };
        self.persist_and_apply(&mut schedule, Event::RuleCreated { rule: rule.clone() })
            .await?;
        info!(
            "rule {} created: day {} {}-{} every {}m",
            rule.id, rule.day_of_week, rule.start_time, rule.end_time, rule.slot_duration_minutes
        );
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        id: Ulid,
        update: RuleUpdate,
    ) -> Result<AvailabilityRule, EngineError> {
        if update.is_empty() {
            return Err(no_fields());
        }
        let mut schedule = self.schedule.write().await;
        let current = schedule.rule(&id).ok_or(EngineError::NotFound(id))?;
        let rule = update.apply_to(current);
        validate_rule(
            rule.day_of_week,
            rule.start_time,
            rule.end_time,
            rule.slot_duration_minutes,
        )?;
        self.persist_and_apply(&mut schedule, Event::RuleUpdated { rule: rule.clone() })
            .await?;
        info!("rule {id} updated");
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: Ulid) -> Result<(), EngineError> {
        let mut schedule = self.schedule.write().await;
        if schedule.rule(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut schedule, Event::RuleDeleted { id })
            .await?;
        info!("rule {id} deleted");
        Ok(())
    }

    // ── Block-outs ───────────────────────────────────────────

    pub async fn create_block_out(&self, new: NewBlockOut) -> Result<BlockOutTime, EngineError> {
        let span = validate_block_out(new.start, new.end, new.reason.as_deref())?;
        let mut schedule = self.schedule.write().await;
        if schedule.block_outs().len() >= MAX_BLOCK_OUTS {
            return Err(EngineError::LimitExceeded("too many block-outs"));
        }
        let block = BlockOutTime {
            id: Ulid::new(),
            span,
            reason: new.reason,
        };
        self.persist_and_apply(&mut schedule, Event::BlockOutCreated { block: block.clone() })
            .await?;
        info!("block-out {} created", block.id);
        Ok(block)
    }

    pub async fn update_block_out(
        &self,
        id: Ulid,
        update: BlockOutUpdate,
    ) -> Result<BlockOutTime, EngineError> {
        if update.is_empty() {
            return Err(no_fields());
        }
        let mut schedule = self.schedule.write().await;
        let current = schedule.block_out(&id).ok_or(EngineError::NotFound(id))?;
        let start = update.start.unwrap_or(current.span.start);
        let end = update.end.unwrap_or(current.span.end);
        let reason = match update.reason {
            Some(reason) => reason,
            None => current.reason.clone(),
        };
        let span = validate_block_out(start, end, reason.as_deref())?;
        let block = BlockOutTime { id, span, reason };
        self.persist_and_apply(&mut schedule, Event::BlockOutUpdated { block: block.clone() })
            .await?;
        info!("block-out {id} updated");
        Ok(block)
    }

    pub async fn delete_block_out(&self, id: Ulid) -> Result<(), EngineError> {
        let mut schedule = self.schedule.write().await;
        if schedule.block_out(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut schedule, Event::BlockOutDeleted { id })
            .await?;
        info!("block-out {id} deleted");
        Ok(())
    }

    // ── Booking Committer ────────────────────────────────────

    /// Book `start` for `customer_id`.
    ///
    /// The conflict checks run against live state under the schedule write
    /// lock, and the appointment is only inserted after its WAL record is
    /// durable, so two requests for the same instant can never both win.
    pub async fn book_appointment(
        &self,
        customer_id: &str,
        start: Ms,
        notes: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_customer_id(customer_id)?;
        validate_text(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        validate_instant(start)?;
        let now = self.now();
        if start <= now {
            return Err(EngineError::Validation(
                "appointment time must be in the future".into(),
            ));
        }

        let mut schedule = self.schedule.write().await;
        if schedule.appointment_count() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }
        let duration = governing_rule(schedule.rules(), start)
            .map(|rule| rule.slot_duration_minutes)
            .ok_or_else(|| {
                EngineError::Validation("requested time is outside availability".into())
            })?;
        let span = booking_span(start, duration)?;
        if let Err(e) = check_slot_free(&schedule, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "reason" => conflict_label(&e))
                .increment(1);
            debug!("booking at {start} rejected: {e}");
            return Err(e);
        }

        let appointment = Appointment {
            id: Ulid::new(),
            customer_id: customer_id.to_string(),
            span,
            status: AppointmentStatus::Scheduled,
            notes,
            reminder_sent: false,
            created_at: now,
        };
        self.persist_and_apply(
            &mut schedule,
            Event::AppointmentBooked {
                appointment: appointment.clone(),
            },
        )
        .await?;
        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        info!("appointment {} booked by {customer_id}", appointment.id);
        Ok(appointment)
    }

    /// Customer-initiated cancel: owner only, from scheduled or confirmed.
    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        customer_id: &str,
    ) -> Result<Appointment, EngineError> {
        let mut schedule = self.schedule.write().await;
        let appt = schedule.appointment(&id).ok_or(EngineError::NotFound(id))?;
        if appt.customer_id != customer_id {
            return Err(EngineError::Forbidden(
                "appointment belongs to another customer",
            ));
        }
        if !appt.status.is_customer_cancellable() {
            return Err(EngineError::CannotCancel(appt.status));
        }
        self.set_status_locked(&mut schedule, id, AppointmentStatus::CancelledByCustomer)
            .await
    }

    /// Admin transition to any status. Reviving a cancelled appointment is
    /// refused while another blocking appointment holds its start.
    pub async fn set_appointment_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let mut schedule = self.schedule.write().await;
        let appt = schedule.appointment(&id).ok_or(EngineError::NotFound(id))?;
        if status.is_blocking()
            && let Some(holder) = schedule.holder_of(appt.span.start)
            && holder.id != id
        {
            return Err(EngineError::SlotTaken(appt.span.start));
        }
        self.set_status_locked(&mut schedule, id, status).await
    }

    async fn set_status_locked(
        &self,
        schedule: &mut super::ScheduleState,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        self.persist_and_apply(schedule, Event::AppointmentStatusChanged { id, status })
            .await?;
        info!("appointment {id} -> {status}");
        schedule
            .appointment(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Flip `reminder_sent` to true. Returns false when it already was.
    pub async fn mark_reminder_sent(&self, id: Ulid) -> Result<bool, EngineError> {
        let mut schedule = self.schedule.write().await;
        let appt = schedule.appointment(&id).ok_or(EngineError::NotFound(id))?;
        if appt.reminder_sent {
            return Ok(false);
        }
        self.persist_and_apply(&mut schedule, Event::ReminderMarked { id })
            .await?;
        Ok(true)
    }

    // ── Customer directory ───────────────────────────────────

    pub async fn upsert_customer(&self, customer: Customer) -> Result<Customer, EngineError> {
        validate_customer_id(&customer.id)?;
        validate_text(customer.name.as_deref(), MAX_NAME_LEN, "name too long")?;
        validate_text(customer.email.as_deref(), MAX_EMAIL_LEN, "email too long")?;
        if let Some(email) = &customer.email
            && !email.contains('@')
        {
            return Err(EngineError::Validation(format!("invalid email address '{email}'")));
        }

        // Serialises with compaction, which snapshots under the read lock.
        let _schedule = self.schedule.write().await;
        if !self.customers.contains_key(&customer.id) && self.customers.len() >= MAX_CUSTOMERS {
            return Err(EngineError::LimitExceeded("too many customers"));
        }
        self.wal_append(&Event::CustomerUpserted {
            customer: customer.clone(),
        })
        .await?;
        self.customers.insert(customer.id.clone(), customer.clone());
        debug!("customer {} upserted", customer.id);
        Ok(customer)
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let schedule = self.schedule.read().await;
        let mut events: Vec<Event> = Vec::new();
        events.extend(schedule.rules().map(|rule| Event::RuleCreated { rule: rule.clone() }));
        events.extend(
            schedule
                .block_outs()
                .iter()
                .map(|block| Event::BlockOutCreated { block: block.clone() }),
        );
        events.extend(schedule.appointments().map(|appointment| Event::AppointmentBooked {
            appointment: appointment.clone(),
        }));
        events.extend(self.customers.iter().map(|entry| Event::CustomerUpserted {
            customer: entry.value().clone(),
        }));
        let count = events.len();
        self.wal_compact(events).await?;
        info!("WAL compacted to {count} events");
        Ok(())
    }
}

fn conflict_label(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotTaken(_) => "taken",
        EngineError::SlotBlocked { .. } => "blocked",
        _ => "other",
    }
}
