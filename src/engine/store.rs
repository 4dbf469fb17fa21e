use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use crate::model::*;

/// The three logical tables plus the start-time index.
///
/// `active_starts` is the uniqueness constraint on `start_time` scoped to
/// blocking appointments: at most one non-cancelled appointment per instant.
#[derive(Debug, Default)]
pub struct ScheduleState {
    rules: BTreeMap<Ulid, AvailabilityRule>,
    /// Sorted by `span.start`.
    block_outs: Vec<BlockOutTime>,
    appointments: HashMap<Ulid, Appointment>,
    active_starts: BTreeMap<Ms, Ulid>,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Rules ────────────────────────────────────────────────

    pub fn rules(&self) -> impl Iterator<Item = &AvailabilityRule> {
        self.rules.values()
    }

    pub fn active_rules(&self) -> Vec<AvailabilityRule> {
        self.rules.values().filter(|r| r.is_active).cloned().collect()
    }

    pub fn rule(&self, id: &Ulid) -> Option<&AvailabilityRule> {
        self.rules.get(id)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    // ── Block-outs ───────────────────────────────────────────

    pub fn block_outs(&self) -> &[BlockOutTime] {
        &self.block_outs
    }

    pub fn block_out(&self, id: &Ulid) -> Option<&BlockOutTime> {
        self.block_outs.iter().find(|b| b.id == *id)
    }

    /// Block-outs whose span overlaps `query` (half-open on both sides).
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping_block_outs(&self, query: &Span) -> impl Iterator<Item = &BlockOutTime> {
        let right_bound = self
            .block_outs
            .partition_point(|b| b.span.start < query.end);
        self.block_outs[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    fn insert_block_out(&mut self, block: BlockOutTime) {
        let pos = self
            .block_outs
            .partition_point(|b| b.span.start <= block.span.start);
        self.block_outs.insert(pos, block);
    }

    fn remove_block_out(&mut self, id: &Ulid) -> Option<BlockOutTime> {
        let pos = self.block_outs.iter().position(|b| b.id == *id)?;
        Some(self.block_outs.remove(pos))
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.values()
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.get(id)
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    /// The blocking appointment that starts exactly at `start`, if any.
    pub fn holder_of(&self, start: Ms) -> Option<&Appointment> {
        self.active_starts
            .get(&start)
            .and_then(|id| self.appointments.get(id))
    }

    /// Blocking appointments with `from <= start <= to`, ascending by start.
    pub fn blocking_between(&self, from: Ms, to: Ms) -> impl Iterator<Item = &Appointment> {
        let range = if from <= to {
            self.active_starts.range(from..=to)
        } else {
            self.active_starts.range(0..0)
        };
        range.filter_map(|(_, id)| self.appointments.get(id))
    }

    // ── Event application ────────────────────────────────────

    /// Apply a WAL event. Customer records live outside the schedule and
    /// are ignored here.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::RuleCreated { rule } | Event::RuleUpdated { rule } => {
                self.rules.insert(rule.id, rule.clone());
            }
            Event::RuleDeleted { id } => {
                self.rules.remove(id);
            }
            Event::BlockOutCreated { block } => {
                self.insert_block_out(block.clone());
            }
            Event::BlockOutUpdated { block } => {
                self.remove_block_out(&block.id);
                self.insert_block_out(block.clone());
            }
            Event::BlockOutDeleted { id } => {
                self.remove_block_out(id);
            }
            Event::AppointmentBooked { appointment } => {
                if appointment.status.is_blocking() {
                    self.active_starts
                        .insert(appointment.span.start, appointment.id);
                }
                self.appointments.insert(appointment.id, appointment.clone());
            }
            Event::AppointmentStatusChanged { id, status } => {
                let Some(appt) = self.appointments.get_mut(id) else {
                    return;
                };
                let was_blocking = appt.status.is_blocking();
                appt.status = *status;
                let start = appt.span.start;
                match (was_blocking, status.is_blocking()) {
                    (true, false) => {
                        if self.active_starts.get(&start) == Some(id) {
                            self.active_starts.remove(&start);
                        }
                    }
                    (false, true) => {
                        self.active_starts.insert(start, *id);
                    }
                    _ => {}
                }
            }
            Event::ReminderMarked { id } => {
                if let Some(appt) = self.appointments.get_mut(id) {
                    appt.reminder_sent = true;
                }
            }
            Event::CustomerUpserted { .. } => {}
        }
    }
}
