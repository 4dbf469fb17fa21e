use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::time::{date_of, day_of_week};

// ── Slot Generator ────────────────────────────────────────────────

/// A candidate appointment window produced by one rule on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: Ms,
    pub end: Ms,
    pub rule_id: Ulid,
}

impl Slot {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Lazy walk over every slot the rules define in `[from, to]`.
///
/// Days are visited in order; within a day each matching rule emits its own
/// back-to-back sequence, so slots from different rules interleave and may
/// repeat. Cloning the generator restarts from the clone point.
#[derive(Debug, Clone)]
pub struct SlotGenerator<'a> {
    rules: &'a [AvailabilityRule],
    day: Option<NaiveDate>,
    last: NaiveDate,
    rule_idx: usize,
    /// (next start, window end, duration, rule)
    cursor: Option<(Ms, Ms, Ms, Ulid)>,
}

pub fn generate_slots(
    rules: &[AvailabilityRule],
    from: NaiveDate,
    to: NaiveDate,
) -> SlotGenerator<'_> {
    SlotGenerator {
        rules,
        day: (from <= to).then_some(from),
        last: to,
        rule_idx: 0,
        cursor: None,
    }
}

impl Iterator for SlotGenerator<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        loop {
            if let Some((start, limit, duration, rule_id)) = self.cursor {
                let end = start + duration;
                if end <= limit {
                    self.cursor = Some((end, limit, duration, rule_id));
                    return Some(Slot { start, end, rule_id });
                }
                self.cursor = None;
            }

            let day = self.day?;
            match self.rules.get(self.rule_idx) {
                Some(rule) => {
                    self.rule_idx += 1;
                    if applies_on(rule, day) {
                        let window = rule.window_on(day);
                        self.cursor =
                            Some((window.start, window.end, rule.slot_duration_ms(), rule.id));
                    }
                }
                None => {
                    self.rule_idx = 0;
                    self.day = if day < self.last { day.succ_opt() } else { None };
                }
            }
        }
    }
}

/// Inactive, zero-duration or inverted rules never produce slots.
fn applies_on(rule: &AvailabilityRule, day: NaiveDate) -> bool {
    rule.is_active
        && rule.slot_duration_minutes > 0
        && rule.start_time < rule.end_time
        && rule.day_of_week == day_of_week(day)
}

/// The rule that decides the length of a booking starting at `start`: an
/// active rule for that weekday that offers a slot starting exactly there,
/// i.e. `start` sits on the rule's slot grid and the whole slot fits in the
/// window. When several do, the one whose window opens first wins.
pub fn governing_rule<'a>(
    rules: impl IntoIterator<Item = &'a AvailabilityRule>,
    start: Ms,
) -> Option<&'a AvailabilityRule> {
    let day = date_of(start)?;
    rules
        .into_iter()
        .filter(|rule| applies_on(rule, day))
        .filter(|rule| {
            let window = rule.window_on(day);
            let duration = rule.slot_duration_ms();
            window.start <= start
                && (start - window.start) % duration == 0
                && start + duration <= window.end
        })
        .min_by_key(|rule| (rule.start_time, rule.id))
}
