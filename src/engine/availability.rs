use crate::model::*;

use super::conflict::{blocking_block_out, booking_at, LEAD_BUFFER_MS};
use super::slots::Slot;
use super::store::ScheduleState;

// ── Availability Resolver ─────────────────────────────────────────

/// Filter candidate slots down to the bookable ones.
///
/// A slot is dropped when it starts before `now + LEAD_BUFFER_MS`, when a
/// blocking appointment starts at exactly the same instant, or when any
/// block-out overlaps it. Survivors are returned ascending by start.
/// Identical starts from overlapping rules are kept.
pub fn resolve(candidates: impl IntoIterator<Item = Slot>, schedule: &ScheduleState, now: Ms) -> Vec<Ms> {
    let earliest = now + LEAD_BUFFER_MS;
    let mut offered: Vec<Ms> = candidates
        .into_iter()
        .filter(|slot| slot.start >= earliest)
        .filter(|slot| booking_at(schedule, slot.start).is_none())
        .filter(|slot| blocking_block_out(schedule, &slot.span()).is_none())
        .map(|slot| slot.start)
        .collect();
    offered.sort();
    offered
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    use super::*;
    use crate::engine::slots::generate_slots;
    use crate::time::{anchor, minutes};

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> Ms {
        anchor(monday(), NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn morning_rule() -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            day_of_week: 1,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            slot_duration_minutes: 30,
            is_active: true,
        }
    }

    fn booked(start: Ms, status: AppointmentStatus) -> Event {
        Event::AppointmentBooked {
            appointment: Appointment {
                id: Ulid::new(),
                customer_id: "c1".into(),
                span: Span::new(start, start + minutes(30)),
                status,
                notes: None,
                reminder_sent: false,
                created_at: 0,
            },
        }
    }

    fn blocked(start: Ms, end: Ms) -> Event {
        Event::BlockOutCreated {
            block: BlockOutTime {
                id: Ulid::new(),
                span: Span::new(start, end),
                reason: None,
            },
        }
    }

    fn offered(schedule: &ScheduleState, rules: &[AvailabilityRule], now: Ms) -> Vec<Ms> {
        resolve(generate_slots(rules, monday(), monday()), schedule, now)
    }

    const LONG_AGO: Ms = 0;

    #[test]
    fn empty_schedule_offers_every_slot() {
        let s = ScheduleState::new();
        assert_eq!(offered(&s, &[morning_rule()], LONG_AGO), vec![at(9, 0), at(9, 30)]);
    }

    #[test]
    fn existing_booking_hides_its_start() {
        let mut s = ScheduleState::new();
        s.apply(&booked(at(9, 0), AppointmentStatus::Scheduled));
        assert_eq!(offered(&s, &[morning_rule()], LONG_AGO), vec![at(9, 30)]);
    }

    #[test]
    fn cancelled_booking_is_reoffered() {
        let mut s = ScheduleState::new();
        s.apply(&booked(at(9, 0), AppointmentStatus::CancelledByCustomer));
        assert_eq!(offered(&s, &[morning_rule()], LONG_AGO), vec![at(9, 0), at(9, 30)]);
    }

    #[test]
    fn completed_and_paid_keep_blocking() {
        let mut s = ScheduleState::new();
        s.apply(&booked(at(9, 0), AppointmentStatus::Completed));
        s.apply(&booked(at(9, 30), AppointmentStatus::Paid));
        assert!(offered(&s, &[morning_rule()], LONG_AGO).is_empty());
    }

    #[test]
    fn block_out_straddling_both_slots_hides_both() {
        let mut s = ScheduleState::new();
        s.apply(&blocked(at(9, 15), at(9, 45)));
        assert!(offered(&s, &[morning_rule()], LONG_AGO).is_empty());
    }

    #[test]
    fn block_out_touching_slot_edge_does_not_hide_it() {
        let mut s = ScheduleState::new();
        // [08:00, 09:00) ends where the first slot begins.
        s.apply(&blocked(at(8, 0), at(9, 0)));
        // [10:00, 11:00) starts where the last slot ends.
        s.apply(&blocked(at(10, 0), at(11, 0)));
        assert_eq!(offered(&s, &[morning_rule()], LONG_AGO), vec![at(9, 0), at(9, 30)]);
    }

    #[test]
    fn lead_buffer_hides_imminent_slots() {
        let s = ScheduleState::new();
        let rules = [morning_rule()];
        // 4 minutes before 09:30: 09:30 is inside the buffer.
        assert!(offered(&s, &rules, at(9, 26)).is_empty());
        // Exactly 5 minutes before: still offered.
        assert_eq!(offered(&s, &rules, at(9, 25)), vec![at(9, 30)]);
    }

    #[test]
    fn output_is_sorted_and_keeps_duplicates() {
        let s = ScheduleState::new();
        let mut hourly = morning_rule();
        hourly.slot_duration_minutes = 60;
        // Afternoon rule listed first so raw generation is out of order.
        let mut afternoon = morning_rule();
        afternoon.start_time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        afternoon.end_time = NaiveTime::from_hms_opt(15, 0, 0).unwrap();

        let out = offered(&s, &[afternoon, morning_rule(), hourly], LONG_AGO);
        assert_eq!(out, vec![at(9, 0), at(9, 0), at(9, 30), at(14, 0), at(14, 30)]);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn same_inputs_same_output() {
        let mut s = ScheduleState::new();
        s.apply(&booked(at(9, 30), AppointmentStatus::Confirmed));
        let rules = [morning_rule()];
        let now = at(6, 0);
        assert_eq!(offered(&s, &rules, now), offered(&s, &rules, now));
    }

    #[test]
    fn no_offered_slot_overlaps_any_block_out() {
        let mut s = ScheduleState::new();
        let mut wide = morning_rule();
        wide.end_time = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        wide.slot_duration_minutes = 20;
        let blocks = [(at(10, 5), at(10, 50)), (at(12, 0), at(12, 1)), (at(15, 40), at(17, 0))];
        for (a, b) in blocks {
            s.apply(&blocked(a, b));
        }
        let out = offered(&s, &[wide], LONG_AGO);
        assert!(!out.is_empty());
        for start in out {
            let end = start + minutes(20);
            for (bs, be) in blocks {
                assert!(!(start < be && end > bs), "slot {start} overlaps block {bs}..{be}");
            }
        }
    }
}
