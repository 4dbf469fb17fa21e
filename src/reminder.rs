use std::sync::Arc;

use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::model::{Appointment, Customer, Ms};
use crate::notify::{Notifier, Reminder};
use crate::observability;
use crate::time::HOUR_MS;

/// Half-width of the scan window around `now + lead`.
pub const WINDOW_SLACK_MS: Ms = 15 * 60_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub found: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Finds appointments starting about `lead` from now and hands them to
/// the notifier, once each.
pub struct ReminderScanner {
    engine: Arc<Engine>,
    notifier: Arc<dyn Notifier>,
    lead: Ms,
}

impl ReminderScanner {
    pub fn new(engine: Arc<Engine>, notifier: Arc<dyn Notifier>, lead_hours: u32) -> Self {
        Self {
            engine,
            notifier,
            lead: i64::from(lead_hours) * HOUR_MS,
        }
    }

    /// `[now + lead - 15m, now + lead + 15m]`, both ends inclusive.
    pub fn window(&self, now: Ms) -> (Ms, Ms) {
        let target = now + self.lead;
        (target - WINDOW_SLACK_MS, target + WINDOW_SLACK_MS)
    }

    /// One pass. A failed delivery is logged and left unmarked so a later
    /// pass may pick it up while it is still inside the window.
    pub async fn scan_once(&self, now: Ms) -> ScanReport {
        let (from, to) = self.window(now);
        let due = self.engine.reminder_candidates(from, to).await;
        let mut report = ScanReport {
            found: due.len(),
            ..Default::default()
        };

        for appt in &due {
            let customer = self.engine.get_customer(&appt.customer_id);
            let Some(reminder) = compose_reminder(appt, customer.as_ref()) else {
                warn!(
                    "skipping reminder for appointment {}: no email for customer {}",
                    appt.id, appt.customer_id
                );
                metrics::counter!(observability::REMINDERS_TOTAL, "outcome" => "skipped").increment(1);
                report.skipped += 1;
                continue;
            };

            match self.notifier.deliver(&reminder).await {
                Ok(()) => match self.engine.mark_reminder_sent(appt.id).await {
                    Ok(_) => {
                        info!("reminder sent for appointment {} to {}", appt.id, reminder.to);
                        metrics::counter!(observability::REMINDERS_TOTAL, "outcome" => "sent")
                            .increment(1);
                        report.sent += 1;
                    }
                    Err(e) => {
                        error!("reminder for {} delivered but not recorded: {e}", appt.id);
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    error!("reminder for appointment {} to {} failed: {e}", appt.id, reminder.to);
                    metrics::counter!(observability::REMINDERS_TOTAL, "outcome" => "failed")
                        .increment(1);
                    report.failed += 1;
                }
            }
        }

        if report.found > 0 {
            info!(
                "reminder scan: {} found, {} sent, {} skipped, {} failed",
                report.found, report.sent, report.skipped, report.failed
            );
        }
        report
    }
}

/// Subject and body for `appt`, or `None` when there is nowhere to send it.
pub fn compose_reminder(appt: &Appointment, customer: Option<&Customer>) -> Option<Reminder> {
    let customer = customer?;
    let to = customer.email.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
    let when = chrono::DateTime::from_timestamp_millis(appt.span.start)?;
    let date = when.format("%A, %B %-d, %Y");
    let time = when.format("%H:%M");
    let name = customer
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("Customer");

    Some(Reminder {
        appointment_id: appt.id,
        to: to.to_string(),
        subject: format!("Appointment Reminder - {date}"),
        body: format!(
            "Hi {name},\n\n\
             This is a friendly reminder for your upcoming appointment scheduled for:\n\n\
             {date} at {time} UTC\n\n\
             We look forward to seeing you!\n"
        ),
    })
}

/// Drive `scan_once` from an injected timer until the task is dropped.
pub async fn run_reminders(scanner: ReminderScanner, mut interval: tokio::time::Interval) {
    loop {
        interval.tick().await;
        let now = scanner.engine.now();
        scanner.scan_once(now).await;
    }
}

/// Compact the WAL whenever `threshold` appends have built up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, mut interval: tokio::time::Interval) {
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            error!("WAL compaction after {appends} appends failed: {e}");
        }
    }
}
