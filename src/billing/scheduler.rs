use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::BillingError;

use super::models::{Invoice, OverdueReport};
use super::service::BillingService;

/// Wall-clock (UTC) times of the two billing jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    pub overdue_hour: u32,
    pub overdue_minute: u32,
    pub invoice_hour: u32,
    pub invoice_minute: u32,
}

impl SweepSchedule {
    /// Out-of-range hours and minutes are clamped.
    pub fn new(overdue: (u32, u32), invoice: (u32, u32)) -> Self {
        Self {
            overdue_hour: overdue.0.min(23),
            overdue_minute: overdue.1.min(59),
            invoice_hour: invoice.0.min(23),
            invoice_minute: invoice.1.min(59),
        }
    }
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self::new((8, 0), (0, 0))
    }
}

/// key: billing-scheduler -> daily overdue sweep and monthly invoice run
pub fn spawn(service: BillingService, schedule: SweepSchedule) {
    let sweep_service = service.clone();
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_daily_run(now, schedule.overdue_hour, schedule.overdue_minute);
            debug!(next_run = %next, "overdue sweep scheduled");
            sleep_until(now, next).await;

            if let Err(err) = process_overdue_tick(&sweep_service, Utc::now()).await {
                warn!(?err, "overdue sweep tick failed");
            }
        }
    });

    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_monthly_run(now, schedule.invoice_hour, schedule.invoice_minute);
            debug!(next_run = %next, "monthly invoice run scheduled");
            sleep_until(now, next).await;

            if let Err(err) = process_invoice_tick(&service, Utc::now()).await {
                warn!(?err, "monthly invoice tick failed");
            }
        }
    });
}

/// key: billing-scheduler -> overdue tick handler
pub async fn process_overdue_tick(
    service: &BillingService,
    now: DateTime<Utc>,
) -> Result<OverdueReport> {
    let report = service.reconcile_overdue(now).await?;
    if report.count > 0 {
        info!(
            overdue = report.count,
            account_blocked = report.account_blocked,
            "overdue sweep flagged invoices"
        );
    } else {
        debug!("overdue sweep found nothing to flag");
    }
    Ok(report)
}

/// key: billing-scheduler -> monthly invoice tick handler
///
/// Returns `None` when the just-completed month was already billed.
pub async fn process_invoice_tick(
    service: &BillingService,
    now: DateTime<Utc>,
) -> Result<Option<Invoice>> {
    match service.generate(None, now).await {
        Ok(invoice) => Ok(Some(invoice)),
        Err(BillingError::AlreadyGenerated(existing)) => {
            info!(
                period = %existing.period,
                invoice = %existing.id,
                "monthly invoice already generated"
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// First instant strictly after `now` at `hour:minute` UTC.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let candidate = start_of_day(now) + time_of_day(hour, minute);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// First instant strictly after `now` that falls on day 1 of a month at `hour:minute` UTC.
pub fn next_monthly_run(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let this_month = start_of_month(now);
    let candidate = this_month + time_of_day(hour, minute);
    if candidate > now {
        candidate
    } else {
        start_of_month(this_month + Duration::days(32)) + time_of_day(hour, minute)
    }
}

async fn sleep_until(now: DateTime<Utc>, next: DateTime<Utc>) {
    let wait = (next - now).to_std().unwrap_or_default();
    time::sleep(wait).await;
}

fn time_of_day(hour: u32, minute: u32) -> Duration {
    Duration::hours(i64::from(hour.min(23))) + Duration::minutes(i64::from(minute.min(59)))
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at - Duration::seconds(i64::from(at.num_seconds_from_midnight()))
        - Duration::nanoseconds(i64::from(at.nanosecond()))
}

fn start_of_month(at: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(at) - Duration::days(i64::from(at.day0()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn daily_run_later_today() {
        let now = utc(2026, 3, 10, 6, 30, 0);
        assert_eq!(next_daily_run(now, 8, 0), utc(2026, 3, 10, 8, 0, 0));
    }

    #[test]
    fn daily_run_rolls_to_tomorrow_when_passed_or_exact() {
        assert_eq!(
            next_daily_run(utc(2026, 3, 10, 9, 0, 0), 8, 0),
            utc(2026, 3, 11, 8, 0, 0)
        );
        assert_eq!(
            next_daily_run(utc(2026, 3, 10, 8, 0, 0), 8, 0),
            utc(2026, 3, 11, 8, 0, 0)
        );
        assert_eq!(
            next_daily_run(utc(2026, 12, 31, 23, 59, 59), 8, 15),
            utc(2027, 1, 1, 8, 15, 0)
        );
    }

    #[test]
    fn monthly_run_targets_first_day() {
        assert_eq!(
            next_monthly_run(utc(2026, 1, 15, 12, 0, 0), 0, 0),
            utc(2026, 2, 1, 0, 0, 0)
        );
        assert_eq!(
            next_monthly_run(utc(2026, 3, 1, 0, 30, 0), 1, 0),
            utc(2026, 3, 1, 1, 0, 0)
        );
        assert_eq!(
            next_monthly_run(utc(2026, 12, 1, 0, 0, 0), 0, 0),
            utc(2027, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            next_monthly_run(utc(2026, 1, 31, 23, 0, 0), 0, 0),
            utc(2026, 2, 1, 0, 0, 0)
        );
    }

    #[test]
    fn schedule_clamps_out_of_range_values() {
        let schedule = SweepSchedule::new((30, 75), (0, 0));
        assert_eq!(schedule.overdue_hour, 23);
        assert_eq!(schedule.overdue_minute, 59);
    }
}
