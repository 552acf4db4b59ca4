use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Days, Duration, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};

use super::Orchestrator;

/// What a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Check,
    Maintenance,
}

impl TriggerKind {
    /// Misfire grace window: a firing this late still runs, anything later
    /// is coalesced into the next occurrence.
    pub fn misfire_grace(self) -> Duration {
        match self {
            TriggerKind::Check => Duration::minutes(5),
            TriggerKind::Maintenance => Duration::hours(1),
        }
    }
}

/// One named wall-clock trigger in the scheduler's timezone.
#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub id: String,
    pub time: NaiveTime,
    pub kind: TriggerKind,
}

impl TriggerSpec {
    pub fn check(time: NaiveTime) -> Self {
        Self {
            id: format!("check_{:02}_{:02}", time.hour(), time.minute()),
            time,
            kind: TriggerKind::Check,
        }
    }

    pub fn maintenance(time: NaiveTime) -> Self {
        Self { id: "nightly_backup".to_string(), time, kind: TriggerKind::Maintenance }
    }

    /// Next wall-clock occurrence of this trigger strictly after `now`.
    pub fn next_occurrence(&self, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let today = now.with_timezone(&tz).date_naive();

        // Three days cover today-already-passed plus a DST gap landing
        // exactly on the trigger time.
        for day in 0..3u64 {
            let date = today + Days::new(day);
            if let Some(candidate) = resolve_local(tz, date.and_time(self.time)) {
                if candidate > now {
                    return candidate;
                }
            }
        }

        // Unreachable for sane trigger times.
        now + Duration::days(1)
    }
}

/// Map a local wall-clock datetime onto the timeline.
///
/// Ambiguous times (fall-back) take the earlier instant; skipped times
/// (spring-forward) shift to the earliest valid instant an hour later.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        chrono::LocalResult::Single(instant) => Some(instant.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|instant| instant.with_timezone(&Utc)),
    }
}

/// Run scheduler: holds the trigger set and drives the firing loop.
///
/// `next_fire_time` is a pure computation over the trigger set so status
/// endpoints can answer without touching the timer task.
pub struct Scheduler {
    triggers: Vec<TriggerSpec>,
    tz: Tz,
    running: AtomicBool,
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub timezone: String,
    pub triggers: Vec<TriggerStatus>,
}

#[derive(Debug, Serialize)]
pub struct TriggerStatus {
    pub id: String,
    pub next_run: Option<String>,
}

impl Scheduler {
    pub fn new(check_times: &[NaiveTime], maintenance_time: NaiveTime, tz: Tz) -> Self {
        let mut triggers: Vec<TriggerSpec> =
            check_times.iter().copied().map(TriggerSpec::check).collect();
        triggers.push(TriggerSpec::maintenance(maintenance_time));

        Self { triggers, tz, running: AtomicBool::new(false) }
    }

    /// Soonest upcoming check occurrence (today if not yet passed, else
    /// tomorrow). Maintenance triggers are not "checks" and are excluded.
    pub fn next_fire_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.triggers
            .iter()
            .filter(|trigger| trigger.kind == TriggerKind::Check)
            .map(|trigger| trigger.next_occurrence(now, self.tz))
            .min()
    }

    /// Whether `now` still precedes the first configured check time of the
    /// local day; used for the eager catch-up run at startup.
    pub fn before_first_check_today(&self, now: DateTime<Utc>) -> bool {
        let local_time = now.with_timezone(&self.tz).time();
        self.triggers
            .iter()
            .filter(|trigger| trigger.kind == TriggerKind::Check)
            .map(|trigger| trigger.time)
            .min()
            .map(|first| local_time < first)
            .unwrap_or(false)
    }

    pub fn status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::Acquire),
            timezone: self.tz.name().to_string(),
            triggers: self
                .triggers
                .iter()
                .map(|trigger| TriggerStatus {
                    id: trigger.id.clone(),
                    next_run: Some(trigger.next_occurrence(now, self.tz).to_rfc3339()),
                })
                .collect(),
        }
    }

    fn next_trigger(&self, now: DateTime<Utc>) -> Option<(TriggerSpec, DateTime<Utc>)> {
        self.triggers
            .iter()
            .map(|trigger| (trigger.clone(), trigger.next_occurrence(now, self.tz)))
            .min_by_key(|(_, when)| *when)
    }

    /// Firing loop. One dispatch at a time; recomputing the next occurrence
    /// from the current time coalesces any firings missed while a job ran or
    /// the process was suspended.
    pub async fn run(self: Arc<Self>, orchestrator: Arc<Orchestrator>) {
        self.running.store(true, Ordering::Release);

        loop {
            let now = Utc::now();
            let Some((trigger, fire_at)) = self.next_trigger(now) else {
                warn!("no triggers configured, scheduler going idle");
                self.running.store(false, Ordering::Release);
                return;
            };

            info!(trigger = %trigger.id, fire_at = %fire_at.to_rfc3339(), "scheduler waiting");
            let wait = (fire_at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            // The process may have been suspended well past the slot.
            let late = Utc::now() - fire_at;
            if late > trigger.kind.misfire_grace() {
                warn!(
                    trigger = %trigger.id,
                    late_secs = late.num_seconds(),
                    "missed firing beyond grace window, coalescing to next occurrence"
                );
                continue;
            }

            match trigger.kind {
                TriggerKind::Check => orchestrator.scheduled_batch().await,
                TriggerKind::Maintenance => orchestrator.run_maintenance().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(&[t(8, 0), t(14, 0), t(20, 0)], t(2, 0), New_York)
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        New_York.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn next_fire_before_first_slot_is_today() {
        let now = local(2026, 6, 15, 7, 0);
        let next = scheduler().next_fire_time(now).unwrap();
        assert_eq!(next, local(2026, 6, 15, 8, 0));
    }

    #[test]
    fn next_fire_between_slots_is_the_following_slot() {
        let now = local(2026, 6, 15, 9, 30);
        let next = scheduler().next_fire_time(now).unwrap();
        assert_eq!(next, local(2026, 6, 15, 14, 0));
    }

    #[test]
    fn next_fire_after_last_slot_rolls_to_tomorrow() {
        let now = local(2026, 6, 15, 21, 0);
        let next = scheduler().next_fire_time(now).unwrap();
        assert_eq!(next, local(2026, 6, 16, 8, 0));
    }

    #[test]
    fn next_fire_excludes_the_maintenance_trigger() {
        // 01:00 local: the 02:00 backup is sooner than the 08:00 check but
        // must not be reported as the next check time.
        let now = local(2026, 6, 15, 1, 0);
        let next = scheduler().next_fire_time(now).unwrap();
        assert_eq!(next, local(2026, 6, 15, 8, 0));
    }

    #[test]
    fn trigger_ids_follow_their_times() {
        let spec = TriggerSpec::check(t(14, 0));
        assert_eq!(spec.id, "check_14_00");
        let spec = TriggerSpec::maintenance(t(2, 0));
        assert_eq!(spec.id, "nightly_backup");
    }

    #[test]
    fn misfire_grace_differs_per_kind() {
        assert_eq!(TriggerKind::Check.misfire_grace(), Duration::minutes(5));
        assert_eq!(TriggerKind::Maintenance.misfire_grace(), Duration::hours(1));
    }

    #[test]
    fn eager_catchup_window() {
        let sched = scheduler();
        assert!(sched.before_first_check_today(local(2026, 6, 15, 7, 59)));
        assert!(!sched.before_first_check_today(local(2026, 6, 15, 8, 0)));
        assert!(!sched.before_first_check_today(local(2026, 6, 15, 23, 0)));
    }

    #[test]
    fn spring_forward_gap_resolves_to_next_valid_instant() {
        // 2026-03-08 02:30 does not exist in New York; the occurrence shifts
        // an hour forward to 03:30 EDT (07:30 UTC).
        let sched = Scheduler::new(&[t(2, 30)], t(4, 0), New_York);
        let now = Utc.with_ymd_and_hms(2026, 3, 8, 6, 0, 0).unwrap(); // 01:00 EST
        let next = sched.next_fire_time(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 8, 7, 30, 0).unwrap());
    }

    #[test]
    fn fall_back_ambiguity_takes_the_earlier_instant() {
        // 2026-11-01 01:30 happens twice in New York; the earlier (EDT)
        // instant wins: 05:30 UTC.
        let sched = Scheduler::new(&[t(1, 30)], t(4, 0), New_York);
        let now = Utc.with_ymd_and_hms(2026, 11, 1, 4, 0, 0).unwrap(); // 00:00 EDT
        let next = sched.next_fire_time(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap());
    }

    #[test]
    fn status_lists_every_trigger() {
        let now = local(2026, 6, 15, 7, 0);
        let status = scheduler().status(now);
        assert!(!status.running);
        assert_eq!(status.timezone, "America/New_York");
        let ids: Vec<&str> = status.triggers.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["check_08_00", "check_14_00", "check_20_00", "nightly_backup"]);
        assert!(status.triggers.iter().all(|t| t.next_run.is_some()));
    }
}
