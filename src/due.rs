use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};

use crate::models::Task;

/// Time zone in which task dates and times are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Utc,
    Local,
    Fixed(FixedOffset),
}

/// Resolves a task's due instant with a fixed zone and default time of day.
#[derive(Debug, Clone, Copy)]
pub struct DueResolver {
    pub zone: Zone,
    pub default_time: NaiveTime,
}

impl DueResolver {
    pub fn new(zone: Zone, default_time: NaiveTime) -> Self {
        Self { zone, default_time }
    }

    pub fn due_instant(&self, task: &Task) -> Option<DateTime<Utc>> {
        match self.zone {
            Zone::Utc => compute_due_instant(task, &Utc, self.default_time),
            Zone::Local => compute_due_instant(task, &Local, self.default_time),
            Zone::Fixed(offset) => compute_due_instant(task, &offset, self.default_time),
        }
    }
}

/// Computes the instant a task is due.
///
/// The scheduling fields are merged with the following precedence:
/// 1. `start_date` + `start_time`
/// 2. `due_date` + `start_time`
/// 3. `due_date` alone, at `default_time`
/// 4. `start_date` alone, at `default_time`
/// 5. none of the above: no due instant
///
/// Dates and times are wall-clock values in `tz`.
pub fn compute_due_instant<Tz: TimeZone>(
    task: &Task,
    tz: &Tz,
    default_time: NaiveTime,
) -> Option<DateTime<Utc>> {
    let naive = match (task.start_date, task.due_date, task.start_time) {
        (Some(start), _, Some(time)) => start.and_time(time),
        (_, Some(due), Some(time)) => due.and_time(time),
        (_, Some(due), None) => due.and_time(default_time),
        (Some(start), None, None) => start.and_time(default_time),
        _ => return None,
    };
    resolve_local(tz, naive)
}

/// Computes when a reminder `offset_minutes` before `due` should fire.
pub fn fire_instant(due: DateTime<Utc>, offset_minutes: u32) -> DateTime<Utc> {
    due - Duration::minutes(i64::from(offset_minutes))
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

/// Parses an `HH:MM` wall-clock time.
pub fn parse_time(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(s, "%H:%M")
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    // Wall-clock times that fall in a DST gap are moved past the gap.
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}
