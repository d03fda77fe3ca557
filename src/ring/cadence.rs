//! Trigger cadence: fixed intervals and cron schedules.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::DateTime;
use chrono::Utc;
use cron::Schedule;

use crate::constants::MIN_INTERVAL_SECS;
use crate::ValidationError;

/// A parsed cron expression.
///
/// Both the classic five field form (`min hour dom month dow`) and the
/// six/seven field form with a leading seconds column are accepted. The
/// five field form numbers days of the week like classic cron (0-6 from
/// Sunday, 7 is Sunday too); the longer forms use the `cron` crate's
/// numbering (1-7 from Sunday).
#[derive(Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ValidationError> {
        let expr = expr.trim();
        let invalid = |reason: String| ValidationError::InvalidCron {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let day_of_week = classic_day_of_week(fields[4]).map_err(invalid)?;
                format!("0 {} {}", fields[..4].join(" "), day_of_week)
            }
            6 | 7 => expr.to_string(),
            0 => return Err(invalid("empty expression".to_string())),
            n => return Err(invalid(format!("expected 5 to 7 fields, got {n}"))),
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `now`.
    pub fn next_after(
        &self,
        now: &DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.schedule.after(now).next()
    }
}

impl FromStr for CronSchedule {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expr).finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.expr == other.expr
    }
}

/// Rewrites a classic day-of-week field into the `cron` crate's numbering.
/// Named days and steps over `*` mean the same thing in both and are kept.
fn classic_day_of_week(field: &str) -> Result<String, String> {
    let mut kept = Vec::new();
    let mut days = BTreeSet::new();

    for part in field.split(',') {
        if !part.starts_with(|c: char| c.is_ascii_digit()) {
            kept.push(part.to_string());
            continue;
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (range, Some(step)),
                _ => return Err(format!("invalid day-of-week step in '{part}'")),
            },
            None => (part, None),
        };
        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (day_number(start)?, day_number(end)?),
            // `N/step` runs to the end of the week
            None if step.is_some() => (day_number(range)?, 6),
            None => {
                let day = day_number(range)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("day-of-week range '{range}' is reversed"));
        }

        days.extend((start..=end).step_by(step.unwrap_or(1)).map(|day| day % 7 + 1));
    }

    kept.extend(days.iter().map(u32::to_string));
    Ok(kept.join(","))
}

fn day_number(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("day of week '{s}' is not in 0-7")),
    }
}

pub fn parse_cron(expr: &str) -> Result<CronSchedule, ValidationError> {
    CronSchedule::parse(expr)
}

/// How often a trigger fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Cadence {
    Interval(i64),
    Cron(CronSchedule),
}

impl Cadence {
    /// Seconds from `now` until the next fire, never less than the minimum
    /// interval.
    pub fn interval_secs_at(
        &self,
        now: &DateTime<Utc>,
    ) -> i64 {
        let secs = match self {
            Cadence::Interval(secs) => *secs,
            Cadence::Cron(schedule) => match schedule.next_after(now) {
                Some(next) => {
                    let millis = (next - *now).num_milliseconds().max(0);
                    (millis + 999) / 1000
                }
                // schedule has no future occurrence
                None => MIN_INTERVAL_SECS,
            },
        };
        secs.max(MIN_INTERVAL_SECS)
    }

    pub fn interval_secs(&self) -> i64 {
        self.interval_secs_at(&Utc::now())
    }
}

/// Ring-wide default cadence; a cron schedule wins over the interval.
#[derive(Debug, Clone, PartialEq)]
pub struct RingCadence {
    pub interval_secs: i64,
    pub cron: Option<CronSchedule>,
}

impl RingCadence {
    pub fn effective(&self) -> Cadence {
        match &self.cron {
            Some(schedule) => Cadence::Cron(schedule.clone()),
            None => Cadence::Interval(self.interval_secs),
        }
    }
}

/// Cadence of one watcher: its own when it named one, otherwise whatever
/// the ring default is at the time of asking.
#[derive(Debug, Clone)]
pub(crate) enum WatcherCadence {
    Fixed(Cadence),
    RingDefault(Arc<ArcSwap<RingCadence>>),
}

impl WatcherCadence {
    pub(crate) fn resolve(
        interval_secs: i64,
        cron: &str,
        ring_default: &Arc<ArcSwap<RingCadence>>,
    ) -> Result<Self, ValidationError> {
        if !cron.trim().is_empty() {
            return Ok(WatcherCadence::Fixed(Cadence::Cron(CronSchedule::parse(cron)?)));
        }
        if interval_secs > 0 {
            return Ok(WatcherCadence::Fixed(Cadence::Interval(interval_secs)));
        }
        Ok(WatcherCadence::RingDefault(ring_default.clone()))
    }

    pub(crate) fn interval_secs(&self) -> i64 {
        match self {
            WatcherCadence::Fixed(cadence) => cadence.interval_secs(),
            WatcherCadence::RingDefault(current) => current.load().effective().interval_secs(),
        }
    }
}
