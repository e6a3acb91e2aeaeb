// Cycle scheduling
//
// Cycles run either every N seconds or at the occurrences of a cron
// expression. Both modes run one cycle immediately at startup, and cycles
// never overlap: the next occurrence is computed only after the previous
// cycle has finished.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// Occurrences inspected when judging how tight a cron schedule is
const GAP_SAMPLE: usize = 16;

/// When cycles run
#[derive(Debug, Clone)]
pub enum CycleSchedule {
    /// Fixed period between cycle starts
    Every(Duration),

    /// Cron expression, evaluated in local time
    Cron {
        expression: String,
        schedule: cron::Schedule,
    },
}

impl CycleSchedule {
    /// Parse a cron expression
    ///
    /// Accepts the classic five-field form (`*/5 * * * *`) as well as the
    /// six/seven-field form with seconds (and years).
    pub fn cron(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {}", expression)
        } else {
            expression.to_string()
        };

        let schedule = cron::Schedule::from_str(&normalized)
            .with_context(|| format!("DDNS_SCHEDULE '{}' is not a valid cron expression", expression))?;

        Ok(Self::Cron {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Delay from `now` until the next cycle; `None` when the schedule is exhausted
    pub fn delay_after<Z: TimeZone>(&self, now: &DateTime<Z>) -> Option<Duration> {
        match self {
            CycleSchedule::Every(period) => Some(*period),
            CycleSchedule::Cron { schedule, .. } => {
                let next = schedule.after(now).next()?;
                Some((next - now.clone()).to_std().unwrap_or_default())
            }
        }
    }

    /// Shortest time between two cycles, if there is a next cycle at all
    pub fn shortest_gap(&self) -> Option<Duration> {
        match self {
            CycleSchedule::Every(period) => Some(*period),
            CycleSchedule::Cron { schedule, .. } => {
                let upcoming: Vec<_> = schedule.upcoming(Local).take(GAP_SAMPLE).collect();
                upcoming
                    .windows(2)
                    .filter_map(|pair| (pair[1] - pair[0]).to_std().ok())
                    .min()
            }
        }
    }

    /// Check the schedule can actually fire
    pub fn validate(&self) -> Result<()> {
        match self {
            CycleSchedule::Every(period) if period.is_zero() => {
                anyhow::bail!("DDNS_INTERVAL_SECS must be at least 1 second")
            }
            CycleSchedule::Cron {
                expression,
                schedule,
            } if schedule.upcoming(Local).next().is_none() => {
                anyhow::bail!("DDNS_SCHEDULE '{}' never fires again", expression)
            }
            _ => Ok(()),
        }
    }

    /// Build the tick source for the daemon loop
    pub fn ticker(&self) -> Ticker {
        let kind = match self {
            CycleSchedule::Every(period) => {
                let mut interval = tokio::time::interval(*period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                TickerKind::Interval(interval)
            }
            CycleSchedule::Cron { .. } => TickerKind::Cron(self.clone()),
        };

        Ticker { kind, fired: false }
    }
}

impl fmt::Display for CycleSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleSchedule::Every(period) => write!(f, "every {:?}", period),
            CycleSchedule::Cron { expression, .. } => write!(f, "cron '{}'", expression),
        }
    }
}

/// Yields once per scheduled cycle; the first tick completes immediately
pub struct Ticker {
    kind: TickerKind,
    fired: bool,
}

enum TickerKind {
    Interval(Interval),
    Cron(CycleSchedule),
}

impl Ticker {
    /// Wait for the next cycle; `false` when the schedule has no more occurrences
    pub async fn tick(&mut self) -> bool {
        let first = !self.fired;
        self.fired = true;

        match &mut self.kind {
            TickerKind::Interval(interval) => {
                interval.tick().await;
                true
            }
            TickerKind::Cron(_) if first => true,
            TickerKind::Cron(schedule) => match schedule.delay_after(&Local::now()) {
                Some(delay) => {
                    tracing::info!("Next cycle in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    true
                }
                None => false,
            },
        }
    }
}
