//! Attendance policy gate.
//!
//! Checks run in a fixed order: an identity was resolved, it belongs to
//! the gallery, and `now` falls inside the attendance window. The first
//! failing check is the denial reason.

use crate::gallery::Gallery;
use crate::types::Identity;
use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("attendance hour {0} is past 24")]
    OutOfRange(u32),
    #[error("attendance hours [{start}, {end}) are empty")]
    Empty { start: u32, end: u32 },
}

/// Predicate deciding whether attendance may be recorded at `now`.
pub trait WindowRule: Send + Sync {
    fn permits(&self, now: NaiveDateTime) -> bool;
}

impl<F> WindowRule for F
where
    F: Fn(NaiveDateTime) -> bool + Send + Sync,
{
    fn permits(&self, now: NaiveDateTime) -> bool {
        self(now)
    }
}

/// Half-open hour-of-day range `[start, end)`, serialized as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct HourRange {
    start: u32,
    end: u32,
}

impl HourRange {
    pub fn new(start: u32, end: u32) -> Result<Self, WindowError> {
        if start > 24 {
            return Err(WindowError::OutOfRange(start));
        }
        if end > 24 {
            return Err(WindowError::OutOfRange(end));
        }
        if start >= end {
            return Err(WindowError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start..self.end).contains(&hour)
    }
}

impl TryFrom<[u32; 2]> for HourRange {
    type Error = WindowError;

    fn try_from([start, end]: [u32; 2]) -> Result<Self, Self::Error> {
        Self::new(start, end)
    }
}

impl From<HourRange> for [u32; 2] {
    fn from(value: HourRange) -> Self {
        [value.start, value.end]
    }
}

/// Day-of-week and hour-of-day window. Disabled means always open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceWindow {
    pub enabled: bool,
    #[serde(serialize_with = "serialize_days")]
    pub days: HashSet<Weekday>,
    pub hours: HourRange,
}

impl Default for AttendanceWindow {
    fn default() -> Self {
        Self {
            enabled: false,
            days: WEEK[..6].iter().copied().collect(),
            hours: HourRange { start: 14, end: 22 },
        }
    }
}

/// Allowed days in week order, Monday first.
fn serialize_days<S: Serializer>(days: &HashSet<Weekday>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(WEEK.iter().filter(|d| days.contains(*d)))
}

impl WindowRule for AttendanceWindow {
    fn permits(&self, now: NaiveDateTime) -> bool {
        !self.enabled || (self.days.contains(&now.weekday()) && self.hours.contains(now.hour()))
    }
}

impl fmt::Display for AttendanceWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return f.write_str("always open");
        }
        let days: Vec<String> = WEEK
            .iter()
            .filter(|d| self.days.contains(*d))
            .map(ToString::to_string)
            .collect();
        write!(
            f,
            "{} {:02}:00-{:02}:00",
            days.join(","),
            self.hours.start,
            self.hours.end
        )
    }
}

/// Why an attempt was refused before reaching the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NoResolvableIdentity,
    UnregisteredIdentity(String),
    OutsideWindow,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoResolvableIdentity => "no resolvable identity",
            Self::UnregisteredIdentity(_) => "unregistered identity",
            Self::OutsideWindow => "outside attendance window",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(Identity),
    Deny(DenyReason),
}

/// Authorizes resolved identities against the gallery and a window rule.
pub struct PolicyGate {
    gallery: Arc<Gallery>,
    window: Box<dyn WindowRule>,
}

impl PolicyGate {
    pub fn new(gallery: Arc<Gallery>, window: impl WindowRule + 'static) -> Self {
        Self {
            gallery,
            window: Box::new(window),
        }
    }

    pub fn authorize(&self, identity: Option<&Identity>, now: NaiveDateTime) -> Decision {
        let Some(identity) = identity else {
            return Decision::Deny(DenyReason::NoResolvableIdentity);
        };
        if !self.gallery.contains(identity.as_str()) {
            tracing::warn!(identity = %identity, "gate refused identity outside the gallery");
            return Decision::Deny(DenyReason::UnregisteredIdentity(identity.to_string()));
        }
        if !self.window.permits(now) {
            tracing::info!(identity = %identity, %now, "attempt outside attendance window");
            return Decision::Deny(DenyReason::OutsideWindow);
        }
        Decision::Allow(identity.clone())
    }
}
