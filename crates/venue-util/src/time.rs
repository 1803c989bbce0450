//! Time utilities for venue
//!
//! Provides the interval model used for conflict detection (`TimeWindow`)
//! and wall-clock helpers used by the session ledger.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `VENUE_MOCK_TIME` environment variable can be set
//! to override the system time returned by [`now`]. The mocked clock keeps
//! advancing at the real rate from the given starting point.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "VENUE_MOCK_TIME";

/// Format accepted by `VENUE_MOCK_TIME`
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive_dt) = NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT)
            else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    expected_format = MOCK_TIME_FORMAT,
                    "Invalid mock time format"
                );
                return None;
            };
            let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    "Failed to convert mock time to local timezone"
                );
                return None;
            };
            let offset = mock_dt.signed_duration_since(Local::now());
            tracing::info!(
                mock_time = %mock_time_str,
                offset_secs = offset.num_seconds(),
                "Mock time enabled"
            );
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real_now = Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Parse a `YYYY-MM-DD HH:MM` or `YYYY-MM-DD HH:MM:SS` local timestamp.
pub fn parse_local_datetime(s: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(s, MOCK_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()?;
    Local.from_local_datetime(&naive).single()
}

/// Format a DateTime for display with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render a minute count as `H:MM`, the way balances are shown at the counter.
pub fn format_hours_minutes(minutes: i64) -> String {
    let sign = if minutes < 0 { "-" } else { "" };
    let minutes = minutes.unsigned_abs();
    format!("{}{}:{:02}", sign, minutes / 60, minutes % 60)
}

/// Whole minutes elapsed between two instants, truncated.
///
/// Returns `None` when `end` precedes `start`.
pub fn elapsed_whole_minutes(start: &DateTime<Local>, end: &DateTime<Local>) -> Option<i64> {
    let elapsed = end.signed_duration_since(*start);
    if elapsed < chrono::Duration::zero() {
        None
    } else {
        Some(elapsed.num_minutes())
    }
}

/// Errors building a [`TimeWindow`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window end {end} is not after its start {start}")]
    EndNotAfterStart {
        start: DateTime<Local>,
        end: DateTime<Local>,
    },
}

/// Half-open time window `[start, end)`.
///
/// `end = None` means the window is still running and extends to +infinity
/// for overlap purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Local>,
    pub end: Option<DateTime<Local>>,
}

impl TimeWindow {
    pub fn new(
        start: DateTime<Local>,
        end: Option<DateTime<Local>>,
    ) -> Result<Self, WindowError> {
        match end {
            Some(end) if end <= start => Err(WindowError::EndNotAfterStart { start, end }),
            _ => Ok(Self { start, end }),
        }
    }

    pub fn closed(start: DateTime<Local>, end: DateTime<Local>) -> Result<Self, WindowError> {
        Self::new(start, Some(end))
    }

    pub fn open_ended(start: DateTime<Local>) -> Self {
        Self { start, end: None }
    }

    /// Re-check the `start < end` invariant (fields are public).
    pub fn validate(&self) -> Result<(), WindowError> {
        Self::new(self.start, self.end).map(|_| ())
    }

    pub fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    /// Length of the window, or `None` for an open-ended window.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end.map(|end| end.signed_duration_since(self.start))
    }

    /// Half-open overlap: windows that only touch at an endpoint do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        ends_after(other.end, &self.start) && ends_after(self.end, &other.start)
    }

    /// Whether `instant` falls inside `[start, end)`.
    pub fn contains(&self, instant: &DateTime<Local>) -> bool {
        self.start <= *instant && ends_after(self.end, instant)
    }
}

/// `t < effective_end`, where a missing end is +infinity.
fn ends_after(end: Option<DateTime<Local>>, t: &DateTime<Local>) -> bool {
    match end {
        Some(end) => *t < end,
        None => true,
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(
                f,
                "[{}, {})",
                format_datetime_full(&self.start),
                format_datetime_full(&end)
            ),
            None => write!(f, "[{}, open)", format_datetime_full(&self.start)),
        }
    }
}
