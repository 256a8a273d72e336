use crate::error::{PipelineError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One hour of satellite output, addressed the way the bucket lays it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub year: i32,
    pub day_of_year: u32,
    pub hour: u32,
}

impl TimeWindow {
    pub fn new(year: i32, day_of_year: u32, hour: u32) -> Result<Self> {
        if hour > 23 {
            return Err(PipelineError::Config(format!(
                "Hour must be between 0 and 23, got: {}",
                hour
            )));
        }
        if NaiveDate::from_yo_opt(year, day_of_year).is_none() {
            return Err(PipelineError::Config(format!(
                "Day of year {} does not exist in {}",
                day_of_year, year
            )));
        }
        Ok(Self {
            year,
            day_of_year,
            hour,
        })
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            year: dt.year(),
            day_of_year: dt.ordinal(),
            hour: dt.hour(),
        }
    }

    /// The hour `lag_hours` before `now`; the bucket lags real time.
    pub fn lagged(now: DateTime<Utc>, lag_hours: i64) -> Self {
        Self::from_datetime(now - Duration::hours(lag_hours))
    }

    pub fn start(&self) -> DateTime<Utc> {
        NaiveDate::from_yo_opt(self.year, self.day_of_year)
            .and_then(|date| date.and_hms_opt(self.hour, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn label(&self) -> String {
        format!("{}-{:03}T{:02}", self.year, self.day_of_year, self.hour)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Bucket plus product line; resolves hour windows to listing prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCatalog {
    pub bucket: String,
    pub product: String,
}

impl SourceCatalog {
    pub fn new(bucket: impl Into<String>, product: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let product = product.into();
        if bucket.trim().is_empty() {
            return Err(PipelineError::Config("Bucket name is required".to_string()));
        }
        if product.trim().is_empty() {
            return Err(PipelineError::Config(
                "Product identifier is required".to_string(),
            ));
        }
        Ok(Self { bucket, product })
    }

    /// `{product}/{year}/{day_of_year}/{hour}/`
    pub fn prefix(&self, window: &TimeWindow) -> String {
        format!(
            "{}/{}/{:03}/{:02}/",
            self.product.trim_end_matches('/'),
            window.year,
            window.day_of_year,
            window.hour
        )
    }
}

/// Every hour from the start of `start` to the end of `end`, optionally
/// restricted to certain hours of the day. Hours more than one hour past
/// `now` are skipped because the bucket cannot have them yet.
pub fn hourly_windows(
    start: NaiveDate,
    end: NaiveDate,
    hours: Option<&[u32]>,
    now: DateTime<Utc>,
) -> Result<Vec<TimeWindow>> {
    if start > end {
        return Err(PipelineError::Config(format!(
            "Start date {} must not be after end date {}",
            start, end
        )));
    }
    if let Some(bad) = hours.and_then(|h| h.iter().find(|&&h| h > 23)) {
        return Err(PipelineError::Config(format!("Invalid hour of day: {}", bad)));
    }

    let horizon = now + Duration::hours(1);
    let mut windows = Vec::new();
    let mut skipped_future = 0usize;
    let mut date = start;
    while date <= end {
        for hour in 0..24u32 {
            if let Some(selected) = hours {
                if !selected.contains(&hour) {
                    continue;
                }
            }
            let window = TimeWindow {
                year: date.year(),
                day_of_year: date.ordinal(),
                hour,
            };
            if window.start() > horizon {
                skipped_future += 1;
                continue;
            }
            windows.push(window);
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    if skipped_future > 0 {
        warn!(skipped = skipped_future, "Skipping future hours in backfill range");
    }
    if windows.is_empty() {
        return Err(PipelineError::Config(
            "No valid hours in selected date range".to_string(),
        ));
    }
    Ok(windows)
}
