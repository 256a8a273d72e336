use crate::error::{PipelineError, Result};
use crate::models::parse_timestamp;
use chrono::{DateTime, Duration, NaiveDate, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Microseconds,
}

impl TimeUnit {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => Some(TimeUnit::Days),
            "hours" | "hour" | "hr" | "h" => Some(TimeUnit::Hours),
            "minutes" | "minute" | "min" => Some(TimeUnit::Minutes),
            "seconds" | "second" | "sec" | "secs" | "s" => Some(TimeUnit::Seconds),
            "milliseconds" | "millisecond" | "msec" | "ms" => Some(TimeUnit::Milliseconds),
            "microseconds" | "microsecond" | "usec" | "us" => Some(TimeUnit::Microseconds),
            _ => None,
        }
    }

    fn micros(self) -> f64 {
        match self {
            TimeUnit::Days => 86_400_000_000.0,
            TimeUnit::Hours => 3_600_000_000.0,
            TimeUnit::Minutes => 60_000_000.0,
            TimeUnit::Seconds => 1_000_000.0,
            TimeUnit::Milliseconds => 1_000.0,
            TimeUnit::Microseconds => 1.0,
        }
    }
}

/// A CF time encoding: `"<unit> since <reference>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub epoch: DateTime<Utc>,
}

impl TimeUnits {
    pub fn parse(units: &str) -> Result<Self> {
        let (unit_text, reference) = units
            .split_once(" since ")
            .ok_or_else(|| PipelineError::Decode(format!("Unsupported time units '{}'", units)))?;

        let unit = TimeUnit::parse(unit_text.trim()).ok_or_else(|| {
            PipelineError::Decode(format!("Unsupported time unit '{}'", unit_text.trim()))
        })?;

        let reference = reference.trim();
        let epoch = parse_timestamp(reference)
            .or_else(|| {
                NaiveDate::parse_from_str(reference, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
            })
            .ok_or_else(|| {
                PipelineError::Decode(format!("Unparseable reference time '{}'", reference))
            })?;

        Ok(Self { unit, epoch })
    }

    /// Absolute time for an offset, rounded to the microsecond.
    /// Non-finite or out-of-range offsets give `None`.
    pub fn decode(&self, offset: f64) -> Option<DateTime<Utc>> {
        if !offset.is_finite() {
            return None;
        }
        let micros = (offset * self.unit.micros()).round();
        if micros.abs() > i64::MAX as f64 / 2.0 {
            return None;
        }
        self.epoch
            .checked_add_signed(Duration::microseconds(micros as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format_timestamp;
    use chrono::TimeZone;

    #[test]
    fn test_parse_glm_units() {
        let units = TimeUnits::parse("seconds since 2023-02-17 21:00:00.000").unwrap();
        assert_eq!(units.unit, TimeUnit::Seconds);
        assert_eq!(
            units.epoch,
            Utc.with_ymd_and_hms(2023, 2, 17, 21, 0, 0).unwrap()
        );

        let decoded = units.decode(1.25).unwrap();
        assert_eq!(format_timestamp(&decoded), "2023-02-17 21:00:01.250000");
    }

    #[test]
    fn test_parse_other_layouts() {
        let days = TimeUnits::parse("days since 2000-01-01").unwrap();
        assert_eq!(days.unit, TimeUnit::Days);
        assert_eq!(
            days.decode(1.5).unwrap(),
            Utc.with_ymd_and_hms(2000, 1, 2, 12, 0, 0).unwrap()
        );

        let ms = TimeUnits::parse("milliseconds since 2000-01-01T12:00:00Z").unwrap();
        assert_eq!(
            ms.decode(-500.0).unwrap(),
            Utc.with_ymd_and_hms(2000, 1, 1, 11, 59, 59).unwrap() + Duration::milliseconds(500)
        );
    }

    #[test]
    fn test_rejects_unknown_units() {
        assert!(TimeUnits::parse("fortnights since 2000-01-01").is_err());
        assert!(TimeUnits::parse("seconds").is_err());
        assert!(TimeUnits::parse("seconds since yesterday").is_err());
    }

    #[test]
    fn test_decode_rejects_non_finite() {
        let units = TimeUnits::parse("seconds since 2000-01-01 00:00:00").unwrap();
        assert_eq!(units.decode(f64::NAN), None);
        assert_eq!(units.decode(f64::INFINITY), None);
        assert_eq!(units.decode(1e300), None);
    }
}
