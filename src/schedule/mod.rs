//! Time-window schedules that gate enforcement.

pub mod evaluator;

pub use evaluator::{ScheduleDecision, ScheduleEvaluator, is_blocking_active};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};

/// Last minute of the day (23:59)
pub const MAX_MINUTE: u16 = 1439;

const MAX_NAME_LEN: usize = 100;

/// A named weekly time window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    /// Days of week, 0 = Sunday .. 6 = Saturday
    pub days: BTreeSet<u8>,
    /// Window start, minutes from midnight (inclusive)
    pub start_minutes: u16,
    /// Window end, minutes from midnight (exclusive); less than start wraps midnight
    pub end_minutes: u16,
    pub enabled: bool,
    /// `false` makes this a pause window that suspends enforcement
    pub blocking_enabled: bool,
}

/// Fields a caller supplies when creating a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub name: String,
    pub days: BTreeSet<u8>,
    pub start_minutes: u16,
    pub end_minutes: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub blocking_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Schedule {
    /// Build a new schedule with a fresh id after validating the input
    pub fn from_input(input: ScheduleInput) -> GuardResult<Self> {
        let schedule = Self {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            days: input.days,
            start_minutes: input.start_minutes,
            end_minutes: input.end_minutes,
            enabled: input.enabled,
            blocking_enabled: input.blocking_enabled,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> GuardResult<()> {
        if self.name.trim().is_empty() {
            return Err(GuardError::Validation("schedule name must not be empty".into()));
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(GuardError::Validation(format!(
                "schedule name is longer than {MAX_NAME_LEN} characters"
            )));
        }
        if let Some(day) = self.days.iter().find(|d| **d > 6) {
            return Err(GuardError::Validation(format!(
                "day {day} is out of range (0 = Sunday .. 6 = Saturday)"
            )));
        }
        for (label, minute) in [("start", self.start_minutes), ("end", self.end_minutes)] {
            if minute > MAX_MINUTE {
                return Err(GuardError::Validation(format!(
                    "{label} minute {minute} is out of range (0..={MAX_MINUTE})"
                )));
            }
        }
        Ok(())
    }

    /// Whether the window crosses midnight
    pub fn wraps_midnight(&self) -> bool {
        self.end_minutes < self.start_minutes
    }

    /// "Mon-Fri 08:00-15:00" style summary for the CLI
    pub fn describe_window(&self) -> String {
        let days = if self.days.len() == 7 {
            "every day".to_string()
        } else {
            self.days
                .iter()
                .map(|d| day_abbrev(*d))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "{} {}-{}",
            days,
            format_minutes(self.start_minutes),
            format_minutes(self.end_minutes)
        )
    }
}

/// Built-in schedules offered by `add_preset_schedule`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePreset {
    /// Mon-Fri 08:00-15:00, enforce
    School,
    /// Every day 21:00-07:00, enforce
    Bedtime,
    /// Sat+Sun 10:00-18:00, pause ("Weekend Gaming")
    Weekend,
}

impl SchedulePreset {
    pub const ALL: [SchedulePreset; 3] = [
        SchedulePreset::School,
        SchedulePreset::Bedtime,
        SchedulePreset::Weekend,
    ];

    pub fn input(self) -> ScheduleInput {
        let (name, days, start, end, blocking_enabled): (&str, &[u8], u16, u16, bool) = match self {
            SchedulePreset::School => ("School Hours", &[1, 2, 3, 4, 5], 8 * 60, 15 * 60, true),
            SchedulePreset::Bedtime => ("Bedtime", &[0, 1, 2, 3, 4, 5, 6], 21 * 60, 7 * 60, true),
            SchedulePreset::Weekend => ("Weekend Gaming", &[0, 6], 10 * 60, 18 * 60, false),
        };
        ScheduleInput {
            name: name.to_string(),
            days: days.iter().copied().collect(),
            start_minutes: start,
            end_minutes: end,
            enabled: true,
            blocking_enabled,
        }
    }
}

impl FromStr for SchedulePreset {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "school" => Ok(SchedulePreset::School),
            "bedtime" => Ok(SchedulePreset::Bedtime),
            "weekend" => Ok(SchedulePreset::Weekend),
            other => Err(GuardError::Validation(format!(
                "unknown preset '{other}' (expected school, bedtime or weekend)"
            ))),
        }
    }
}

impl fmt::Display for SchedulePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulePreset::School => "school",
            SchedulePreset::Bedtime => "bedtime",
            SchedulePreset::Weekend => "weekend",
        };
        f.write_str(name)
    }
}

/// Parse "HH:MM" into minutes from midnight
pub fn parse_hhmm(s: &str) -> GuardResult<u16> {
    let invalid = || GuardError::Validation(format!("invalid time '{s}', expected HH:MM"));
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    let h: u16 = h.parse().map_err(|_| invalid())?;
    let m: u16 = m.parse().map_err(|_| invalid())?;
    if h > 23 || m > 59 {
        return Err(invalid());
    }
    Ok(h * 60 + m)
}

pub fn format_minutes(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Parse a day name or number (0 = Sunday) into 0..=6
pub fn parse_day(s: &str) -> GuardResult<u8> {
    let lower = s.trim().to_ascii_lowercase();
    if let Ok(n) = lower.parse::<u8>() {
        if n <= 6 {
            return Ok(n);
        }
    }
    let day = match lower.get(..3) {
        Some("sun") => 0,
        Some("mon") => 1,
        Some("tue") => 2,
        Some("wed") => 3,
        Some("thu") => 4,
        Some("fri") => 5,
        Some("sat") => 6,
        _ => return Err(GuardError::Validation(format!("invalid day '{s}'"))),
    };
    Ok(day)
}

fn day_abbrev(day: u8) -> &'static str {
    match day {
        0 => "Sun",
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        _ => "Sat",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bedtime_preset_wraps_midnight_every_day() {
        let schedule = Schedule::from_input(SchedulePreset::Bedtime.input()).unwrap();
        assert_eq!(schedule.days.len(), 7);
        assert_eq!(schedule.start_minutes, 1260);
        assert_eq!(schedule.end_minutes, 420);
        assert!(schedule.blocking_enabled);
        assert!(schedule.wraps_midnight());
    }

    #[test]
    fn test_weekend_preset_is_a_pause_window() {
        let input = SchedulePreset::Weekend.input();
        assert_eq!(input.name, "Weekend Gaming");
        assert!(!input.blocking_enabled);
        assert_eq!(input.days, [0u8, 6].into_iter().collect());
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("School".parse::<SchedulePreset>().unwrap(), SchedulePreset::School);
        assert_eq!(" bedtime ".parse::<SchedulePreset>().unwrap(), SchedulePreset::Bedtime);
        let err = "holiday".parse::<SchedulePreset>().unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut input = SchedulePreset::School.input();
        input.days.insert(7);
        assert!(Schedule::from_input(input).is_err());

        let mut input = SchedulePreset::School.input();
        input.end_minutes = 1440;
        assert!(Schedule::from_input(input).is_err());

        let mut input = SchedulePreset::School.input();
        input.name = "   ".into();
        assert!(Schedule::from_input(input).is_err());
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("00:00").unwrap(), 0);
        assert_eq!(parse_hhmm("23:59").unwrap(), 1439);
        assert_eq!(parse_hhmm("21:30").unwrap(), 1290);
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("9").is_err());
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("Sunday").unwrap(), 0);
        assert_eq!(parse_day("sat").unwrap(), 6);
        assert_eq!(parse_day("3").unwrap(), 3);
        assert!(parse_day("funday").is_err());
        assert!(parse_day("9").is_err());
    }

    #[test]
    fn test_describe_window() {
        let schedule = Schedule::from_input(SchedulePreset::School.input()).unwrap();
        assert_eq!(schedule.describe_window(), "Mon,Tue,Wed,Thu,Fri 08:00-15:00");

        let schedule = Schedule::from_input(SchedulePreset::Bedtime.input()).unwrap();
        assert_eq!(schedule.describe_window(), "every day 21:00-07:00");
    }
}
