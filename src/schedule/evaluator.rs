use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use super::Schedule;

/// Net effect of all schedules at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleDecision {
    /// An enforce window is active and no pause window is
    Enforce,
    /// A pause window is active; it wins over any enforce window
    Pause,
    /// No window is active; the manual toggle decides
    Manual,
}

impl ScheduleDecision {
    pub fn resolve(self, manual: bool) -> bool {
        match self {
            ScheduleDecision::Enforce => true,
            ScheduleDecision::Pause => false,
            ScheduleDecision::Manual => manual,
        }
    }
}

/// Pure schedule evaluation; callers pass the clock in
pub struct ScheduleEvaluator;

impl ScheduleEvaluator {
    /// Whether `schedule` covers the given weekday (0 = Sunday) and minute of day
    ///
    /// The window is `[start, end)`. When `end < start` the window wraps
    /// midnight and its post-midnight part belongs to the day it started on.
    /// `start == end` is an empty window.
    pub fn is_active_at(schedule: &Schedule, weekday: u8, minute: u16) -> bool {
        if !schedule.enabled {
            return false;
        }

        let start = schedule.start_minutes;
        let end = schedule.end_minutes;

        if start < end {
            schedule.days.contains(&weekday) && minute >= start && minute < end
        } else if end < start {
            let evening = minute >= start && schedule.days.contains(&weekday);
            let morning = minute < end && schedule.days.contains(&previous_day(weekday));
            evening || morning
        } else {
            false
        }
    }

    pub fn decide_at(schedules: &[Schedule], weekday: u8, minute: u16) -> ScheduleDecision {
        let mut enforce = false;
        for schedule in schedules {
            if Self::is_active_at(schedule, weekday, minute) {
                if !schedule.blocking_enabled {
                    return ScheduleDecision::Pause;
                }
                enforce = true;
            }
        }
        if enforce {
            ScheduleDecision::Enforce
        } else {
            ScheduleDecision::Manual
        }
    }

    pub fn decide<T: Datelike + Timelike>(schedules: &[Schedule], now: &T) -> ScheduleDecision {
        let (weekday, minute) = clock_parts(now);
        Self::decide_at(schedules, weekday, minute)
    }

    /// Schedules whose window contains `now`
    pub fn active<'a, T: Datelike + Timelike>(
        schedules: &'a [Schedule],
        now: &T,
    ) -> Vec<&'a Schedule> {
        let (weekday, minute) = clock_parts(now);
        schedules
            .iter()
            .filter(|s| Self::is_active_at(s, weekday, minute))
            .collect()
    }
}

/// Net blocking state: pause beats enforce, and with no active window the manual toggle applies
pub fn is_blocking_active<T: Datelike + Timelike>(now: &T, schedules: &[Schedule], manual: bool) -> bool {
    ScheduleEvaluator::decide(schedules, now).resolve(manual)
}

fn clock_parts<T: Datelike + Timelike>(now: &T) -> (u8, u16) {
    let weekday = now.weekday().num_days_from_sunday() as u8;
    let minute = (now.hour() * 60 + now.minute()) as u16;
    (weekday, minute)
}

fn previous_day(weekday: u8) -> u8 {
    (weekday + 6) % 7
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleInput, SchedulePreset};
    use chrono::NaiveDate;

    fn schedule(days: &[u8], start: u16, end: u16, blocking_enabled: bool) -> Schedule {
        Schedule::from_input(ScheduleInput {
            name: "test".into(),
            days: days.iter().copied().collect(),
            start_minutes: start,
            end_minutes: end,
            enabled: true,
            blocking_enabled,
        })
        .unwrap()
    }

    // 2024-01-07 is a Sunday
    fn at(day_of_month: u32, hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day_of_month)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_midnight_wrap_window() {
        let all_days = [0, 1, 2, 3, 4, 5, 6];
        let late = schedule(&all_days, 1380, 60, true);
        let schedules = [late];

        assert!(is_blocking_active(&at(8, 23, 30), &schedules, false));
        assert!(is_blocking_active(&at(9, 0, 30), &schedules, false));
        assert!(!is_blocking_active(&at(9, 12, 0), &schedules, false));
    }

    #[test]
    fn test_window_bounds_are_half_open() {
        let s = schedule(&[1], 480, 900, true);
        assert!(ScheduleEvaluator::is_active_at(&s, 1, 480));
        assert!(ScheduleEvaluator::is_active_at(&s, 1, 899));
        assert!(!ScheduleEvaluator::is_active_at(&s, 1, 900));
        assert!(!ScheduleEvaluator::is_active_at(&s, 1, 479));
    }

    #[test]
    fn test_wrapped_morning_belongs_to_previous_day() {
        // Friday night only: 22:00-02:00
        let s = schedule(&[5], 1320, 120, true);
        assert!(ScheduleEvaluator::is_active_at(&s, 5, 1350));
        assert!(ScheduleEvaluator::is_active_at(&s, 6, 60));
        assert!(!ScheduleEvaluator::is_active_at(&s, 5, 60));
    }

    #[test]
    fn test_equal_start_and_end_is_empty() {
        let s = schedule(&[0, 1, 2, 3, 4, 5, 6], 600, 600, true);
        for minute in [0, 599, 600, 601, 1439] {
            assert!(!ScheduleEvaluator::is_active_at(&s, 3, minute));
        }
    }

    #[test]
    fn test_pause_wins_over_enforce() {
        let enforce = schedule(&[6], 9 * 60, 20 * 60, true);
        let pause = schedule(&[6], 10 * 60, 18 * 60, false);
        let schedules = [enforce, pause];

        // 2024-01-13 is a Saturday
        assert_eq!(
            ScheduleEvaluator::decide(&schedules, &at(13, 12, 0)),
            ScheduleDecision::Pause
        );
        assert!(!is_blocking_active(&at(13, 12, 0), &schedules, true));
        assert!(is_blocking_active(&at(13, 19, 0), &schedules, false));
    }

    #[test]
    fn test_disabled_schedule_is_ignored() {
        let mut s = schedule(&[1], 0, 1439, false);
        s.enabled = false;
        assert!(is_blocking_active(&at(8, 12, 0), &[s], true));
    }

    #[test]
    fn test_no_schedules_uses_manual_toggle() {
        assert!(is_blocking_active(&at(10, 10, 0), &[], true));
        assert!(!is_blocking_active(&at(10, 10, 0), &[], false));
        assert_eq!(
            ScheduleEvaluator::decide(&[], &at(10, 10, 0)),
            ScheduleDecision::Manual
        );
    }

    #[test]
    fn test_bedtime_preset_scenario() {
        let bedtime = Schedule::from_input(SchedulePreset::Bedtime.input()).unwrap();
        let schedules = [bedtime];

        assert!(is_blocking_active(&at(10, 22, 0), &schedules, false));
        assert!(is_blocking_active(&at(11, 6, 59), &schedules, false));
        assert!(!is_blocking_active(&at(11, 7, 0), &schedules, false));
        assert_eq!(ScheduleEvaluator::active(&schedules, &at(10, 22, 0)).len(), 1);
    }
}
