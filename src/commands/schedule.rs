use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::ipc::DaemonRequest;
use crate::schedule::{Schedule, ScheduleInput, SchedulePreset, parse_day, parse_hhmm};

use super::utils::{call, call_as_parent, init_logging};

pub fn list(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let schedules: Vec<Schedule> = call(config_path, DaemonRequest::GetSchedules)?;
    let active: bool = call(config_path, DaemonRequest::ShouldBlockNow)?;

    if schedules.is_empty() {
        println!("No schedules; manual blocking toggle decides.");
    }
    for schedule in &schedules {
        println!(
            "{}  {:<24} {:<28} {}{}",
            schedule.id,
            schedule.name,
            schedule.describe_window(),
            if schedule.blocking_enabled { "block" } else { "pause" },
            if schedule.enabled { "" } else { " (disabled)" }
        );
    }
    println!();
    println!("Blocking now: {}", if active { "ACTIVE" } else { "inactive" });
    Ok(())
}

/// Parse "mon,tue,fri" or "1,2,5"
pub fn parse_days(raw: &str) -> Result<BTreeSet<u8>> {
    raw.split(',')
        .filter(|d| !d.trim().is_empty())
        .map(|d| parse_day(d).map_err(Into::into))
        .collect()
}

#[allow(clippy::too_many_arguments)]
pub fn add(
    config_path: &Path,
    name: String,
    days: &str,
    start: &str,
    end: &str,
    pause: bool,
    disabled: bool,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let input = ScheduleInput {
        name,
        days: parse_days(days)?,
        start_minutes: parse_hhmm(start).context("Invalid start time")?,
        end_minutes: parse_hhmm(end).context("Invalid end time")?,
        enabled: !disabled,
        blocking_enabled: !pause,
    };

    let schedule: Schedule = call_as_parent(
        config_path,
        password,
        DaemonRequest::AddSchedule {
            schedule: input,
            password: None,
        },
    )?;
    println!("✓ Added schedule {} ({})", schedule.name, schedule.describe_window());
    println!("  ID: {}", schedule.id);
    Ok(())
}

pub fn add_preset(
    config_path: &Path,
    preset: SchedulePreset,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let schedule: Schedule = call_as_parent(
        config_path,
        password,
        DaemonRequest::AddPresetSchedule {
            preset,
            password: None,
        },
    )?;
    println!("✓ Added {} preset: {} ({})", preset, schedule.name, schedule.describe_window());
    Ok(())
}

/// Flip a schedule's enabled flag, leaving the rest untouched
pub fn set_enabled(
    config_path: &Path,
    id: Uuid,
    enabled: bool,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let schedules: Vec<Schedule> = call(config_path, DaemonRequest::GetSchedules)?;
    let mut schedule = schedules
        .into_iter()
        .find(|s| s.id == id)
        .with_context(|| format!("No schedule with ID {}", id))?;

    schedule.enabled = enabled;
    let schedule: Schedule = call_as_parent(
        config_path,
        password,
        DaemonRequest::UpdateSchedule {
            schedule,
            password: None,
        },
    )?;
    println!(
        "✓ Schedule {} {}",
        schedule.name,
        if schedule.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub fn delete(config_path: &Path, id: Uuid, password: Option<String>, verbose: bool) -> Result<()> {
    init_logging(verbose);
    call_as_parent::<()>(
        config_path,
        password,
        DaemonRequest::DeleteSchedule { id, password: None },
    )?;
    println!("✓ Deleted schedule {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_days() {
        let days = parse_days("mon,Tue, 5").unwrap();
        assert_eq!(days, BTreeSet::from([1, 2, 5]));
        assert!(parse_days("mon,funday").is_err());
        assert!(parse_days("").unwrap().is_empty());
    }
}
