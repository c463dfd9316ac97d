use std::{
    fmt,
    num::{ParseFloatError, ParseIntError},
    sync::LazyLock,
};

use chrono::{Local, NaiveDateTime, TimeZone};
use regex::Regex;
use thiserror::Error;

use crate::status::{Event, StatusResult};

// Only lines containing this run of dots carry a label and a value.
const SEPARATOR: &str = "...";

const EVENT_INFIX: &str = " at ";
const EVENT_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z ]+)\.\.+ ([a-zA-Z0-9 ()%/:.\-]+)").unwrap()
});

static WATTS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]+) Watt").unwrap());

static VOLT_AMPS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]+) VA").unwrap());

static LOAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+) Watt\(([0-9]+) %\)").unwrap());

static EVENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z ]*) at ([0-9]{4}/[0-9]{2}/[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2})")
        .unwrap()
});

/// The labels `pwrstat -status` prints, matched exactly as the tool spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    ModelName,
    FirmwareNumber,
    RatingVoltage,
    RatingPower,
    State,
    PowerSupplyBy,
    UtilityVoltage,
    OutputVoltage,
    BatteryCapacity,
    RemainingRuntime,
    Load,
    LineInteraction,
    TestResult,
    LastPowerEvent,
}

impl Label {
    pub fn from_report(label: &str) -> Option<Label> {
        let label = match label {
            "Model Name" => Label::ModelName,
            "Firmware Number" => Label::FirmwareNumber,
            "Rating Voltage" => Label::RatingVoltage,
            "Rating Power" => Label::RatingPower,
            "State" => Label::State,
            "Power Supply by" => Label::PowerSupplyBy,
            "Utility Voltage" => Label::UtilityVoltage,
            "Output Voltage" => Label::OutputVoltage,
            "Battery Capacity" => Label::BatteryCapacity,
            "Remaining Runtime" => Label::RemainingRuntime,
            "Load" => Label::Load,
            "Line Interaction" => Label::LineInteraction,
            "Test Result" => Label::TestResult,
            "Last Power Event" => Label::LastPowerEvent,
            _ => return None,
        };
        Some(label)
    }

    /// Lowercase name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Label::ModelName => "model name",
            Label::FirmwareNumber => "firmware number",
            Label::RatingVoltage => "rating voltage",
            Label::RatingPower => "rating power",
            Label::State => "state",
            Label::PowerSupplyBy => "power supply by",
            Label::UtilityVoltage => "utility voltage",
            Label::OutputVoltage => "output voltage",
            Label::BatteryCapacity => "battery capacity",
            Label::RemainingRuntime => "remaining runtime",
            Label::Load => "load",
            Label::LineInteraction => "line interaction",
            Label::TestResult => "test result",
            Label::LastPowerEvent => "last power event",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a status report could not be turned into a [`StatusResult`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// A line has the dot separator but not the label/value shape. Usually
    /// means the tool changed its output format.
    #[error("malformed status line {line:?}")]
    MalformedLine { line: String },

    #[error("failed to parse {field} {value:?}: {source}")]
    Field {
        field: Label,
        value: String,
        #[source]
        source: ValueError,
    },
}

/// Why a single value did not have the shape its label calls for.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("value not in volts")]
    NotVolts,
    #[error("value not in percentage")]
    NotPercent,
    #[error("value not in minutes")]
    NotMinutes,
    #[error("can't find rating power watts")]
    MissingWatts,
    #[error("can't find rating power va")]
    MissingVoltAmps,
    #[error("value doesn't match load format")]
    LoadFormat,
    #[error("value doesn't match event format")]
    EventFormat,
    #[error("invalid integer: {0}")]
    Int(#[from] ParseIntError),
    #[error("invalid number: {0}")]
    Float(#[from] ParseFloatError),
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("{0} does not exist in the local time zone")]
    NonexistentLocalTime(NaiveDateTime),
}

/// Parses the text printed by `pwrstat -status`.
///
/// Narrative lines, section headers and unknown labels are skipped. Labels
/// that never appear leave their fields at the zero value. The first line or
/// value that fails to parse aborts the whole report.
pub fn parse_status(report: &str) -> Result<StatusResult, ParseError> {
    let mut status = StatusResult::default();

    for line in report.lines() {
        if !line.contains(SEPARATOR) {
            continue;
        }

        let (label, value) = split_line(line)?;
        let Some(field) = Label::from_report(label) else {
            continue;
        };

        apply(&mut status, field, value).map_err(|source| ParseError::Field {
            field,
            value: value.to_string(),
            source,
        })?;
    }

    Ok(status)
}

fn split_line(line: &str) -> Result<(&str, &str), ParseError> {
    let line = line.trim();
    let captures = LINE_RE
        .captures(line)
        .ok_or_else(|| ParseError::MalformedLine {
            line: line.to_string(),
        })?;

    // Labels are compared exactly as printed, spacing included.
    let label = captures.get(1).map_or("", |m| m.as_str());
    let value = captures.get(2).map_or("", |m| m.as_str()).trim();
    Ok((label, value))
}

fn apply(status: &mut StatusResult, field: Label, value: &str) -> Result<(), ValueError> {
    let properties = &mut status.properties;
    let current = &mut status.current_status;

    match field {
        Label::ModelName => properties.model_name = value.to_string(),
        Label::FirmwareNumber => properties.firmware_number = value.to_string(),
        Label::RatingVoltage => properties.rating_voltage = parse_volts(value)?,
        Label::RatingPower => {
            let (watts, volt_amps) = parse_rating_power(value)?;
            properties.rating_power.watts = watts;
            properties.rating_power.volt_amps = volt_amps;
        }
        Label::State => current.state = value.to_string(),
        Label::PowerSupplyBy => current.power_supply_by = value.to_string(),
        Label::UtilityVoltage => current.utility_voltage = parse_volts(value)?,
        Label::OutputVoltage => current.output_voltage = parse_volts(value)?,
        Label::BatteryCapacity => current.battery_capacity = parse_percent(value)?,
        Label::RemainingRuntime => current.remaining_runtime = parse_minutes(value)?,
        Label::Load => {
            let (watts, percent) = parse_load(value)?;
            current.load.watts = watts;
            current.load.percent = percent;
        }
        Label::LineInteraction => current.line_interaction = value.to_string(),
        Label::TestResult => current.test_result = parse_event(value)?,
        Label::LastPowerEvent => current.last_power_event = parse_event(value)?,
    }

    Ok(())
}

// Splits "<number> <unit>" on single spaces. Anything but exactly two
// tokens is rejected.
fn split_unit(value: &str) -> Option<(&str, &str)> {
    let mut tokens = value.split(' ');
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(number), Some(unit), None) => Some((number, unit)),
        _ => None,
    }
}

fn first_capture<'a>(re: &Regex, value: &'a str) -> Option<&'a str> {
    re.captures(value)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

fn parse_volts(value: &str) -> Result<u32, ValueError> {
    match split_unit(value) {
        Some((number, "V")) => Ok(number.parse()?),
        _ => Err(ValueError::NotVolts),
    }
}

// Older firmware prints "515 VA (335 Watt)", newer "900 Watt(1500 VA)", so
// each half is searched for on its own.
fn parse_rating_power(value: &str) -> Result<(u32, u32), ValueError> {
    let watts = first_capture(&WATTS_RE, value).ok_or(ValueError::MissingWatts)?;
    let volt_amps = first_capture(&VOLT_AMPS_RE, value).ok_or(ValueError::MissingVoltAmps)?;
    Ok((watts.parse()?, volt_amps.parse()?))
}

fn parse_percent(value: &str) -> Result<f64, ValueError> {
    let Some((number, "%")) = split_unit(value) else {
        return Err(ValueError::NotPercent);
    };

    let percent: f64 = number.parse()?;
    if !percent.is_finite() {
        return Err(ValueError::NotPercent);
    }
    Ok(percent / 100.0)
}

// The unit is printed as "min." but only the prefix is checked.
fn parse_minutes(value: &str) -> Result<u32, ValueError> {
    match split_unit(value) {
        Some((number, unit)) if unit.starts_with("min") => Ok(number.parse()?),
        _ => Err(ValueError::NotMinutes),
    }
}

fn parse_load(value: &str) -> Result<(u32, f64), ValueError> {
    let captures = LOAD_RE.captures(value).ok_or(ValueError::LoadFormat)?;
    let watts: u32 = captures[1].parse()?;
    let percent: f64 = captures[2].parse()?;
    Ok((watts, percent / 100.0))
}

fn parse_event(value: &str) -> Result<Event, ValueError> {
    if !value.contains(EVENT_INFIX) {
        return Ok(Event::new(value));
    }

    let captures = EVENT_RE.captures(value).ok_or(ValueError::EventFormat)?;
    let naive = NaiveDateTime::parse_from_str(&captures[2], EVENT_TIMESTAMP_FORMAT)?;
    // A time repeated by a DST fall-back resolves to its first occurrence.
    let timestamp = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or(ValueError::NonexistentLocalTime(naive))?;

    Ok(Event {
        state: captures[1].to_string(),
        timestamp: Some(timestamp),
    })
}
