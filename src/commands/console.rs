//! Console-bound command handlers.
//!
//! These run on the driver thread, which owns the serial port; the LPS loop
//! yields between iterations whenever one of them is queued.

use serde_json::{json, Value};
use vantage_console::settings::UnitsSettings;
use vantage_console::VantageConsole;
use vantage_sync_core::units::{ArchivePeriod, CumulativeValue, ExtremePeriod, LampState};
use vantage_sync_core::{ProtocolError, Result};

use crate::archive::ArchiveManager;
use crate::commands::{failure, success, CommandData};
use crate::network::StationNetwork;

/// Command names claimed by the console worker
pub const HANDLED: &[&str] = &[
    "query-console-type",
    "query-firmware",
    "query-receiver-list",
    "query-console-diagnostics",
    "query-highlows",
    "query-units",
    "update-units",
    "query-archive-period",
    "update-archive-period",
    "query-console-time",
    "query-network",
    "backlight",
    "clear-archive",
    "clear-alarm-thresholds",
    "clear-calibration-offsets",
    "clear-graph-points",
    "clear-active-alarms",
    "clear-current-data",
    "clear-cumulative-values",
    "clear-high-values",
    "clear-low-values",
    "put-year-rain",
    "put-year-et",
];

/// Execute one console command and build its response envelope
pub fn execute(
    console: &mut VantageConsole,
    archive: &ArchiveManager,
    command: &CommandData,
) -> Value {
    let result = match command.name.as_str() {
        "query-console-type" => query_console_type(console),
        "query-firmware" => query_firmware(console),
        "query-receiver-list" => query_receiver_list(console),
        "query-console-diagnostics" => query_diagnostics(console),
        "query-highlows" => query_highlows(console),
        "query-units" => query_units(console),
        "update-units" => update_units(console, command),
        "query-archive-period" => query_archive_period(console),
        "update-archive-period" => update_archive_period(console, archive, command),
        "query-console-time" => query_console_time(console),
        "query-network" => query_network(console),
        "backlight" => backlight(console, command),
        "clear-archive" => console.clear_archive().map(|()| None),
        "clear-alarm-thresholds" => console.clear_alarm_thresholds().map(|()| None),
        "clear-calibration-offsets" => console.clear_calibration_offsets().map(|()| None),
        "clear-graph-points" => console.clear_graph_points().map(|()| None),
        "clear-active-alarms" => console.clear_active_alarms().map(|()| None),
        "clear-current-data" => console.clear_current_data().map(|()| None),
        "clear-cumulative-values" => clear_cumulative_values(console, command),
        "clear-high-values" => clear_high_values(console, command),
        "clear-low-values" => clear_low_values(console, command),
        "put-year-rain" => put_year_rain(console, command),
        "put-year-et" => put_year_et(console, command),
        name => Err(ProtocolError::ArgumentInvalid(name.to_string())),
    };

    match result {
        Ok(data) => success(&command.name, data),
        Err(e) => failure(&command.name, &e.to_string()),
    }
}

fn query_console_type(console: &mut VantageConsole) -> Result<Option<Value>> {
    let station_type = console.retrieve_station_type()?;
    Ok(Some(json!({ "consoleType": station_type.as_str() })))
}

fn query_firmware(console: &mut VantageConsole) -> Result<Option<Value>> {
    let date = console.retrieve_firmware_date()?;
    let version = console.retrieve_firmware_version()?;
    Ok(Some(json!({
        "firmwareDate": date,
        "firmwareVersion": version,
    })))
}

fn query_receiver_list(console: &mut VantageConsole) -> Result<Option<Value>> {
    let receivers = console.retrieve_receiver_list()?;
    Ok(Some(json!({ "receiverList": receivers })))
}

fn query_diagnostics(console: &mut VantageConsole) -> Result<Option<Value>> {
    let report = console.retrieve_diagnostics()?;
    Ok(Some(json!({ "consoleDiagnosticReport": report })))
}

fn query_highlows(console: &mut VantageConsole) -> Result<Option<Value>> {
    let packet = console.retrieve_hilow_values()?;
    let rendered = serde_json::to_value(&packet)
        .map_err(|_| ProtocolError::DecodeInvalidField("high/low packet"))?;
    Ok(Some(rendered))
}

fn query_units(console: &mut VantageConsole) -> Result<Option<Value>> {
    Ok(Some(console.retrieve_units_settings()?.to_json()))
}

fn update_units(console: &mut VantageConsole, command: &CommandData) -> Result<Option<Value>> {
    // Start from the current settings and change what the arguments name
    let mut settings: UnitsSettings = console.retrieve_units_settings()?;
    for (key, value) in &command.arguments {
        match key.as_str() {
            "baroUnits" => settings.baro_units = value.parse()?,
            "temperatureUnits" => settings.temperature_units = value.parse()?,
            "elevationUnits" => settings.elevation_units = value.parse()?,
            "rainUnits" => settings.rain_units = value.parse()?,
            "windUnits" => settings.wind_units = value.parse()?,
            _ => {}
        }
    }
    console.update_units_settings(settings)?;
    Ok(None)
}

fn query_archive_period(console: &mut VantageConsole) -> Result<Option<Value>> {
    let period = console.retrieve_archive_period()?;
    Ok(Some(json!({ "period": period.minutes() })))
}

fn update_archive_period(
    console: &mut VantageConsole,
    archive: &ArchiveManager,
    command: &CommandData,
) -> Result<Option<Value>> {
    let value = command
        .argument("period")
        .ok_or_else(|| ProtocolError::ArgumentInvalid("period".to_string()))?;
    let period: ArchivePeriod = value.parse()?;
    console.update_archive_period(period)?;
    archive.set_archive_period(period.minutes());
    Ok(None)
}

fn query_console_time(console: &mut VantageConsole) -> Result<Option<Value>> {
    let time = console.retrieve_console_time()?;
    Ok(Some(json!({
        "time": time.format("%Y-%m-%d %H:%M:%S").to_string()
    })))
}

fn query_network(console: &mut VantageConsole) -> Result<Option<Value>> {
    let network = StationNetwork::discover(console)?;
    Ok(Some(network.to_json()))
}

fn backlight(console: &mut VantageConsole, command: &CommandData) -> Result<Option<Value>> {
    let state = command
        .argument("state")
        .ok_or_else(|| ProtocolError::ArgumentInvalid("state".to_string()))?;
    let state: LampState = state.parse()?;
    console.control_lamp(state == LampState::On)?;
    Ok(None)
}

fn clear_cumulative_values(
    console: &mut VantageConsole,
    command: &CommandData,
) -> Result<Option<Value>> {
    let value = command
        .argument("value")
        .ok_or_else(|| ProtocolError::ArgumentInvalid("value".to_string()))?;
    let value: CumulativeValue = value.parse()?;
    console.clear_cumulative_value(value)?;
    Ok(None)
}

fn clear_high_values(
    console: &mut VantageConsole,
    command: &CommandData,
) -> Result<Option<Value>> {
    let period: ExtremePeriod = command
        .argument("period")
        .ok_or_else(|| ProtocolError::ArgumentInvalid("period".to_string()))?
        .parse()?;
    console.clear_high_values(period)?;
    Ok(None)
}

fn clear_low_values(console: &mut VantageConsole, command: &CommandData) -> Result<Option<Value>> {
    let period: ExtremePeriod = command
        .argument("period")
        .ok_or_else(|| ProtocolError::ArgumentInvalid("period".to_string()))?
        .parse()?;
    console.clear_low_values(period)?;
    Ok(None)
}

fn put_year_rain(console: &mut VantageConsole, command: &CommandData) -> Result<Option<Value>> {
    let value = parse_positive_value(command)?;
    console.put_yearly_rain(value)?;
    Ok(None)
}

fn put_year_et(console: &mut VantageConsole, command: &CommandData) -> Result<Option<Value>> {
    let value = parse_positive_value(command)?;
    console.put_yearly_et(value)?;
    Ok(None)
}

fn parse_positive_value(command: &CommandData) -> Result<f64> {
    let text = command
        .argument("value")
        .ok_or_else(|| ProtocolError::ArgumentInvalid("value".to_string()))?;
    let value: f64 = text
        .parse()
        .map_err(|_| ProtocolError::ArgumentInvalid(text.to_string()))?;
    if value <= 0.0 {
        return Err(ProtocolError::ArgumentInvalid(text.to_string()));
    }
    Ok(value)
}
