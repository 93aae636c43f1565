//! Reading listing and manual push

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use medgas_lib::{ReadingMeta, SensorReading, SensorValues};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{format_timestamp, print_json, print_rows, print_success, OutputFormat};

/// Row for readings table
#[derive(Tabled)]
struct ReadingRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Pressure (kPa)")]
    pressure: String,
    #[tabled(rename = "Flow (L/min)")]
    flow: String,
    #[tabled(rename = "Temp (°C)")]
    temperature: String,
    #[tabled(rename = "RSSI")]
    rssi: String,
    #[tabled(rename = "Battery")]
    battery: String,
}

/// List the latest readings, newest first
pub async fn list_readings(
    client: &ApiClient,
    limit: usize,
    node: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let readings = client.readings(limit, node.as_deref()).await?;

    match format {
        OutputFormat::Json => print_json(&readings)?,
        OutputFormat::Table => {
            let rows: Vec<ReadingRow> = readings
                .iter()
                .map(|r| ReadingRow {
                    time: format_timestamp(&r.timestamp),
                    node: r.node_id.clone(),
                    pressure: format!("{:.1}", r.sensors.pressure_kpa),
                    flow: format!("{:.1}", r.sensors.flow_lpm),
                    temperature: format!("{:.1}", r.sensors.temperature_c),
                    rssi: format!("{:.0} dBm", r.meta.rssi_dbm),
                    battery: format!("{:.2} V", r.meta.battery_v),
                })
                .collect();

            print_rows(rows, "No readings");
        }
    }

    Ok(())
}

/// A single reading typed in on the command line
#[derive(Debug, Clone, Args)]
pub struct PushArgs {
    /// Sensor node ID
    #[arg(long)]
    pub node: String,

    /// Line pressure in kPa
    #[arg(long)]
    pub pressure: f64,

    /// Flow in L/min
    #[arg(long, default_value_t = 20.0)]
    pub flow: f64,

    /// Temperature in °C
    #[arg(long, default_value_t = 22.0, allow_hyphen_values = true)]
    pub temperature: f64,

    #[arg(long, default_value = "HSP-001")]
    pub hospital: String,

    #[arg(long, default_value = "OXI-A")]
    pub plant: String,

    #[arg(long, default_value = "1.2.0")]
    pub firmware: String,

    /// Signal strength in dBm
    #[arg(long, default_value_t = -70.0, allow_hyphen_values = true)]
    pub rssi: f64,

    /// Battery voltage
    #[arg(long, default_value_t = 3.7)]
    pub battery: f64,

    /// RFC 3339 timestamp (defaults to now)
    #[arg(long)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PushArgs {
    pub fn into_reading(self, now: DateTime<Utc>) -> SensorReading {
        SensorReading {
            timestamp: self.timestamp.unwrap_or(now),
            hospital_id: self.hospital,
            plant_id: self.plant,
            node_id: self.node,
            sensors: SensorValues {
                pressure_kpa: self.pressure,
                flow_lpm: self.flow,
                temperature_c: self.temperature,
            },
            meta: ReadingMeta {
                firmware_version: self.firmware,
                rssi_dbm: self.rssi,
                battery_v: self.battery,
            },
        }
    }
}

/// Push one reading into the service's HTTP feed
pub async fn push_reading(client: &ApiClient, args: PushArgs, format: OutputFormat) -> Result<()> {
    let reading = args.into_reading(Utc::now());
    let accepted = client.push(&reading).await?;

    match format {
        OutputFormat::Json => print_json(&accepted)?,
        OutputFormat::Table => print_success(&format!(
            "Reading from {} {} ({:.1} kPa)",
            accepted.node_id, accepted.status, reading.sensors.pressure_kpa
        )),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        push: PushArgs,
    }

    #[test]
    fn test_defaults_fill_reading() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let args = Harness::parse_from(["push", "--node", "ESP32-4", "--pressure", "465.5"]).push;

        let reading = args.into_reading(now);

        assert_eq!(reading.node_id, "ESP32-4");
        assert_eq!(reading.timestamp, now);
        assert_eq!(reading.sensors.pressure_kpa, 465.5);
        assert_eq!(reading.hospital_id, "HSP-001");
        assert_eq!(reading.meta.rssi_dbm, -70.0);
    }

    #[test]
    fn test_negative_rssi_and_explicit_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let args = Harness::parse_from([
            "push",
            "--node",
            "ESP32-9",
            "--pressure",
            "480",
            "--rssi",
            "-88",
            "--timestamp",
            "2024-01-01T11:59:30Z",
        ])
        .push;

        let reading = args.into_reading(now);

        assert_eq!(reading.meta.rssi_dbm, -88.0);
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 59, 30).unwrap()
        );
    }

    #[test]
    fn test_pressure_is_required() {
        assert!(Harness::try_parse_from(["push", "--node", "ESP32-1"]).is_err());
    }
}
