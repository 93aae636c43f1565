//! Fleet-level commands: pipeline status, KPI snapshot, node listing

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_kpi_status, color_node_state, format_change, format_timestamp, print_json, print_rows,
    trend_symbol, OutputFormat,
};

/// Row for KPI table
#[derive(Tabled)]
struct KpiRow {
    #[tabled(rename = "Metric")]
    label: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Trend")]
    trend: String,
}

/// Row for node table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Plant")]
    plant: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Window")]
    readings: usize,
    #[tabled(rename = "Pressure (kPa)")]
    pressure: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
    #[tabled(rename = "Firmware")]
    firmware: String,
}

/// Show feed connectivity and pipeline counters
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Pipeline Status".bold());
            println!("{}", "=".repeat(40));
            let feed = if status.connected {
                "connected".green()
            } else {
                "disconnected".red().bold()
            };
            println!("Feed:                {}", feed);
            println!("Tracked nodes:       {}", status.tracked_nodes);
            println!("Readings accepted:   {}", status.readings_accepted);
            println!("Readings rejected:   {}", status.readings_rejected);
            println!("Alerts emitted:      {}", status.alerts_emitted);
            if status.detector_failures > 0 {
                println!(
                    "Detector failures:   {}",
                    status.detector_failures.to_string().yellow()
                );
            }
            println!("Revision:            {}", status.revision.to_string().dimmed());
        }
    }

    Ok(())
}

/// Show the current KPI snapshot
pub async fn show_kpis(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.kpis().await?;

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => {
            let rows: Vec<KpiRow> = snapshot
                .metrics()
                .into_iter()
                .map(|m| KpiRow {
                    label: m.label.clone(),
                    value: m.formatted(),
                    unit: m.unit.clone(),
                    status: color_kpi_status(m.status),
                    trend: format!("{} {}", trend_symbol(m.trend), format_change(m.change_percent)),
                })
                .collect();

            print_rows(rows, "No KPIs available");
            println!(
                "\nGenerated {} from {} readings",
                format_timestamp(&snapshot.generated_at),
                snapshot.values.sample_count
            );
        }
    }

    Ok(())
}

/// List tracked nodes
pub async fn list_nodes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let nodes = client.nodes().await?;

    match format {
        OutputFormat::Json => print_json(&nodes)?,
        OutputFormat::Table => {
            let total = nodes.len();
            let rows: Vec<NodeRow> = nodes
                .into_iter()
                .map(|n| NodeRow {
                    node: n.context.node_id,
                    plant: format!("{}/{}", n.context.hospital_id, n.context.plant_id),
                    state: color_node_state(n.state),
                    readings: n.readings_in_window,
                    pressure: format!("{:.1}", n.latest.pressure_kpa),
                    last_seen: format_timestamp(&n.last_seen),
                    firmware: n.firmware_version,
                })
                .collect();

            print_rows(rows, "No nodes tracked");
            if total > 0 {
                println!("\nTotal: {} nodes", total);
            }
        }
    }

    Ok(())
}
