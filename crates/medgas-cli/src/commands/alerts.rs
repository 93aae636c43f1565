//! Alert listing

use anyhow::Result;
use medgas_lib::{Alert, Severity};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_severity, format_timestamp, print_json, print_rows, OutputFormat};

/// Row for alerts table
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Type")]
    alert_type: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Action")]
    action: String,
}

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        Self {
            time: format_timestamp(&alert.timestamp),
            severity: color_severity(alert.severity),
            alert_type: alert.alert_type.clone(),
            node: alert.context.node_id.clone(),
            score: format!("{:.2}", alert.evidence.score),
            action: alert
                .prescription
                .as_ref()
                .map(|p| format!("{} → {}", p.action, p.target_actuator_id))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// List the latest alerts, newest first
pub async fn list_alerts(
    client: &ApiClient,
    limit: usize,
    min_severity: Option<Severity>,
    format: OutputFormat,
) -> Result<()> {
    let alerts = client.alerts(limit, min_severity).await?;

    match format {
        OutputFormat::Json => print_json(&alerts)?,
        OutputFormat::Table => {
            let rows: Vec<AlertRow> = alerts.iter().map(AlertRow::from).collect();
            print_rows(rows, "No alerts");

            // Rationale lines are too long for the table
            for alert in &alerts {
                if let Some(p) = &alert.prescription {
                    println!("  {} {}", alert.context.node_id, p.rationale);
                }
            }
        }
    }

    Ok(())
}
