//! Output formatting utilities

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use medgas_lib::{KpiStatus, NodeState, Severity, Trend};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Pretty-print any response as JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table, or a notice when there are none
pub fn print_rows<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format timestamp for display
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn color_severity(severity: Severity) -> String {
    let label = severity.as_str();
    match severity {
        Severity::Low => label.normal().to_string(),
        Severity::Medium => label.yellow().to_string(),
        Severity::High => label.red().to_string(),
        Severity::Critical => label.red().bold().to_string(),
    }
}

pub fn color_kpi_status(status: KpiStatus) -> String {
    match status {
        KpiStatus::Normal => "normal".green().to_string(),
        KpiStatus::Warning => "warning".yellow().to_string(),
        KpiStatus::Critical => "critical".red().bold().to_string(),
    }
}

pub fn color_node_state(state: NodeState) -> String {
    match state {
        NodeState::Active => "active".green().to_string(),
        NodeState::Quiescent => "quiescent".yellow().to_string(),
        NodeState::Idle => "idle".dimmed().to_string(),
    }
}

pub fn trend_symbol(trend: Trend) -> &'static str {
    match trend {
        Trend::Up => "↑",
        Trend::Down => "↓",
        Trend::Stable => "→",
    }
}

/// Signed percentage with one decimal, e.g. `+2.5%`
pub fn format_change(change_percent: f64) -> String {
    if change_percent == 0.0 {
        "0.0%".to_string()
    } else {
        format!("{:+.1}%", change_percent)
    }
}
