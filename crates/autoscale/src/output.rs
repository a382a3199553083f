//! Output formatting utilities

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

/// Print a titled table, or a warning when there is nothing to show
pub fn print_table<T: Tabled>(title: &str, rows: Vec<T>) {
    println!("{}", title.bold());
    if rows.is_empty() {
        print_warning("None found");
        println!();
        return;
    }

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}\n", table);
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

/// Color a container or service state
pub fn color_state(state: &str) -> String {
    match state.to_lowercase().as_str() {
        "running" | "active" | "healthy" => state.green().to_string(),
        "starting" | "stopping" | "degraded" => state.yellow().to_string(),
        "stopped" | "error" | "unhealthy" => state.red().to_string(),
        _ => state.to_string(),
    }
}

/// Show an empty string as a dash
pub fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
