use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Rows as a table, or as a json/yaml list.
    pub fn render_rows<T: Tabled + Serialize>(self, rows: Vec<T>) -> String {
        match self {
            OutputFormat::Table if rows.is_empty() => "Nothing to show".to_string(),
            OutputFormat::Table => Table::new(rows).to_string(),
            _ => self.serialize(&rows),
        }
    }

    /// One nested record, such as a disk config. Tables fall back to json.
    pub fn render_record<T: Serialize>(self, record: &T) -> String {
        self.serialize(record)
    }

    fn serialize<T: Serialize + ?Sized>(self, value: &T) -> String {
        let rendered = match self {
            OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            OutputFormat::Table | OutputFormat::Json => {
                serde_json::to_string_pretty(value).map_err(|e| e.to_string())
            }
        };
        rendered.unwrap_or_else(|e| format!("cannot render output: {e}"))
    }
}

/// Human readable binary size, e.g. `1.5KiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

/// Announces a disk operation that is about to run.
pub fn disk_step(action: &str, disk: &str) {
    println!("{} {} {}", "→".cyan(), action, disk.bold());
}

/// Reports a finished disk operation.
pub fn disk_done(disk: &str, outcome: &str) {
    println!("{} {} {}", "✓".green(), disk.bold(), outcome);
}

pub fn report_failure(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}
