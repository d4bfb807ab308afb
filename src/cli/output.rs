//! Output formatting module for nextjs-infra
//!
//! Provides colored human output and a JSON mode for scripting.

use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();

        if !use_color {
            colored::control::set_override(false);
        }

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    /// Whether machine-readable output was requested
    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Time since the formatter was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            let err = serde_json::json!({
                "type": "error",
                "message": message
            });
            eprintln!("{}", err);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            let warn = serde_json::json!({
                "type": "warning",
                "message": message
            });
            eprintln!("{}", warn);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    ///
    /// Goes to stderr in JSON mode so stdout stays a single document.
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 {
            return;
        }

        if self.json_mode {
            let info = serde_json::json!({
                "type": "info",
                "message": message
            });
            eprintln!("{}", info);
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a success line (human mode only)
    pub fn success(&self, message: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("{} {}", "OK:".green().bold(), message);
        } else {
            println!("OK: {}", message);
        }
    }

    /// Print the outcome of one check (human mode only)
    pub fn check(&self, name: &str, passed: bool, detail: &str) {
        if self.json_mode {
            return;
        }

        let status = if passed { "pass" } else { "FAIL" };
        if self.use_color {
            let status = if passed {
                status.green().to_string()
            } else {
                status.red().bold().to_string()
            };
            println!("  [{}] {:<20} {}", status, name.bright_white(), detail.bright_black());
        } else {
            println!("  [{}] {:<20} {}", status, name, detail);
        }
    }

    /// Print a value as the JSON document of this run
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print raw text unchanged
    pub fn raw(&self, text: &str) {
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }

    /// Print a table (human mode only)
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if self.json_mode {
            return;
        }

        println!("{}", render_table(headers, rows, self.use_color));
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Column-aligned table text
fn render_table(headers: &[&str], rows: &[Vec<String>], use_color: bool) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let join = |cells: Vec<String>| cells.join(" | ").trim_end().to_string();
    let pad = |cell: &str, width: usize| format!("{:width$}", cell, width = width);

    let header = join(headers.iter().zip(&widths).map(|(h, w)| pad(h, *w)).collect());
    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");

    let mut lines = Vec::with_capacity(rows.len() + 2);
    if use_color {
        lines.push(header.bright_white().bold().to_string());
        lines.push(separator.bright_black().to_string());
    } else {
        lines.push(header);
        lines.push(separator);
    }
    for row in rows {
        lines.push(join(row.iter().zip(&widths).map(|(c, w)| pad(c, *w)).collect()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_alignment() {
        let table = render_table(
            &["Stack", "Resources"],
            &[
                vec!["Network".to_string(), "32".to_string()],
                vec!["NextJS".to_string(), "21".to_string()],
            ],
            false,
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Stack   | Resources");
        assert_eq!(lines[1], "--------+----------");
        assert_eq!(lines[2], "Network | 32");
        assert_eq!(lines[3], "NextJS  | 21");
    }
}
