//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};
use verifier_lib::metadata::{
    ExecutionMode, GraphGroupMetadata, GraphNodeMetadata, GraphNodeVisitor,
};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format epoch seconds as a UTC timestamp
pub fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Format a millisecond duration compactly
pub fn format_duration_ms(ms: i64) -> String {
    if ms >= 60_000 {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "queued" | "waiting" | "paused" => status.yellow().to_string(),
        "running" => status.blue().to_string(),
        "success" | "healthy" => status.green().to_string(),
        "skipped" => status.dimmed().to_string(),
        "degraded" => status.yellow().to_string(),
        "unhealthy" | "error" | "failed" | "aborted" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color risk level based on value
pub fn color_risk(risk: &str) -> String {
    match risk {
        "low" => risk.green().to_string(),
        "medium" => risk.yellow().to_string(),
        "high" | "critical" => risk.red().bold().to_string(),
        _ => risk.to_string(),
    }
}

/// Renders a metadata tree as indented lines
#[derive(Debug, Default)]
pub struct TreeRenderer {
    lines: Vec<String>,
    colored: bool,
}

impl TreeRenderer {
    pub fn new(colored: bool) -> Self {
        Self {
            lines: Vec::new(),
            colored,
        }
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl GraphNodeVisitor for TreeRenderer {
    fn visit_node(&mut self, node: &GraphNodeMetadata, depth: usize) {
        let status = node.status.to_string();
        let status = if self.colored {
            color_status(&status)
        } else {
            status
        };
        let duration = node
            .duration_ms()
            .map(|ms| format!(" ({})", format_duration_ms(ms)))
            .unwrap_or_default();

        self.lines.push(format!(
            "{}- {} [{}] {}{}",
            "  ".repeat(depth),
            node.name,
            node.node_type,
            status,
            duration
        ));
    }

    fn visit_group(&mut self, group: &GraphGroupMetadata, depth: usize) {
        let mode = match group.execution_mode {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        };
        self.lines
            .push(format!("{}{} x{}", "  ".repeat(depth), mode, group.elements.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier_lib::metadata::{ExecutionStatus, GraphNodeVisitable};

    fn node(name: &str, group: Option<GraphGroupMetadata>) -> GraphNodeMetadata {
        GraphNodeMetadata {
            id: name.to_string(),
            name: name.to_string(),
            node_type: "stage".to_string(),
            status: ExecutionStatus::Success,
            started_at: Some(1_000),
            ended_at: Some(3_500),
            group,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(2_500), "2.5s");
        assert_eq!(format_duration_ms(125_000), "2m05s");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn test_tree_renderer_indents_groups() {
        let tree = vec![node(
            "deploy",
            Some(GraphGroupMetadata {
                execution_mode: ExecutionMode::Parallel,
                elements: vec![node("canary", None), node("verify", None)],
            }),
        )];

        let mut renderer = TreeRenderer::new(false);
        tree.accept(&mut renderer);
        let lines = renderer.into_lines();

        assert_eq!(lines[0], "- deploy [stage] success (2.5s)");
        assert_eq!(lines[1], "  parallel x2");
        assert!(lines[2].starts_with("  - canary"));
        assert_eq!(lines.len(), 4);
    }
}
