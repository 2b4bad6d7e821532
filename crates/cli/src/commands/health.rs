//! Service health CLI command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use verifier_lib::{ComponentStatus, HealthResponse, ReadinessResponse};

use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, print_error, print_json, print_success, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked: String,
}

#[derive(Serialize)]
struct HealthReport {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

fn status_name(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

/// Show health and readiness of the verifier
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (u16, HealthResponse) = client.get_any_status("healthz").await?;
    let (_, readiness): (u16, ReadinessResponse) = client.get_any_status("readyz").await?;

    match format {
        OutputFormat::Json => print_json(&HealthReport { health, readiness })?,
        OutputFormat::Table => {
            println!(
                "{} {}",
                "Verifier:".bold(),
                color_status(status_name(health.status))
            );

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_name(component.status)),
                    failures: component.consecutive_failures,
                    message: component.message.clone().unwrap_or_default(),
                    checked: format_timestamp(component.last_check_timestamp),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            print_table(rows);

            if readiness.ready {
                print_success("Ready");
            } else {
                print_error(&format!(
                    "Not ready: {}",
                    readiness.reason.as_deref().unwrap_or("unknown reason")
                ));
            }
        }
    }

    Ok(())
}
