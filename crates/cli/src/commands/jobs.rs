//! Verification job CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;
use verifier_lib::job::{GroupOutcome, GroupReport, JobSnapshot, TickReport};
use verifier_lib::ExecutionContext;

use crate::client::{ApiClient, JobList};
use crate::output::{
    color_risk, color_status, format_timestamp, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// Row for jobs table
#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "State Execution")]
    state_execution_id: String,
    #[tabled(rename = "Workflow Execution")]
    workflow_execution_id: String,
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "Window")]
    window: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Ticks")]
    ticks: u64,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&JobSnapshot> for JobRow {
    fn from(job: &JobSnapshot) -> Self {
        let window = &job.context.window;
        Self {
            state_execution_id: job.state_execution_id.clone(),
            workflow_execution_id: job.workflow_execution_id.clone(),
            strategy: job.context.comparison_strategy.to_string(),
            window: format!("{}..={}", window.start_minute, window.end_minute()),
            status: color_status(&job.status.to_string()),
            ticks: job.ticks,
            updated: format_timestamp(job.updated_at),
        }
    }
}

/// Row for the per-group outcome table
#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Minute")]
    minute: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl From<&GroupReport> for GroupRow {
    fn from(report: &GroupReport) -> Self {
        let (outcome, minute, detail) = match &report.outcome {
            GroupOutcome::Complete => ("complete", None, String::new()),
            GroupOutcome::NoNewData => ("no new data", None, String::new()),
            GroupOutcome::Enqueued { minute, task_id } => {
                ("enqueued", Some(*minute), format!("task {}", task_id))
            }
            GroupOutcome::Declined { minute } => {
                ("declined", Some(*minute), "retry next tick".to_string())
            }
            GroupOutcome::AnalyzedLocally { minute, risk } => (
                "analyzed locally",
                Some(*minute),
                format!("risk {}", color_risk(&risk.to_string())),
            ),
            GroupOutcome::StaleCursor { minute } => {
                ("stale cursor", Some(*minute), "already processed".to_string())
            }
        };
        Self {
            group: report.group_name.clone(),
            outcome: outcome.to_string(),
            minute: minute.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string()),
            detail,
        }
    }
}

/// List jobs, optionally filtered by status
pub async fn list_jobs(
    client: &ApiClient,
    status: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let list: JobList = client.get("api/v1/jobs").await?;
    let jobs: Vec<&JobSnapshot> = list
        .jobs
        .iter()
        .filter(|job| {
            status
                .as_deref()
                .map(|s| job.status.to_string().eq_ignore_ascii_case(s))
                .unwrap_or(true)
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table => {
            print_table(jobs.iter().map(|job| JobRow::from(*job)).collect());
            let stats = &list.stats;
            println!(
                "\nActive: {}  Finished: {} ({} success, {} failed, {} error)",
                stats.active.to_string().cyan(),
                stats.finished,
                stats.succeeded.to_string().green(),
                stats.failed.to_string().red(),
                stats.errored.to_string().red()
            );
        }
    }

    Ok(())
}

/// Show a single job with its last tick report
pub async fn get_job(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let job: JobSnapshot = client.get(&format!("api/v1/jobs/{}", id)).await?;

    match format {
        OutputFormat::Json => print_json(&job)?,
        OutputFormat::Table => print_job_details(&job),
    }

    Ok(())
}

fn print_job_details(job: &JobSnapshot) {
    let ctx = &job.context;
    println!("{}", "Verification Job".bold());
    println!("{}", "=".repeat(60));
    println!("State execution:    {}", job.state_execution_id.cyan());
    println!("Workflow execution: {}", job.workflow_execution_id);
    println!("Application:        {}", ctx.app_id);
    println!("Status:             {}", color_status(&job.status.to_string()));
    if let Some(message) = &job.message {
        println!("Message:            {}", message);
    }
    println!("Strategy:           {}", ctx.comparison_strategy);
    println!(
        "Window:             minutes {}..={}",
        ctx.window.start_minute,
        ctx.window.end_minute()
    );
    println!(
        "Test nodes:         {}",
        ctx.test_nodes.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    if !ctx.control_nodes.is_empty() {
        println!(
            "Control nodes:      {}",
            ctx.control_nodes.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    if let Some(baseline) = &ctx.baseline_execution_id {
        println!("Baseline:           {}", baseline);
    }
    println!("Ticks:              {}", job.ticks);
    println!("Created:            {}", format_timestamp(job.created_at));
    println!("Updated:            {}", format_timestamp(job.updated_at));

    if let Some(report) = &job.last_report {
        println!("\n{}", "Last Tick".bold());
        print_tick_groups(report);
    }
}

fn print_tick_groups(report: &TickReport) {
    if report.groups.is_empty() {
        print_info("No groups processed");
        return;
    }
    print_table(report.groups.iter().map(GroupRow::from).collect());
}

/// Register a job from an execution context file
pub async fn register_job(client: &ApiClient, file: &Path, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let body: serde_json::Value =
        serde_json::from_str(&content).context("Execution context is not valid JSON")?;

    // Local validation gives a clearer message than the server round trip
    if let Ok(context) = serde_json::from_value::<ExecutionContext>(body.clone()) {
        if let Err(e) = context.validate() {
            anyhow::bail!("Invalid execution context: {}", e);
        }
    }

    let job: JobSnapshot = client.post("api/v1/jobs", &body).await?;

    match format {
        OutputFormat::Json => print_json(&job)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Registered verification job {}",
                job.state_execution_id.cyan()
            ));
        }
    }

    Ok(())
}

/// Run one tick of a job now
pub async fn tick_job(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let report: TickReport = client
        .post(&format!("api/v1/jobs/{}/tick", id), &serde_json::json!({}))
        .await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_tick_groups(&report);
            let status = color_status(&report.status.to_string());
            if report.became_terminal {
                match report.failed_component.as_deref() {
                    Some(component) => print_warning(&format!(
                        "Job finished with {} ({} failed)",
                        status, component
                    )),
                    None => print_success(&format!("Job finished with {}", status)),
                }
                if let Some(message) = &report.message {
                    println!("  {}", message);
                }
            } else {
                print_info(&format!("Job is {}", status));
            }
        }
    }

    Ok(())
}
