//! Execution metadata CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use verifier_lib::metadata::{
    ExecutionMetadata, ExecutionRecord, GraphNodeVisitable, MetadataGraphBuilder,
    StatusSummaryVisitor,
};

use crate::client::ApiClient;
use crate::output::{
    color_status, format_duration_ms, print_json, print_warning, OutputFormat, TreeRenderer,
};

/// Render an execution record as a metadata tree
///
/// The tree is built locally unless `remote` is set, in which case the
/// verifier's metadata endpoint builds it.
pub async fn render(
    client: &ApiClient,
    file: &Path,
    remote: bool,
    format: OutputFormat,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let record: ExecutionRecord =
        serde_json::from_str(&content).context("Failed to parse execution record")?;

    let metadata = if remote {
        client.post("api/v1/metadata", &record).await?
    } else {
        MetadataGraphBuilder::new().execution_metadata(&record)?
    };

    match format {
        OutputFormat::Json => print_json(&metadata)?,
        OutputFormat::Table => print_tree(&metadata),
    }

    Ok(())
}

fn print_tree(metadata: &ExecutionMetadata) {
    let duration = metadata
        .duration_ms
        .map(|ms| format!(" in {}", format_duration_ms(ms)))
        .unwrap_or_default();
    println!(
        "{} {} {}{}",
        metadata.name.bold(),
        format!("({})", metadata.id).dimmed(),
        color_status(&metadata.status.to_string()),
        duration
    );

    let Some(nodes) = &metadata.nodes else {
        print_warning("Execution has no stages or graph nodes");
        return;
    };

    let mut renderer = TreeRenderer::new(true);
    nodes.accept(&mut renderer);
    for line in renderer.into_lines() {
        println!("{}", line);
    }

    let mut summary = StatusSummaryVisitor::new();
    nodes.accept(&mut summary);
    let counts: Vec<String> = summary
        .by_status
        .iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect();
    println!(
        "\n{} nodes, {} parallel groups, depth {}: {}",
        summary.nodes,
        summary.parallel_groups,
        summary.max_depth,
        counts.join(", ")
    );
}
