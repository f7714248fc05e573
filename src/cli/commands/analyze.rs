//! One-shot analysis commands.
//!
//! Each command builds the full pipeline in-process with the configured
//! vendors, submits a single subject, waits for the terminal state and
//! prints the report. Useful for smoke-testing vendor credentials and
//! for scripted spot checks without a running server.

use std::path::Path;
use std::time::Duration;

use console::style;
use tokio::time::Instant;

use crate::assembler;
use crate::config::Settings;
use crate::models::{AnalysisKind, RiskReport, Severity, Stage, Subject, Task, TaskState};
use crate::server::AppState;

/// User id recorded against CLI submissions. Shares the daily quota
/// like any other user.
const CLI_USER: &str = "cli";

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Vet a renovation company by name.
pub async fn cmd_analyze_company(
    settings: &Settings,
    name: &str,
    region: Option<&str>,
) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let subject = Subject::Company {
        name: name.to_string(),
        region: region.map(str::to_string),
    };
    run_analysis(&state, subject).await
}

/// Audit a quote document from a local file.
pub async fn cmd_analyze_quote(
    settings: &Settings,
    file: &Path,
    total_price: Option<f64>,
) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let blob_key = upload_file(&state, file)?;
    run_analysis(
        &state,
        Subject::Quote {
            blob_key,
            total_price,
        },
    )
    .await
}

/// Review a contract document from a local file.
pub async fn cmd_analyze_contract(settings: &Settings, file: &Path) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let blob_key = upload_file(&state, file)?;
    run_analysis(&state, Subject::Contract { blob_key }).await
}

/// Check an acceptance photo against one construction stage.
pub async fn cmd_analyze_acceptance(
    settings: &Settings,
    file: &Path,
    stage: &str,
) -> anyhow::Result<()> {
    let stage = Stage::parse(stage)
        .ok_or_else(|| anyhow::anyhow!("Unknown construction stage: {}", stage))?;
    let state = AppState::new(settings)?;
    let blob_key = upload_file(&state, file)?;
    run_analysis(&state, Subject::Acceptance { blob_key, stage }).await
}

/// Ask the AI designer a question, optionally with reference images.
pub async fn cmd_analyze_designer(
    settings: &Settings,
    question: &str,
    images: &[std::path::PathBuf],
) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let mut image_keys = Vec::with_capacity(images.len());
    for image in images {
        image_keys.push(upload_file(&state, image)?);
    }
    run_analysis(
        &state,
        Subject::Designer {
            question: question.to_string(),
            image_keys,
        },
    )
    .await
}

/// Submit one subject and print whatever comes back.
async fn run_analysis(state: &AppState, subject: Subject) -> anyhow::Result<()> {
    let kind = subject.kind();
    println!(
        "{} Submitting {} analysis...",
        style("→").cyan(),
        kind.as_str()
    );

    let outcome = state
        .orchestrator
        .submit(CLI_USER, subject)
        .await
        .map_err(|e| anyhow::anyhow!("Submission rejected: {}", e))?;

    if let Some(report) = outcome.report {
        println!("  {} Served from cache", style("✓").green());
        print_report(&report);
        return Ok(());
    }

    let task = wait_terminal(state, &outcome.task.id).await?;

    if task.state == TaskState::Failed {
        let reason = task
            .error_kind
            .map(|k| k.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("Analysis failed: {}", reason);
    }

    let fingerprint = task.fingerprint.clone();
    let report = state
        .orchestrator
        .store()
        .run(move |store| store.get_report(&fingerprint))
        .await?
        .ok_or_else(|| anyhow::anyhow!("Report missing for task {}", task.id))?;

    print_report(&report);
    Ok(())
}

/// Poll a task until it reaches a terminal state. Vendor timeouts bound
/// the build, so the deadline only needs a little headroom on top.
async fn wait_terminal(state: &AppState, task_id: &str) -> anyhow::Result<Task> {
    let deadline = Instant::now() + state.settings.build_timeout() + Duration::from_secs(10);
    loop {
        let task = state
            .orchestrator
            .status(task_id)
            .await
            .map_err(|e| anyhow::anyhow!("Status check failed: {}", e))?
            .ok_or_else(|| anyhow::anyhow!("Task {} disappeared", task_id))?;
        if task.state.is_terminal() {
            return Ok(task);
        }
        if Instant::now() > deadline {
            anyhow::bail!("Timed out waiting for task {}", task_id);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Read a local file into the blob store, returning the blob key.
fn upload_file(state: &AppState, file: &Path) -> anyhow::Result<String> {
    let content = std::fs::read(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
    let blob = state.blobs.put(&content, None)?;
    println!(
        "  {} Stored {} as {} ({} bytes, {})",
        style("✓").green(),
        file.display(),
        blob.key,
        blob.size,
        blob.mime
    );
    Ok(blob.key)
}

fn print_report(report: &RiskReport) {
    println!(
        "\n{}",
        style(format!("{} report", report.kind.as_str())).bold()
    );
    println!("{}", "-".repeat(50));
    println!("  {:<12} {}", "fingerprint", report.fingerprint);
    println!("  {:<12} {}", "status", report.status.as_str());
    if let Some(score) = report.risk_score {
        println!("  {:<12} {}", "risk score", score);
    }
    if let Some(expires) = report.expires_at {
        println!("  {:<12} {}", "expires", expires.to_rfc3339());
    }
    if !report.vendor_versions.is_empty() {
        let versions = report
            .vendor_versions
            .iter()
            .map(|(name, version)| format!("{}={}", name, version))
            .collect::<Vec<_>>()
            .join(" ");
        println!("  {:<12} {}", "vendors", versions);
    }

    if report.kind == AnalysisKind::Designer {
        if let Some(answer) = assembler::full(report).answer {
            println!("\n{}", style("Answer").bold());
            println!("{}", answer);
            return;
        }
    }

    if report.findings.is_empty() {
        println!("\n  {}", style("No findings").dim());
        return;
    }

    println!();
    for finding in &report.findings {
        let severity = style(format!("{:<9}", finding.severity.as_str()));
        let severity = match finding.severity {
            Severity::Info => severity.dim(),
            Severity::Attention => severity.yellow(),
            Severity::Concern => severity.red(),
        };
        println!("  {} [{}] {}", severity, finding.category, finding.title);
        if let Some(suggestion) = &finding.suggestion {
            println!("            {}", style(suggestion).dim());
        }
        if let Some(evidence) = &finding.evidence_ref {
            println!(
                "            {}",
                style(format!("evidence: {}", evidence)).dim()
            );
        }
    }
}
