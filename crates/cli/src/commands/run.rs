//! `conductor run`: Orchestrate a goal and stream its progress.

use conductor_config::AppConfig;
use conductor_core::plan::SubtaskStatus;
use conductor_core::run::{RunReport, RunState, RunStatus, RunUpdate};
use conductor_learning::{ApprovalGate, ChannelReviewSurface, ReviewItem};
use conductor_orchestrator::Orchestrator;
use conductor_providers::StageRouter;
use conductor_tools::ToolingExecutor;
use std::sync::Arc;
use tokio_stream::StreamExt;

use super::{clip, load_config, open_store};

pub async fn run(goal: String, confirm_risks: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    // No key, no run: print setup help first
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CONDUCTOR_API_KEY   = 'sk-...'       (generic)");
        eprintln!("    OPENAI_API_KEY      = 'sk-...'       (for OpenAI direct)");
        eprintln!("    OPENROUTER_API_KEY  = 'sk-or-v1-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = StageRouter::from_config(&config);
    let executor = Arc::new(ToolingExecutor::from_config(&config, router.clone()));
    let store = open_store(&config, &router).await?;
    let (surface, mut reviews) = ChannelReviewSurface::new();
    let gate = Arc::new(ApprovalGate::new(store, Arc::new(surface)));

    let orchestrator = Arc::new(Orchestrator::from_config(&config, router, executor).with_gate(gate));

    let mut handle = orchestrator.orchestrate(goal.clone(), confirm_risks);
    if !json {
        println!("🎼 Conductor — run {}", handle.run_id());
        println!("   Goal: {goal}\n");
    }

    let mut updates = handle.stream();
    let mut cancelling = false;
    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(update) => {
                    if !json {
                        print_update(&update);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                eprintln!("\n⏹  Cancelling after the current phase...");
                handle.cancel();
                cancelling = true;
            }
        }
    }

    let report = handle.outcome().await?;

    let mut pending = Vec::new();
    while let Ok(item) = reviews.try_recv() {
        pending.push(item);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
        print_reviews(&pending);
    }

    match report.status {
        RunStatus::Done => Ok(()),
        status => Err(format!("Run finished as {status}").into()),
    }
}

fn print_update(update: &RunUpdate) {
    match (&update.subtask_id, update.status) {
        (Some(id), Some(status)) => {
            let icon = match status {
                SubtaskStatus::Succeeded => "✅",
                SubtaskStatus::Failed => "❌",
                SubtaskStatus::Skipped => "⏭ ",
                SubtaskStatus::Running => "⏳",
                _ => "• ",
            };
            match &update.partial_output {
                Some(output) if !output.trim().is_empty() => {
                    println!("   {icon} {id} {status}: {}", clip(output, 100))
                }
                _ => println!("   {icon} {id} {status}"),
            }
        }
        _ => match update.state {
            RunState::Planning => println!("📝 Planning..."),
            RunState::PreflightReflection => println!("🔍 Checking the plan for risks..."),
            RunState::Executing(phase) => println!("⚙️  Phase {}", phase + 1),
            RunState::PostflightReflection => println!("🧠 Reflecting on the run..."),
            state => println!("🏁 {state}"),
        },
    }
}

fn print_report(report: &RunReport) {
    println!();
    let icon = match report.status {
        RunStatus::Done => "✅",
        RunStatus::PartiallyFailed => "⚠️ ",
        RunStatus::Cancelled => "⏹ ",
    };
    println!("{icon} Run {} — {}", report.run_id, report.status);
    println!(
        "   Complexity: {}/10 ({:?}){}",
        report.complexity.score,
        report.complexity.mode,
        if report.complexity.indicators.is_empty() {
            String::new()
        } else {
            format!(" — {}", report.complexity.indicators.join(", "))
        }
    );
    println!("   Phases:     {}", report.phases.len());
    println!("   Tool calls: {}", report.tool_calls());
    println!(
        "   Duration:   {:.1}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );

    if !report.subtasks.is_empty() {
        println!();
        println!("   Subtasks:");
        for subtask in &report.subtasks {
            let retries = report
                .result(&subtask.id)
                .map(|r| r.retry_count)
                .filter(|&n| n > 0)
                .map(|n| format!(" (retries: {n})"))
                .unwrap_or_default();
            println!(
                "     {:<3} {:<10} {}{retries}",
                subtask.id.as_str(),
                subtask.status.to_string(),
                clip(&subtask.text, 70)
            );
        }
    } else if let Some(result) = report.results.first() {
        println!();
        println!("   Output:");
        for line in result.output.lines() {
            println!("     {line}");
        }
    }

    if !report.risks.is_empty() {
        println!();
        println!("   Risks:");
        for risk in &report.risks {
            let target = risk.target.as_ref().map(|t| format!(" [{t}]")).unwrap_or_default();
            let mitigation = risk
                .mitigation
                .as_ref()
                .map(|m| format!(" → {m}"))
                .unwrap_or_default();
            println!("     {}{target}: {}{mitigation}", risk.severity, risk.text);
        }
    }

    let failures = report.failures();
    if !failures.is_empty() {
        println!();
        println!("   Failures:");
        for failure in &failures {
            let category = failure
                .category
                .map(|c| format!(" [{c}]"))
                .unwrap_or_default();
            println!("     ❌ {}{category}: {}", failure.subtask_id, clip(&failure.message, 100));
        }
    }

    if !report.gaps.is_empty() {
        println!();
        println!("   Gaps:");
        for gap in &report.gaps {
            println!("     ⚠️  {gap}");
        }
    }

    if let Some(id) = &report.workflow_id {
        println!();
        println!("   Workflow: {id}");
    }
}

fn print_reviews(items: &[ReviewItem]) {
    if items.is_empty() {
        return;
    }
    println!();
    println!("📚 {} lesson(s) awaiting review:", items.len());
    for item in items {
        println!(
            "   {} ({}, confidence {:.0}%)",
            item.lesson_id,
            item.scope,
            item.confidence * 100.0
        );
        println!("     {}", item.text);
    }
    println!();
    println!("   Approve with `conductor lessons approve <id>`");
    println!("   Reject with  `conductor lessons reject <id> --reason \"...\"`");
}
