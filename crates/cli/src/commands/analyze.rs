//! `conductor analyze`: Score a goal's complexity without running it.

use conductor_core::plan::Mode;
use conductor_orchestrator::ComplexityAnalyzer;

use super::load_config;

pub async fn run(goal: String, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let analyzer = ComplexityAnalyzer::new(config.analyzer.orchestration_threshold);
    let report = analyzer.analyze(&goal);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("📊 Complexity: {}/10", report.score);
    match report.mode {
        Mode::Direct => println!("   Mode: direct (single tool call)"),
        Mode::Orchestrated => println!(
            "   Mode: orchestrated (~{} subtasks, threshold {})",
            report.estimated_subtasks,
            analyzer.threshold()
        ),
    }
    if report.indicators.is_empty() {
        println!("   No complexity indicators found");
    } else {
        println!("   Indicators:");
        for indicator in &report.indicators {
            println!("     • {indicator}");
        }
    }
    Ok(())
}
