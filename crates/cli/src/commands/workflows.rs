//! `conductor workflows`: Stored workflow templates.

use conductor_providers::StageRouter;

use super::{clip, load_config, open_store};

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config, &StageRouter::from_config(&config)).await?;
    let workflows = store.workflows().await;

    if workflows.is_empty() {
        println!("No workflows stored yet. Successful orchestrated runs are saved automatically.");
        return Ok(());
    }

    println!("🗂  {} workflow(s):", workflows.len());
    for workflow in &workflows {
        let meta = &workflow.metadata;
        println!();
        println!("   {} — {}", workflow.id, clip(&workflow.goal, 70));
        println!(
            "     applied {} time(s), success rate {:.0}%, {} subtasks",
            meta.applied_count,
            meta.success_rate * 100.0,
            workflow.subtasks.len()
        );
        if let Some(last) = meta.last_applied {
            println!("     last applied {}", last.format("%Y-%m-%d %H:%M UTC"));
        }
        for subtask in &workflow.subtasks {
            println!("       {}. {}", subtask.order, clip(&subtask.text, 70));
        }
    }
    Ok(())
}
