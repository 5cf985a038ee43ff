//! `conductor lessons`: Review and manage learned lessons.

use conductor_config::AppConfig;
use conductor_core::knowledge::{Decision, Lesson, LessonStatus};
use conductor_learning::{ApprovalGate, ExperienceStore, LogReviewSurface};
use conductor_providers::StageRouter;
use std::sync::Arc;

use super::{clip, load_config, open_store};

async fn store(config: &AppConfig) -> Result<Arc<ExperienceStore>, Box<dyn std::error::Error>> {
    open_store(config, &StageRouter::from_config(config)).await
}

fn parse_status(s: &str) -> Result<LessonStatus, Box<dyn std::error::Error>> {
    match s.trim().to_ascii_lowercase().as_str() {
        "proposed" | "pending" => Ok(LessonStatus::Proposed),
        "approved" => Ok(LessonStatus::Approved),
        "rejected" => Ok(LessonStatus::Rejected),
        "archived" => Ok(LessonStatus::Archived),
        other => Err(format!("Unknown lesson status '{other}' (proposed, approved, rejected, archived)").into()),
    }
}

fn status_icon(status: LessonStatus) -> &'static str {
    match status {
        LessonStatus::Proposed => "🕒",
        LessonStatus::Approved => "✅",
        LessonStatus::Rejected => "❌",
        LessonStatus::Archived => "📦",
    }
}

pub async fn list(status: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = status.as_deref().map(parse_status).transpose()?;
    let config = load_config()?;
    let lessons = store(&config).await?.lessons(filter).await;

    if lessons.is_empty() {
        match filter {
            Some(status) => println!("No {status} lessons."),
            None => println!("No lessons yet."),
        }
        return Ok(());
    }

    println!("📚 {} lesson(s):", lessons.len());
    for lesson in &lessons {
        println!(
            "   {} {}  {:<13} used {:>3}  {}",
            status_icon(lesson.status),
            lesson.id,
            lesson.scope.as_str(),
            lesson.usage_count,
            clip(&lesson.text, 70)
        );
    }
    Ok(())
}

pub async fn show(id: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let lesson = store(&config)
        .await?
        .lesson(&id)
        .await
        .ok_or_else(|| format!("Lesson not found: {id}"))?;
    print_lesson(&lesson);
    Ok(())
}

pub async fn approve(id: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let gate = ApprovalGate::new(store(&config).await?, Arc::new(LogReviewSurface));
    let lesson = gate.on_decision(&id, Decision::Approve, None).await?;
    println!("✅ Approved {} ({})", lesson.id, lesson.scope);
    Ok(())
}

pub async fn reject(id: String, reason: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let gate = ApprovalGate::new(store(&config).await?, Arc::new(LogReviewSurface));
    let lesson = gate.on_decision(&id, Decision::Reject, reason).await?;
    println!("❌ Rejected {}", lesson.id);
    if let Some(reason) = &lesson.rejection_reason {
        println!("   Reason: {reason}");
    }
    Ok(())
}

pub async fn archive(id: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let lesson = store(&config).await?.archive(&id).await?;
    println!("📦 Archived {}", lesson.id);
    Ok(())
}

fn print_lesson(lesson: &Lesson) {
    println!("{} {}", status_icon(lesson.status), lesson.id);
    println!("   Text:       {}", lesson.text);
    println!("   Status:     {}", lesson.status);
    println!("   Scope:      {}", lesson.scope);
    println!("   Confidence: {:.0}%", lesson.confidence * 100.0);
    println!(
        "   Usage:      {} ({} positive, {:.0}%)",
        lesson.usage_count,
        lesson.positive_feedback_count,
        lesson.success_ratio() * 100.0
    );
    if let Some(reason) = &lesson.rejection_reason {
        println!("   Rejected:   {reason}");
    }
    println!("   Created:    {}", lesson.created_at.format("%Y-%m-%d %H:%M UTC"));

    let evidence = &lesson.evidence;
    if let Some(goal) = &evidence.goal {
        println!("   Goal:       {goal}");
    }
    if let Some(run_id) = &evidence.run_id {
        println!("   Run:        {run_id}");
    }
    if !evidence.observations.is_empty() {
        println!("   Evidence:");
        for observation in &evidence.observations {
            println!("     • {observation}");
        }
    }
}
