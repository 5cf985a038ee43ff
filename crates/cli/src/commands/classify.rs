//! `conductor classify`: Classify an error message.

use conductor_orchestrator::ErrorClassifier;

pub async fn run(error: String, exit_code: Option<i32>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let classification = ErrorClassifier::new().classify(&error, exit_code);

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    let icon = if classification.is_terminal() { "🛑" } else { "🔁" };
    println!("{icon} {}", classification.category);
    println!("   Severity: {}", classification.severity);
    println!("   Fix:      {}", classification.suggested_fix);
    println!("   Rule:     {}", classification.rule);
    println!("   Message:  {}", classification.message);

    let details = &classification.details;
    if let Some(package) = &details.package {
        match details.ecosystem {
            Some(ecosystem) => println!("   Package:  {package} ({ecosystem:?})"),
            None => println!("   Package:  {package}"),
        }
    }
    if let Some(path) = &details.path {
        match details.line {
            Some(line) => println!("   Location: {path}:{line}"),
            None => println!("   Location: {path}"),
        }
    }
    Ok(())
}
