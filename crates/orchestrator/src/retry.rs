//! Adaptive retry controller: bounded, fix-aware retries for one subtask.
//!
//! Each failure is classified and its suggested fix shapes only the next
//! attempt's request:
//! - `install_dependency` prepends an install step
//! - `retry_modified` attaches a corrective note with the classified error
//! - `retry_same` repeats the request once; a second consecutive failure
//!   with the same cause escalates to a modified request (longer step
//!   timeouts plus a note)
//! - `abort`, or any Critical failure, stops immediately
//!
//! Retry-same categories wait with capped exponential backoff; everything
//! else retries immediately.

use conductor_config::RetryConfig;
use conductor_core::classification::{Ecosystem, ErrorCategory, ErrorClassification, SuggestedFix};
use conductor_core::executor::{ExecutionOutcome, ExecutionRequest, ExecutionUnit};
use conductor_core::plan::{AttemptRecord, ExecutionResult, SubtaskStatus, ToolStep};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier::ErrorClassifier;

/// Attempt and backoff limits.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub escalation_timeout_factor: u32,
    /// Timeout assumed for steps without one when escalating.
    pub default_step_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), 300)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, default_step_timeout_secs: u64) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            escalation_timeout_factor: config.escalation_timeout_factor.max(1),
            default_step_timeout_secs,
        }
    }

    /// Delay before attempt `failed_attempt + 1`: `base * 2^(n-1)`, capped.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_cap)
    }
}

pub struct RetryController {
    executor: Arc<dyn ExecutionUnit>,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
}

/// What the controller decided to run next.
struct NextAttempt {
    request: ExecutionRequest,
    applied: SuggestedFix,
    modified: bool,
}

impl RetryController {
    pub fn new(executor: Arc<dyn ExecutionUnit>, policy: RetryPolicy) -> Self {
        Self {
            executor,
            classifier: ErrorClassifier::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `request` until it succeeds, a terminal failure occurs, or the
    /// attempt budget is spent.
    pub async fn execute_with_retry(&self, request: ExecutionRequest) -> ExecutionResult {
        let subtask_id = request.subtask_id.clone();
        let mut request = request;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut modified = false;
        // Cause of the last failure that was retried with an unchanged request
        let mut repeated_for: Option<ErrorCategory> = None;

        for attempt in 1..=self.policy.max_attempts {
            debug!(subtask_id = %subtask_id, attempt, modified, "Running attempt");

            let outcome = match self.executor.run(request.clone()).await {
                Ok(outcome) => outcome,
                Err(e) => ExecutionOutcome::failure(e.to_string(), None),
            };

            if outcome.is_success() {
                info!(subtask_id = %subtask_id, attempt, "Attempt succeeded");
                attempts.push(AttemptRecord {
                    attempt,
                    success: true,
                    category: None,
                    applied_fix: None,
                    modified,
                    message: String::new(),
                });
                return ExecutionResult {
                    subtask_id,
                    status: SubtaskStatus::Succeeded,
                    success: true,
                    output: outcome.output,
                    artifacts: outcome.artifacts,
                    retry_count: attempt - 1,
                    attempts,
                    error: None,
                    note: None,
                };
            }

            let raw = outcome
                .raw_error
                .clone()
                .unwrap_or_else(|| outcome.output.clone());
            let classification = self.classifier.classify(&raw, outcome.exit_code);
            warn!(
                subtask_id = %subtask_id,
                attempt,
                category = %classification.category,
                severity = %classification.severity,
                fix = %classification.suggested_fix,
                message = %classification.message,
                "Attempt failed"
            );

            let exhausted = attempt == self.policy.max_attempts;
            if classification.is_terminal() || exhausted {
                let mut classification = classification;
                if exhausted && !classification.is_terminal() {
                    info!(subtask_id = %subtask_id, attempts = attempt, "Retry budget exhausted");
                    // An unexplained failure that survived every retry is given up on
                    if classification.category == ErrorCategory::Unknown {
                        classification.suggested_fix = SuggestedFix::Abort;
                    }
                }
                attempts.push(AttemptRecord {
                    attempt,
                    success: false,
                    category: Some(classification.category),
                    applied_fix: None,
                    modified,
                    message: classification.message.clone(),
                });
                return ExecutionResult {
                    subtask_id,
                    status: SubtaskStatus::Failed,
                    success: false,
                    output: outcome.output,
                    artifacts: outcome.artifacts,
                    retry_count: attempt - 1,
                    attempts,
                    error: Some(classification),
                    note: None,
                };
            }

            let next = self.apply_fix(&request, &classification, repeated_for);
            repeated_for = (!next.modified).then_some(classification.category);
            attempts.push(AttemptRecord {
                attempt,
                success: false,
                category: Some(classification.category),
                applied_fix: Some(next.applied),
                modified,
                message: classification.message.clone(),
            });

            if classification.category.uses_backoff() {
                let delay = self.policy.backoff(attempt);
                debug!(subtask_id = %subtask_id, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::time::sleep(delay).await;
            }

            request = next.request;
            modified = next.modified;
        }

        // max_attempts >= 1, so the loop always returns
        ExecutionResult {
            subtask_id,
            status: SubtaskStatus::Failed,
            success: false,
            output: String::new(),
            artifacts: Vec::new(),
            retry_count: 0,
            attempts,
            error: None,
            note: Some("no attempts were made".into()),
        }
    }

    fn apply_fix(
        &self,
        request: &ExecutionRequest,
        classification: &ErrorClassification,
        repeated_for: Option<ErrorCategory>,
    ) -> NextAttempt {
        match classification.suggested_fix {
            SuggestedFix::InstallDependency => match install_step(classification) {
                Some(step) if !request.steps.contains(&step) => {
                    let mut next = request.clone();
                    if next.steps.is_empty() {
                        next.steps.push(ToolStep::new("llm", request.text.clone()));
                    }
                    next.steps.insert(0, step);
                    NextAttempt {
                        request: next,
                        applied: SuggestedFix::InstallDependency,
                        modified: true,
                    }
                }
                // Nothing to install, or the install already ran: correct instead
                _ => self.corrected(request, classification),
            },
            SuggestedFix::RetryModified => self.corrected(request, classification),
            SuggestedFix::RetrySame | SuggestedFix::None | SuggestedFix::Abort => {
                if repeated_for == Some(classification.category) {
                    self.escalated(request, classification)
                } else {
                    NextAttempt {
                        request: request.clone(),
                        applied: SuggestedFix::RetrySame,
                        modified: false,
                    }
                }
            }
        }
    }

    fn corrected(&self, request: &ExecutionRequest, classification: &ErrorClassification) -> NextAttempt {
        let mut next = request.clone();
        next.context.push(corrective_note(classification));
        NextAttempt {
            request: next,
            applied: SuggestedFix::RetryModified,
            modified: true,
        }
    }

    fn escalated(&self, request: &ExecutionRequest, classification: &ErrorClassification) -> NextAttempt {
        let factor = u64::from(self.policy.escalation_timeout_factor);
        let mut next = request.clone();
        for step in &mut next.steps {
            let current = step.timeout_secs.unwrap_or(self.policy.default_step_timeout_secs);
            step.timeout_secs = Some(current.saturating_mul(factor));
        }
        next.context.push(format!(
            "The previous two attempts failed with the same cause ({}): {}. Step timeouts were extended; \
             take a different approach if the cause persists.",
            classification.category, classification.message
        ));
        info!(
            subtask_id = %request.subtask_id,
            category = %classification.category,
            "Same cause twice in a row, escalating to a modified request"
        );
        NextAttempt {
            request: next,
            applied: SuggestedFix::RetryModified,
            modified: true,
        }
    }
}

fn install_step(classification: &ErrorClassification) -> Option<ToolStep> {
    let package = classification.details.package.as_deref()?;
    let step = match classification.details.ecosystem {
        Some(Ecosystem::Python) => ToolStep::new("shell", format!("pip install {package}")),
        Some(Ecosystem::Node) => ToolStep::new("shell", format!("npm install {package}")),
        Some(Ecosystem::System) | None => ToolStep::new(
            "llm",
            format!("Make the '{package}' command available, or rework the task so it is not needed"),
        ),
    };
    Some(step)
}

fn corrective_note(classification: &ErrorClassification) -> String {
    let location = match (&classification.details.path, classification.details.line) {
        (Some(path), Some(line)) => format!(" at {path}:{line}"),
        (Some(path), None) => format!(" at {path}"),
        _ => String::new(),
    };
    let hint = match classification.category {
        ErrorCategory::SyntaxError => "Fix the syntax before running again.",
        ErrorCategory::FileNotFound => "Create the missing file or correct the path.",
        ErrorCategory::ImportError => "Correct the import or the exported name.",
        ErrorCategory::TypeError => "Fix the type mismatch.",
        ErrorCategory::DivisionByZero => "Guard the division against zero.",
        ErrorCategory::IndexOrKeyError => "Check the index or key exists before using it.",
        ErrorCategory::RuntimeError => "Handle the failing case.",
        ErrorCategory::MissingDependency => "Avoid the missing dependency or vendor it.",
        _ => "Adjust the approach.",
    };
    format!(
        "Previous attempt failed with {}{location}: {}. {hint}",
        classification.category, classification.message
    )
}
