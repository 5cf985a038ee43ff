//! Complexity analyzer: scores a goal and picks Direct or Orchestrated mode.
//!
//! The score is a sum over independent signal groups, each capped, with
//! the total capped at 10. Pure and deterministic: no model call, no I/O.

use conductor_core::plan::{ComplexityReport, Mode};

const MAX_SCORE: u8 = 10;
const MIN_SUBTASKS: usize = 3;
const MAX_SUBTASKS: usize = 7;

const ACTION_VERBS: &[&str] = &[
    "build", "create", "deploy", "implement", "develop", "design", "integrate", "migrate",
    "refactor", "set up", "setup", "configure", "automate", "scaffold", "launch", "ship", "write",
    "add", "convert", "optimize",
];

const FEATURES: &[&str] = &[
    "authentication", "auth", "login", "signup", "database", "api", "dashboard", "frontend",
    "backend", "ui", "payments", "payment", "notifications", "search", "admin", "crud", "todo",
    "chat", "upload", "analytics", "cache", "queue", "webhook", "roles", "permissions",
];

const CONNECTIVES: &[&str] = &["and", "then", "after that", "finally", "first", "next"];

const TECHNOLOGIES: &[&str] = &[
    "react", "vue", "svelte", "angular", "next.js", "nextjs", "node", "express", "django", "flask",
    "fastapi", "rails", "postgres", "postgresql", "mysql", "sqlite", "mongodb", "redis", "docker",
    "kubernetes", "k8s", "aws", "gcp", "azure", "vercel", "netlify", "stripe", "graphql",
    "tailwind", "typescript", "rust", "python", "supabase", "firebase", "github actions",
];

/// Requested work categories, each a list of trigger words.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("deployment", &["deploy", "deployment", "host", "hosting", "release", "publish"]),
    ("testing", &["test", "tests", "testing", "unit test", "e2e", "coverage"]),
    ("documentation", &["docs", "document", "documentation", "readme"]),
];

const VERB_SUFFIXES: &[&str] = &["", "s", "es", "ed", "d", "ing"];

/// Scores goals against a configurable orchestration threshold.
#[derive(Debug, Clone)]
pub struct ComplexityAnalyzer {
    threshold: u8,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self { threshold: 5 }
    }
}

impl ComplexityAnalyzer {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn analyze(&self, goal: &str) -> ComplexityReport {
        let text = normalize(goal);
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut score: u8 = 0;
        let mut indicators = Vec::new();

        let mut group = |name: &str, hits: Vec<&str>, per_hit: u8, cap: u8| {
            if hits.is_empty() {
                return;
            }
            let points = (hits.len() as u8).saturating_mul(per_hit).min(cap);
            score += points;
            indicators.push(format!("{name} (+{points}): {}", hits.join(", ")));
        };

        let verbs = ACTION_VERBS
            .iter()
            .copied()
            .filter(|verb| {
                VERB_SUFFIXES
                    .iter()
                    .any(|suffix| contains_phrase(&words, &format!("{verb}{suffix}")))
            })
            .collect();
        group("action verbs", verbs, 2, 4);

        let features = distinct_phrases(&words, FEATURES);
        group("features", features, 1, 3);

        let connectives = CONNECTIVES
            .iter()
            .copied()
            .filter(|c| contains_phrase(&words, c))
            .collect();
        group("sequencing", connectives, 1, 2);

        let tech = distinct_phrases(&words, TECHNOLOGIES);
        group("technologies", tech, 1, 2);

        let categories = CATEGORIES
            .iter()
            .filter(|(_, triggers)| triggers.iter().any(|t| contains_phrase(&words, t)))
            .map(|(name, _)| *name)
            .collect();
        group("requested work", categories, 1, 2);

        let length = match words.len() {
            n if n > 60 => 2,
            n if n > 25 => 1,
            _ => 0,
        };
        if length > 0 {
            score += length;
            indicators.push(format!("length (+{length}): {} words", words.len()));
        }

        let score = score.min(MAX_SCORE);
        let mode = if score >= self.threshold {
            Mode::Orchestrated
        } else {
            Mode::Direct
        };
        let estimated_subtasks =
            ((score as f32 * 0.7).round() as usize).clamp(MIN_SUBTASKS, MAX_SUBTASKS);

        ComplexityReport {
            score,
            mode,
            estimated_subtasks,
            indicators,
        }
    }
}

/// Lowercase and turn punctuation (except `.` inside words) into spaces.
pub(crate) fn normalize(goal: &str) -> String {
    goal.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|w| w.trim_matches('.'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the word sequence contains `phrase` as whole words.
pub(crate) fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    !parts.is_empty() && words.windows(parts.len()).any(|w| w == parts.as_slice())
}

fn distinct_phrases<'a>(words: &[&str], vocabulary: &[&'a str]) -> Vec<&'a str> {
    vocabulary
        .iter()
        .copied()
        .filter(|p| contains_phrase(words, p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_question_is_direct() {
        let report = ComplexityAnalyzer::default().analyze("What is 2+2?");
        assert!(report.score <= 2);
        assert_eq!(report.mode, Mode::Direct);
        assert!(report.indicators.is_empty());
    }

    #[test]
    fn empty_goal_scores_zero() {
        let report = ComplexityAnalyzer::default().analyze("   ");
        assert_eq!(report.score, 0);
        assert_eq!(report.mode, Mode::Direct);
        assert_eq!(report.estimated_subtasks, 3);
    }

    #[test]
    fn todo_app_with_auth_and_deploy_is_orchestrated() {
        let report = ComplexityAnalyzer::default()
            .analyze("Build a todo app with authentication and deploy it");
        assert!(report.score >= 7, "score was {}", report.score);
        assert_eq!(report.mode, Mode::Orchestrated);
        assert!((3..=7).contains(&report.estimated_subtasks));
        assert!(report.indicators.iter().any(|i| i.starts_with("action verbs")));
    }

    #[test]
    fn score_is_capped_at_ten() {
        let goal = "First build and deploy a react dashboard with authentication, payments, \
                    search and an admin api on postgres with docker, then write tests and docs, \
                    finally configure monitoring and migrate the database";
        let report = ComplexityAnalyzer::default().analyze(goal);
        assert_eq!(report.score, 10);
        assert_eq!(report.estimated_subtasks, 7);
    }

    #[test]
    fn verb_groups_are_capped() {
        let report = ComplexityAnalyzer::default().analyze("build create implement design");
        assert_eq!(report.score, 4);
    }

    #[test]
    fn inflected_verbs_count() {
        let report = ComplexityAnalyzer::default().analyze("building and deploying");
        // 2 verbs (+4), one connective (+1)
        assert_eq!(report.score, 5);
    }

    #[test]
    fn threshold_is_configurable() {
        let goal = "Create a login page";
        let strict = ComplexityAnalyzer::new(9).analyze(goal);
        let lenient = ComplexityAnalyzer::new(2).analyze(goal);
        assert_eq!(strict.score, lenient.score);
        assert_eq!(strict.mode, Mode::Direct);
        assert_eq!(lenient.mode, Mode::Orchestrated);
    }

    #[test]
    fn deterministic() {
        let a = ComplexityAnalyzer::default().analyze("Implement an api and a frontend");
        let b = ComplexityAnalyzer::default().analyze("Implement an api and a frontend");
        assert_eq!(a, b);
    }

    #[test]
    fn long_goals_score_length() {
        let goal = "word ".repeat(30);
        let report = ComplexityAnalyzer::default().analyze(&goal);
        assert_eq!(report.score, 1);
    }
}
