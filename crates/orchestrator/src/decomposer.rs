//! Decomposer: turns a goal into ordered subtasks with dependencies.
//!
//! The model answers in numbered lines. A line may carry `[independent]`
//! or `(after: 1, 3)`; otherwise subtask k depends on every lower-order
//! subtask. The result is always acyclic: a declared cycle is replaced by a
//! strictly linear chain. Items beyond the maximum are folded into the last
//! kept subtask, never dropped.

use conductor_config::AppConfig;
use conductor_core::error::PlanningError;
use conductor_core::plan::{Decomposition, DependencyEdge, SubtaskDescriptor, SubtaskId};
use conductor_core::provider::CompletionConstraints;
use conductor_providers::{Stage, StageRouter};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::merger::DependencyGraph;

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)[.)]\s+(.*)$").expect("numbered line regex should be valid"));

static AFTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*after\s*:\s*([^)]*)\)").expect("after marker regex should be valid")
});

static INDEPENDENT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\s*independent\s*\]").expect("independent marker regex should be valid"));

const SYSTEM_PROMPT: &str = "You are a software project planner. You split goals into small, \
concrete subtasks that a single tool-using agent can finish one at a time.";

/// Header every decomposition prompt starts with.
pub const DECOMPOSE_HEADER: &str = "Break the following goal into";

/// One parsed line of the model's answer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedItem {
    /// The number the model gave this line.
    pub label: usize,
    pub text: String,
    pub independent: bool,
    /// Explicit prerequisites by label; overrides both defaults.
    pub after: Option<Vec<usize>>,
}

pub struct Decomposer {
    router: StageRouter,
    min_subtasks: usize,
    max_subtasks: usize,
    constraints: CompletionConstraints,
}

impl Decomposer {
    pub fn new(router: StageRouter) -> Self {
        Self {
            router,
            min_subtasks: 3,
            max_subtasks: 7,
            constraints: CompletionConstraints::structured(1024),
        }
    }

    pub fn from_config(config: &AppConfig, router: StageRouter) -> Self {
        Self::new(router)
            .with_bounds(config.planning.min_subtasks, config.planning.max_subtasks)
            .with_constraints(CompletionConstraints::structured(config.planning.max_tokens))
    }

    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_subtasks = min.max(1);
        self.max_subtasks = max.max(self.min_subtasks);
        self
    }

    pub fn with_constraints(mut self, constraints: CompletionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Ask the model for subtasks and build an acyclic decomposition.
    ///
    /// Too few parsed items trigger one stricter re-request; if that also
    /// falls short the goal is reported back before anything runs.
    pub async fn decompose(&self, goal: &str, estimated: usize) -> Result<Decomposition, PlanningError> {
        let wanted = estimated.clamp(self.min_subtasks, self.max_subtasks);

        let reply = self.request(&self.prompt(goal, wanted, false)).await?;
        let mut items = parse_items(&reply);

        if items.len() < self.min_subtasks {
            warn!(
                found = items.len(),
                min = self.min_subtasks,
                "Too few subtasks parsed, asking again"
            );
            let reply = self.request(&self.prompt(goal, wanted, true)).await?;
            items = parse_items(&reply);
            if items.len() < self.min_subtasks {
                return Err(PlanningError::TooFewSubtasks {
                    found: items.len(),
                    min: self.min_subtasks,
                });
            }
        }

        let decomposition = build(items, self.max_subtasks);
        info!(
            subtasks = decomposition.subtasks.len(),
            edges = decomposition.edges.len(),
            linear_fallback = decomposition.linear_fallback,
            merged_excess = decomposition.merged_excess,
            "Goal decomposed"
        );
        Ok(decomposition)
    }

    async fn request(&self, prompt: &str) -> Result<String, PlanningError> {
        self.router
            .complete(Stage::Decompose, SYSTEM_PROMPT, prompt, &self.constraints)
            .await
            .map_err(|e| PlanningError::DecompositionFailed(e.to_string()))
    }

    fn prompt(&self, goal: &str, wanted: usize, strict: bool) -> String {
        let mut prompt = format!(
            "{DECOMPOSE_HEADER} {wanted} subtasks.\n\n\
             Goal: {goal}\n\n\
             Answer with one numbered line per subtask, e.g. `2. Build the API (after: 1)`.\n\
             By default a subtask runs after all earlier ones. Mark a subtask that needs \
             nothing else with `[independent]`, or list exactly what it needs with \
             `(after: 1, 3)`."
        );
        if strict {
            prompt.push_str(&format!(
                "\n\nYour previous answer was unusable. Reply with ONLY numbered lines, \
                 at least {} and at most {}, and nothing else.",
                self.min_subtasks, self.max_subtasks
            ));
        }
        prompt
    }
}

/// Parse numbered lines, stripping the dependency markers from the text.
pub(crate) fn parse_items(reply: &str) -> Vec<ParsedItem> {
    reply
        .lines()
        .filter_map(|line| {
            let caps = NUMBERED_LINE.captures(line)?;
            let label: usize = caps[1].parse().ok()?;
            let raw = &caps[2];

            let after = AFTER_MARKER.captures(raw).map(|c| {
                c[1].split(|ch: char| ch == ',' || ch.is_whitespace())
                    .filter_map(|n| n.trim().trim_start_matches('#').parse::<usize>().ok())
                    .collect::<Vec<_>>()
            });
            let independent = INDEPENDENT_MARKER.is_match(raw);

            let without_after = AFTER_MARKER.replace_all(raw, "");
            let text = INDEPENDENT_MARKER.replace_all(&without_after, "").replace("**", "");
            let text = text.trim().trim_end_matches(['.', ';']).trim().to_string();
            if text.is_empty() {
                return None;
            }

            Some(ParsedItem {
                label,
                text,
                independent,
                after,
            })
        })
        .collect()
}

/// Resolve dependencies, fold excess items and guarantee acyclicity.
pub(crate) fn build(items: Vec<ParsedItem>, max: usize) -> Decomposition {
    // Declared label -> 1-based position. First occurrence wins.
    let mut position: HashMap<usize, usize> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        position.entry(item.label).or_insert(i + 1);
    }

    let mut deps: Vec<BTreeSet<usize>> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let order = i + 1;
            match &item.after {
                Some(labels) => labels
                    .iter()
                    .filter_map(|label| match position.get(label) {
                        Some(p) if *p != order => Some(*p),
                        Some(_) => None,
                        None => {
                            warn!(subtask = order, reference = label, "Ignoring unknown subtask reference");
                            None
                        }
                    })
                    .collect(),
                None if item.independent => BTreeSet::new(),
                None => (1..order).collect(),
            }
        })
        .collect();

    let mut texts: Vec<String> = items.into_iter().map(|i| i.text).collect();

    let merged_excess = texts.len().saturating_sub(max);
    if merged_excess > 0 {
        warn!(found = texts.len(), max, "Folding excess subtasks into the last kept one");
        let folded_texts = texts.split_off(max);
        let folded_deps = deps.split_off(max);
        texts[max - 1] = std::iter::once(texts[max - 1].clone())
            .chain(folded_texts)
            .collect::<Vec<_>>()
            .join("; ");
        for extra in folded_deps {
            deps[max - 1].extend(extra);
        }
        for (i, set) in deps.iter_mut().enumerate() {
            let order = i + 1;
            *set = set
                .iter()
                .map(|d| (*d).min(max))
                .filter(|d| *d != order)
                .collect();
        }
    }

    let nodes: Vec<usize> = (1..=texts.len()).collect();
    let pairs: Vec<(usize, usize)> = deps
        .iter()
        .enumerate()
        .flat_map(|(i, set)| set.iter().map(move |d| (*d, i + 1)))
        .collect();

    let linear_fallback = DependencyGraph::new(&nodes, &pairs).is_cyclic();
    if linear_fallback {
        warn!(subtasks = texts.len(), "Declared dependencies form a cycle, using a linear chain");
        for (i, set) in deps.iter_mut().enumerate() {
            *set = if i == 0 { BTreeSet::new() } else { BTreeSet::from([i]) };
        }
    }

    let mut subtasks = Vec::with_capacity(texts.len());
    let mut edges = Vec::new();
    for (i, text) in texts.into_iter().enumerate() {
        let mut descriptor = SubtaskDescriptor::new(i + 1, text);
        for d in &deps[i] {
            let prerequisite = SubtaskId::from_order(*d);
            descriptor.depends_on.insert(prerequisite.clone());
            edges.push(DependencyEdge {
                prerequisite,
                dependent: descriptor.id.clone(),
            });
        }
        subtasks.push(descriptor);
    }
    debug!(edges = ?edges.iter().map(|e| format!("{}->{}", e.prerequisite, e.dependent)).collect::<Vec<_>>(), "Dependency edges");

    Decomposition {
        subtasks,
        edges,
        linear_fallback,
        merged_excess,
    }
}
