//! Orchestrator: the public entry point.
//!
//! Wires the analyzer, planners, reflectors and retry controller to an
//! execution unit and (optionally) the experience store, then starts one
//! background run per goal.

use conductor_config::AppConfig;
use conductor_core::event::EventBus;
use conductor_core::executor::ExecutionUnit;
use conductor_core::plan::{ComplexityReport, RunId};
use conductor_learning::{ApprovalGate, ExperienceStore};
use conductor_providers::StageRouter;
use std::sync::Arc;
use tracing::debug;

use crate::analyzer::ComplexityAnalyzer;
use crate::coordinator::{Coordinator, RunSettings};
use crate::decomposer::Decomposer;
use crate::handle::RunHandle;
use crate::planner::Planner;
use crate::reflect::Reflector;
use crate::retry::{RetryController, RetryPolicy};

pub struct Orchestrator {
    executor: Arc<dyn ExecutionUnit>,
    coordinator: Coordinator,
}

impl Orchestrator {
    /// An orchestrator with default settings.
    pub fn new(router: StageRouter, executor: Arc<dyn ExecutionUnit>) -> Self {
        Self::from_config(&AppConfig::default(), router, executor)
    }

    pub fn from_config(config: &AppConfig, router: StageRouter, executor: Arc<dyn ExecutionUnit>) -> Self {
        let policy = RetryPolicy::from_config(&config.retry, config.execution.tool_timeout_secs);
        let coordinator = Coordinator {
            analyzer: ComplexityAnalyzer::new(config.analyzer.orchestration_threshold),
            decomposer: Decomposer::from_config(config, router.clone()),
            planner: Planner::from_config(config, router.clone()),
            reflector: Reflector::from_config(config, router),
            retry: RetryController::new(executor.clone(), policy),
            store: None,
            gate: None,
            events: None,
            settings: RunSettings::from_config(config),
        };
        Self { executor, coordinator }
    }

    pub fn with_analyzer(mut self, analyzer: ComplexityAnalyzer) -> Self {
        self.coordinator.analyzer = analyzer;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.coordinator.retry = RetryController::new(self.executor.clone(), policy);
        self
    }

    /// Lesson hints, workflow reuse and workflow saving.
    pub fn with_store(mut self, store: Arc<ExperienceStore>) -> Self {
        self.coordinator.reflector = self.coordinator.reflector.with_store(store.clone());
        self.coordinator.store = Some(store);
        self
    }

    /// Lesson proposals go through `gate`. Also uses the gate's store when
    /// none was set.
    pub fn with_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        if self.coordinator.store.is_none() {
            self = self.with_store(gate.store().clone());
        }
        self.coordinator.gate = Some(gate);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.coordinator.events = Some(events);
        self
    }

    /// Score a goal without running it.
    pub fn analyze(&self, goal: &str) -> ComplexityReport {
        self.coordinator.analyzer.analyze(goal)
    }

    /// Start a run in the background.
    ///
    /// With `confirm_risks` the run proceeds past critical pre-flight risks
    /// that have no mitigation; otherwise such a risk stops it before any
    /// subtask executes.
    pub fn orchestrate(self: &Arc<Self>, goal: impl Into<String>, confirm_risks: bool) -> RunHandle {
        let goal = goal.into();
        let run_id = RunId::new();
        let (handle, channels) = RunHandle::new(run_id.clone());
        debug!(run_id = %run_id, executor = %self.executor.name(), "Spawning run");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.coordinator.run(run_id, goal, confirm_risks, channels).await;
        });
        handle
    }
}
