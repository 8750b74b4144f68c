//! Analysis orchestrator: drives completion calls for a batch of units
//!
//! Every unit owns a slot in a pre-sized array indexed by its original
//! position. Jobs (one unit, a group, or the whole batch) run
//! concurrently up to the configured worker count and write back into
//! their slots, so completion order never affects result order. A job
//! that fails marks only its own slots; siblings proceed.

use super::parse::{parse_group, parse_unit};
use super::prompt::PromptBuilder;
use super::types::{AnalysisUnit, UnitFailure, UnitOutcome, UnitState};
use crate::context::{ContextBuilder, ContextDepth, ContextWindow};
use crate::coordinate::Coordinate;
use crate::document::TextUnit;
use crate::llm::{CompletionClient, CompletionError, CompletionOptions};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// How units are packed into completion calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisMode {
    /// One call per unit, one JSON object back
    #[default]
    PerChunk,
    /// One call per `group_size` units, a JSON array back
    Grouped { group_size: usize },
    /// The whole batch as one text, a single slot
    SingleUnit,
}

impl AnalysisMode {
    /// Number of result slots for `unit_count` units.
    pub fn slot_count(&self, unit_count: usize) -> usize {
        match self {
            AnalysisMode::SingleUnit => usize::from(unit_count > 0),
            _ => unit_count,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub mode: AnalysisMode,
    pub depth: ContextDepth,
    /// Jobs in flight at once
    pub concurrency: usize,
    /// Per-call deadline; 0 disables it
    pub timeout_seconds: u64,
    /// Extra attempts after a retryable failure
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Replaces the default system prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::PerChunk,
            depth: ContextDepth::Lightweight,
            concurrency: 4,
            timeout_seconds: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
            temperature: 0.2,
            max_tokens: 4096,
            system_prompt: None,
        }
    }
}

impl AnalysisSettings {
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds)),
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// One position in the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSlot {
    pub index: usize,
    pub state: UnitState,
    /// Completion calls made for this slot in this run
    pub attempts: u32,
    pub outcome: Option<UnitOutcome>,
}

impl UnitSlot {
    fn pending(index: usize) -> Self {
        Self {
            index,
            state: UnitState::Pending,
            attempts: 0,
            outcome: None,
        }
    }

    fn reused(index: usize, outcome: UnitOutcome) -> Self {
        Self {
            index,
            state: outcome.state(),
            attempts: 0,
            outcome: Some(outcome),
        }
    }

    fn record(&mut self, attempts: u32, outcome: UnitOutcome) {
        let mut state = self.state;
        for _ in 0..attempts.max(1) {
            state = match state.transition(UnitState::Prompted) {
                Ok(next) => next,
                Err(e) => {
                    warn!(slot = self.index, error = %e, "unexpected slot state");
                    UnitState::Prompted
                }
            };
        }
        self.state = state.transition(outcome.state()).unwrap_or(outcome.state());
        self.attempts = attempts;
        self.outcome = Some(outcome);
    }
}

/// All slots of one batch, in original order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub mode: AnalysisMode,
    pub slots: Vec<UnitSlot>,
    /// Jobs sent to the backend in this run
    pub jobs_run: usize,
    /// Final error of every job whose completion call failed
    pub completion_errors: Vec<CompletionError>,
}

impl BatchResult {
    /// Outcome per slot; a slot never reached is reported missing.
    pub fn outcomes(&self) -> Vec<UnitOutcome> {
        self.slots
            .iter()
            .map(|s| {
                s.outcome
                    .clone()
                    .unwrap_or_else(|| UnitOutcome::failed(UnitFailure::missing()))
            })
            .collect()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| s.outcome.as_ref().map_or(true, UnitOutcome::is_failed))
            .map(|s| s.index)
            .collect()
    }

    pub fn successful(&self) -> impl Iterator<Item = (usize, &AnalysisUnit)> {
        self.slots
            .iter()
            .filter_map(|s| s.outcome.as_ref()?.unit().map(|u| (s.index, u)))
    }

    pub fn success_count(&self) -> usize {
        self.successful().count()
    }

    /// Every call made in this run failed because the backend was unreachable.
    pub fn backend_unavailable(&self) -> bool {
        self.jobs_run > 0
            && self.completion_errors.len() == self.jobs_run
            && self
                .completion_errors
                .iter()
                .all(|e| matches!(e, CompletionError::Unavailable(_)))
    }
}

/// Slots covered by one completion call
#[derive(Debug, Clone)]
struct Job {
    slots: Vec<usize>,
}

struct JobResult {
    slots: Vec<usize>,
    attempts: u32,
    outcomes: Vec<UnitOutcome>,
    error: Option<CompletionError>,
}

/// Runs analysis jobs against a completion backend
pub struct AnalysisOrchestrator {
    client: Arc<dyn CompletionClient>,
    /// Limits concurrent completion calls across every batch using this orchestrator
    semaphore: Arc<Semaphore>,
    prompts: PromptBuilder,
    settings: AnalysisSettings,
}

impl AnalysisOrchestrator {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        let settings = AnalysisSettings::default();
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            prompts: PromptBuilder::default(),
            settings,
        }
    }

    pub fn with_settings(mut self, settings: AnalysisSettings) -> Self {
        self.semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        if let Some(system_prompt) = &settings.system_prompt {
            self.prompts = PromptBuilder::new(system_prompt.clone());
        }
        self.settings = settings;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Analyze `units`. Slots that succeeded in `previous` are reused
    /// without a call; everything else is (re)analyzed.
    pub async fn analyze(
        &self,
        units: &[TextUnit],
        contexts: &ContextBuilder,
        target: Option<&Coordinate>,
        previous: Option<&[UnitOutcome]>,
    ) -> BatchResult {
        let mode = self.settings.mode;
        let slot_count = mode.slot_count(units.len());
        let previous = previous.filter(|p| p.len() == slot_count);

        let mut slots: Vec<UnitSlot> = (0..slot_count)
            .map(|i| match previous.and_then(|p| p.get(i)) {
                Some(outcome) if !outcome.is_failed() => UnitSlot::reused(i, outcome.clone()),
                _ => UnitSlot::pending(i),
            })
            .collect();

        let pending: Vec<usize> = slots
            .iter()
            .filter(|s| s.state == UnitState::Pending)
            .map(|s| s.index)
            .collect();
        let jobs = plan_jobs(mode, &pending);
        info!(
            units = units.len(),
            slots = slot_count,
            reused = slot_count - pending.len(),
            jobs = jobs.len(),
            ?mode,
            "analyzing batch"
        );

        let jobs_run = jobs.len();
        let results: Vec<JobResult> = stream::iter(jobs)
            .map(|job| self.run_job(job, units, contexts, target))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut completion_errors = Vec::new();
        for result in results {
            if let Some(e) = result.error {
                completion_errors.push(e);
            }
            for (slot, outcome) in result.slots.into_iter().zip(result.outcomes) {
                if let Some(failure) = outcome.failure() {
                    warn!(slot, kind = ?failure.kind, error = %failure.error, "unit failed");
                }
                slots[slot].record(result.attempts, outcome);
            }
        }

        BatchResult {
            mode,
            slots,
            jobs_run,
            completion_errors,
        }
    }

    async fn run_job(
        &self,
        job: Job,
        units: &[TextUnit],
        contexts: &ContextBuilder,
        target: Option<&Coordinate>,
    ) -> JobResult {
        let depth = self.settings.depth;
        let user_prompt = match self.settings.mode {
            AnalysisMode::PerChunk => {
                let unit = &units[job.slots[0]];
                let window = contexts.build(&unit.content, target, depth).await;
                self.prompts.unit_prompt(unit, &window)
            }
            AnalysisMode::Grouped { .. } => {
                let mut members: Vec<(&TextUnit, ContextWindow)> = Vec::with_capacity(job.slots.len());
                for &slot in &job.slots {
                    let unit = &units[slot];
                    members.push((unit, contexts.build(&unit.content, target, depth).await));
                }
                self.prompts.group_prompt(&members)
            }
            AnalysisMode::SingleUnit => {
                let joined = super::prompt::joined_content(units);
                let window = contexts.build(&joined, target, depth).await;
                self.prompts.single_unit_prompt(units, &window)
            }
        };

        let (attempts, response) = self.complete_with_retry(&user_prompt).await;
        match response {
            Ok(raw) => {
                let outcomes = match self.settings.mode {
                    AnalysisMode::Grouped { .. } => parse_group(&raw, job.slots.len()),
                    _ => vec![parse_unit(&raw)],
                };
                JobResult {
                    slots: job.slots,
                    attempts,
                    outcomes,
                    error: None,
                }
            }
            Err(e) => {
                let failure = UnitFailure::from(&e);
                JobResult {
                    outcomes: job
                        .slots
                        .iter()
                        .map(|_| UnitOutcome::failed(failure.clone()))
                        .collect(),
                    slots: job.slots,
                    attempts,
                    error: Some(e),
                }
            }
        }
    }

    /// One free-form call with the orchestrator's retry policy.
    pub async fn synthesize(&self, user_prompt: &str) -> Result<String, CompletionError> {
        self.complete_with_retry(user_prompt).await.1
    }

    /// Call the backend, retrying retryable failures. Returns the number
    /// of attempts made alongside the final result.
    async fn complete_with_retry(&self, user_prompt: &str) -> (u32, Result<String, CompletionError>) {
        let options = self.settings.completion_options();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self.complete_once(user_prompt, &options).await;
            match result {
                Err(e) if e.is_retryable() && attempts <= self.settings.max_retries => {
                    debug!(attempt = attempts, error = %e, "retrying completion");
                    tokio::time::sleep(self.settings.backoff()).await;
                }
                other => return (attempts, other),
            }
        }
    }

    async fn complete_once(
        &self,
        user_prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| CompletionError::Unavailable(format!("semaphore closed: {}", e)))?;

        let call = self
            .client
            .complete(self.prompts.system_prompt(), user_prompt, options);
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(CompletionError::Timeout(limit))),
            None => call.await,
        }
    }
}

fn plan_jobs(mode: AnalysisMode, pending: &[usize]) -> Vec<Job> {
    match mode {
        AnalysisMode::PerChunk => pending.iter().map(|&i| Job { slots: vec![i] }).collect(),
        AnalysisMode::Grouped { group_size } => pending
            .chunks(group_size.max(1))
            .map(|c| Job { slots: c.to_vec() })
            .collect(),
        AnalysisMode::SingleUnit if pending.is_empty() => Vec::new(),
        AnalysisMode::SingleUnit => vec![Job { slots: vec![0] }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProjectContext;
    use crate::graph::CoordinateMap;
    use crate::analysis::types::FailureKind;
    use crate::llm::MockClient;

    fn units(n: usize) -> Vec<TextUnit> {
        (0..n)
            .map(|i| TextUnit {
                index: i,
                content: format!("chunk {} text", i),
                heading: None,
            })
            .collect()
    }

    fn contexts() -> ContextBuilder {
        ContextBuilder::new(Arc::new(CoordinateMap::empty()), ProjectContext::new("Test"))
    }

    fn entry(value: &str) -> String {
        format!(
            r#"{{"extractedMappings": [{{"mappingType": "Concept", "mappingValue": "{}", "confidenceScore": 0.8}}], "variations": [], "elaborations": [], "summary": "{}"}}"#,
            value, value
        )
    }

    fn fast(mode: AnalysisMode) -> AnalysisSettings {
        AnalysisSettings {
            mode,
            retry_backoff_ms: 1,
            ..AnalysisSettings::default()
        }
    }

    #[tokio::test]
    async fn per_chunk_results_keep_original_order() {
        let client = MockClient::new().with_handler(|_, user| {
            let value = if user.contains("chunk 0") { "zero" } else { "one" };
            Ok(entry(value))
        });
        let orchestrator = AnalysisOrchestrator::new(Arc::new(client))
            .with_settings(fast(AnalysisMode::PerChunk));

        let batch = orchestrator.analyze(&units(2), &contexts(), None, None).await;
        let outcomes = batch.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].unit().unwrap().extracted_mappings[0].mapping_value, "zero");
        assert_eq!(outcomes[1].unit().unwrap().extracted_mappings[0].mapping_value, "one");
        assert!(batch.slots.iter().all(|s| s.state == UnitState::Completed));
    }

    #[tokio::test]
    async fn short_grouped_answer_is_padded() {
        let answer = format!("[{}, {}, {}]", entry("a"), entry("b"), entry("c"));
        let client = MockClient::new().with_response(answer);
        let orchestrator = AnalysisOrchestrator::new(Arc::new(client))
            .with_settings(fast(AnalysisMode::Grouped { group_size: 5 }));

        let batch = orchestrator.analyze(&units(5), &contexts(), None, None).await;
        assert_eq!(batch.slots.len(), 5);
        assert_eq!(batch.failed_indices(), vec![3, 4]);
        assert_eq!(batch.success_count(), 3);
        let failure = batch.slots[3].outcome.as_ref().unwrap().failure().unwrap();
        assert_eq!(failure.kind, FailureKind::MissingAnalysis);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let client = MockClient::new()
            .with_handler(|_, _| Ok(entry("late")))
            .with_delay(Duration::from_millis(200));
        let orchestrator = AnalysisOrchestrator::new(Arc::new(client));
        let options = CompletionOptions {
            timeout: Some(Duration::from_millis(20)),
            ..CompletionOptions::default()
        };
        let result = orchestrator.complete_once("x", &options).await;
        assert_eq!(result, Err(CompletionError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn batch_with_completion_errors_serializes() {
        let client = MockClient::new()
            .with_failure(CompletionError::Unavailable("down".into()))
            .with_handler(|_, _| Ok(entry("ok")));
        let orchestrator = AnalysisOrchestrator::new(Arc::new(client)).with_settings(AnalysisSettings {
            concurrency: 1,
            ..fast(AnalysisMode::PerChunk)
        });

        let batch = orchestrator.analyze(&units(2), &contexts(), None, None).await;
        assert_eq!(batch.completion_errors.len(), 1);

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["completion_errors"][0]["kind"], "unavailable");
        let back: BatchResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, batch);
    }

    #[tokio::test]
    async fn failing_job_does_not_abort_siblings() {
        let client = MockClient::new().with_handler(|_, user| {
            if user.contains("chunk 1") {
                Ok("I cannot help with that.".to_string())
            } else {
                Ok(entry("fine"))
            }
        });
        let orchestrator = AnalysisOrchestrator::new(Arc::new(client))
            .with_settings(fast(AnalysisMode::PerChunk));

        let batch = orchestrator.analyze(&units(3), &contexts(), None, None).await;
        assert_eq!(batch.failed_indices(), vec![1]);
        assert_eq!(batch.slots[1].state, UnitState::Failed);
        assert_eq!(batch.success_count(), 2);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_within_budget() {
        let client = Arc::new(
            MockClient::new()
                .with_failure(CompletionError::Failed("flaky".into()))
                .with_response(entry("ok")),
        );
        let orchestrator =
            AnalysisOrchestrator::new(client.clone()).with_settings(fast(AnalysisMode::PerChunk));

        let batch = orchestrator.analyze(&units(1), &contexts(), None, None).await;
        assert_eq!(batch.success_count(), 1);
        assert_eq!(batch.slots[0].attempts, 2);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn unavailable_backend_is_not_retried() {
        let client = Arc::new(MockClient::unavailable());
        let orchestrator =
            AnalysisOrchestrator::new(client.clone()).with_settings(fast(AnalysisMode::PerChunk));

        let batch = orchestrator.analyze(&units(2), &contexts(), None, None).await;
        assert_eq!(batch.failed_indices(), vec![0, 1]);
        assert!(batch.backend_unavailable());
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn successful_previous_slots_are_reused() {
        let client = Arc::new(MockClient::new().with_handler(|_, _| Ok(entry("fresh"))));
        let orchestrator =
            AnalysisOrchestrator::new(client.clone()).with_settings(fast(AnalysisMode::PerChunk));

        let kept = UnitOutcome::Ok {
            unit: AnalysisUnit::default(),
        };
        let previous = vec![kept.clone(), UnitOutcome::failed(UnitFailure::missing())];
        let batch = orchestrator
            .analyze(&units(2), &contexts(), None, Some(&previous))
            .await;

        assert_eq!(client.call_count(), 1);
        assert_eq!(batch.slots[0].outcome.as_ref(), Some(&kept));
        assert_eq!(batch.slots[0].attempts, 0);
        assert!(!batch.slots[1].outcome.as_ref().unwrap().is_failed());
    }

    #[tokio::test]
    async fn single_unit_mode_uses_one_slot() {
        let client = Arc::new(MockClient::new().with_response(entry("whole")));
        let orchestrator =
            AnalysisOrchestrator::new(client.clone()).with_settings(fast(AnalysisMode::SingleUnit));

        let batch = orchestrator.analyze(&units(4), &contexts(), None, None).await;
        assert_eq!(batch.slots.len(), 1);
        assert_eq!(client.call_count(), 1);
        let (_, user) = &client.calls()[0];
        assert!(user.contains("chunk 0 text") && user.contains("chunk 3 text"));
    }
}
