//! Multi-round validate → optimize loop per project.
//!
//! Live runs are tracked in a process-wide map. Every state mutation is
//! written to the [`AutoIterateRepository`] before the map publishes it,
//! so a restarted process can answer `status` from storage and
//! [`AutoIterateController::reconcile_on_startup`] can downgrade runs whose
//! owner died.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    regression_set, AutoIterateConfig, AutoIterateState, AutoIterateStatus, OptimizeRequest,
    Project, ShouldStop, ValidationStatus,
};
use crate::domain::ports::{AutoIterateRepository, ProjectRepository};

use super::pipeline::PromptOptimizer;
use super::validation_runner::ValidationRunner;

struct LiveRun {
    stop: Arc<AtomicBool>,
    /// Serializes state writers for the run.
    writer: Arc<Mutex<()>>,
    /// Last persisted state.
    state: AutoIterateState,
}

#[derive(Clone)]
pub struct AutoIterateController {
    projects: Arc<dyn ProjectRepository>,
    states: Arc<dyn AutoIterateRepository>,
    optimizer: Arc<PromptOptimizer>,
    validation: ValidationRunner,
    live: Arc<RwLock<HashMap<String, LiveRun>>>,
}

impl AutoIterateController {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        states: Arc<dyn AutoIterateRepository>,
        optimizer: Arc<PromptOptimizer>,
        validation: ValidationRunner,
    ) -> Self {
        Self {
            projects,
            states,
            optimizer,
            validation,
            live: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Launch the loop on a background task and return its initial state.
    pub async fn start(&self, project_id: &str, config: AutoIterateConfig) -> DomainResult<AutoIterateState> {
        let (project, stop, initial) = self.register(project_id, &config).await?;

        let this = self.clone();
        tokio::spawn(async move {
            this.run_registered(project, config, stop).await;
        });
        Ok(initial)
    }

    /// Run the loop in the foreground until it finishes, fails or is stopped.
    pub async fn run_auto_iterate(&self, project_id: &str, config: AutoIterateConfig) -> DomainResult<AutoIterateState> {
        let (project, stop, _) = self.register(project_id, &config).await?;
        Ok(self.run_registered(project, config, stop).await)
    }

    /// Set the cooperative stop flag. False when nothing runs for the project.
    pub async fn stop(&self, project_id: &str) -> DomainResult<bool> {
        match self.live.read().await.get(project_id) {
            Some(run) => run.stop.store(true, Ordering::Release),
            None => return Ok(false),
        }
        let committed = self
            .commit(project_id, |s| {
                s.stop_requested = true;
                s.touch("stop requested");
            })
            .await?;
        info!(project_id, "auto-iterate stop requested");
        Ok(committed.is_some())
    }

    /// Last persisted state of a live loop, else the stored one, else idle.
    pub async fn status(&self, project_id: &str) -> DomainResult<AutoIterateState> {
        if let Some(run) = self.live.read().await.get(project_id) {
            return Ok(run.state.clone());
        }
        Ok(self
            .states
            .get(project_id)
            .await?
            .unwrap_or_else(|| AutoIterateState::idle(project_id)))
    }

    pub async fn is_running(&self, project_id: &str) -> bool {
        self.live.read().await.contains_key(project_id)
    }

    /// Downgrade persisted `running` states with no live loop to
    /// `interrupted` and fail orphaned validation runs.
    pub async fn reconcile_on_startup(&self) -> DomainResult<usize> {
        let mut count = 0;
        for mut state in self.states.list_by_status(AutoIterateStatus::Running).await? {
            if self.is_running(&state.project_id).await {
                continue;
            }
            state.finish(AutoIterateStatus::Interrupted, "interrupted by restart");
            self.states.save(&state).await?;
            warn!(project_id = %state.project_id, round = state.current_round, "auto-iterate interrupted");
            count += 1;
        }
        self.validation.reconcile_orphans().await?;
        Ok(count)
    }

    /// Delete the project's knowledge and auto-iterate state.
    pub async fn reset(&self, project_id: &str) -> DomainResult<u64> {
        if self.is_running(project_id).await {
            return Err(DomainError::AlreadyRunning(project_id.to_string()));
        }
        let removed = self.optimizer.knowledge().reset(project_id).await?;
        self.states.delete(project_id).await?;
        Ok(removed)
    }

    async fn register(
        &self,
        project_id: &str,
        config: &AutoIterateConfig,
    ) -> DomainResult<(Project, Arc<AtomicBool>, AutoIterateState)> {
        let project = self
            .projects
            .get(project_id)
            .await?
            .ok_or_else(|| DomainError::ProjectNotFound(project_id.to_string()))?;
        let previous = self
            .states
            .get(project_id)
            .await?
            .unwrap_or_else(|| AutoIterateState::idle(project_id));

        let state = AutoIterateState::new(project_id, config);
        let stop = Arc::new(AtomicBool::new(false));
        let writer = Arc::new(Mutex::new(()));
        let _guard = writer.lock().await;
        {
            let mut live = self.live.write().await;
            if live.contains_key(project_id) {
                return Err(DomainError::AlreadyRunning(project_id.to_string()));
            }
            live.insert(
                project_id.to_string(),
                LiveRun {
                    stop: stop.clone(),
                    writer: writer.clone(),
                    state: previous,
                },
            );
        }

        if let Err(e) = self.states.save(&state).await {
            self.live.write().await.remove(project_id);
            return Err(e);
        }
        if let Some(run) = self.live.write().await.get_mut(project_id) {
            run.state = state.clone();
        }
        Ok((project, stop, state))
    }

    #[instrument(skip_all, fields(project_id = %project.id, max_rounds = config.max_rounds))]
    async fn run_registered(&self, project: Project, config: AutoIterateConfig, stop: Arc<AtomicBool>) -> AutoIterateState {
        let should_stop = ShouldStop::from_flag(stop);
        let (status, message) = match self.rounds(&project, &config, &should_stop).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => (AutoIterateStatus::Stopped, "stopped".to_string()),
            Err(e) => {
                error!(error = %e, "auto-iterate failed");
                (AutoIterateStatus::Failed, e.to_string())
            }
        };

        let project_id = project.id.as_str();
        let committed = self.commit(project_id, |s| s.finish(status, message.clone())).await;
        let final_state = match committed {
            Ok(Some(state)) => state,
            Ok(None) => {
                let mut state = AutoIterateState::new(project_id, &config);
                state.finish(status, message);
                state
            }
            Err(e) => {
                error!(error = %e, "could not persist final auto-iterate state");
                let mut state = self
                    .status(project_id)
                    .await
                    .unwrap_or_else(|_| AutoIterateState::new(project_id, &config));
                state.finish(status, message);
                state
            }
        };
        self.live.write().await.remove(project_id);
        info!(status = final_state.status.as_str(), message = %final_state.message, "auto-iterate finished");
        final_state
    }

    async fn rounds(
        &self,
        project: &Project,
        config: &AutoIterateConfig,
        should_stop: &ShouldStop,
    ) -> DomainResult<(AutoIterateStatus, String)> {
        let project_id = project.id.as_str();
        let mut prompt = project.prompt.clone();
        let mut previous_success: BTreeSet<usize> = BTreeSet::new();

        for round in 1..=config.max_rounds {
            if should_stop.is_set() {
                return Ok(stopped(round, "before validation"));
            }
            self.update(project_id, |s| {
                s.current_round = round;
                s.touch(format!("round {round}: validating"));
            })
            .await?;

            let run = self
                .validation
                .start(project_id, &prompt, project.dataset.clone())
                .await?;
            let run_id = run.id.clone();
            self.update(project_id, |s| s.validation_task_id = Some(run_id.clone()))
                .await?;

            let run = match self.validation.wait(&run.id, should_stop).await {
                Ok(run) => run,
                Err(e) if e.is_cancelled() => {
                    self.validation.cancel(&run.id).await;
                    return Ok(stopped(round, "during validation"));
                }
                Err(e) => return Err(e),
            };
            match run.status {
                ValidationStatus::Completed => {}
                ValidationStatus::Stopped => return Ok(stopped(round, "during validation")),
                _ => {
                    return Err(DomainError::ExecutionFailed(format!(
                        "validation run {} ended {}: {}",
                        run.id,
                        run.status.as_str(),
                        run.error.as_deref().unwrap_or("no detail")
                    )));
                }
            }

            let accuracy = run.accuracy();
            let current_success = run.success_indices();
            let current_error = run.error_indices();
            let regression = regression_set(&previous_success, &current_error);

            if let Err(e) = self
                .optimizer
                .knowledge()
                .backfill_latest_accuracy_after(project_id, accuracy)
                .await
            {
                warn!(error = %e, "accuracy back-fill failed");
            }

            self.update(project_id, |s| {
                s.current_accuracy = Some(accuracy);
                s.validation_task_id = None;
                s.touch(format!("round {round}: accuracy {:.1}%", accuracy * 100.0));
            })
            .await?;
            info!(round, accuracy, regressions = regression.len(), "round validated");

            if accuracy >= config.target_accuracy {
                return Ok((
                    AutoIterateStatus::Completed,
                    format!(
                        "target accuracy reached in round {round}: {:.1}%",
                        accuracy * 100.0
                    ),
                ));
            }
            if should_stop.is_set() {
                return Ok(stopped(round, "before optimization"));
            }

            let mut request = OptimizeRequest::new(project_id, &prompt, run.error_records(&project.dataset))
                .with_dataset(project.dataset.clone())
                .with_strategy_mode(config.strategy_mode)
                .with_max_strategies(config.max_strategies)
                .with_regressions(regression)
                .with_should_stop(should_stop.clone());
            if let Some(filter) = &config.module_filter {
                request = request.with_module_filter(filter.clone());
            }

            let result = self.optimizer.optimize(request).await?;
            if result.is_stopped() || should_stop.is_set() {
                return Ok(stopped(round, "during optimization"));
            }

            if result.validation_failed {
                info!(
                    round,
                    reason = result.failure_reason.as_deref().unwrap_or(""),
                    "rewrite not applied, keeping prompt"
                );
            } else if result.optimized_prompt != prompt {
                prompt = result.optimized_prompt.clone();
                self.projects.update_prompt(project_id, &prompt).await?;
                debug!(round, "working prompt advanced");
            }

            previous_success = current_success;
            let message = format!("round {round}: {}", result.message);
            self.update(project_id, |s| s.touch(message.clone())).await?;
        }

        Ok((
            AutoIterateStatus::Completed,
            format!(
                "finished {} rounds without reaching {:.1}%",
                config.max_rounds,
                config.target_accuracy * 100.0
            ),
        ))
    }

    async fn update<F>(&self, project_id: &str, mutate: F) -> DomainResult<()>
    where
        F: FnOnce(&mut AutoIterateState),
    {
        self.commit(project_id, mutate).await.map(|_| ())
    }

    /// Apply `mutate` to a copy of the live state, persist the copy, and only
    /// then publish it. `None` when no loop runs for the project.
    async fn commit<F>(&self, project_id: &str, mutate: F) -> DomainResult<Option<AutoIterateState>>
    where
        F: FnOnce(&mut AutoIterateState),
    {
        let Some(writer) = self.live.read().await.get(project_id).map(|run| run.writer.clone()) else {
            return Ok(None);
        };
        let _guard = writer.lock().await;

        let Some(mut next) = self.live.read().await.get(project_id).map(|run| run.state.clone()) else {
            return Ok(None);
        };
        mutate(&mut next);
        self.states.save(&next).await?;

        if let Some(run) = self.live.write().await.get_mut(project_id) {
            run.state = next.clone();
        }
        Ok(Some(next))
    }
}

fn stopped(round: u32, when: &str) -> (AutoIterateStatus, String) {
    (
        AutoIterateStatus::Stopped,
        format!("stopped in round {round} {when}"),
    )
}
