//! Background validation of a prompt over a project's dataset.
//!
//! A run is persisted before any sample executes and after every sample
//! completes, so pollers only ever read status from the repository.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{Cancelled, DomainError, DomainResult};
use crate::domain::models::{Sample, SampleResult, ShouldStop, ValidationRun, ValidationStatus};
use crate::domain::ports::{ValidationRunRepository, Verifier};

use super::cancellation::gather_fan_out;
use super::concurrency::ConcurrencyController;

#[derive(Clone)]
pub struct ValidationRunner {
    runs: Arc<dyn ValidationRunRepository>,
    verifier: Arc<dyn Verifier>,
    controller: ConcurrencyController,
    /// Stop flags of runs executing in this process.
    live: Arc<RwLock<HashMap<String, Arc<AtomicBool>>>>,
}

impl ValidationRunner {
    pub fn new(
        runs: Arc<dyn ValidationRunRepository>,
        verifier: Arc<dyn Verifier>,
        controller: ConcurrencyController,
    ) -> Self {
        Self {
            runs,
            verifier,
            controller,
            live: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn repository(&self) -> Arc<dyn ValidationRunRepository> {
        self.runs.clone()
    }

    /// Persist a pending run and execute it on a background task.
    pub async fn start(&self, project_id: &str, prompt: &str, dataset: Vec<Sample>) -> DomainResult<ValidationRun> {
        let run = ValidationRun::new(project_id, prompt, dataset.len());
        self.runs.create(&run).await?;

        let flag = Arc::new(AtomicBool::new(false));
        self.live.write().await.insert(run.id.clone(), flag.clone());

        let this = self.clone();
        let background = run.clone();
        tokio::spawn(async move {
            let id = background.id.clone();
            if let Err(e) = this
                .execute(background, &dataset, &ShouldStop::from_flag(flag))
                .await
            {
                error!(run_id = %id, error = %e, "validation run failed");
            }
            this.live.write().await.remove(&id);
        });

        info!(run_id = %run.id, project_id, total = run.total, "validation run started");
        Ok(run)
    }

    /// Execute `run` in the foreground. Every sample goes through the
    /// concurrency gate; a stop keeps the results gathered so far.
    pub async fn execute(&self, run: ValidationRun, dataset: &[Sample], should_stop: &ShouldStop) -> DomainResult<ValidationRun> {
        let id = run.id.clone();
        let shared = Arc::new(Mutex::new(run));
        match self.execute_samples(&shared, dataset, should_stop).await {
            Ok(run) => Ok(run),
            Err(e) => {
                let mut run = shared.lock().await;
                run.status = ValidationStatus::Failed;
                run.error = Some(e.to_string());
                run.updated_at = Utc::now();
                if let Err(persist) = self.runs.update(&run).await {
                    warn!(run_id = %id, error = %persist, "could not persist failed run");
                }
                Err(e)
            }
        }
    }

    async fn execute_samples(
        &self,
        shared: &Arc<Mutex<ValidationRun>>,
        dataset: &[Sample],
        should_stop: &ShouldStop,
    ) -> DomainResult<ValidationRun> {
        let prompt = {
            let mut run = shared.lock().await;
            run.status = ValidationStatus::Running;
            run.updated_at = Utc::now();
            self.runs.update(&run).await?;
            run.prompt.clone()
        };

        let tasks: Vec<_> = dataset
            .iter()
            .map(|sample| {
                let prompt = &prompt;
                async move {
                    let result = match self
                        .controller
                        .call(should_stop, self.verifier.verify(&sample.query, &sample.target, prompt))
                        .await
                    {
                        Ok(v) => SampleResult {
                            index: sample.index,
                            output: v.output,
                            is_correct: v.is_correct,
                            latency_ms: v.latency_ms,
                        },
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => {
                            warn!(index = sample.index, error = %e, "sample verification failed, counted as incorrect");
                            SampleResult {
                                index: sample.index,
                                output: String::new(),
                                is_correct: false,
                                latency_ms: 0,
                            }
                        }
                    };

                    let mut run = shared.lock().await;
                    run.results.push(result);
                    run.completed += 1;
                    run.updated_at = Utc::now();
                    self.runs.update(&run).await
                }
            })
            .collect();

        let fan_out = gather_fan_out(tasks, should_stop, self.controller.poll_interval(), false).await?;

        let mut run = shared.lock().await;
        run.results.sort_by_key(|r| r.index);
        run.status = if fan_out.stopped || (should_stop.is_set() && run.completed < run.total) {
            ValidationStatus::Stopped
        } else {
            ValidationStatus::Completed
        };
        run.updated_at = Utc::now();
        self.runs.update(&run).await?;
        info!(
            run_id = %run.id,
            status = %run.status.as_str(),
            completed = run.completed,
            accuracy = run.accuracy(),
            "validation run finished"
        );
        Ok(run.clone())
    }

    pub async fn get(&self, id: &str) -> DomainResult<ValidationRun> {
        self.runs
            .get(id)
            .await?
            .ok_or_else(|| DomainError::ValidationRunNotFound(id.to_string()))
    }

    /// Poll the repository until the run is terminal. A stop returns
    /// [`Cancelled`] without touching the run.
    pub async fn wait(&self, id: &str, should_stop: &ShouldStop) -> DomainResult<ValidationRun> {
        loop {
            let run = self.get(id).await?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            if should_stop.is_set() {
                return Err(Cancelled.into());
            }
            tokio::time::sleep(self.controller.poll_interval()).await;
        }
    }

    /// Ask a live run to stop. False when no such run executes here.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.live.read().await.get(id) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                debug!(run_id = %id, "validation run stop requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_live(&self, id: &str) -> bool {
        self.live.read().await.contains_key(id)
    }

    /// Mark runs left `pending`/`running` by a previous process as failed.
    pub async fn reconcile_orphans(&self) -> DomainResult<usize> {
        let mut orphans = self.runs.list_by_status(ValidationStatus::Running).await?;
        orphans.extend(self.runs.list_by_status(ValidationStatus::Pending).await?);

        let mut count = 0;
        for mut run in orphans {
            if self.is_live(&run.id).await {
                continue;
            }
            run.status = ValidationStatus::Failed;
            run.error = Some("interrupted by restart".to_string());
            run.updated_at = Utc::now();
            self.runs.update(&run).await?;
            count += 1;
        }
        if count > 0 {
            info!(count, "orphaned validation runs marked failed");
        }
        Ok(count)
    }
}
