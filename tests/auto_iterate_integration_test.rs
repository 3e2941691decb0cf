//! Multi-round auto-iterate against the SQLite adapters.

mod common;

use std::sync::Arc;
use std::time::Duration;

use promptloop::adapters::llm::mock::{MockReply, ScriptedLlmClient};
use promptloop::adapters::sqlite::{
    create_migrated_test_pool, SqliteAutoIterateRepository, SqliteKnowledgeRepository,
    SqliteProjectRepository, SqliteValidationRunRepository,
};
use promptloop::domain::models::{AutoIterateConfig, AutoIterateStatus, Project, StrategyMode};
use promptloop::domain::ports::{AutoIterateRepository, ProjectRepository, Verifier};
use promptloop::services::{
    AutoIterateController, ConcurrencyController, KnowledgeBase, PromptOptimizer, ValidationRunner,
};

use common::{dataset, edit, quiet_pipeline, setup_test_logging, VersionedVerifier};

struct Harness {
    controller: AutoIterateController,
    knowledge: KnowledgeBase,
    projects: Arc<dyn ProjectRepository>,
    states: Arc<dyn AutoIterateRepository>,
}

async fn harness(llm: ScriptedLlmClient, verifier: Arc<dyn Verifier>, prompt: &str, samples: usize) -> Harness {
    let pool = create_migrated_test_pool().await.expect("test pool");
    let projects: Arc<dyn ProjectRepository> = Arc::new(SqliteProjectRepository::new(pool.clone()));
    projects
        .create(&Project::new("tickets", "Tickets", prompt, dataset(samples)))
        .await
        .unwrap();
    let states: Arc<dyn AutoIterateRepository> = Arc::new(SqliteAutoIterateRepository::new(pool.clone()));

    let gate = ConcurrencyController::new(3, Duration::from_millis(20));
    let knowledge = KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool.clone())), 3);
    let optimizer = PromptOptimizer::new(Arc::new(llm), knowledge.clone(), quiet_pipeline())
        .with_controller(gate.clone());
    let validation = ValidationRunner::new(
        Arc::new(SqliteValidationRunRepository::new(pool)),
        verifier,
        gate,
    );

    Harness {
        controller: AutoIterateController::new(projects.clone(), states.clone(), Arc::new(optimizer), validation),
        knowledge,
        projects,
        states,
    }
}

fn config(max_rounds: u32) -> AutoIterateConfig {
    AutoIterateConfig {
        max_rounds,
        target_accuracy: 0.99,
        strategy_mode: StrategyMode::Parallel,
        max_strategies: 2,
        module_filter: None,
    }
}

#[tokio::test]
async fn test_regressions_are_recorded_as_newly_failed() {
    setup_test_logging();
    // v0 fails {4}; v1 additionally breaks sample 2; v2 is perfect.
    let verifier = VersionedVerifier::new()
        .failing("v0", &[4])
        .failing("v1", &[2, 4])
        .shared();
    let llm = ScriptedLlmClient::new()
        .with_rule("<prompt>\nLabel v0", MockReply::success(edit("Label v0", "Label v1")))
        .with_rule("<prompt>\nLabel v1", MockReply::success(edit("Label v1", "Label v2")))
        .with_default("No edits.");
    let h = harness(llm, verifier, "Label v0 for {query}", 5).await;

    let state = h.controller.run_auto_iterate("tickets", config(2)).await.unwrap();
    assert_eq!(state.status, AutoIterateStatus::Completed);
    assert_eq!(state.current_round, 2);
    assert!(state.message.contains("without reaching"));
    assert_eq!(state.current_accuracy, Some(0.6));

    let history = h.knowledge.get_history("tickets", None).await.unwrap();
    assert_eq!(history.len(), 2);

    let (latest, first) = (&history[0], &history[1]);
    assert_eq!(first.version, 1);
    assert!(first.newly_failed.is_empty());
    assert_eq!(first.error_indices, vec![4]);
    assert!((first.accuracy_before - 0.8).abs() < 1e-9);
    assert_eq!(first.accuracy_after, Some(0.6));

    assert_eq!(latest.version, 2);
    assert_eq!(latest.newly_failed, vec![2]);
    assert_eq!(latest.error_indices, vec![2, 4]);
    assert_eq!(latest.accuracy_after, None);
    assert_eq!(latest.prompt_after, "Label v2 for {query}");

    let project = h.projects.get("tickets").await.unwrap().unwrap();
    assert_eq!(project.prompt, "Label v2 for {query}");

    let persisted = h.states.get("tickets").await.unwrap().unwrap();
    assert_eq!(persisted.status, AutoIterateStatus::Completed);
}

#[tokio::test]
async fn test_target_reached_after_one_rewrite() {
    let verifier = VersionedVerifier::new().failing("v0", &[0, 1]).shared();
    let llm = ScriptedLlmClient::new()
        .with_rule("<prompt>\nLabel v0", MockReply::success(edit("Label v0", "Label v1")))
        .with_default("No edits.");
    let h = harness(llm, verifier, "Label v0 for {query}", 4).await;

    let state = h.controller.run_auto_iterate("tickets", config(5)).await.unwrap();
    assert_eq!(state.status, AutoIterateStatus::Completed);
    assert_eq!(state.current_round, 2);
    assert_eq!(state.current_accuracy, Some(1.0));
    assert!(state.message.contains("target accuracy reached in round 2"));

    let history = h.knowledge.get_history("tickets", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].accuracy_after, Some(1.0));
}

#[tokio::test]
async fn test_rejected_rewrite_keeps_working_prompt() {
    let verifier = VersionedVerifier::new().failing("v0", &[1]).shared();
    // Drops the template variable, so every round's rewrite is rejected.
    let llm = ScriptedLlmClient::new()
        .with_rule("<prompt>\nLabel v0", MockReply::success(edit("Label v0 for {query}", "Label v1")))
        .with_default("No edits.");
    let h = harness(llm, verifier, "Label v0 for {query}", 3).await;

    let state = h.controller.run_auto_iterate("tickets", config(2)).await.unwrap();
    assert_eq!(state.status, AutoIterateStatus::Completed);

    let project = h.projects.get("tickets").await.unwrap().unwrap();
    assert_eq!(project.prompt, "Label v0 for {query}");

    let history = h.knowledge.get_history("tickets", None).await.unwrap();
    assert_eq!(history.len(), 2);
    for record in &history {
        assert_eq!(record.accuracy_after, Some(record.accuracy_before));
    }
    let notes = h.knowledge.notes("tickets").await.unwrap();
    assert!(notes.iter().any(|n| n.note.contains("lost template variables")));
}

#[tokio::test]
async fn test_stop_during_validation_persists_stopped_state() {
    let verifier = VersionedVerifier::new()
        .failing("v0", &[0])
        .with_delay(Duration::from_secs(30))
        .shared();
    let h = harness(ScriptedLlmClient::new(), verifier, "Label v0 for {query}", 4).await;

    let initial = h.controller.start("tickets", config(3)).await.unwrap();
    assert_eq!(initial.status, AutoIterateStatus::Running);
    assert!(h.controller.is_running("tickets").await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.controller.stop("tickets").await.unwrap());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.controller.is_running("tickets").await {
        assert!(tokio::time::Instant::now() < deadline, "loop did not stop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let state = h.states.get("tickets").await.unwrap().unwrap();
    assert_eq!(state.status, AutoIterateStatus::Stopped);
    assert!(state.stop_requested);
    assert!(state.message.contains("round 1"));
    assert!(h.knowledge.get_history("tickets", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_during_optimization_keeps_working_prompt() {
    let verifier = VersionedVerifier::new().failing("v0", &[0, 1]).shared();
    let llm = ScriptedLlmClient::new()
        .with_default_reply(MockReply::success("No edits.").with_delay(Duration::from_secs(30)));
    let h = harness(llm, verifier, "Label v0 for {query}", 4).await;

    h.controller.start("tickets", config(3)).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.controller.status("tickets").await.unwrap().current_accuracy.is_none() {
        assert!(tokio::time::Instant::now() < deadline, "round 1 never validated");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.controller.stop("tickets").await.unwrap());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.controller.is_running("tickets").await {
        assert!(tokio::time::Instant::now() < deadline, "loop did not stop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let state = h.states.get("tickets").await.unwrap().unwrap();
    assert_eq!(state.status, AutoIterateStatus::Stopped);
    assert_eq!(state.message, "stopped in round 1 during optimization");
    assert_eq!(state.current_accuracy, Some(0.5));

    let project = h.projects.get("tickets").await.unwrap().unwrap();
    assert_eq!(project.prompt, "Label v0 for {query}");
    assert!(h.knowledge.get_history("tickets", None).await.unwrap().is_empty());
}
