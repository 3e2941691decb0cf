//! The SQLite and in-memory adapters must behave the same behind each port.

use std::sync::Arc;

use chrono::Utc;

use promptloop::adapters::memory::{
    InMemoryAutoIterateRepository, InMemoryKnowledgeRepository, InMemoryProjectRepository,
    InMemoryValidationRunRepository,
};
use promptloop::adapters::sqlite::{
    create_migrated_test_pool, SqliteAutoIterateRepository, SqliteKnowledgeRepository,
    SqliteProjectRepository, SqliteValidationRunRepository,
};
use promptloop::domain::models::{
    AutoIterateConfig, AutoIterateState, AutoIterateStatus, KnowledgeNote, KnowledgeRecord, Project,
    Sample, SampleResult, ValidationRun, ValidationStatus,
};
use promptloop::domain::ports::{
    AutoIterateRepository, KnowledgeRepository, ProjectRepository, ValidationRunRepository,
};

fn record(project: &str, version: u32) -> KnowledgeRecord {
    KnowledgeRecord {
        project_id: project.to_string(),
        version,
        timestamp: Utc::now(),
        prompt_before: format!("prompt v{}", version - 1),
        prompt_after: format!("prompt v{version}"),
        diff: format!("- prompt v{}\n+ prompt v{version}", version - 1),
        applied_strategies: vec!["instruction_refinement".to_string()],
        accuracy_before: 0.5,
        accuracy_after: None,
        newly_failed: vec![version as usize],
        error_indices: vec![1, 2, version as usize],
    }
}

async fn knowledge_contract(repo: Arc<dyn KnowledgeRepository>) {
    assert_eq!(repo.latest_version("p").await.unwrap(), None);
    assert_eq!(repo.backfill_latest_accuracy_after("p", 0.9).await.unwrap(), None);

    for v in 1..=3 {
        repo.append(&record("p", v)).await.unwrap();
    }
    repo.append(&record("other", 1)).await.unwrap();
    assert_eq!(repo.latest_version("p").await.unwrap(), Some(3));

    let all = repo.list("p", None).await.unwrap();
    assert_eq!(all.iter().map(|r| r.version).collect::<Vec<_>>(), vec![3, 2, 1]);
    assert_eq!(all[0].error_indices, vec![1, 2, 3]);
    assert_eq!(all[0].applied_strategies, vec!["instruction_refinement".to_string()]);
    let limited = repo.list("p", Some(2)).await.unwrap();
    assert_eq!(limited.iter().map(|r| r.version).collect::<Vec<_>>(), vec![3, 2]);

    // Settling v3 directly leaves v2 as the newest record awaiting accuracy.
    assert!(repo.set_accuracy_after("p", 3, 0.5).await.unwrap());
    assert!(!repo.set_accuracy_after("p", 3, 0.7).await.unwrap());
    assert_eq!(repo.backfill_latest_accuracy_after("p", 0.8).await.unwrap(), Some(2));
    let all = repo.list("p", None).await.unwrap();
    assert_eq!(all[0].accuracy_after, Some(0.5));
    assert_eq!(all[1].accuracy_after, Some(0.8));
    assert_eq!(all[2].accuracy_after, None);

    repo.add_note(&KnowledgeNote::new("p", Some(3), "not applied: too long"))
        .await
        .unwrap();
    repo.add_note(&KnowledgeNote::new("p", None, "reset requested")).await.unwrap();
    let notes = repo.list_notes("p").await.unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].version, Some(3));
    assert_eq!(notes[1].note, "reset requested");

    assert_eq!(repo.delete_project("p").await.unwrap(), 3);
    assert!(repo.list("p", None).await.unwrap().is_empty());
    assert!(repo.list_notes("p").await.unwrap().is_empty());
    assert_eq!(repo.list("other", None).await.unwrap().len(), 1);
}

async fn validation_contract(repo: Arc<dyn ValidationRunRepository>) {
    let mut run = ValidationRun::new("p", "Classify {query}", 2);
    repo.create(&run).await.unwrap();
    assert_eq!(repo.get(&run.id).await.unwrap().unwrap().status, ValidationStatus::Pending);

    run.status = ValidationStatus::Running;
    run.results.push(SampleResult {
        index: 1,
        output: "billing".into(),
        is_correct: true,
        latency_ms: 12,
    });
    run.completed = 1;
    repo.update(&run).await.unwrap();

    let running = repo.list_by_status(ValidationStatus::Running).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].results, run.results);
    assert!(repo.list_by_status(ValidationStatus::Pending).await.unwrap().is_empty());

    let second = ValidationRun::new("p", "Classify", 1);
    repo.create(&second).await.unwrap();
    assert_eq!(repo.list_by_project("p", 10).await.unwrap().len(), 2);
    assert_eq!(repo.list_by_project("p", 1).await.unwrap().len(), 1);
    assert!(repo.get("missing").await.unwrap().is_none());
}

async fn auto_iterate_contract(repo: Arc<dyn AutoIterateRepository>) {
    let mut state = AutoIterateState::new("p", &AutoIterateConfig::default());
    repo.save(&state).await.unwrap();
    assert_eq!(
        repo.list_by_status(AutoIterateStatus::Running).await.unwrap().len(),
        1
    );

    state.current_round = 2;
    state.current_accuracy = Some(0.75);
    state.finish(AutoIterateStatus::Stopped, "stopped in round 2 during validation");
    repo.save(&state).await.unwrap();

    let loaded = repo.get("p").await.unwrap().unwrap();
    assert_eq!(loaded.status, AutoIterateStatus::Stopped);
    assert_eq!(loaded.current_round, 2);
    assert_eq!(loaded.current_accuracy, Some(0.75));
    assert!(repo.list_by_status(AutoIterateStatus::Running).await.unwrap().is_empty());

    assert!(repo.delete("p").await.unwrap());
    assert!(!repo.delete("p").await.unwrap());
    assert!(repo.get("p").await.unwrap().is_none());
}

async fn project_contract(repo: Arc<dyn ProjectRepository>) {
    let project = Project::new(
        "tickets",
        "Tickets",
        "Classify {query}",
        vec![Sample::new(0, "refund", "billing"), Sample::new(1, "late", "shipping")],
    );
    repo.create(&project).await.unwrap();

    repo.update_prompt("tickets", "Classify carefully {query}").await.unwrap();
    let loaded = repo.get("tickets").await.unwrap().unwrap();
    assert_eq!(loaded.prompt, "Classify carefully {query}");
    assert_eq!(loaded.dataset, project.dataset);
    assert!(loaded.updated_at >= project.updated_at);

    assert_eq!(repo.list().await.unwrap().len(), 1);
    assert!(repo.delete("tickets").await.unwrap());
    assert!(repo.get("tickets").await.unwrap().is_none());
}

#[tokio::test]
async fn test_knowledge_repositories_agree() {
    knowledge_contract(Arc::new(InMemoryKnowledgeRepository::new())).await;
    let pool = create_migrated_test_pool().await.unwrap();
    knowledge_contract(Arc::new(SqliteKnowledgeRepository::new(pool))).await;
}

#[tokio::test]
async fn test_validation_run_repositories_agree() {
    validation_contract(Arc::new(InMemoryValidationRunRepository::new())).await;
    let pool = create_migrated_test_pool().await.unwrap();
    validation_contract(Arc::new(SqliteValidationRunRepository::new(pool))).await;
}

#[tokio::test]
async fn test_auto_iterate_repositories_agree() {
    auto_iterate_contract(Arc::new(InMemoryAutoIterateRepository::new())).await;
    let pool = create_migrated_test_pool().await.unwrap();
    auto_iterate_contract(Arc::new(SqliteAutoIterateRepository::new(pool))).await;
}

#[tokio::test]
async fn test_project_repositories_agree() {
    project_contract(Arc::new(InMemoryProjectRepository::new())).await;
    let pool = create_migrated_test_pool().await.unwrap();
    project_contract(Arc::new(SqliteProjectRepository::new(pool))).await;
}
