//! End-to-end optimization passes over the SQLite knowledge base.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use promptloop::adapters::llm::mock::{MockReply, ScriptedLlmClient};
use promptloop::adapters::sqlite::{create_migrated_test_pool, SqliteKnowledgeRepository};
use promptloop::domain::models::{ErrorRecord, OptimizeRequest, PipelineState, ShouldStop, StrategyMode};
use promptloop::services::{KnowledgeBase, PromptOptimizer};

use common::{dataset, edit, quiet_pipeline, VersionedVerifier};

const PROMPT: &str = "Label v0 for {query}";

async fn knowledge() -> KnowledgeBase {
    let pool = create_migrated_test_pool().await.expect("test pool");
    KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool)), 3)
}

fn errors() -> Vec<ErrorRecord> {
    (0..3)
        .map(|i| ErrorRecord::new(i, format!("q{i}"), "billing", "shipping"))
        .collect()
}

fn filter() -> Vec<String> {
    vec!["instruction_refinement".to_string(), "example_injection".to_string()]
}

#[tokio::test]
async fn test_parallel_candidates_are_scored_and_best_is_applied() {
    let llm = ScriptedLlmClient::new()
        .with_rule("Sharpen the task instructions", MockReply::success(edit("Label v0", "Label v1")))
        .with_rule("representative examples", MockReply::success(edit("Label v0", "Label v2")))
        .with_default("No edits.");
    let verifier = VersionedVerifier::new().failing("v1", &[0, 1, 2]).shared();
    let kb = knowledge().await;
    let optimizer = PromptOptimizer::new(Arc::new(llm), kb.clone(), quiet_pipeline()).with_verifier(verifier);

    let request = OptimizeRequest::new("tickets", PROMPT, errors())
        .with_dataset(dataset(6))
        .with_strategy_mode(StrategyMode::Parallel)
        .with_max_strategies(2)
        .with_module_filter(filter());
    let result = optimizer.optimize(request).await.unwrap();

    assert_eq!(result.terminal_state, PipelineState::Done);
    assert!(!result.validation_failed);
    assert_eq!(result.optimized_prompt, "Label v2 for {query}");
    assert_eq!(result.applied_strategies, vec!["example_injection".to_string()]);
    assert_eq!(result.candidates.len(), 2);
    assert!(result.candidates.iter().all(|c| c.score.is_some()));

    let diagnosis = result.diagnosis.expect("diagnosis");
    assert_eq!(diagnosis.error_count, 3);
    assert!((diagnosis.accuracy - 0.5).abs() < 1e-9);

    let history = kb.get_history("tickets", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[0].prompt_before, PROMPT);
    assert_eq!(history[0].prompt_after, "Label v2 for {query}");
    assert_eq!(history[0].applied_strategies, vec!["example_injection".to_string()]);
    assert_eq!(history[0].accuracy_after, None);
    assert_eq!(result.knowledge_version, Some(1));
}

#[tokio::test]
async fn test_serial_mode_chains_every_strategy() {
    let llm = ScriptedLlmClient::new()
        .with_rule("Sharpen the task instructions", MockReply::success(edit("Label v0", "Label v0 exactly")))
        .with_rule(
            "representative examples",
            MockReply::success(edit("for {query}", "for {query}\nExample: refund -> billing")),
        )
        .with_default("No edits.");
    let kb = knowledge().await;
    let optimizer = PromptOptimizer::new(Arc::new(llm), kb.clone(), quiet_pipeline());

    let request = OptimizeRequest::new("tickets", PROMPT, errors())
        .with_dataset(dataset(6))
        .with_strategy_mode(StrategyMode::Serial)
        .with_max_strategies(2)
        .with_module_filter(filter());
    let result = optimizer.optimize(request).await.unwrap();

    assert_eq!(result.terminal_state, PipelineState::Done);
    assert_eq!(
        result.optimized_prompt,
        "Label v0 exactly for {query}\nExample: refund -> billing"
    );
    let mut applied = result.applied_strategies.clone();
    applied.sort();
    assert_eq!(applied, vec!["example_injection".to_string(), "instruction_refinement".to_string()]);
    assert_eq!(result.candidates[1].source_prompt, result.candidates[0].prompt);

    let history = kb.get_history("tickets", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].diff.contains("+ Example: refund -> billing"));
}

#[tokio::test]
async fn test_stop_during_generation_leaves_prompt_and_history_untouched() {
    let llm = ScriptedLlmClient::new()
        .with_default_reply(MockReply::success(edit("Label v0", "Label v1")).with_delay(Duration::from_secs(5)));
    let kb = knowledge().await;
    let optimizer = PromptOptimizer::new(Arc::new(llm), kb.clone(), quiet_pipeline());

    let flag = Arc::new(AtomicBool::new(false));
    let trigger = flag.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.store(true, Ordering::Release);
    });

    let started = tokio::time::Instant::now();
    let request = OptimizeRequest::new("tickets", PROMPT, errors())
        .with_dataset(dataset(6))
        .with_should_stop(ShouldStop::from_flag(flag));
    let result = optimizer.optimize(request).await.unwrap();

    assert!(result.is_stopped());
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(result.optimized_prompt, PROMPT);
    assert!(result.message.starts_with("stopped during"));
    assert!(result.knowledge_version.is_none());
    assert!(kb.get_history("tickets", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_model_produces_no_candidate() {
    let llm = ScriptedLlmClient::new().with_default_reply(MockReply::failure("upstream unavailable"));
    let kb = knowledge().await;
    let optimizer = PromptOptimizer::new(Arc::new(llm), kb.clone(), quiet_pipeline());

    let result = optimizer
        .optimize(OptimizeRequest::new("tickets", PROMPT, errors()).with_dataset(dataset(6)))
        .await
        .unwrap();

    assert_eq!(result.terminal_state, PipelineState::Done);
    assert_eq!(result.optimized_prompt, PROMPT);
    assert!(result.candidates.is_empty());
    assert!(kb.get_history("tickets", None).await.unwrap().is_empty());
}
