//! Picks which strategies run in a round.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::DiagnosisReport;
use crate::domain::ports::Strategy;

use super::strategies::StrategyRegistry;
use super::toolkit::StrategyToolkit;

pub struct StrategyMatcher {
    registry: StrategyRegistry,
    llm_rerank: bool,
}

impl StrategyMatcher {
    pub const fn new(registry: StrategyRegistry, llm_rerank: bool) -> Self {
        Self {
            registry,
            llm_rerank,
        }
    }

    /// Applicable strategies, highest priority first, at most `max` of them.
    ///
    /// Unknown ids in `filter` are skipped. When re-ranking is enabled and
    /// more than one strategy applies, the model may reorder them; a failed
    /// or unparseable ranking keeps the priority order. Only cancellation
    /// propagates.
    pub async fn match_strategies(
        &self,
        diagnosis: &DiagnosisReport,
        filter: Option<&[String]>,
        max: usize,
        toolkit: &StrategyToolkit,
    ) -> DomainResult<Vec<Arc<dyn Strategy>>> {
        let candidates: Vec<Arc<dyn Strategy>> = match filter {
            Some(ids) => ids
                .iter()
                .filter_map(|id| match self.registry.create(id) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        warn!(strategy = %id, error = %e, "skipping unknown strategy in filter");
                        None
                    }
                })
                .collect(),
            None => self.registry.instantiate(None)?,
        };

        let mut ranked: Vec<(f64, Arc<dyn Strategy>)> = candidates
            .into_iter()
            .filter(|s| s.is_applicable(diagnosis))
            .map(|s| (s.priority(diagnosis), s))
            .collect();
        ranked.sort_by(|(pa, a), (pb, b)| pb.total_cmp(pa).then_with(|| a.id().cmp(b.id())));
        let mut ordered: Vec<Arc<dyn Strategy>> = ranked.into_iter().map(|(_, s)| s).collect();

        if self.llm_rerank && ordered.len() > 1 {
            match toolkit.complete(&build_rank_request(diagnosis, &ordered)).await {
                Ok(reply) => ordered = apply_ranking(ordered, &reply),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(error = %e, "strategy re-ranking failed, keeping priority order"),
            }
        }

        ordered.truncate(max);
        debug!(
            matched = ?ordered.iter().map(|s| s.id().to_string()).collect::<Vec<_>>(),
            "strategies matched"
        );
        Ok(ordered)
    }
}

fn build_rank_request(diagnosis: &DiagnosisReport, strategies: &[Arc<dyn Strategy>]) -> String {
    let options = strategies
        .iter()
        .map(|s| format!("- {}: {}", s.id(), s.concern()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Rank the following prompt rewrite strategies by how likely each is to fix the errors described.\n\n\
         Diagnosis:\n{}\n\nStrategies:\n{options}\n\n\
         Reply with the strategy ids only, most useful first, separated by commas.",
        diagnosis.summary()
    )
}

/// Reorder by first mention in `reply`; strategies never mentioned keep
/// their relative order after the mentioned ones.
fn apply_ranking(strategies: Vec<Arc<dyn Strategy>>, reply: &str) -> Vec<Arc<dyn Strategy>> {
    let (mut mentioned, unmentioned): (Vec<_>, Vec<_>) = strategies
        .into_iter()
        .map(|s| (reply.find(s.id()), s))
        .partition(|(pos, _)| pos.is_some());
    if mentioned.is_empty() {
        debug!("ranking reply named no strategies");
    }
    mentioned.sort_by_key(|(pos, _)| *pos);
    mentioned
        .into_iter()
        .chain(unmentioned)
        .map(|(_, s)| s)
        .collect()
}
