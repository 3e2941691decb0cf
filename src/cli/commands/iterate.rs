//! Iterate command: the foreground validate → optimize loop.
//!
//! Ctrl+C requests a cooperative stop; the loop finishes the step it is in,
//! persists its state and the command reports how far it got.

use anyhow::Result;
use clap::Args;

use crate::cli::app::App;
use crate::cli::output::{create_spinner, output, percent, CommandOutput};
use crate::domain::models::{AutoIterateConfig, AutoIterateState, Config, StrategyMode};

#[derive(Args, Debug)]
pub struct IterateArgs {
    /// Project id
    pub project: String,

    /// Maximum validate/optimize rounds
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Stop once validation accuracy reaches this fraction (0-1)
    #[arg(long)]
    pub target: Option<f64>,

    /// Candidate generation mode (parallel, serial)
    #[arg(long)]
    pub mode: Option<StrategyMode>,

    /// Maximum strategies applied per round
    #[arg(long)]
    pub max_strategies: Option<usize>,

    /// Restrict matching to these strategy ids (repeatable)
    #[arg(long = "strategy")]
    pub strategies: Vec<String>,
}

impl IterateArgs {
    fn to_config(&self, config: &Config) -> AutoIterateConfig {
        let mut run = AutoIterateConfig::from(&config.auto_iterate);
        if let Some(v) = self.max_rounds {
            run.max_rounds = v;
        }
        if let Some(v) = self.target {
            run.target_accuracy = v;
        }
        if let Some(v) = self.mode {
            run.strategy_mode = v;
        }
        if let Some(v) = self.max_strategies {
            run.max_strategies = v;
        }
        if !self.strategies.is_empty() {
            run.module_filter = Some(self.strategies.clone());
        }
        run
    }
}

#[derive(Debug, serde::Serialize)]
pub struct IterateOutput {
    #[serde(flatten)]
    pub state: AutoIterateState,
}

impl CommandOutput for IterateOutput {
    fn to_human(&self) -> String {
        let s = &self.state;
        let accuracy = s.current_accuracy.map_or_else(|| "n/a".to_string(), percent);
        format!(
            "Auto-iterate {} for {}\nRounds:   {}/{}\nAccuracy: {} (target {})\n{}",
            s.status,
            s.project_id,
            s.current_round,
            s.max_rounds,
            accuracy,
            percent(s.target_accuracy),
            s.message
        )
    }
}

fn describe(state: &AutoIterateState) -> String {
    let accuracy = state
        .current_accuracy
        .map(|a| format!(", accuracy {}", percent(a)))
        .unwrap_or_default();
    format!(
        "round {}/{}{accuracy}: {}",
        state.current_round, state.max_rounds, state.message
    )
}

pub async fn execute(args: IterateArgs, config: Config, json_mode: bool) -> Result<()> {
    let run_config = args.to_config(&config);
    anyhow::ensure!(
        (0.0..=1.0).contains(&run_config.target_accuracy),
        "--target must be between 0 and 1"
    );

    let app = App::open(config).await?;
    app.reconcile().await?;
    let controller = &app.auto_iterate;

    let spinner = create_spinner(format!("starting auto-iterate for {}", args.project), json_mode);
    let run = controller.run_auto_iterate(&args.project, run_config);
    tokio::pin!(run);
    let mut ticker = tokio::time::interval(app.config.pipeline.poll_interval());
    let mut stopping = false;

    let state = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                spinner.set_message("stop requested, finishing current step");
                controller.stop(&args.project).await?;
            }
            _ = ticker.tick(), if !stopping => {
                if let Ok(state) = controller.status(&args.project).await {
                    spinner.set_message(describe(&state));
                }
            }
        }
    };
    spinner.finish_and_clear();

    output(&IterateOutput { state: state? }, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: IterateArgs,
    }

    #[test]
    fn test_flags_override_configured_defaults() {
        let harness = Harness::parse_from([
            "iterate",
            "tickets",
            "--max-rounds",
            "2",
            "--mode",
            "serial",
            "--strategy",
            "format_enforcement",
            "--strategy",
            "example_injection",
        ]);
        let run = harness.args.to_config(&Config::default());
        assert_eq!(run.max_rounds, 2);
        assert_eq!(run.strategy_mode, StrategyMode::Serial);
        assert_eq!(
            run.module_filter,
            Some(vec!["format_enforcement".to_string(), "example_injection".to_string()])
        );
        assert!((run.target_accuracy - Config::default().auto_iterate.target_accuracy).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let harness = Harness::parse_from(["iterate", "tickets"]);
        let run = harness.args.to_config(&Config::default());
        assert_eq!(run, AutoIterateConfig::default());
    }
}
