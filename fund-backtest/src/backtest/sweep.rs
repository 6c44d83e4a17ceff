//! Concurrent parameter sweeps.
//!
//! Each configuration runs in its own tokio task with its own run state;
//! tasks share only the engine's collaborator handles.

use std::sync::Arc;
use tracing::info;

use super::engine::{BacktestConfig, BacktestEngine, BacktestResult};
use super::error::BacktestError;

/// One configuration and what it produced.
#[derive(Debug)]
pub struct SweepOutcome {
    pub config: BacktestConfig,
    pub result: Result<BacktestResult, BacktestError>,
}

/// Run every configuration concurrently. Outcomes follow input order.
pub async fn run_sweep(engine: Arc<BacktestEngine>, configs: Vec<BacktestConfig>) -> Vec<SweepOutcome> {
    info!(runs = configs.len(), "Starting parameter sweep");

    let handles: Vec<_> = configs
        .iter()
        .cloned()
        .map(|config| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run(&config).await })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(configs.len());
    for (config, handle) in configs.into_iter().zip(handles) {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(BacktestError::Worker(e.to_string())),
        };
        outcomes.push(SweepOutcome { config, result });
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!(runs = outcomes.len(), failed, "Parameter sweep complete");
    outcomes
}

/// Configurations for every combination of `top_ns` and `trailing`.
pub fn grid(base: &BacktestConfig, top_ns: &[usize], trailing: &[u32]) -> Vec<BacktestConfig> {
    top_ns
        .iter()
        .flat_map(|&n| {
            trailing
                .iter()
                .map(move |&m| base.clone().top_n(n).trailing_months(m))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_grid() {
        let base = BacktestConfig::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        );
        let configs = grid(&base, &[5, 10], &[6, 12]);
        assert_eq!(configs.len(), 4);
        assert_eq!((configs[0].top_n, configs[0].trailing_months), (5, 6));
        assert_eq!((configs[3].top_n, configs[3].trailing_months), (10, 12));
        assert!(configs.iter().all(|c| c.start_date == base.start_date));
    }
}
