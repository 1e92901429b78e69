//! Operator-facing loop commands: run a loop in the foreground, signal
//! stop / wind-down to a running one.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use adaf_domain::config::ConfigSeverity;
use adaf_domain::Error;

use crate::runtime::{LoopRunner, SpawnCoordinator};
use crate::state::OrchState;

/// `adaf loop run <name>` — run the loop until it finishes, is stopped,
/// or Ctrl-C cancels it.
pub async fn run(name: &str) -> anyhow::Result<()> {
    let (config, config_path) = super::load_config()?;

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s) in {config_path}",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state = Arc::new(OrchState::new(config)?);
    let coordinator = SpawnCoordinator::new(state.clone());
    let runner = LoopRunner::new(state, coordinator, name)?;

    let outer = CancellationToken::new();
    let ctrl_c_token = outer.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling loop");
            ctrl_c_token.cancel();
        }
    });

    match runner.run(&outer).await {
        Ok(run_id) => {
            println!("loop run {run_id} finished");
            Ok(())
        }
        Err(Error::Canceled) => {
            println!("loop cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// `adaf loop stop <run-id>` — cancel the current step and stop.
pub fn stop(run_id: i64) -> anyhow::Result<()> {
    let (config, _path) = super::load_config()?;
    let state = OrchState::new(config)?;
    anyhow::ensure!(
        state.store.get_loop_run(run_id).is_some(),
        "loop run {run_id} not found"
    );
    state.store.signal_loop_stop(run_id)?;
    println!("stop signalled for loop run {run_id}");
    Ok(())
}

/// `adaf loop wind-down <run-id>` — finish the current step, then stop.
pub fn wind_down(run_id: i64) -> anyhow::Result<()> {
    let (config, _path) = super::load_config()?;
    let state = OrchState::new(config)?;
    anyhow::ensure!(
        state.store.get_loop_run(run_id).is_some(),
        "loop run {run_id} not found"
    );
    state.store.signal_wind_down(run_id)?;
    println!("wind-down signalled for loop run {run_id}");
    Ok(())
}
