//! # gridflow-batch: scenario fan-out over a base model
//!
//! Runs a batch of scenario updates against a base [`MainModel`]. The batch
//! is analysed once up front:
//!
//! - **independent** - every scenario updates the same components in the
//!   same order, so sequence indices are resolved once and a worker can
//!   keep mutating its private model copy instead of re-copying the base;
//! - **cacheable topology** - no scenario touches a switching status, so a
//!   warm-up solve on the base model computes the subgrid decomposition and
//!   Y-bus structures once and every copy shares them.
//!
//! Scenarios are partitioned statically: worker `w` of `n` runs scenarios
//! `w, w + n, w + 2n, …` on its own model copy, writing disjoint result
//! rows. There is no work stealing; the only parallelism in the engine
//! lives here, solvers themselves are single-threaded.
//!
//! A scenario failure is caught at the scenario boundary and recorded;
//! after all workers join, the failures are aggregated into one
//! [`PowerGridError::BatchCalculation`].

use std::sync::Mutex;

use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gridflow_core::{
    CalculationMethod, CalculationParams, Idx, PowerGridError, Result, Symmetry,
};
use gridflow_model::main_model::SolverAccess;
use gridflow_model::{MainModel, PhysicalOutput, UpdateDataset};

/// What the up-front analysis of the update dataset concluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchParameter {
    /// Every scenario updates the same components in the same order.
    pub independent: bool,
    /// No scenario changes any switching status.
    pub cache_topology: bool,
}

/// Run a power-flow batch; one result row per scenario.
pub fn run_power_flow_batch<S: Symmetry>(
    model: &mut MainModel,
    update: &UpdateDataset,
    calculation_params: &CalculationParams,
    method: CalculationMethod,
) -> Result<(Vec<PhysicalOutput<S>>, BatchParameter)>
where
    MainModel: SolverAccess<S>,
{
    run_batch(model, update, calculation_params, move |model, params| {
        model.calculate_power_flow::<S>(params, method)
    })
}

/// Run a state-estimation batch; one result row per scenario.
pub fn run_state_estimation_batch<S: Symmetry>(
    model: &mut MainModel,
    update: &UpdateDataset,
    calculation_params: &CalculationParams,
    method: CalculationMethod,
) -> Result<(Vec<PhysicalOutput<S>>, BatchParameter)>
where
    MainModel: SolverAccess<S>,
{
    run_batch(model, update, calculation_params, move |model, params| {
        model.calculate_state_estimation::<S>(params, method)
    })
}

fn run_batch<S: Symmetry>(
    model: &mut MainModel,
    update: &UpdateDataset,
    calculation_params: &CalculationParams,
    run: impl Fn(&mut MainModel, &CalculationParams) -> Result<PhysicalOutput<S>> + Sync,
) -> Result<(Vec<PhysicalOutput<S>>, BatchParameter)>
where
    MainModel: SolverAccess<S>,
{
    // an empty update means: run the base model once
    if update.is_empty() {
        let output = run(model, calculation_params)?;
        return Ok((vec![output], BatchParameter::default()));
    }

    let n_scenarios = update.n_scenarios;
    let cache_topology = update.is_topology_cacheable();
    let independent = update.is_update_independent()?;
    debug!(n_scenarios, independent, cache_topology, "batch analysis");

    // warm-up solve: decomposition and Y-bus structures land in the base
    // model and are shared by every worker copy
    if cache_topology {
        run(model, calculation_params)?;
    }

    // resolve component sequences once when every scenario shares them
    let sequence = if independent {
        Some(model.sequence_idx_map(update)?)
    } else {
        None
    };

    let base: &MainModel = model;
    let results: Mutex<Vec<(Idx, PhysicalOutput<S>)>> = Mutex::new(Vec::new());
    let failures: Mutex<Vec<(Idx, String)>> = Mutex::new(Vec::new());

    let worker = |start: Idx, stride: Idx| {
        let mut worker_model = base.clone();
        let mut local_results = Vec::new();
        let mut local_failures = Vec::new();
        let mut scenario = start;
        while scenario < n_scenarios {
            // a dependent batch restarts from the pristine base each time
            if !independent && scenario != start {
                worker_model = base.clone();
            }
            let outcome = worker_model
                .update(update, scenario, sequence.as_ref())
                .and_then(|()| run(&mut worker_model, calculation_params));
            match outcome {
                Ok(output) => local_results.push((scenario, output)),
                Err(error) => {
                    warn!(scenario, %error, "scenario failed");
                    local_failures.push((scenario, error.to_string()));
                }
            }
            scenario += stride;
        }
        results.lock().expect("poisoned results").extend(local_results);
        failures
            .lock()
            .expect("poisoned failures")
            .extend(local_failures);
    };

    let threading = calculation_params.threading;
    let hardware = num_cpus::get() as Idx;
    if threading < 0 || threading == 1 || (threading == 0 && hardware < 2) {
        worker(0, 1);
    } else {
        let n_thread = if threading == 0 {
            hardware.min(n_scenarios).max(1)
        } else {
            threading.min(n_scenarios).max(1)
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_thread as usize)
            .build()
            .map_err(|error| PowerGridError::BatchCalculation {
                messages: vec![format!("failed to build worker pool: {error}")],
                failed_scenarios: vec![],
            })?;
        pool.scope(|scope| {
            for thread_number in 0..n_thread {
                let worker = &worker;
                scope.spawn(move |_| worker(thread_number, n_thread));
            }
        });
    }

    let mut failures = failures.into_inner().expect("poisoned failures");
    if !failures.is_empty() {
        failures.sort_by_key(|(scenario, _)| *scenario);
        let (failed_scenarios, messages) = failures.into_iter().unzip();
        return Err(PowerGridError::BatchCalculation {
            messages,
            failed_scenarios,
        });
    }

    let mut rows = vec![PhysicalOutput::<S>::default(); n_scenarios as usize];
    for (scenario, output) in results.into_inner().expect("poisoned results") {
        rows[scenario as usize] = output;
    }
    Ok((rows, BatchParameter {
        independent,
        cache_topology,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridflow_model::update::LoadGenUpdate;
    use gridflow_model::BatchColumn;

    #[test]
    fn empty_update_reports_default_parameters() {
        // analysed lazily through the public dataset methods
        let update = UpdateDataset::new(0);
        assert!(update.is_empty());
        assert!(update.is_topology_cacheable());
        assert!(update.is_update_independent().unwrap());
    }

    #[test]
    fn ragged_scenarios_are_not_independent() {
        let mut update = UpdateDataset::new(2);
        update.load_gen = BatchColumn {
            data: vec![
                LoadGenUpdate {
                    id: 5,
                    ..Default::default()
                },
                LoadGenUpdate {
                    id: 5,
                    ..Default::default()
                },
                LoadGenUpdate {
                    id: 6,
                    ..Default::default()
                },
            ],
            indptr: Some(vec![0, 1, 3]),
            n_scenarios: 2,
        };
        assert!(!update.is_update_independent().unwrap());
        // no switching status touched: still cacheable
        assert!(update.is_topology_cacheable());
    }

    #[test]
    fn status_updates_break_topology_cacheability() {
        use gridflow_model::update::SourceUpdate;
        let mut update = UpdateDataset::new(1);
        update.source = BatchColumn {
            data: vec![SourceUpdate {
                id: 3,
                status: 1,
                u_ref: f64::NAN,
            }],
            indptr: None,
            n_scenarios: 1,
        };
        // even a no-op status write invalidates the cache
        assert!(!update.is_topology_cacheable());
        assert!(update.is_update_independent().unwrap());
    }
}
