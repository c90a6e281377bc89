//! Batch dispatch over a small network: scenario independence, topology
//! caching, thread-count invariance and error aggregation.

use gridflow_batch::{run_power_flow_batch, BatchParameter};
use gridflow_core::{
    CalculationMethod, CalculationParams, LoadGenType, PowerGridError, Sym,
};
use gridflow_model::component::ApplianceDirection;
use gridflow_model::update::{BranchUpdate, LoadGenUpdate};
use gridflow_model::{
    BatchColumn, InputDataset, LineInput, LoadGenInput, MainModel, NodeInput, SourceInput,
    UpdateDataset,
};

fn base_input() -> InputDataset {
    InputDataset {
        node: vec![
            NodeInput {
                id: 1,
                u_rated: 10e3,
            },
            NodeInput {
                id: 2,
                u_rated: 10e3,
            },
        ],
        line: vec![LineInput {
            id: 3,
            from_node: 1,
            to_node: 2,
            from_status: 1,
            to_status: 1,
            r1: 2.0,
            x1: 6.0,
            c1: 0.0,
            tan1: 0.0,
            r0: f64::NAN,
            x0: f64::NAN,
            c0: f64::NAN,
            tan0: f64::NAN,
            i_n: f64::NAN,
        }],
        source: vec![SourceInput {
            id: 4,
            node: 1,
            status: 1,
            u_ref: 1.0,
            sk: f64::NAN,
            rx_ratio: f64::NAN,
            z01_ratio: f64::NAN,
        }],
        load_gen: vec![LoadGenInput {
            id: 5,
            node: 2,
            status: 1,
            direction: ApplianceDirection::Load,
            load_gen_type: LoadGenType::ConstPq,
            p_specified: [0.1e6, f64::NAN, f64::NAN],
            q_specified: [0.02e6, f64::NAN, f64::NAN],
            is_asym: false,
        }],
        ..Default::default()
    }
}

fn load_scenarios(n: usize) -> UpdateDataset {
    // every scenario updates the same load's active power only
    let mut update = UpdateDataset::new(n as i64);
    update.load_gen = BatchColumn {
        data: (0..n)
            .map(|s| LoadGenUpdate {
                id: 5,
                p_specified: [0.05e6 + s as f64 * 0.01e6, f64::NAN, f64::NAN],
                ..Default::default()
            })
            .collect(),
        indptr: None,
        n_scenarios: n as i64,
    };
    update
}

fn params(threading: i64) -> CalculationParams {
    CalculationParams {
        err_tol: 1e-8,
        max_iter: 20,
        threading,
    }
}

#[test]
fn load_only_batch_is_independent_and_cacheable() {
    let mut model = MainModel::new(base_input()).unwrap();
    let update = load_scenarios(10);
    let (results, batch_parameter) = run_power_flow_batch::<Sym>(
        &mut model,
        &update,
        &params(-1),
        CalculationMethod::NewtonRaphson,
    )
    .unwrap();
    assert_eq!(
        batch_parameter,
        BatchParameter {
            independent: true,
            cache_topology: true,
        }
    );
    assert_eq!(results.len(), 10);

    // every scenario must match an independent single solve
    for (s, result) in results.iter().enumerate() {
        let mut single = MainModel::new(base_input()).unwrap();
        single.update(&update, s as i64, None).unwrap();
        let reference = single
            .calculate_power_flow::<Sym>(&params(-1), CalculationMethod::NewtonRaphson)
            .unwrap();
        for (a, b) in result.node.iter().zip(&reference.node) {
            assert!((a.u_pu - b.u_pu).abs() < 1e-10);
        }
        for (a, b) in result.load_gen.iter().zip(&reference.load_gen) {
            assert!((a.p - b.p).abs() < 1e-3);
        }
    }
    // increasing load sags the voltage monotonically
    for window in results.windows(2) {
        assert!(window[1].node[1].u_pu < window[0].node[1].u_pu);
    }
}

#[test]
fn thread_count_does_not_change_results() {
    let update = load_scenarios(7);
    let mut sequential_model = MainModel::new(base_input()).unwrap();
    let (sequential, _) = run_power_flow_batch::<Sym>(
        &mut sequential_model,
        &update,
        &params(-1),
        CalculationMethod::NewtonRaphson,
    )
    .unwrap();

    let mut parallel_model = MainModel::new(base_input()).unwrap();
    let (parallel, _) = run_power_flow_batch::<Sym>(
        &mut parallel_model,
        &update,
        &params(3),
        CalculationMethod::NewtonRaphson,
    )
    .unwrap();

    for (a, b) in sequential.iter().zip(&parallel) {
        for (x, y) in a.node.iter().zip(&b.node) {
            assert_eq!(x.u_pu, y.u_pu);
        }
    }
}

#[test]
fn switching_updates_disable_the_topology_cache() {
    let mut update = load_scenarios(3);
    update.line = BatchColumn {
        data: vec![
            BranchUpdate {
                id: 3,
                ..Default::default()
            },
            BranchUpdate {
                id: 3,
                to_status: 0,
                ..Default::default()
            },
            BranchUpdate {
                id: 3,
                to_status: 1,
                ..Default::default()
            },
        ],
        indptr: None,
        n_scenarios: 3,
    };
    let mut model = MainModel::new(base_input()).unwrap();
    let (results, batch_parameter) = run_power_flow_batch::<Sym>(
        &mut model,
        &update,
        &params(-1),
        CalculationMethod::NewtonRaphson,
    )
    .unwrap();
    assert!(!batch_parameter.cache_topology);
    // scenario 1 opens the line: the load bus de-energises
    assert_eq!(results[0].node[1].energized, 1);
    assert_eq!(results[1].node[1].energized, 0);
    assert_eq!(results[2].node[1].energized, 1);
}

#[test]
fn failing_scenarios_are_collected() {
    let mut update = load_scenarios(4);
    // scenario 2 references an id that does not exist
    update.load_gen.data[2].id = 999;
    let mut model = MainModel::new(base_input()).unwrap();
    let error = run_power_flow_batch::<Sym>(
        &mut model,
        &update,
        &params(-1),
        CalculationMethod::NewtonRaphson,
    )
    .unwrap_err();
    match error {
        PowerGridError::BatchCalculation {
            messages,
            failed_scenarios,
        } => {
            assert_eq!(failed_scenarios, vec![2]);
            assert!(messages[0].contains("999"));
        }
        other => panic!("expected BatchCalculation, got {other}"),
    }
}

#[test]
fn empty_update_runs_the_base_once() {
    let mut model = MainModel::new(base_input()).unwrap();
    let (results, batch_parameter) = run_power_flow_batch::<Sym>(
        &mut model,
        &UpdateDataset::new(0),
        &params(-1),
        CalculationMethod::NewtonRaphson,
    )
    .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(batch_parameter, BatchParameter::default());
    assert!((results[0].node[0].u_pu - 1.0).abs() < 1e-3);
}
