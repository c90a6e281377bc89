//! End-to-end tests of the four solvers on a three-bus reference network.
//!
//! The network is constructed backwards from a known voltage solution, so
//! every solver can be checked against exact reference values:
//!
//! ```text
//!                                                       shunt0 (ys)
//!                        (y0, ys0)            (y1)          |
//! source --yref-- bus0 ----branch0---- bus1 --branch1-- bus2
//!                  |                    |
//!               load012              load345            load6 (disconnected)
//! ```
//!
//! uref = 1.10, u0 = 1.08∠-1°, u1 = 0.97∠-4°, u2 = 0.90∠-37°; branch1 is a
//! transformer-like branch with a 30° phase shift.

use std::sync::Arc;

use num_complex::Complex64;

use gridflow_core::{Asym, CalculationMethod, LoadGenType, PowerGridError, Sym, Symmetry};
use gridflow_math::types::{
    BranchCalcParam, MathModelParam, MathModelTopology, PowerFlowInput, SensorCalcParam,
    SolverOutput, SourceCalcParam, StateEstimationInput,
};
use gridflow_math::MathSolver;

const DEG: f64 = std::f64::consts::PI / 180.0;
const SHIFT: f64 = 30.0 * DEG;

fn polar(mag: f64, angle: f64) -> Complex64 {
    Complex64::from_polar(mag, angle)
}

struct ReferenceCase {
    topo: MathModelTopology,
    param: MathModelParam<Sym>,
    input: PowerFlowInput<Sym>,
    output: SolverOutput<Sym>,
    /// variant with only constant-admittance loads, same voltages
    input_z: PowerFlowInput<Sym>,
    output_z: SolverOutput<Sym>,
}

fn reference_case() -> ReferenceCase {
    let topo = MathModelTopology {
        slack_bus: 0,
        phase_shift: vec![0.0, 0.0, -SHIFT],
        branch_bus_idx: vec![[0, 1], [1, 2]],
        load_gen_type: vec![
            LoadGenType::ConstPq,
            LoadGenType::ConstI,
            LoadGenType::ConstY,
            LoadGenType::ConstPq,
            LoadGenType::ConstI,
            LoadGenType::ConstY,
            LoadGenType::ConstPq,
        ],
        shunt_bus_indptr: vec![0, 0, 0, 1],
        load_gen_bus_indptr: vec![0, 3, 6, 7],
        source_bus_indptr: vec![0, 1, 1, 1],
        voltage_sensor_indptr: vec![0, 1, 1, 3],
        source_power_sensor_indptr: vec![0, 2],
        shunt_power_sensor_indptr: vec![0, 1],
        load_gen_power_sensor_indptr: vec![0, 0, 0, 0, 1, 2, 3, 4],
        branch_from_power_sensor_indptr: vec![0, 1, 1],
        branch_to_power_sensor_indptr: vec![0, 2, 3],
    };

    let vref = 1.1;
    let v0 = 1.08;
    let v1 = 0.97;
    let v2 = 0.90;
    let u0 = polar(v0, -1.0 * DEG);
    let u1 = polar(v1, -4.0 * DEG);
    let u2 = polar(v2, -37.0 * DEG);

    let shift = polar(1.0, SHIFT);
    let y0 = Complex64::new(1.0, -2.0);
    let ys0 = Complex64::new(0.05, 0.2);
    let y1 = Complex64::new(3.0, -4.0);
    let yref = Complex64::new(10.0, -50.0);

    let mut param = MathModelParam::<Sym> {
        branch_param: vec![
            BranchCalcParam {
                value: [y0 + ys0, -y0, -y0, y0 + ys0],
            },
            BranchCalcParam {
                value: [y1, -y1 * shift, -y1 * shift.conj(), y1],
            },
        ],
        shunt_param: vec![],
        source_param: vec![SourceCalcParam { y1: yref, y0: yref }],
    };

    let mut output = SolverOutput::<Sym>::default();
    output.u = vec![u0, u1, u2];

    // branch flows consistent with the voltages
    let b0_if = (u0 - u1) * y0 + u0 * ys0;
    let b0_it = (u1 - u0) * y0 + u1 * ys0;
    let b1_if = (u1 - u2 * shift) * y1;
    let b1_it = (u2 - u1 * shift.conj()) * y1;
    output.branch = vec![
        gridflow_math::types::BranchSolverOutput {
            s_f: b0_if.conj() * u0,
            s_t: b0_it.conj() * u1,
            i_f: b0_if,
            i_t: b0_it,
        },
        gridflow_math::types::BranchSolverOutput {
            s_f: b1_if.conj() * u1,
            s_t: b1_it.conj() * u2,
            i_f: b1_if,
            i_t: b1_it,
        },
    ];

    // source against its reference
    let uref = Complex64::new(vref, 0.0);
    let source_i = yref * (uref - u0);
    output.source = vec![gridflow_math::types::ApplianceSolverOutput {
        s: source_i.conj() * u0,
        i: source_i,
    }];

    // whatever current is left at bus0/bus1 belongs to the loads
    let i0_load_inj = -source_i + b0_if;
    let i1_load_inj = b0_it + b1_if;
    let s0_load_inj = i0_load_inj.conj() * u0;
    let s1_load_inj = i1_load_inj.conj() * u1;

    // the shunt at bus2 absorbs the branch flow
    let i2_shunt_inj = b1_it;
    let ys = -i2_shunt_inj / u2;
    param.shunt_param = vec![ys];
    output.shunt = vec![gridflow_math::types::ApplianceSolverOutput {
        s: i2_shunt_inj.conj() * u2,
        i: i2_shunt_inj,
    }];

    // three loads per bus, one of each type; load 6 carries nothing
    let input = PowerFlowInput::<Sym> {
        source: vec![uref],
        s_injection: vec![
            s0_load_inj / 3.0,
            s0_load_inj / 3.0 / v0,
            s0_load_inj / 3.0 / v0 / v0,
            s1_load_inj / 3.0,
            s1_load_inj / 3.0 / v1,
            s1_load_inj / 3.0 / v1 / v1,
            Complex64::new(0.0, 0.0),
        ],
    };
    output.load_gen = vec![
        (s0_load_inj / 3.0, i0_load_inj / 3.0),
        (s0_load_inj / 3.0, i0_load_inj / 3.0),
        (s0_load_inj / 3.0, i0_load_inj / 3.0),
        (s1_load_inj / 3.0, i1_load_inj / 3.0),
        (s1_load_inj / 3.0, i1_load_inj / 3.0),
        (s1_load_inj / 3.0, i1_load_inj / 3.0),
        (Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)),
    ]
    .into_iter()
    .map(|(s, i)| gridflow_math::types::ApplianceSolverOutput { s, i })
    .collect();

    output.bus_injection = vec![
        output.branch[0].s_f,
        output.branch[0].s_t + output.branch[1].s_f,
        Complex64::new(0.0, 0.0),
    ];

    // constant-admittance variant: fold everything into the const_y loads
    let mut input_z = input.clone();
    let mut output_z = output.clone();
    for i in 0..6 {
        if i % 3 == 2 {
            input_z.s_injection[i] *= 3.0;
            output_z.load_gen[i].s *= 3.0;
            output_z.load_gen[i].i *= 3.0;
        } else {
            input_z.s_injection[i] = Complex64::new(0.0, 0.0);
            output_z.load_gen[i] = Default::default();
        }
    }

    ReferenceCase {
        topo,
        param,
        input,
        output,
        input_z,
        output_z,
    }
}

fn check_close<S: Symmetry>(x: &S::ComplexValue, y: &S::ComplexValue, tol: f64, what: &str) {
    let dev = S::max_val(&S::cabs(&(*x - *y)));
    assert!(dev < tol, "{what}: deviation {dev} exceeds {tol}");
}

fn assert_output<S: Symmetry>(
    output: &SolverOutput<S>,
    reference: &SolverOutput<S>,
    tol: f64,
    phase_offset: Complex64,
) {
    for (i, (x, y)) in output.u.iter().zip(&reference.u).enumerate() {
        check_close::<S>(x, &(*y * phase_offset), tol, &format!("u[{i}]"));
    }
    for (i, (x, y)) in output
        .bus_injection
        .iter()
        .zip(&reference.bus_injection)
        .enumerate()
    {
        check_close::<S>(x, y, tol, &format!("bus_injection[{i}]"));
    }
    for (i, (x, y)) in output.branch.iter().zip(&reference.branch).enumerate() {
        check_close::<S>(&x.s_f, &y.s_f, tol, &format!("branch[{i}].s_f"));
        check_close::<S>(&x.s_t, &y.s_t, tol, &format!("branch[{i}].s_t"));
        check_close::<S>(&x.i_f, &(y.i_f * phase_offset), tol, &format!("branch[{i}].i_f"));
        check_close::<S>(&x.i_t, &(y.i_t * phase_offset), tol, &format!("branch[{i}].i_t"));
    }
    for (i, (x, y)) in output.source.iter().zip(&reference.source).enumerate() {
        check_close::<S>(&x.s, &y.s, tol, &format!("source[{i}].s"));
        check_close::<S>(&x.i, &(y.i * phase_offset), tol, &format!("source[{i}].i"));
    }
    for (i, (x, y)) in output.load_gen.iter().zip(&reference.load_gen).enumerate() {
        check_close::<S>(&x.s, &y.s, tol, &format!("load_gen[{i}].s"));
        check_close::<S>(&x.i, &(y.i * phase_offset), tol, &format!("load_gen[{i}].i"));
    }
    for (i, (x, y)) in output.shunt.iter().zip(&reference.shunt).enumerate() {
        check_close::<S>(&x.s, &y.s, tol, &format!("shunt[{i}].s"));
        check_close::<S>(&x.i, &(y.i * phase_offset), tol, &format!("shunt[{i}].i"));
    }
}

fn no_offset() -> Complex64 {
    Complex64::new(1.0, 0.0)
}

#[test]
fn newton_raphson_matches_reference() {
    let case = reference_case();
    let mut solver =
        MathSolver::<Sym>::new(Arc::new(case.topo), Arc::new(case.param), None);
    let output = solver
        .run_power_flow(&case.input, 1e-12, 20, CalculationMethod::NewtonRaphson)
        .unwrap();
    assert_output::<Sym>(&output, &case.output, 1e-8, no_offset());
}

#[test]
fn iterative_current_matches_reference() {
    let case = reference_case();
    let mut solver =
        MathSolver::<Sym>::new(Arc::new(case.topo), Arc::new(case.param), None);
    let output = solver
        .run_power_flow(&case.input, 1e-12, 50, CalculationMethod::IterativeCurrent)
        .unwrap();
    assert_output::<Sym>(&output, &case.output, 1e-8, no_offset());
}

#[test]
fn linear_matches_reference_with_admittance_loads() {
    let case = reference_case();
    let mut solver =
        MathSolver::<Sym>::new(Arc::new(case.topo), Arc::new(case.param), None);
    let output = solver
        .run_power_flow(&case.input_z, 1e-12, 20, CalculationMethod::Linear)
        .unwrap();
    assert_output::<Sym>(&output, &case.output_z, 1e-10, no_offset());
}

#[test]
fn solvers_agree_on_const_y_network() {
    // all three power-flow methods must land on the same voltages
    let case = reference_case();
    let topo = Arc::new(case.topo);
    let param = Arc::new(case.param);
    let mut solver = MathSolver::<Sym>::new(Arc::clone(&topo), Arc::clone(&param), None);
    let linear = solver
        .run_power_flow(&case.input_z, 1e-12, 20, CalculationMethod::Linear)
        .unwrap();
    let newton = solver
        .run_power_flow(&case.input_z, 1e-12, 20, CalculationMethod::NewtonRaphson)
        .unwrap();
    let current = solver
        .run_power_flow(&case.input_z, 1e-12, 100, CalculationMethod::IterativeCurrent)
        .unwrap();
    for bus in 0..3 {
        check_close::<Sym>(&newton.u[bus], &linear.u[bus], 1e-6, "newton vs linear");
        check_close::<Sym>(&current.u[bus], &linear.u[bus], 1e-6, "current vs linear");
    }
}

fn reference_se_input(case: &ReferenceCase, with_angle: bool) -> StateEstimationInput<Sym> {
    let output = &case.output;
    let voltage = |u: Complex64| -> SensorCalcParam<Sym> {
        if with_angle {
            SensorCalcParam {
                value: u,
                variance: 1.0,
            }
        } else {
            SensorCalcParam {
                value: Complex64::new(u.norm(), f64::NAN),
                variance: 1.0,
            }
        }
    };
    let power = |s: Complex64| -> SensorCalcParam<Sym> {
        SensorCalcParam {
            value: s,
            variance: 0.5,
        }
    };
    StateEstimationInput {
        shunt_status: vec![1],
        load_gen_status: vec![1, 1, 1, 1, 1, 1, 0],
        source_status: vec![1],
        measured_voltage: vec![
            voltage(output.u[0]),
            voltage(output.u[2]),
            voltage(output.u[2]),
        ],
        measured_source_power: vec![power(output.source[0].s), power(output.source[0].s)],
        measured_load_gen_power: vec![
            power(output.load_gen[3].s),
            power(output.load_gen[4].s),
            power(output.load_gen[5].s),
            // disconnected appliance, value must be ignored
            power(Complex64::new(500.0, 0.0)),
        ],
        measured_shunt_power: vec![power(output.shunt[0].s)],
        measured_branch_from_power: vec![power(output.branch[0].s_f)],
        measured_branch_to_power: vec![
            power(output.branch[0].s_t),
            power(output.branch[0].s_t),
            power(output.branch[1].s_t),
        ],
    }
}

#[test]
fn state_estimation_with_angle_matches_reference() {
    let case = reference_case();
    let se_input = reference_se_input(&case, true);
    let mut solver = MathSolver::<Sym>::new(
        Arc::new(case.topo.clone()),
        Arc::new(case.param.clone()),
        None,
    );
    let output = solver
        .run_state_estimation(&se_input, 1e-12, 100, CalculationMethod::IterativeLinear)
        .unwrap();
    assert_output::<Sym>(&output, &case.output, 1e-6, no_offset());
}

#[test]
fn state_estimation_without_angle_is_rotated_to_slack() {
    let case = reference_case();
    let se_input = reference_se_input(&case, false);
    let mut solver = MathSolver::<Sym>::new(
        Arc::new(case.topo.clone()),
        Arc::new(case.param.clone()),
        None,
    );
    let output = solver
        .run_state_estimation(&se_input, 1e-12, 100, CalculationMethod::IterativeLinear)
        .unwrap();
    // the slack bus sits at -1 degree in the reference; without any angle
    // measurement the solution comes out rotated to zero slack phase
    let offset = polar(1.0, 1.0 * DEG);
    assert_output::<Sym>(&output, &case.output, 1e-6, offset);
}

#[test]
fn single_bus_single_source() {
    // one bus, one source, no load: the trivial network solves to u_ref
    // with every method
    let topo = Arc::new(MathModelTopology {
        slack_bus: 0,
        phase_shift: vec![0.0],
        shunt_bus_indptr: vec![0, 0],
        load_gen_bus_indptr: vec![0, 0],
        source_bus_indptr: vec![0, 1],
        ..Default::default()
    });
    let param = Arc::new(MathModelParam::<Sym> {
        branch_param: vec![],
        shunt_param: vec![],
        source_param: vec![SourceCalcParam {
            y1: Complex64::new(10.0, -50.0),
            y0: Complex64::new(10.0, -50.0),
        }],
    });
    let input = PowerFlowInput::<Sym> {
        source: vec![Complex64::new(1.0, 0.0)],
        s_injection: vec![],
    };
    for method in [
        CalculationMethod::Linear,
        CalculationMethod::NewtonRaphson,
        CalculationMethod::IterativeCurrent,
    ] {
        let mut solver = MathSolver::<Sym>::new(Arc::clone(&topo), Arc::clone(&param), None);
        let output = solver.run_power_flow(&input, 1e-10, 20, method).unwrap();
        assert!((output.u[0] - Complex64::new(1.0, 0.0)).norm() < 1e-10);
        assert!(output.source[0].s.norm() < 1e-10);
        assert!(output.source[0].i.norm() < 1e-10);
        assert!(output.branch.is_empty());
        assert!(output.load_gen.is_empty());
        assert!(output.shunt.is_empty());
    }
}

#[test]
fn two_bus_constant_pq_load() {
    // bus 0 with source, bus 1 with a 0.1 - 0.05j consumption
    let topo = Arc::new(MathModelTopology {
        slack_bus: 0,
        phase_shift: vec![0.0, 0.0],
        branch_bus_idx: vec![[0, 1]],
        load_gen_type: vec![LoadGenType::ConstPq],
        shunt_bus_indptr: vec![0, 0, 0],
        load_gen_bus_indptr: vec![0, 0, 1],
        source_bus_indptr: vec![0, 1, 1],
        ..Default::default()
    });
    let y = Complex64::new(10.0, -10.0);
    let param = Arc::new(MathModelParam::<Sym> {
        branch_param: vec![BranchCalcParam {
            value: [y, -y, -y, y],
        }],
        shunt_param: vec![],
        source_param: vec![SourceCalcParam {
            y1: Complex64::new(1e6, -1e6),
            y0: Complex64::new(1e6, -1e6),
        }],
    });
    let input = PowerFlowInput::<Sym> {
        source: vec![Complex64::new(1.0, 0.0)],
        // injection convention: consumption is negative
        s_injection: vec![Complex64::new(-0.1, 0.05)],
    };
    let mut solver = MathSolver::<Sym>::new(topo, param, None);
    let output = solver
        .run_power_flow(&input, 1e-8, 20, CalculationMethod::NewtonRaphson)
        .unwrap();
    // voltage sags below the flat start
    let v1 = output.u[1].norm();
    assert!(v1 < 1.0 && v1 > 0.98, "|u1| = {v1}");
    // the branch carries the load plus small losses
    assert!((output.branch[0].s_t - Complex64::new(-0.1, 0.05)).norm() < 1e-6);
    assert!((output.branch[0].s_f.re - 0.1).abs() < 1e-2);
    // energy conservation at bus 1
    assert!((output.bus_injection[1] - output.load_gen[0].s).norm() < 1e-6);
}

#[test]
fn power_flow_rejects_iterative_linear() {
    let case = reference_case();
    let mut solver =
        MathSolver::<Sym>::new(Arc::new(case.topo), Arc::new(case.param), None);
    let err = solver
        .run_power_flow(&case.input, 1e-8, 20, CalculationMethod::IterativeLinear)
        .unwrap_err();
    assert!(matches!(err, PowerGridError::InvalidCalculationMethod));
}

#[test]
fn newton_raphson_reports_divergence() {
    let case = reference_case();
    let mut solver =
        MathSolver::<Sym>::new(Arc::new(case.topo), Arc::new(case.param), None);
    let err = solver
        .run_power_flow(&case.input, 1e-16, 1, CalculationMethod::NewtonRaphson)
        .unwrap_err();
    match err {
        PowerGridError::IterationDiverge {
            num_iter, err_tol, ..
        } => {
            assert_eq!(num_iter, 1);
            assert_eq!(err_tol, 1e-16);
        }
        other => panic!("expected IterationDiverge, got {other}"),
    }
}

#[test]
fn state_estimation_with_hard_voltage_constraint() {
    // two buses, one branch, a zero-variance voltage measurement at bus 0:
    // the estimate must reproduce that magnitude
    let topo = Arc::new(MathModelTopology {
        slack_bus: 0,
        phase_shift: vec![0.0, 0.0],
        branch_bus_idx: vec![[0, 1]],
        shunt_bus_indptr: vec![0, 0, 0],
        load_gen_bus_indptr: vec![0, 0, 0],
        load_gen_type: vec![],
        source_bus_indptr: vec![0, 1, 1],
        voltage_sensor_indptr: vec![0, 1, 2],
        source_power_sensor_indptr: vec![0, 0],
        shunt_power_sensor_indptr: vec![0],
        load_gen_power_sensor_indptr: vec![0],
        branch_from_power_sensor_indptr: vec![0, 0],
        branch_to_power_sensor_indptr: vec![0, 0],
    });
    let y = Complex64::new(5.0, -15.0);
    let param = Arc::new(MathModelParam::<Sym> {
        branch_param: vec![BranchCalcParam {
            value: [y, -y, -y, y],
        }],
        shunt_param: vec![],
        source_param: vec![SourceCalcParam {
            y1: Complex64::new(100.0, -500.0),
            y0: Complex64::new(100.0, -500.0),
        }],
    });
    let input = StateEstimationInput::<Sym> {
        shunt_status: vec![],
        load_gen_status: vec![],
        source_status: vec![1],
        measured_voltage: vec![
            SensorCalcParam {
                value: Complex64::new(1.01, 0.0),
                variance: 0.0,
            },
            SensorCalcParam {
                value: Complex64::new(1.0, 0.0),
                variance: 1.0,
            },
        ],
        ..Default::default()
    };
    let mut solver = MathSolver::<Sym>::new(topo, param, None);
    let output = solver
        .run_state_estimation(&input, 1e-12, 100, CalculationMethod::IterativeLinear)
        .unwrap();
    assert!((output.u[0].norm() - 1.01).abs() < 1e-8);
}

fn balanced(s: Complex64, m: Complex64) -> <Asym as Symmetry>::ComplexTensor {
    Asym::tensor_balanced(s, m)
}

#[test]
fn asymmetric_newton_raphson_matches_reference() {
    let case = reference_case();

    // sequence-composed network parameters with the same positive sequence
    let y0 = Complex64::new(1.0, -2.0);
    let ys0 = Complex64::new(0.05, 0.2);
    let y1 = Complex64::new(3.0, -4.0);
    let yref = Complex64::new(10.0, -50.0);
    let y0_0 = Complex64::new(0.5, 0.5);
    let y0a = balanced((2.0 * y0 + y0_0) / 3.0, (y0_0 - y0) / 3.0);
    let ys0a = balanced(ys0, Complex64::new(0.0, 0.0));
    let y1_1 = balanced(2.0 * y1 / 3.0, -y1 / 3.0);
    let zero = Complex64::new(0.0, 0.0);
    let sqrt3 = 3.0_f64.sqrt();
    let y1_3 = Asym::tensor_from_fn(|r, c| {
        let m = [
            [-y1, y1, zero],
            [zero, -y1, y1],
            [y1, zero, -y1],
        ];
        m[r][c] / sqrt3
    });
    let y1_3t = Asym::tensor_from_fn(|r, c| {
        let m = [
            [-y1, y1, zero],
            [zero, -y1, y1],
            [y1, zero, -y1],
        ];
        m[c][r] / sqrt3
    });
    let ys = case.param.shunt_param[0];
    let ys_0 = ys * 0.2;
    let ysa = balanced((2.0 * ys + ys_0) / 3.0, (ys_0 - ys) / 3.0);

    let param_asym = MathModelParam::<Asym> {
        branch_param: vec![
            BranchCalcParam {
                value: [y0a + ys0a, -y0a, -y0a, y0a + ys0a],
            },
            BranchCalcParam {
                value: [y1_1, y1_3, y1_3t, y1_1],
            },
        ],
        shunt_param: vec![ysa],
        source_param: vec![SourceCalcParam { y1: yref, y0: yref }],
    };

    let input_asym = PowerFlowInput::<Asym> {
        source: case.input.source.clone(),
        s_injection: case
            .input
            .s_injection
            .iter()
            .map(|&s| Asym::complex_uniform(s))
            .collect(),
    };

    // the reference in phase quantities: balanced rotation of the voltages
    // and currents, the same power on every phase
    let mut reference = SolverOutput::<Asym>::default();
    reference.u = case.output.u.iter().map(|&u| Asym::complex_rotated(u)).collect();
    reference.bus_injection = case
        .output
        .bus_injection
        .iter()
        .map(|&s| Asym::complex_uniform(s))
        .collect();
    reference.branch = case
        .output
        .branch
        .iter()
        .map(|b| gridflow_math::types::BranchSolverOutput {
            s_f: Asym::complex_uniform(b.s_f),
            s_t: Asym::complex_uniform(b.s_t),
            i_f: Asym::complex_rotated(b.i_f),
            i_t: Asym::complex_rotated(b.i_t),
        })
        .collect();
    let appliance = |a: &gridflow_math::types::ApplianceSolverOutput<Sym>| {
        gridflow_math::types::ApplianceSolverOutput::<Asym> {
            s: Asym::complex_uniform(a.s),
            i: Asym::complex_rotated(a.i),
        }
    };
    reference.source = case.output.source.iter().map(appliance).collect();
    reference.shunt = case.output.shunt.iter().map(appliance).collect();
    reference.load_gen = case.output.load_gen.iter().map(appliance).collect();

    let mut solver = MathSolver::<Asym>::new(
        Arc::new(case.topo.clone()),
        Arc::new(param_asym),
        None,
    );
    let output = solver
        .run_power_flow(&input_asym, 1e-12, 20, CalculationMethod::NewtonRaphson)
        .unwrap();
    assert_output::<Asym>(&output, &reference, 1e-8, no_offset());
}

#[test]
fn sym_and_asym_share_y_bus_structure() {
    let case = reference_case();
    let topo = Arc::new(case.topo);
    let solver_sym =
        MathSolver::<Sym>::new(Arc::clone(&topo), Arc::new(case.param.clone()), None);
    let structure = solver_sym.shared_y_bus_structure();
    let param_asym = MathModelParam::<Asym> {
        branch_param: vec![Default::default(); 2],
        shunt_param: vec![Default::default(); 1],
        source_param: vec![Default::default(); 1],
    };
    let solver_asym = MathSolver::<Asym>::new(
        Arc::clone(&topo),
        Arc::new(param_asym),
        Some(Arc::clone(&structure)),
    );
    assert!(Arc::ptr_eq(
        &structure,
        &solver_asym.shared_y_bus_structure()
    ));
}
