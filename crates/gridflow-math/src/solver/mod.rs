//! The four calculation methods and their per-subgrid facade.
//!
//! One [`MathSolver`] owns the Y-bus of one subgrid plus lazily created
//! solver instances. Solver instances cache what is worth caching (LU
//! patterns always, factorisations where the matrix is iteration-invariant)
//! and are invalidated through [`MathSolver::update_value`] when parameters
//! change.

pub mod iterative_current;
pub mod iterative_linear_se;
pub mod linear_pf;
pub mod newton_raphson;

use std::sync::Arc;

use num_complex::Complex64;

use gridflow_core::{CalculationMethod, Idx, PowerGridError, Result, Symmetry};

use crate::types::{
    ApplianceSolverOutput, MathModelParam, MathModelParamIncrement, MathModelTopology,
    PowerFlowInput, SolverOutput, StateEstimationInput,
};
use crate::y_bus::{YBus, YBusStructure};

pub use iterative_current::IterativeCurrentPfSolver;
pub use iterative_linear_se::IterativeLinearSeSolver;
pub use linear_pf::LinearPfSolver;
pub use newton_raphson::NewtonRaphsonPfSolver;

/// Per-subgrid solver facade.
pub struct MathSolver<S: Symmetry> {
    topo: Arc<MathModelTopology>,
    y_bus: YBus<S>,
    linear: Option<LinearPfSolver<S>>,
    newton_raphson: Option<NewtonRaphsonPfSolver<S>>,
    iterative_current: Option<IterativeCurrentPfSolver<S>>,
    iterative_linear_se: Option<IterativeLinearSeSolver<S>>,
}

impl<S: Symmetry> MathSolver<S> {
    /// Build the solver for one subgrid. Pass the sibling symmetry's Y-bus
    /// structure to share it.
    pub fn new(
        topo: Arc<MathModelTopology>,
        param: Arc<MathModelParam<S>>,
        structure: Option<Arc<YBusStructure>>,
    ) -> Self {
        let y_bus = YBus::new(Arc::clone(&topo), param, structure);
        MathSolver {
            topo,
            y_bus,
            linear: None,
            newton_raphson: None,
            iterative_current: None,
            iterative_linear_se: None,
        }
    }

    pub fn y_bus(&self) -> &YBus<S> {
        &self.y_bus
    }

    pub fn shared_y_bus_structure(&self) -> Arc<YBusStructure> {
        self.y_bus.shared_structure()
    }

    /// Run a power-flow calculation with the requested method.
    pub fn run_power_flow(
        &mut self,
        input: &PowerFlowInput<S>,
        err_tol: f64,
        max_iter: Idx,
        method: CalculationMethod,
    ) -> Result<SolverOutput<S>> {
        match method {
            CalculationMethod::Linear => {
                let solver = self
                    .linear
                    .get_or_insert_with(|| LinearPfSolver::new(&self.y_bus));
                solver.run_power_flow(&self.y_bus, input)
            }
            CalculationMethod::NewtonRaphson => {
                let solver = self
                    .newton_raphson
                    .get_or_insert_with(|| NewtonRaphsonPfSolver::new(&self.y_bus));
                solver.run_power_flow(&self.y_bus, input, err_tol, max_iter)
            }
            CalculationMethod::IterativeCurrent => {
                let solver = self
                    .iterative_current
                    .get_or_insert_with(|| IterativeCurrentPfSolver::new(&self.y_bus));
                solver.run_power_flow(&self.y_bus, input, err_tol, max_iter)
            }
            CalculationMethod::IterativeLinear => Err(PowerGridError::InvalidCalculationMethod),
        }
    }

    /// Run a state estimation with the requested method.
    pub fn run_state_estimation(
        &mut self,
        input: &StateEstimationInput<S>,
        err_tol: f64,
        max_iter: Idx,
        method: CalculationMethod,
    ) -> Result<SolverOutput<S>> {
        match method {
            CalculationMethod::IterativeLinear => {
                let solver = self
                    .iterative_linear_se
                    .get_or_insert_with(|| IterativeLinearSeSolver::new(&self.y_bus));
                solver.run_state_estimation(&self.y_bus, input, err_tol, max_iter)
            }
            _ => Err(PowerGridError::InvalidCalculationMethod),
        }
    }

    /// Replace parameters; incremental when the changed indices are known.
    ///
    /// Cached factorisations derived from the old values are invalidated.
    pub fn update_value(
        &mut self,
        param: Arc<MathModelParam<S>>,
        increment: Option<&MathModelParamIncrement>,
    ) {
        match increment {
            Some(increment) => self.y_bus.update_admittance_partial(param, increment),
            None => self.y_bus.update_admittance(param),
        }
        if let Some(solver) = &mut self.iterative_current {
            solver.reset_lhs();
        }
    }

    pub fn topology(&self) -> &MathModelTopology {
        &self.topo
    }
}

/// Flat start: the average source reference voltage, rotated back into each
/// bus's intrinsic phase shift.
pub(crate) fn initial_voltage<S: Symmetry>(
    topo: &MathModelTopology,
    input: &PowerFlowInput<S>,
) -> Vec<S::ComplexValue> {
    let n_bus = topo.n_bus() as usize;
    let mut sum_u_ref = Complex64::default();
    for bus in 0..n_bus {
        for source in topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1] {
            // offset the phase shift of the bus the source sits on
            sum_u_ref +=
                input.source[source as usize] * Complex64::from_polar(1.0, -topo.phase_shift[bus]);
        }
    }
    let u_ref = sum_u_ref / input.source.len() as f64;
    (0..n_bus)
        .map(|bus| S::complex_rotated(u_ref * Complex64::from_polar(1.0, topo.phase_shift[bus])))
        .collect()
}

/// Common power-flow result projection for the iterative solvers: branch
/// and shunt flows from the Y-bus, sources against their reference, and
/// loads/generators by their voltage dependence.
pub(crate) fn calculate_pf_result<S: Symmetry>(
    y_bus: &YBus<S>,
    input: &PowerFlowInput<S>,
    u: Vec<S::ComplexValue>,
) -> SolverOutput<S> {
    use gridflow_core::LoadGenType;

    let topo = y_bus.math_topology();
    let n_bus = topo.n_bus() as usize;
    let mut output = SolverOutput {
        branch: y_bus.calculate_branch_flow(&u),
        shunt: y_bus.calculate_shunt_flow(&u),
        bus_injection: y_bus.calculate_injection(&u),
        source: vec![ApplianceSolverOutput::default(); topo.n_source() as usize],
        load_gen: vec![ApplianceSolverOutput::default(); topo.n_load_gen() as usize],
        u,
    };
    for bus in 0..n_bus {
        for source in topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1] {
            let u_ref = S::complex_rotated(input.source[source as usize]);
            let y_ref = y_bus.math_model_param().source_param[source as usize].y_ref::<S>();
            let i = S::dot(&y_ref, &(u_ref - output.u[bus]));
            output.source[source as usize] = ApplianceSolverOutput {
                s: output.u[bus] * S::conj(&i),
                i,
            };
        }
        for load_gen in topo.load_gen_bus_indptr[bus]..topo.load_gen_bus_indptr[bus + 1] {
            let s_spec = input.s_injection[load_gen as usize];
            let s = match topo.load_gen_type[load_gen as usize] {
                LoadGenType::ConstPq => s_spec,
                LoadGenType::ConstY => S::scale(&s_spec, &S::abs2(&output.u[bus])),
                LoadGenType::ConstI => S::scale(&s_spec, &S::cabs(&output.u[bus])),
            };
            output.load_gen[load_gen as usize] = ApplianceSolverOutput {
                s,
                i: S::conj(&(s / output.u[bus])),
            };
        }
    }
    output
}

/// Write block tensors into the flat scalar layout of the LU solver.
pub(crate) fn flatten_tensors<S: Symmetry>(src: &[S::ComplexTensor], dst: &mut [Complex64]) {
    let b = S::BLOCK_SIZE;
    for (entry, tensor) in src.iter().enumerate() {
        for r in 0..b {
            for c in 0..b {
                dst[entry * b * b + r * b + c] = S::complex_tensor_get(tensor, r, c);
            }
        }
    }
}

/// Write block values into the flat scalar layout of the LU solver.
pub(crate) fn flatten_values<S: Symmetry>(src: &[S::ComplexValue], dst: &mut [Complex64]) {
    let b = S::BLOCK_SIZE;
    for (i, value) in src.iter().enumerate() {
        for p in 0..b {
            dst[i * b + p] = S::complex_get(value, p);
        }
    }
}

/// Read block values back out of the flat scalar layout.
pub(crate) fn unflatten_values<S: Symmetry>(src: &[Complex64], dst: &mut [S::ComplexValue]) {
    let b = S::BLOCK_SIZE;
    for (i, value) in dst.iter_mut().enumerate() {
        *value = S::complex_from_fn(|p| src[i * b + p]);
    }
}
