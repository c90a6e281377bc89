//! Iterative-current power flow.
//!
//! Fixed point on the bus voltage: with the source series admittances folded
//! into the matrix diagonal, each iteration computes the injected currents
//! from the previous voltage (per load type), then solves `Y' u = i`. The
//! matrix never changes between iterations, so the factorisation is built
//! once and reused until parameters change.

use num_complex::Complex64;
use tracing::debug;

use gridflow_core::{Idx, LoadGenType, PowerGridError, Result, Symmetry};

use crate::lu::BlockSparseLuSolver;
use crate::solver::{calculate_pf_result, flatten_tensors, flatten_values, initial_voltage, unflatten_values};
use crate::types::{PowerFlowInput, SolverOutput};
use crate::y_bus::YBus;

pub struct IterativeCurrentPfSolver<S: Symmetry> {
    n_bus: Idx,
    updated_u: Vec<S::ComplexValue>,
    rhs: Vec<S::ComplexValue>,
    mat_data: Vec<S::ComplexTensor>,
    loaded_mat_data: bool,
    flat_mat: Vec<Complex64>,
    flat_rhs: Vec<Complex64>,
    flat_x: Vec<Complex64>,
    solver: BlockSparseLuSolver<Complex64>,
}

impl<S: Symmetry> IterativeCurrentPfSolver<S> {
    pub fn new(y_bus: &YBus<S>) -> Self {
        let n_bus = y_bus.size();
        let nnz = y_bus.nnz() as usize;
        let b = S::BLOCK_SIZE;
        IterativeCurrentPfSolver {
            n_bus,
            updated_u: vec![S::ComplexValue::default(); n_bus as usize],
            rhs: vec![S::ComplexValue::default(); n_bus as usize],
            mat_data: vec![S::ComplexTensor::default(); nnz],
            loaded_mat_data: false,
            flat_mat: vec![Complex64::default(); nnz * b * b],
            flat_rhs: vec![Complex64::default(); n_bus as usize * b],
            flat_x: vec![Complex64::default(); n_bus as usize * b],
            solver: BlockSparseLuSolver::new(y_bus.structure().lu_pattern(), b),
        }
    }

    /// Parameters changed: rebuild the modified matrix and refactor on the
    /// next run.
    pub fn reset_lhs(&mut self) {
        self.solver.invalidate_prefactorization();
        self.loaded_mat_data = false;
    }

    pub fn run_power_flow(
        &mut self,
        y_bus: &YBus<S>,
        input: &PowerFlowInput<S>,
        err_tol: f64,
        max_iter: Idx,
    ) -> Result<SolverOutput<S>> {
        let topo = y_bus.math_topology();
        let n_bus = self.n_bus as usize;
        let mut u = initial_voltage::<S>(topo, input);
        let mut max_dev = f64::MAX;

        // fold the source admittances into the cached matrix copy
        if !self.loaded_mat_data {
            self.mat_data.copy_from_slice(y_bus.admittance());
            for bus in 0..n_bus {
                let entry = y_bus.bus_entry()[bus] as usize;
                for source in topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1] {
                    self.mat_data[entry] +=
                        y_bus.math_model_param().source_param[source as usize].y_ref::<S>();
                }
            }
            flatten_tensors::<S>(&self.mat_data, &mut self.flat_mat);
            self.loaded_mat_data = true;
        }

        let mut num_iter: Idx = 0;
        while max_dev > err_tol {
            if num_iter == max_iter {
                return Err(PowerGridError::IterationDiverge {
                    num_iter: max_iter,
                    max_dev,
                    err_tol,
                });
            }
            num_iter += 1;
            self.calculate_injected_current(y_bus, input, &u);
            flatten_values::<S>(&self.rhs, &mut self.flat_rhs);
            self.solver
                .solve(&self.flat_mat, &self.flat_rhs, &mut self.flat_x, true)?;
            unflatten_values::<S>(&self.flat_x, &mut self.updated_u);
            max_dev = self.iterate_unknown(&mut u);
            debug!(num_iter, max_dev, "iterative current step");
        }

        Ok(calculate_pf_result(y_bus, input, u))
    }

    /// Right-hand side: injected currents of loads plus source feed-in.
    fn calculate_injected_current(
        &mut self,
        y_bus: &YBus<S>,
        input: &PowerFlowInput<S>,
        u: &[S::ComplexValue],
    ) {
        let topo = y_bus.math_topology();
        self.rhs.fill(S::ComplexValue::default());
        for bus in 0..self.n_bus as usize {
            for load_gen in topo.load_gen_bus_indptr[bus]..topo.load_gen_bus_indptr[bus + 1] {
                let s = input.s_injection[load_gen as usize];
                self.rhs[bus] += match topo.load_gen_type[load_gen as usize] {
                    // i = conj(s / u)
                    LoadGenType::ConstPq => S::conj(&(s / u[bus])),
                    // i = conj(s) * u
                    LoadGenType::ConstY => S::conj(&s) * u[bus],
                    // i = conj(s * |u| / u)
                    LoadGenType::ConstI => S::conj(&(S::scale(&s, &S::cabs(&u[bus])) / u[bus])),
                };
            }
            for source in topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1] {
                let y_ref = y_bus.math_model_param().source_param[source as usize].y_ref::<S>();
                self.rhs[bus] +=
                    S::dot(&y_ref, &S::complex_rotated(input.source[source as usize]));
            }
        }
    }

    fn iterate_unknown(&self, u: &mut [S::ComplexValue]) -> f64 {
        let mut max_dev: f64 = 0.0;
        for bus in 0..self.n_bus as usize {
            let dev = S::max_val(&S::cabs(&(self.updated_u[bus] - u[bus])));
            max_dev = max_dev.max(dev);
            u[bus] = self.updated_u[bus];
        }
        max_dev
    }
}
