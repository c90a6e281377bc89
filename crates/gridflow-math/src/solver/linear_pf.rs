//! Linear power flow: every load modelled as constant admittance.
//!
//! With `s = u · conj(i)` and constant admittance, a specified base power
//! `s_base` at nominal voltage becomes `y_load = -conj(s_base)` on the bus
//! diagonal. Sources contribute their series admittance on the diagonal and
//! `y_source · u_ref` on the right-hand side. One factor-and-solve, no
//! iteration.

use num_complex::Complex64;

use gridflow_core::{Idx, Result, Symmetry};

use crate::lu::BlockSparseLuSolver;
use crate::solver::{flatten_tensors, flatten_values, unflatten_values};
use crate::types::{ApplianceSolverOutput, PowerFlowInput, SolverOutput};
use crate::y_bus::YBus;

pub struct LinearPfSolver<S: Symmetry> {
    n_bus: Idx,
    mat_data: Vec<S::ComplexTensor>,
    rhs: Vec<S::ComplexValue>,
    flat_mat: Vec<Complex64>,
    flat_rhs: Vec<Complex64>,
    flat_x: Vec<Complex64>,
    solver: BlockSparseLuSolver<Complex64>,
}

impl<S: Symmetry> LinearPfSolver<S> {
    pub fn new(y_bus: &YBus<S>) -> Self {
        let n_bus = y_bus.size();
        let nnz = y_bus.nnz() as usize;
        let b = S::BLOCK_SIZE;
        LinearPfSolver {
            n_bus,
            mat_data: vec![S::ComplexTensor::default(); nnz],
            rhs: vec![S::ComplexValue::default(); n_bus as usize],
            flat_mat: vec![Complex64::default(); nnz * b * b],
            flat_rhs: vec![Complex64::default(); n_bus as usize * b],
            flat_x: vec![Complex64::default(); n_bus as usize * b],
            solver: BlockSparseLuSolver::new(y_bus.structure().lu_pattern(), b),
        }
    }

    pub fn run_power_flow(
        &mut self,
        y_bus: &YBus<S>,
        input: &PowerFlowInput<S>,
    ) -> Result<SolverOutput<S>> {
        let topo = y_bus.math_topology();
        let n_bus = self.n_bus as usize;
        let bus_entry = y_bus.bus_entry();

        self.mat_data.copy_from_slice(y_bus.admittance());
        self.rhs.fill(S::ComplexValue::default());

        for bus in 0..n_bus {
            let entry = bus_entry[bus] as usize;
            for load_gen in topo.load_gen_bus_indptr[bus]..topo.load_gen_bus_indptr[bus + 1] {
                // YBus_diag += -conj(s_base)
                let y_load = -S::conj(&input.s_injection[load_gen as usize]);
                S::add_diag_complex(&mut self.mat_data[entry], &y_load);
            }
            for source in topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1] {
                let y_ref = y_bus.math_model_param().source_param[source as usize].y_ref::<S>();
                // YBus_diag += Y_source, rhs += Y_source * U_ref
                self.mat_data[entry] += y_ref;
                self.rhs[bus] +=
                    S::dot(&y_ref, &S::complex_rotated(input.source[source as usize]));
            }
        }

        flatten_tensors::<S>(&self.mat_data, &mut self.flat_mat);
        flatten_values::<S>(&self.rhs, &mut self.flat_rhs);
        self.solver
            .solve(&self.flat_mat, &self.flat_rhs, &mut self.flat_x, false)?;
        let mut u = vec![S::ComplexValue::default(); n_bus];
        unflatten_values::<S>(&self.flat_x, &mut u);

        Ok(self.calculate_result(y_bus, input, u))
    }

    /// Project the solution; the load power is always quadratic in voltage
    /// here, the whole point of the linear method.
    fn calculate_result(
        &self,
        y_bus: &YBus<S>,
        input: &PowerFlowInput<S>,
        u: Vec<S::ComplexValue>,
    ) -> SolverOutput<S> {
        let topo = y_bus.math_topology();
        let mut output = SolverOutput {
            branch: y_bus.calculate_branch_flow(&u),
            shunt: y_bus.calculate_shunt_flow(&u),
            bus_injection: y_bus.calculate_injection(&u),
            source: vec![ApplianceSolverOutput::default(); topo.n_source() as usize],
            load_gen: vec![ApplianceSolverOutput::default(); topo.n_load_gen() as usize],
            u,
        };
        for bus in 0..self.n_bus as usize {
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
                let s = S::scale(
                    &input.s_injection[load_gen as usize],
                    &S::abs2(&output.u[bus]),
                );
                output.load_gen[load_gen as usize] = ApplianceSolverOutput {
                    s,
                    i: S::conj(&(s / output.u[bus])),
                };
            }
        }
        output
    }
}
