//! Newton–Raphson power flow in polar coordinates.
//!
//! The state per bus is `(θ, V)`; the Jacobian is block-CSR over the Y-bus
//! pattern with 2×2 blocks (6×6 asymmetric):
//!
//! ```text
//! J_ij = [[H, N],
//!         [M, L]]   H = dP/dθ, N = V·dP/dV, M = dQ/dθ = -N, L = V·dQ/dV = H
//! ```
//!
//! Per entry the incomplete blocks come from the outer products
//! `c_ij = Re(u_i)⊗Re(u_j) + Im(u_i)⊗Im(u_j)` and
//! `s_ij = Im(u_i)⊗Re(u_j) - Re(u_i)⊗Im(u_j)`, as `H = G∘s - B∘c` and
//! `N = G∘c + B∘s`. Diagonal corrections add the accumulated injections;
//! loads contribute voltage-dependence terms; every source is treated as a
//! fictitious two-bus network against its reference voltage.
//!
//! The Jacobian changes every iteration, so no factorisation is cached.

use tracing::debug;

use gridflow_core::{Idx, LoadGenType, PowerGridError, Result, Symmetry};

use crate::lu::BlockSparseLuSolver;
use crate::solver::{calculate_pf_result, initial_voltage};
use crate::types::{PowerFlowInput, SolverOutput};
use crate::y_bus::YBus;

/// Phasor in polar coordinates.
#[derive(Debug, Clone, Copy, Default)]
struct PolarPhasor<S: Symmetry> {
    theta: S::RealValue,
    v: S::RealValue,
}

/// Active and reactive power per bus.
#[derive(Debug, Clone, Copy, Default)]
struct ComplexPower<S: Symmetry> {
    p: S::RealValue,
    q: S::RealValue,
}

/// Incomplete Jacobian block.
#[derive(Debug, Clone, Copy, Default)]
struct PfJacBlock<S: Symmetry> {
    h: S::RealTensor,
    n: S::RealTensor,
    m: S::RealTensor,
    l: S::RealTensor,
}

pub struct NewtonRaphsonPfSolver<S: Symmetry> {
    n_bus: Idx,
    data_jac: Vec<PfJacBlock<S>>,
    x: Vec<PolarPhasor<S>>,
    del_x: Vec<PolarPhasor<S>>,
    /// Holds the negative calculated injection during assembly, the full
    /// power mismatch afterwards.
    del_pq: Vec<ComplexPower<S>>,
    flat_jac: Vec<f64>,
    flat_rhs: Vec<f64>,
    flat_x: Vec<f64>,
    solver: BlockSparseLuSolver<f64>,
}

impl<S: Symmetry> NewtonRaphsonPfSolver<S> {
    pub fn new(y_bus: &YBus<S>) -> Self {
        let n_bus = y_bus.size();
        let nnz = y_bus.nnz() as usize;
        let b2 = 2 * S::BLOCK_SIZE;
        NewtonRaphsonPfSolver {
            n_bus,
            data_jac: vec![PfJacBlock::default(); nnz],
            x: vec![PolarPhasor::default(); n_bus as usize],
            del_x: vec![PolarPhasor::default(); n_bus as usize],
            del_pq: vec![ComplexPower::default(); n_bus as usize],
            flat_jac: vec![0.0; nnz * b2 * b2],
            flat_rhs: vec![0.0; n_bus as usize * b2],
            flat_x: vec![0.0; n_bus as usize * b2],
            solver: BlockSparseLuSolver::new(y_bus.structure().lu_pattern(), b2),
        }
    }

    pub fn run_power_flow(
        &mut self,
        y_bus: &YBus<S>,
        input: &PowerFlowInput<S>,
        err_tol: f64,
        max_iter: Idx,
    ) -> Result<SolverOutput<S>> {
        let mut u = initial_voltage::<S>(y_bus.math_topology(), input);
        for (x, u_bus) in self.x.iter_mut().zip(&u) {
            x.v = S::cabs(u_bus);
            x.theta = S::arg(u_bus);
        }

        let mut max_dev = f64::MAX;
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
            self.calculate_jacobian_and_deviation(y_bus, input, &u);
            self.flatten();
            self.solver
                .solve(&self.flat_jac, &self.flat_rhs, &mut self.flat_x, false)?;
            self.read_del_x();
            max_dev = self.iterate_unknown(&mut u);
            debug!(num_iter, max_dev, "newton-raphson step");
        }

        Ok(calculate_pf_result(y_bus, input, u))
    }

    fn calculate_jacobian_and_deviation(
        &mut self,
        y_bus: &YBus<S>,
        input: &PowerFlowInput<S>,
        u: &[S::ComplexValue],
    ) {
        let topo = y_bus.math_topology();
        let ydata = y_bus.admittance();
        let indptr = y_bus.row_indptr();
        let indices = y_bus.col_indices();
        let bus_entry = y_bus.bus_entry();
        let n_bus = self.n_bus as usize;

        // incomplete jacobian and negative power injection
        for i in 0..n_bus {
            self.del_pq[i] = ComplexPower::default();
            for k in indptr[i] as usize..indptr[i + 1] as usize {
                let j = indices[k] as usize;
                self.data_jac[k] = calculate_hnml::<S>(&ydata[k], &u[i], &u[j]);
                // -P = sum(-N), -Q = sum(-H)
                self.del_pq[i].p -= S::sum_row(&self.data_jac[k].n);
                self.del_pq[i].q -= S::sum_row(&self.data_jac[k].h);
            }
            // diagonal correction; del_pq currently holds the negative
            // injection
            let k = bus_entry[i] as usize;
            let minus_p = self.del_pq[i].p;
            let minus_q = self.del_pq[i].q;
            S::add_diag(&mut self.data_jac[k].h, &minus_q);
            S::add_diag(&mut self.data_jac[k].n, &-minus_p);
            S::add_diag(&mut self.data_jac[k].m, &-minus_p);
            S::add_diag(&mut self.data_jac[k].l, &-minus_q);
        }

        // loads and sources
        for i in 0..n_bus {
            let k = bus_entry[i] as usize;

            for j in topo.load_gen_bus_indptr[i]..topo.load_gen_bus_indptr[i + 1] {
                let s = input.s_injection[j as usize];
                let p = S::re(&s);
                let q = S::im(&s);
                let v = self.x[i].v;
                match topo.load_gen_type[j as usize] {
                    LoadGenType::ConstPq => {
                        // PQ_sp = PQ_base, no voltage dependence
                        self.del_pq[i].p += p;
                        self.del_pq[i].q += q;
                    }
                    LoadGenType::ConstY => {
                        // PQ_sp = PQ_base * V^2, dPQ_sp/dV * V = 2 PQ_base V^2
                        self.del_pq[i].p += p * v * v;
                        self.del_pq[i].q += q * v * v;
                        S::add_diag(&mut self.data_jac[k].n, &-(p * v * v * 2.0));
                        S::add_diag(&mut self.data_jac[k].l, &-(q * v * v * 2.0));
                    }
                    LoadGenType::ConstI => {
                        // PQ_sp = PQ_base * V, dPQ_sp/dV * V = PQ_base * V
                        self.del_pq[i].p += p * v;
                        self.del_pq[i].q += q * v;
                        S::add_diag(&mut self.data_jac[k].n, &-(p * v));
                        S::add_diag(&mut self.data_jac[k].l, &-(q * v));
                    }
                }
            }

            for j in topo.source_bus_indptr[i]..topo.source_bus_indptr[i + 1] {
                // fictitious two-bus network against the reference voltage
                let y_ref = y_bus.math_model_param().source_param[j as usize].y_ref::<S>();
                let u_ref = S::complex_rotated(input.source[j as usize]);
                let mut block_mm = calculate_hnml::<S>(&y_ref, &u[i], &u[i]);
                let block_ms = calculate_hnml::<S>(&(-y_ref), &u[i], &u_ref);
                let p_cal = S::sum_row(&(block_mm.n + block_ms.n));
                let q_cal = S::sum_row(&(block_mm.h + block_ms.h));
                S::add_diag(&mut block_mm.h, &-q_cal);
                S::add_diag(&mut block_mm.n, &p_cal);
                S::add_diag(&mut block_mm.m, &p_cal);
                S::add_diag(&mut block_mm.l, &q_cal);
                self.del_pq[i].p -= p_cal;
                self.del_pq[i].q -= q_cal;
                self.data_jac[k].h += block_mm.h;
                self.data_jac[k].n += block_mm.n;
                self.data_jac[k].m += block_mm.m;
                self.data_jac[k].l += block_mm.l;
            }
        }
    }

    /// Lay the HNML blocks and the mismatch out in the LU scalar format.
    fn flatten(&mut self) {
        let b = S::BLOCK_SIZE;
        let b2 = 2 * b;
        for (entry, block) in self.data_jac.iter().enumerate() {
            let base = entry * b2 * b2;
            for r in 0..b {
                for c in 0..b {
                    self.flat_jac[base + r * b2 + c] = S::real_tensor_get(&block.h, r, c);
                    self.flat_jac[base + r * b2 + b + c] = S::real_tensor_get(&block.n, r, c);
                    self.flat_jac[base + (b + r) * b2 + c] = S::real_tensor_get(&block.m, r, c);
                    self.flat_jac[base + (b + r) * b2 + b + c] = S::real_tensor_get(&block.l, r, c);
                }
            }
        }
        for (bus, pq) in self.del_pq.iter().enumerate() {
            for p in 0..b {
                self.flat_rhs[bus * b2 + p] = S::real_get(&pq.p, p);
                self.flat_rhs[bus * b2 + b + p] = S::real_get(&pq.q, p);
            }
        }
    }

    fn read_del_x(&mut self) {
        let b = S::BLOCK_SIZE;
        let b2 = 2 * b;
        for (bus, del) in self.del_x.iter_mut().enumerate() {
            del.theta = S::real_from_fn(|p| self.flat_x[bus * b2 + p]);
            del.v = S::real_from_fn(|p| self.flat_x[bus * b2 + b + p]);
        }
    }

    fn iterate_unknown(&mut self, u: &mut [S::ComplexValue]) -> f64 {
        let mut max_dev: f64 = 0.0;
        for i in 0..self.n_bus as usize {
            // theta += dtheta, V += V * (dV/V)
            self.x[i].theta += self.del_x[i].theta;
            let v = self.x[i].v;
            self.x[i].v += v * self.del_x[i].v;
            let u_new = S::scale(&S::exp_j(&self.x[i].theta), &self.x[i].v);
            let dev = S::max_val(&S::cabs(&(u_new - u[i])));
            max_dev = max_dev.max(dev);
            u[i] = u_new;
        }
        max_dev
    }
}

/// The incomplete H, N, M, L of one Jacobian entry.
fn calculate_hnml<S: Symmetry>(
    yij: &S::ComplexTensor,
    ui: &S::ComplexValue,
    uj: &S::ComplexValue,
) -> PfJacBlock<S> {
    let gij = S::tensor_re(yij);
    let bij = S::tensor_im(yij);
    // diag(Vi) * cos(theta_ij) * diag(Vj) and the sine twin
    let c_ij = S::vector_outer_product(&S::re(ui), &S::re(uj))
        + S::vector_outer_product(&S::im(ui), &S::im(uj));
    let s_ij = S::vector_outer_product(&S::im(ui), &S::re(uj))
        - S::vector_outer_product(&S::re(ui), &S::im(uj));
    let h = gij * s_ij - bij * c_ij;
    let n = gij * c_ij + bij * s_ij;
    PfJacBlock {
        h,
        n,
        m: -n,
        l: h,
    }
}
