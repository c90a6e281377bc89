//! # gridflow-math: the numerical solver stack
//!
//! Everything between a decomposed network topology and a solved voltage
//! vector lives here:
//!
//! - [`sparse_mapping`] - counting-sort grouping of tagged items into CSR
//!   `indptr`/`reorder` pairs
//! - [`topology`] - decomposition of the component graph into independent
//!   math subgrids, each rooted at energised sources, with a bus ordering
//!   chosen for low LU fill-in
//! - [`y_bus`] - the block-CSR nodal admittance matrix: sparsity structure,
//!   per-entry component maps, LU fill-in pattern, and value assembly
//! - [`lu`] - the block-sparse LU solver with prefactorisation reuse
//! - [`solver`] - the four calculation methods: linear power flow,
//!   iterative-current power flow, Newton–Raphson power flow, and the
//!   iterative-linear weighted-least-squares state estimator
//!
//! All quantities are per-unit; all solvers are generic over the
//! [`Symmetry`](gridflow_core::Symmetry) of the calculation.

pub mod lu;
pub mod solver;
pub mod sparse_mapping;
pub mod topology;
pub mod types;
pub mod y_bus;

pub use lu::BlockSparseLuSolver;
pub use solver::MathSolver;
pub use sparse_mapping::{build_sparse_mapping, SparseMapping};
pub use topology::{ComponentConnections, ComponentToMathCoupling, ComponentTopology, Topology};
pub use types::{
    ApplianceSolverOutput, BranchCalcParam, BranchSolverOutput, MathModelParam,
    MathModelParamIncrement, MathModelTopology, PowerFlowInput, SensorCalcParam, SolverOutput,
    SourceCalcParam, StateEstimationInput,
};
pub use y_bus::{YBus, YBusStructure};
