//! # gridflow-core: shared types for the GridFlow engine
//!
//! Foundation crate for the steady-state power-flow and state-estimation
//! engine. It carries the pieces every other crate agrees on:
//!
//! - Index and identifier conventions ([`Idx`], [`Idx2D`], sentinels)
//! - The unified error type [`PowerGridError`]
//! - Domain enumerations ([`LoadGenType`], [`CalculationMethod`], ...)
//! - Per-unit complex arithmetic for the symmetric (single-phase equivalent)
//!   and asymmetric (three-phase) calculation modes, behind the [`Symmetry`]
//!   trait with its two instantiations [`Sym`] and [`Asym`]
//!
//! Everything numerical in this workspace is in per-unit. The asymmetric
//! mode works in phase quantities; conversion to and from sequence
//! quantities goes through the symmetrical-components matrix exposed by the
//! [`phasor`] module.

use serde::{Deserialize, Serialize};

pub mod error;
pub mod phasor;

pub use error::{PowerGridError, Result};
pub use phasor::{Asym, ComplexTensor3, ComplexVec3, RealTensor3, RealVec3, Sym, Symmetry};

/// Signed index type used throughout the engine.
///
/// `-1` means "not connected" (branch side) or "no group" (isolated
/// component). [`na_idx`] is the "not assigned" sentinel for dataset fields.
pub type Idx = i64;

/// Small signed integer for status flags and enum storage.
pub type IntS = i8;

/// Externally assigned opaque component identifier.
pub type Id = i64;

/// Sentinel for "not assigned" integer attributes (one past the minimum).
pub const NA_IDX: Idx = Idx::MIN + 1;

/// Sentinel for "not assigned" status attributes.
pub const NA_INT_S: IntS = IntS::MIN;

/// Returns true if an integer attribute carries the "not assigned" sentinel.
pub fn is_na_idx(x: Idx) -> bool {
    x == NA_IDX
}

/// Returns true if a status attribute carries the "not assigned" sentinel.
pub fn is_na_int_s(x: IntS) -> bool {
    x == NA_INT_S
}

/// Position of a component inside the decomposed math model.
///
/// `group` is the subgrid sequence number (`-1` for isolated components),
/// `pos` the component's position inside that subgrid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idx2D {
    pub group: Idx,
    pub pos: Idx,
}

impl Idx2D {
    pub const ISOLATED: Idx2D = Idx2D { group: -1, pos: -1 };

    pub fn new(group: Idx, pos: Idx) -> Self {
        Self { group, pos }
    }

    pub fn is_isolated(&self) -> bool {
        self.group == -1
    }
}

impl Default for Idx2D {
    fn default() -> Self {
        Self::ISOLATED
    }
}

/// Math-model position of a three-winding branch.
///
/// The three equivalent two-winding branches always land in the same
/// subgrid; `pos[n]` is the math branch for terminal `n` towards the
/// internal star node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idx2DBranch3 {
    pub group: Idx,
    pub pos: [Idx; 3],
}

impl Default for Idx2DBranch3 {
    fn default() -> Self {
        Self {
            group: -1,
            pos: [-1, -1, -1],
        }
    }
}

/// From- and to-side bus index of a branch inside one subgrid.
///
/// `-1` means the branch is not connected at that side.
pub type BranchIdx = [Idx; 2];

/// Bus indices of the three terminals of a three-winding branch.
pub type Branch3Idx = [Idx; 3];

/// Voltage-dependence model of a load or generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadGenType {
    /// Constant power
    ConstPq,
    /// Constant admittance (impedance)
    ConstY,
    /// Constant current
    ConstI,
}

/// Side of a two-winding branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchSide {
    From = 0,
    To = 1,
}

/// Terminal of a three-winding branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch3Side {
    Side1 = 0,
    Side2 = 1,
    Side3 = 2,
}

/// Numerical method used for a calculation.
///
/// Power flow accepts `Linear`, `NewtonRaphson` and `IterativeCurrent`;
/// state estimation accepts `IterativeLinear` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculationMethod {
    Linear,
    NewtonRaphson,
    IterativeLinear,
    IterativeCurrent,
}

/// Transformer winding configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindingType {
    Wye,
    WyeN,
    Delta,
    Zigzag,
    ZigzagN,
}

impl WindingType {
    /// Wye-family windings pair with even clock numbers against each other.
    pub fn is_wye(self) -> bool {
        matches!(self, WindingType::Wye | WindingType::WyeN)
    }
}

/// Kind of terminal a power sensor observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasuredTerminalType {
    BranchFrom = 0,
    BranchTo = 1,
    Source = 2,
    Shunt = 3,
    Load = 4,
    Generator = 5,
    Branch3Side1 = 6,
    Branch3Side2 = 7,
    Branch3Side3 = 8,
}

/// Entry kind of the Y-bus admittance matrix.
///
/// For the branch variants the two low bits encode the from(0)/to(1) side
/// pair, i.e. `Bft = 0b01` is the `y_ft` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YBusElementType {
    Bff = 0b00,
    Bft = 0b01,
    Btf = 0b10,
    Btt = 0b11,
    Shunt = 0b100,
}

impl YBusElementType {
    /// The four branch element kinds in `y_ff, y_ft, y_tf, y_tt` order.
    pub const BRANCH: [YBusElementType; 4] = [
        YBusElementType::Bff,
        YBusElementType::Bft,
        YBusElementType::Btf,
        YBusElementType::Btt,
    ];

    /// Position of this element inside a branch parameter block.
    pub fn branch_value_index(self) -> usize {
        self as usize
    }
}

/// One contribution to a Y-bus matrix entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YBusElement {
    pub element_type: YBusElementType,
    /// Index of the contributing branch or shunt inside its subgrid.
    pub idx: Idx,
}

/// Convergence and threading settings for one calculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalculationParams {
    /// Convergence tolerance on the maximum voltage deviation (p.u.).
    pub err_tol: f64,
    /// Maximum number of iterations before [`PowerGridError::IterationDiverge`].
    pub max_iter: Idx,
    /// Batch threading hint: `< 0` sequential, `0` hardware concurrency,
    /// `> 0` explicit thread count.
    pub threading: Idx,
}

impl Default for CalculationParams {
    fn default() -> Self {
        Self {
            err_tol: 1e-8,
            max_iter: 20,
            threading: -1,
        }
    }
}
