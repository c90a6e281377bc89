//! Physical result rows, per component table, in SI units.
//!
//! Projection back from the per-subgrid solver outputs happens in the main
//! model; rows of de-energised or isolated components carry NaN values with
//! `energized = 0`.

use serde::{Deserialize, Serialize};

use gridflow_core::{Id, IntS, Symmetry};

/// Voltage result of one node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NodeOutput<S: Symmetry> {
    pub id: Id,
    pub energized: IntS,
    /// Voltage magnitude, per unit.
    pub u_pu: S::RealValue,
    /// Voltage magnitude in volt (phase-to-neutral per phase in the
    /// asymmetric calculation).
    pub u: S::RealValue,
    /// Voltage angle in radians.
    pub u_angle: S::RealValue,
}

/// Flow result of one branch, both sides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct BranchOutput<S: Symmetry> {
    pub id: Id,
    pub energized: IntS,
    /// Relative loading against the rated current or power.
    pub loading: f64,
    pub p_from: S::RealValue,
    pub q_from: S::RealValue,
    pub i_from: S::RealValue,
    pub s_from: S::RealValue,
    pub p_to: S::RealValue,
    pub q_to: S::RealValue,
    pub i_to: S::RealValue,
    pub s_to: S::RealValue,
}

/// Flow result of a three-winding transformer, all three sides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Branch3Output<S: Symmetry> {
    pub id: Id,
    pub energized: IntS,
    pub loading: f64,
    pub p_1: S::RealValue,
    pub q_1: S::RealValue,
    pub i_1: S::RealValue,
    pub s_1: S::RealValue,
    pub p_2: S::RealValue,
    pub q_2: S::RealValue,
    pub i_2: S::RealValue,
    pub s_2: S::RealValue,
    pub p_3: S::RealValue,
    pub q_3: S::RealValue,
    pub i_3: S::RealValue,
    pub s_3: S::RealValue,
}

/// Power result of one appliance, injection direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ApplianceOutput<S: Symmetry> {
    pub id: Id,
    pub energized: IntS,
    pub p: S::RealValue,
    pub q: S::RealValue,
    pub i: S::RealValue,
    pub s: S::RealValue,
    /// Power factor, zero where no power flows.
    pub pf: S::RealValue,
}

/// One scenario of results over all component tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PhysicalOutput<S: Symmetry> {
    pub node: Vec<NodeOutput<S>>,
    pub line: Vec<BranchOutput<S>>,
    pub link: Vec<BranchOutput<S>>,
    pub transformer: Vec<BranchOutput<S>>,
    pub three_winding_transformer: Vec<Branch3Output<S>>,
    pub shunt: Vec<ApplianceOutput<S>>,
    pub source: Vec<ApplianceOutput<S>>,
    pub load_gen: Vec<ApplianceOutput<S>>,
}

pub(crate) fn nan_real<S: Symmetry>() -> S::RealValue {
    S::real_uniform(f64::NAN)
}

impl<S: Symmetry> NodeOutput<S> {
    pub(crate) fn de_energized(id: Id) -> Self {
        NodeOutput {
            id,
            energized: 0,
            u_pu: nan_real::<S>(),
            u: nan_real::<S>(),
            u_angle: nan_real::<S>(),
        }
    }
}

impl<S: Symmetry> BranchOutput<S> {
    pub(crate) fn de_energized(id: Id) -> Self {
        BranchOutput {
            id,
            energized: 0,
            loading: f64::NAN,
            p_from: nan_real::<S>(),
            q_from: nan_real::<S>(),
            i_from: nan_real::<S>(),
            s_from: nan_real::<S>(),
            p_to: nan_real::<S>(),
            q_to: nan_real::<S>(),
            i_to: nan_real::<S>(),
            s_to: nan_real::<S>(),
        }
    }
}

impl<S: Symmetry> Branch3Output<S> {
    pub(crate) fn de_energized(id: Id) -> Self {
        Branch3Output {
            id,
            energized: 0,
            loading: f64::NAN,
            p_1: nan_real::<S>(),
            q_1: nan_real::<S>(),
            i_1: nan_real::<S>(),
            s_1: nan_real::<S>(),
            p_2: nan_real::<S>(),
            q_2: nan_real::<S>(),
            i_2: nan_real::<S>(),
            s_2: nan_real::<S>(),
            p_3: nan_real::<S>(),
            q_3: nan_real::<S>(),
            i_3: nan_real::<S>(),
            s_3: nan_real::<S>(),
        }
    }
}

impl<S: Symmetry> ApplianceOutput<S> {
    pub(crate) fn de_energized(id: Id) -> Self {
        ApplianceOutput {
            id,
            energized: 0,
            p: nan_real::<S>(),
            q: nan_real::<S>(),
            i: nan_real::<S>(),
            s: nan_real::<S>(),
            pf: nan_real::<S>(),
        }
    }
}
