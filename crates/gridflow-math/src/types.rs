//! Data carried between the topology layer and the solvers.
//!
//! One [`MathModelTopology`] plus one [`MathModelParam`] describe a single
//! subgrid. Topologies and parameters are published behind `Arc` once built:
//! the symmetric and asymmetric solver for the same subgrid share the
//! topology, and a parameter-only update replaces values without touching
//! structure.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use gridflow_core::{BranchIdx, Idx, IntS, LoadGenType, Symmetry};

/// Topology of one math subgrid.
///
/// Buses are numbered `0..n_bus` in the solver ordering chosen by the
/// topology decomposer (leaves first for radial grids, minimum-degree for
/// meshed regions, slack bus last). All component lists are grouped per bus
/// (or per observed object, for power sensors) through CSR index pointers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MathModelTopology {
    /// Bus whose phase is fixed; always a source bus.
    pub slack_bus: Idx,
    /// Intrinsic phase shift per bus, integrated from the slack bus.
    pub phase_shift: Vec<f64>,
    /// From- and to-bus of each branch; `-1` for a disconnected side.
    pub branch_bus_idx: Vec<BranchIdx>,
    /// Voltage dependence of each load/generator.
    pub load_gen_type: Vec<LoadGenType>,
    /// Shunts grouped per bus.
    pub shunt_bus_indptr: Vec<Idx>,
    /// Loads/generators grouped per bus.
    pub load_gen_bus_indptr: Vec<Idx>,
    /// Sources grouped per bus.
    pub source_bus_indptr: Vec<Idx>,
    /// Voltage sensors grouped per bus.
    pub voltage_sensor_indptr: Vec<Idx>,
    /// Power sensors grouped per observed source.
    pub source_power_sensor_indptr: Vec<Idx>,
    /// Power sensors grouped per observed shunt.
    pub shunt_power_sensor_indptr: Vec<Idx>,
    /// Power sensors grouped per observed load/generator.
    pub load_gen_power_sensor_indptr: Vec<Idx>,
    /// Power sensors grouped per observed branch from-side.
    pub branch_from_power_sensor_indptr: Vec<Idx>,
    /// Power sensors grouped per observed branch to-side.
    pub branch_to_power_sensor_indptr: Vec<Idx>,
}

impl MathModelTopology {
    pub fn n_bus(&self) -> Idx {
        self.phase_shift.len() as Idx
    }

    pub fn n_branch(&self) -> Idx {
        self.branch_bus_idx.len() as Idx
    }

    pub fn n_shunt(&self) -> Idx {
        self.shunt_bus_indptr.last().copied().unwrap_or(0)
    }

    pub fn n_load_gen(&self) -> Idx {
        self.load_gen_bus_indptr.last().copied().unwrap_or(0)
    }

    pub fn n_source(&self) -> Idx {
        self.source_bus_indptr.last().copied().unwrap_or(0)
    }
}

/// Admittance blocks of one branch: `y_ff, y_ft, y_tf, y_tt`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct BranchCalcParam<S: Symmetry> {
    pub value: [S::ComplexTensor; 4],
}

impl<S: Symmetry> BranchCalcParam<S> {
    pub fn yff(&self) -> &S::ComplexTensor {
        &self.value[0]
    }
    pub fn yft(&self) -> &S::ComplexTensor {
        &self.value[1]
    }
    pub fn ytf(&self) -> &S::ComplexTensor {
        &self.value[2]
    }
    pub fn ytt(&self) -> &S::ComplexTensor {
        &self.value[3]
    }
}

/// Source series admittance in positive and zero sequence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceCalcParam {
    pub y1: Complex64,
    pub y0: Complex64,
}

impl SourceCalcParam {
    /// The reference admittance block in the requested symmetry.
    pub fn y_ref<S: Symmetry>(&self) -> S::ComplexTensor {
        S::tensor_from_sequence(self.y1, self.y0)
    }
}

/// Per-subgrid component parameters, same ordering as the topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct MathModelParam<S: Symmetry> {
    pub branch_param: Vec<BranchCalcParam<S>>,
    pub shunt_param: Vec<S::ComplexTensor>,
    pub source_param: Vec<SourceCalcParam>,
}

/// Indices of parameters changed by an incremental update.
#[derive(Debug, Clone, Default)]
pub struct MathModelParamIncrement {
    pub branch_param_to_change: Vec<Idx>,
    pub shunt_param_to_change: Vec<Idx>,
}

/// Input of one power-flow calculation on one subgrid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PowerFlowInput<S: Symmetry> {
    /// Reference voltage phasor of each source.
    pub source: Vec<Complex64>,
    /// Specified injection of each load/generator.
    pub s_injection: Vec<S::ComplexValue>,
}

/// One aggregated measurement: value plus variance.
///
/// A voltage measurement with unknown angle carries NaN in its imaginary
/// part. Variance zero is a hard constraint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SensorCalcParam<S: Symmetry> {
    pub value: S::ComplexValue,
    pub variance: f64,
}

/// Input of one state-estimation calculation on one subgrid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateEstimationInput<S: Symmetry> {
    /// Connection status per shunt; measurements of disconnected appliances
    /// are discarded.
    pub shunt_status: Vec<IntS>,
    pub load_gen_status: Vec<IntS>,
    pub source_status: Vec<IntS>,
    pub measured_voltage: Vec<SensorCalcParam<S>>,
    pub measured_source_power: Vec<SensorCalcParam<S>>,
    pub measured_load_gen_power: Vec<SensorCalcParam<S>>,
    pub measured_shunt_power: Vec<SensorCalcParam<S>>,
    pub measured_branch_from_power: Vec<SensorCalcParam<S>>,
    pub measured_branch_to_power: Vec<SensorCalcParam<S>>,
}

/// Flow through one branch, both sides.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct BranchSolverOutput<S: Symmetry> {
    pub s_f: S::ComplexValue,
    pub s_t: S::ComplexValue,
    pub i_f: S::ComplexValue,
    pub i_t: S::ComplexValue,
}

/// Power and current of one appliance, injection direction (appliance to
/// node counts positive).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ApplianceSolverOutput<S: Symmetry> {
    pub s: S::ComplexValue,
    pub i: S::ComplexValue,
}

/// Result of one solver run on one subgrid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SolverOutput<S: Symmetry> {
    pub u: Vec<S::ComplexValue>,
    pub bus_injection: Vec<S::ComplexValue>,
    pub branch: Vec<BranchSolverOutput<S>>,
    pub source: Vec<ApplianceSolverOutput<S>>,
    pub shunt: Vec<ApplianceSolverOutput<S>>,
    pub load_gen: Vec<ApplianceSolverOutput<S>>,
}
