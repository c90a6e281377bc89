//! The main model: component tables, topology assembly, solver dispatch and
//! result projection.
//!
//! Construction validates the dataset (ids, references, structural rules)
//! and resolves all id references to indices. The topology decomposition,
//! Y-bus structures and per-symmetry solvers are built lazily and cached;
//! updates mark the affected layers dirty. A cloned model shares the
//! decomposition and Y-bus structures with its original, which is what
//! makes cheap per-scenario copies in batch runs possible.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use num_complex::Complex64;
use tracing::debug;

use gridflow_core::{
    CalculationMethod, CalculationParams, Id, Idx, MeasuredTerminalType, PowerGridError, Result,
    Symmetry,
};
use gridflow_math::topology::{
    assemble_math_param, assemble_power_flow_input, assemble_state_estimation_input,
    ComponentConnections, ComponentToMathCoupling, ComponentTopology, Topology,
};
use gridflow_math::types::{
    MathModelParam, MathModelParamIncrement, MathModelTopology, SolverOutput,
};
use gridflow_math::y_bus::YBusStructure;
use gridflow_math::MathSolver;

use crate::component::{ApplianceDirection, BASE_POWER_1P, BASE_POWER_3P};
use crate::dataset::{ComponentKind, InputDataset, UpdateDataset};
use crate::output::{
    ApplianceOutput, Branch3Output, BranchOutput, NodeOutput, PhysicalOutput,
};
use crate::update::{update_double, update_double3, update_status};

const SQRT3: f64 = gridflow_core::phasor::SQRT3;

/// Cached topology decomposition, shared between symmetries and clones.
#[derive(Clone)]
struct TopologyState {
    topologies: Vec<Arc<MathModelTopology>>,
    coupling: Arc<ComponentToMathCoupling>,
    structures: Vec<Arc<YBusStructure>>,
}

/// Per-symmetry solver instances. Opaque to callers; exposed only through
/// [`SolverAccess`].
pub struct SolverSet<S: Symmetry> {
    solvers: Vec<MathSolver<S>>,
    stale_params: bool,
}

impl<S: Symmetry> Default for SolverSet<S> {
    fn default() -> Self {
        SolverSet {
            solvers: Vec::new(),
            stale_params: false,
        }
    }
}

/// Pre-resolved component sequence indices of an independent update batch,
/// so per-scenario application skips the id lookups.
#[derive(Debug, Clone, Default)]
pub struct SequenceIdxMap {
    pub line: Vec<usize>,
    pub link: Vec<usize>,
    pub transformer: Vec<usize>,
    pub three_winding_transformer: Vec<usize>,
    pub shunt: Vec<usize>,
    pub source: Vec<usize>,
    pub load_gen: Vec<usize>,
    pub voltage_sensor: Vec<usize>,
    pub power_sensor: Vec<usize>,
}

/// References of every component resolved to table indices.
#[derive(Debug, Clone, Default)]
struct ResolvedReferences {
    line_nodes: Vec<[Idx; 2]>,
    link_nodes: Vec<[Idx; 2]>,
    transformer_nodes: Vec<[Idx; 2]>,
    branch3_nodes: Vec<[Idx; 3]>,
    shunt_node: Vec<Idx>,
    source_node: Vec<Idx>,
    load_gen_node: Vec<Idx>,
    voltage_sensor_node: Vec<Idx>,
    /// Observed object index relative to its component class (global branch
    /// index for branch sensors).
    power_sensor_object: Vec<Idx>,
}

/// The base model of one network.
pub struct MainModel {
    input: InputDataset,
    id_map: HashMap<Id, (ComponentKind, usize)>,
    resolved: ResolvedReferences,
    topology: Option<TopologyState>,
    topology_dirty: bool,
    solvers_sym: SolverSet<gridflow_core::Sym>,
    solvers_asym: SolverSet<gridflow_core::Asym>,
    // physical indices with changed admittance parameters since the last
    // topology build, for the incremental Y-bus update
    changed_branch: Vec<Idx>,
    changed_branch3: Vec<Idx>,
    changed_shunt: Vec<Idx>,
}

impl Clone for MainModel {
    fn clone(&self) -> Self {
        MainModel {
            input: self.input.clone(),
            id_map: self.id_map.clone(),
            resolved: self.resolved.clone(),
            topology: self.topology.clone(),
            topology_dirty: self.topology_dirty,
            // solver instances stay with the original; the clone rebuilds
            // its own on demand against the shared structures
            solvers_sym: SolverSet::default(),
            solvers_asym: SolverSet::default(),
            changed_branch: self.changed_branch.clone(),
            changed_branch3: self.changed_branch3.clone(),
            changed_shunt: self.changed_shunt.clone(),
        }
    }
}

/// Access to the solver set of one symmetry.
pub trait SolverAccess<S: Symmetry> {
    #[doc(hidden)]
    fn solver_set(&mut self) -> &mut SolverSet<S>;
}

impl SolverAccess<gridflow_core::Sym> for MainModel {
    fn solver_set(&mut self) -> &mut SolverSet<gridflow_core::Sym> {
        &mut self.solvers_sym
    }
}

impl SolverAccess<gridflow_core::Asym> for MainModel {
    fn solver_set(&mut self) -> &mut SolverSet<gridflow_core::Asym> {
        &mut self.solvers_asym
    }
}

impl MainModel {
    /// Construct and validate a model from an input dataset.
    pub fn new(input: InputDataset) -> Result<Self> {
        let mut model = MainModel {
            input,
            id_map: HashMap::new(),
            resolved: ResolvedReferences::default(),
            topology: None,
            topology_dirty: true,
            solvers_sym: SolverSet::default(),
            solvers_asym: SolverSet::default(),
            changed_branch: Vec::new(),
            changed_branch3: Vec::new(),
            changed_shunt: Vec::new(),
        };
        model.build_id_map()?;
        model.resolve_and_validate()?;
        Ok(model)
    }

    pub fn input(&self) -> &InputDataset {
        &self.input
    }

    fn build_id_map(&mut self) -> Result<()> {
        let mut id_map = HashMap::new();
        let mut insert = |id: Id, kind: ComponentKind, index: usize| -> Result<()> {
            match id_map.entry(id) {
                Entry::Vacant(entry) => {
                    entry.insert((kind, index));
                    Ok(())
                }
                Entry::Occupied(_) => Err(PowerGridError::ConflictId(id)),
            }
        };
        for (i, row) in self.input.node.iter().enumerate() {
            insert(row.id, ComponentKind::Node, i)?;
        }
        for (i, row) in self.input.line.iter().enumerate() {
            insert(row.id, ComponentKind::Line, i)?;
        }
        for (i, row) in self.input.link.iter().enumerate() {
            insert(row.id, ComponentKind::Link, i)?;
        }
        for (i, row) in self.input.transformer.iter().enumerate() {
            insert(row.id, ComponentKind::Transformer, i)?;
        }
        for (i, row) in self.input.three_winding_transformer.iter().enumerate() {
            insert(row.id, ComponentKind::ThreeWindingTransformer, i)?;
        }
        for (i, row) in self.input.shunt.iter().enumerate() {
            insert(row.id, ComponentKind::Shunt, i)?;
        }
        for (i, row) in self.input.source.iter().enumerate() {
            insert(row.id, ComponentKind::Source, i)?;
        }
        for (i, row) in self.input.load_gen.iter().enumerate() {
            insert(row.id, ComponentKind::LoadGen, i)?;
        }
        for (i, row) in self.input.voltage_sensor.iter().enumerate() {
            insert(row.id, ComponentKind::VoltageSensor, i)?;
        }
        for (i, row) in self.input.power_sensor.iter().enumerate() {
            insert(row.id, ComponentKind::PowerSensor, i)?;
        }
        self.id_map = id_map;
        Ok(())
    }

    fn node_index(&self, id: Id) -> Result<Idx> {
        match self.id_map.get(&id) {
            Some((ComponentKind::Node, index)) => Ok(*index as Idx),
            Some(_) => Err(PowerGridError::IdWrongType(id)),
            None => Err(PowerGridError::IdNotFound(id)),
        }
    }

    fn lookup(&self, id: Id) -> Result<(ComponentKind, usize)> {
        self.id_map
            .get(&id)
            .copied()
            .ok_or(PowerGridError::IdNotFound(id))
    }

    fn resolve_and_validate(&mut self) -> Result<()> {
        let mut resolved = ResolvedReferences::default();

        for line in &self.input.line {
            let from = self.node_index(line.from_node)?;
            let to = self.node_index(line.to_node)?;
            if from == to {
                return Err(PowerGridError::InvalidBranch {
                    branch_id: line.id,
                    node_id: line.from_node,
                });
            }
            let u1 = self.input.node[from as usize].u_rated;
            let u2 = self.input.node[to as usize].u_rated;
            if u1 != u2 {
                return Err(PowerGridError::ConflictVoltage {
                    id: line.id,
                    from_node: line.from_node,
                    to_node: line.to_node,
                    u1,
                    u2,
                });
            }
            resolved.line_nodes.push([from, to]);
        }
        for link in &self.input.link {
            let from = self.node_index(link.from_node)?;
            let to = self.node_index(link.to_node)?;
            if from == to {
                return Err(PowerGridError::InvalidBranch {
                    branch_id: link.id,
                    node_id: link.from_node,
                });
            }
            let u1 = self.input.node[from as usize].u_rated;
            let u2 = self.input.node[to as usize].u_rated;
            if u1 != u2 {
                return Err(PowerGridError::ConflictVoltage {
                    id: link.id,
                    from_node: link.from_node,
                    to_node: link.to_node,
                    u1,
                    u2,
                });
            }
            resolved.link_nodes.push([from, to]);
        }
        for transformer in &self.input.transformer {
            let from = self.node_index(transformer.from_node)?;
            let to = self.node_index(transformer.to_node)?;
            if from == to {
                return Err(PowerGridError::InvalidBranch {
                    branch_id: transformer.id,
                    node_id: transformer.from_node,
                });
            }
            transformer.validate_clock()?;
            resolved.transformer_nodes.push([from, to]);
        }
        for branch3 in &self.input.three_winding_transformer {
            let n1 = self.node_index(branch3.node_1)?;
            let n2 = self.node_index(branch3.node_2)?;
            let n3 = self.node_index(branch3.node_3)?;
            if n1 == n2 || n1 == n3 || n2 == n3 {
                return Err(PowerGridError::InvalidBranch {
                    branch_id: branch3.id,
                    node_id: branch3.node_1,
                });
            }
            branch3.validate_clocks()?;
            resolved.branch3_nodes.push([n1, n2, n3]);
        }
        for shunt in &self.input.shunt {
            resolved.shunt_node.push(self.node_index(shunt.node)?);
        }
        for source in &self.input.source {
            resolved.source_node.push(self.node_index(source.node)?);
        }
        for load_gen in &self.input.load_gen {
            resolved.load_gen_node.push(self.node_index(load_gen.node)?);
        }
        for sensor in &self.input.voltage_sensor {
            resolved
                .voltage_sensor_node
                .push(self.node_index(sensor.measured_object)?);
        }

        let n_line = self.input.line.len();
        let n_link = self.input.link.len();
        for sensor in &self.input.power_sensor {
            let (kind, index) = self.lookup(sensor.measured_object)?;
            let object_idx = match sensor.measured_terminal_type {
                MeasuredTerminalType::BranchFrom | MeasuredTerminalType::BranchTo => match kind {
                    ComponentKind::Line => index as Idx,
                    ComponentKind::Link => {
                        return Err(PowerGridError::InvalidMeasuredObject {
                            object: "link".into(),
                            sensor: "power_sensor".into(),
                        })
                    }
                    ComponentKind::Transformer => (n_line + n_link + index) as Idx,
                    _ => return Err(PowerGridError::IdWrongType(sensor.measured_object)),
                },
                MeasuredTerminalType::Source => match kind {
                    ComponentKind::Source => index as Idx,
                    _ => return Err(PowerGridError::IdWrongType(sensor.measured_object)),
                },
                MeasuredTerminalType::Shunt => match kind {
                    ComponentKind::Shunt => index as Idx,
                    _ => return Err(PowerGridError::IdWrongType(sensor.measured_object)),
                },
                MeasuredTerminalType::Load | MeasuredTerminalType::Generator => match kind {
                    ComponentKind::LoadGen => {
                        let expected = match sensor.measured_terminal_type {
                            MeasuredTerminalType::Load => ApplianceDirection::Load,
                            _ => ApplianceDirection::Generator,
                        };
                        if self.input.load_gen[index].direction != expected {
                            return Err(PowerGridError::IdWrongType(sensor.measured_object));
                        }
                        index as Idx
                    }
                    _ => return Err(PowerGridError::IdWrongType(sensor.measured_object)),
                },
                MeasuredTerminalType::Branch3Side1
                | MeasuredTerminalType::Branch3Side2
                | MeasuredTerminalType::Branch3Side3 => {
                    return Err(PowerGridError::InvalidMeasuredObject {
                        object: "three_winding_transformer".into(),
                        sensor: "power_sensor".into(),
                    })
                }
            };
            resolved.power_sensor_object.push(object_idx);
        }

        self.resolved = resolved;
        Ok(())
    }

    /// Component topology in the concatenated branch order: lines, links,
    /// transformers.
    fn build_component_topology(&self) -> (ComponentTopology, ComponentConnections) {
        let input = &self.input;
        let resolved = &self.resolved;

        let mut branch_node_idx = Vec::new();
        let mut branch_connected = Vec::new();
        let mut branch_phase_shift = Vec::new();
        for (line, nodes) in input.line.iter().zip(&resolved.line_nodes) {
            branch_node_idx.push(*nodes);
            branch_connected.push([line.from_status != 0, line.to_status != 0]);
            branch_phase_shift.push(0.0);
        }
        for (link, nodes) in input.link.iter().zip(&resolved.link_nodes) {
            branch_node_idx.push(*nodes);
            branch_connected.push([link.from_status != 0, link.to_status != 0]);
            branch_phase_shift.push(0.0);
        }
        for (transformer, nodes) in input.transformer.iter().zip(&resolved.transformer_nodes) {
            branch_node_idx.push(*nodes);
            branch_connected.push([transformer.from_status != 0, transformer.to_status != 0]);
            branch_phase_shift.push(transformer.phase_shift());
        }

        let mut branch3_node_idx = Vec::new();
        let mut branch3_connected = Vec::new();
        let mut branch3_phase_shift = Vec::new();
        for (branch3, nodes) in input
            .three_winding_transformer
            .iter()
            .zip(&resolved.branch3_nodes)
        {
            branch3_node_idx.push(*nodes);
            branch3_connected.push(branch3.connected());
            branch3_phase_shift.push(branch3.phase_shift());
        }

        let comp_topo = ComponentTopology {
            n_node: input.node.len() as Idx,
            branch_node_idx,
            branch3_node_idx,
            shunt_node_idx: resolved.shunt_node.clone(),
            source_node_idx: resolved.source_node.clone(),
            load_gen_node_idx: resolved.load_gen_node.clone(),
            load_gen_type: input.load_gen.iter().map(|l| l.load_gen_type).collect(),
            voltage_sensor_node_idx: resolved.voltage_sensor_node.clone(),
            power_sensor_object_idx: resolved.power_sensor_object.clone(),
            power_sensor_terminal_type: input
                .power_sensor
                .iter()
                .map(|s| s.measured_terminal_type)
                .collect(),
        };
        let comp_conn = ComponentConnections {
            branch_connected,
            branch3_connected,
            branch_phase_shift,
            branch3_phase_shift,
            source_connected: input.source.iter().map(|s| s.status != 0).collect(),
        };
        (comp_topo, comp_conn)
    }

    fn ensure_topology(&mut self) {
        if self.topology.is_some() && !self.topology_dirty {
            return;
        }
        let (comp_topo, comp_conn) = self.build_component_topology();
        let (topologies, coupling) = Topology::new(&comp_topo, &comp_conn).build();
        let structures = topologies
            .iter()
            .map(|topo| Arc::new(YBusStructure::new(topo)))
            .collect();
        debug!(n_subgrids = topologies.len(), "topology rebuilt");
        self.topology = Some(TopologyState {
            topologies,
            coupling,
            structures,
        });
        self.topology_dirty = false;
        self.solvers_sym = SolverSet::default();
        self.solvers_asym = SolverSet::default();
        self.changed_branch.clear();
        self.changed_branch3.clear();
        self.changed_shunt.clear();
    }

    fn u_rated(&self, node_idx: Idx) -> f64 {
        self.input.node[node_idx as usize].u_rated
    }

    fn assemble_params<S: Symmetry>(&self, state: &TopologyState) -> Vec<MathModelParam<S>> {
        let input = &self.input;
        let resolved = &self.resolved;
        let mut branch_param = Vec::new();
        for (line, nodes) in input.line.iter().zip(&resolved.line_nodes) {
            branch_param.push(line.calc_param::<S>(self.u_rated(nodes[0])));
        }
        for link in &input.link {
            branch_param.push(link.calc_param::<S>());
        }
        for (transformer, nodes) in input.transformer.iter().zip(&resolved.transformer_nodes) {
            branch_param.push(
                transformer.calc_param::<S>(self.u_rated(nodes[0]), self.u_rated(nodes[1])),
            );
        }
        let branch3_param: Vec<_> = input
            .three_winding_transformer
            .iter()
            .zip(&resolved.branch3_nodes)
            .map(|(branch3, nodes)| {
                branch3.calc_param::<S>([
                    self.u_rated(nodes[0]),
                    self.u_rated(nodes[1]),
                    self.u_rated(nodes[2]),
                ])
            })
            .collect();
        let shunt_param: Vec<_> = input
            .shunt
            .iter()
            .zip(&resolved.shunt_node)
            .map(|(shunt, &node)| shunt.calc_param::<S>(self.u_rated(node)))
            .collect();
        let source_param: Vec<_> = input.source.iter().map(|s| s.calc_param()).collect();

        assemble_math_param::<S>(
            &state.coupling,
            &state.topologies,
            &branch_param,
            &branch3_param,
            &shunt_param,
            &source_param,
        )
    }

    /// Per-subgrid incremental-update descriptors from the accumulated
    /// physical change lists.
    fn build_increments(&self, state: &TopologyState) -> Vec<MathModelParamIncrement> {
        let mut increments = vec![MathModelParamIncrement::default(); state.topologies.len()];
        for &branch in &self.changed_branch {
            let idx = state.coupling.branch[branch as usize];
            if idx.group >= 0 {
                increments[idx.group as usize]
                    .branch_param_to_change
                    .push(idx.pos);
            }
        }
        for &branch3 in &self.changed_branch3 {
            let idx = state.coupling.branch3[branch3 as usize];
            if idx.group >= 0 {
                increments[idx.group as usize]
                    .branch_param_to_change
                    .extend(idx.pos);
            }
        }
        for &shunt in &self.changed_shunt {
            let idx = state.coupling.shunt[shunt as usize];
            if idx.group >= 0 {
                increments[idx.group as usize]
                    .shunt_param_to_change
                    .push(idx.pos);
            }
        }
        for increment in &mut increments {
            increment.branch_param_to_change.sort_unstable();
            increment.branch_param_to_change.dedup();
            increment.shunt_param_to_change.sort_unstable();
            increment.shunt_param_to_change.dedup();
        }
        increments
    }

    fn ensure_solvers<S: Symmetry>(&mut self, state: &TopologyState)
    where
        Self: SolverAccess<S>,
    {
        let needs_build = <Self as SolverAccess<S>>::solver_set(self).solvers.is_empty();
        let stale = <Self as SolverAccess<S>>::solver_set(self).stale_params;
        if !needs_build && !stale {
            return;
        }
        let params = self.assemble_params::<S>(state);
        if needs_build {
            let solvers = state
                .topologies
                .iter()
                .zip(&state.structures)
                .zip(params)
                .map(|((topo, structure), param)| {
                    MathSolver::new(Arc::clone(topo), Arc::new(param), Some(Arc::clone(structure)))
                })
                .collect();
            let set = <Self as SolverAccess<S>>::solver_set(self);
            set.solvers = solvers;
            set.stale_params = false;
        } else {
            let increments = self.build_increments(state);
            let set = <Self as SolverAccess<S>>::solver_set(self);
            for ((solver, param), increment) in
                set.solvers.iter_mut().zip(params).zip(&increments)
            {
                solver.update_value(Arc::new(param), Some(increment));
            }
            set.stale_params = false;
        }
    }

    /// Run a power-flow calculation over all subgrids.
    pub fn calculate_power_flow<S: Symmetry>(
        &mut self,
        calculation_params: &CalculationParams,
        method: CalculationMethod,
    ) -> Result<PhysicalOutput<S>>
    where
        Self: SolverAccess<S>,
    {
        if !matches!(
            method,
            CalculationMethod::Linear
                | CalculationMethod::NewtonRaphson
                | CalculationMethod::IterativeCurrent
        ) {
            return Err(PowerGridError::InvalidCalculationMethod);
        }
        self.ensure_topology();
        let state = self.topology.clone().expect("topology just built");
        self.ensure_solvers::<S>(&state);

        let source_u_ref: Vec<Complex64> = self
            .input
            .source
            .iter()
            .map(|s| Complex64::new(s.u_ref, 0.0))
            .collect();
        let load_gen_s: Vec<S::ComplexValue> = self
            .input
            .load_gen
            .iter()
            .map(|l| {
                if l.status != 0 {
                    l.s_specified::<S>()
                } else {
                    S::ComplexValue::default()
                }
            })
            .collect();
        let inputs = assemble_power_flow_input::<S>(
            &state.coupling,
            &state.topologies,
            &source_u_ref,
            &load_gen_s,
        );

        let err_tol = calculation_params.err_tol;
        let max_iter = calculation_params.max_iter;
        let set = <Self as SolverAccess<S>>::solver_set(self);
        let mut outputs = Vec::with_capacity(inputs.len());
        for (solver, input) in set.solvers.iter_mut().zip(&inputs) {
            outputs.push(solver.run_power_flow(input, err_tol, max_iter, method)?);
        }
        Ok(self.project_output::<S>(&state, &outputs))
    }

    /// Run a state estimation over all subgrids.
    pub fn calculate_state_estimation<S: Symmetry>(
        &mut self,
        calculation_params: &CalculationParams,
        method: CalculationMethod,
    ) -> Result<PhysicalOutput<S>>
    where
        Self: SolverAccess<S>,
    {
        if method != CalculationMethod::IterativeLinear {
            return Err(PowerGridError::InvalidCalculationMethod);
        }
        self.ensure_topology();
        let state = self.topology.clone().expect("topology just built");
        self.ensure_solvers::<S>(&state);

        let shunt_status: Vec<bool> = self.input.shunt.iter().map(|s| s.status != 0).collect();
        let load_gen_status: Vec<bool> =
            self.input.load_gen.iter().map(|l| l.status != 0).collect();
        let source_status: Vec<bool> = self.input.source.iter().map(|s| s.status != 0).collect();
        let voltage_measurements: Vec<_> = self
            .input
            .voltage_sensor
            .iter()
            .zip(&self.resolved.voltage_sensor_node)
            .map(|(sensor, &node)| sensor.calc_param::<S>(self.u_rated(node)))
            .collect();
        let power_measurements: Vec<_> = self
            .input
            .power_sensor
            .iter()
            .map(|sensor| sensor.calc_param::<S>())
            .collect();
        let power_terminal_type: Vec<_> = self
            .input
            .power_sensor
            .iter()
            .map(|sensor| sensor.measured_terminal_type)
            .collect();
        let inputs = assemble_state_estimation_input::<S>(
            &state.coupling,
            &state.topologies,
            &shunt_status,
            &load_gen_status,
            &source_status,
            &voltage_measurements,
            &power_measurements,
            &power_terminal_type,
        );

        let err_tol = calculation_params.err_tol;
        let max_iter = calculation_params.max_iter;
        let set = <Self as SolverAccess<S>>::solver_set(self);
        let mut outputs = Vec::with_capacity(inputs.len());
        for (solver, input) in set.solvers.iter_mut().zip(&inputs) {
            outputs.push(solver.run_state_estimation(input, err_tol, max_iter, method)?);
        }
        Ok(self.project_output::<S>(&state, &outputs))
    }

    /// Apply one scenario of an update dataset.
    ///
    /// With a sequence cache (independent batches) the id lookups are
    /// skipped.
    pub fn update(
        &mut self,
        update: &UpdateDataset,
        scenario: Idx,
        sequence: Option<&SequenceIdxMap>,
    ) -> Result<()> {
        macro_rules! apply_column {
            ($column:ident, $kind:path, $apply:expr) => {{
                let rows = update.$column.scenario(scenario)?;
                for (row_no, row) in rows.iter().enumerate() {
                    let index = match sequence {
                        Some(sequence) => sequence.$column[row_no],
                        None => match self.lookup(row.id)? {
                            ($kind, index) => index,
                            _ => return Err(PowerGridError::IdWrongType(row.id)),
                        },
                    };
                    #[allow(clippy::redundant_closure_call)]
                    ($apply)(self, index, row);
                }
            }};
        }

        apply_column!(line, ComponentKind::Line, |model: &mut Self,
                                                  index: usize,
                                                  row: &crate::update::BranchUpdate| {
            let line = &mut model.input.line[index];
            update_status(&mut line.from_status, row.from_status);
            update_status(&mut line.to_status, row.to_status);
            if !row.keeps_topology() {
                model.topology_dirty = true;
            }
        });
        apply_column!(link, ComponentKind::Link, |model: &mut Self,
                                                  index: usize,
                                                  row: &crate::update::BranchUpdate| {
            let link = &mut model.input.link[index];
            update_status(&mut link.from_status, row.from_status);
            update_status(&mut link.to_status, row.to_status);
            if !row.keeps_topology() {
                model.topology_dirty = true;
            }
        });
        apply_column!(
            transformer,
            ComponentKind::Transformer,
            |model: &mut Self, index: usize, row: &crate::update::TransformerUpdate| {
                let n_line = model.input.line.len();
                let n_link = model.input.link.len();
                let transformer = &mut model.input.transformer[index];
                update_status(&mut transformer.from_status, row.from_status);
                update_status(&mut transformer.to_status, row.to_status);
                if !row.keeps_topology() {
                    model.topology_dirty = true;
                }
                let mut tap_pos = transformer.tap_pos;
                if update_status(&mut tap_pos, row.tap_pos) {
                    transformer.tap_pos = tap_pos;
                    model
                        .changed_branch
                        .push((n_line + n_link + index) as Idx);
                    model.mark_params_stale();
                }
            }
        );
        apply_column!(
            three_winding_transformer,
            ComponentKind::ThreeWindingTransformer,
            |model: &mut Self, index: usize, row: &crate::update::Branch3Update| {
                let branch3 = &mut model.input.three_winding_transformer[index];
                update_status(&mut branch3.status_1, row.status_1);
                update_status(&mut branch3.status_2, row.status_2);
                update_status(&mut branch3.status_3, row.status_3);
                if !row.keeps_topology() {
                    model.topology_dirty = true;
                }
                let mut tap_pos = branch3.tap_pos;
                if update_status(&mut tap_pos, row.tap_pos) {
                    branch3.tap_pos = tap_pos;
                    model.changed_branch3.push(index as Idx);
                    model.mark_params_stale();
                }
            }
        );
        apply_column!(shunt, ComponentKind::Shunt, |model: &mut Self,
                                                    index: usize,
                                                    row: &crate::update::ShuntUpdate| {
            let shunt = &mut model.input.shunt[index];
            let mut changed = update_status(&mut shunt.status, row.status);
            changed |= update_double(&mut shunt.g1, row.g1);
            changed |= update_double(&mut shunt.b1, row.b1);
            changed |= update_double(&mut shunt.g0, row.g0);
            changed |= update_double(&mut shunt.b0, row.b0);
            if changed {
                model.changed_shunt.push(index as Idx);
                model.mark_params_stale();
            }
        });
        apply_column!(source, ComponentKind::Source, |model: &mut Self,
                                                      index: usize,
                                                      row: &crate::update::SourceUpdate| {
            let source = &mut model.input.source[index];
            update_status(&mut source.status, row.status);
            update_double(&mut source.u_ref, row.u_ref);
            if !row.keeps_topology() {
                // source switching changes the subgrid decomposition
                model.topology_dirty = true;
            }
        });
        apply_column!(load_gen, ComponentKind::LoadGen, |model: &mut Self,
                                                         index: usize,
                                                         row: &crate::update::LoadGenUpdate| {
            let load_gen = &mut model.input.load_gen[index];
            update_status(&mut load_gen.status, row.status);
            update_double3(&mut load_gen.p_specified, &row.p_specified);
            update_double3(&mut load_gen.q_specified, &row.q_specified);
        });
        apply_column!(
            voltage_sensor,
            ComponentKind::VoltageSensor,
            |model: &mut Self, index: usize, row: &crate::update::VoltageSensorUpdate| {
                let sensor = &mut model.input.voltage_sensor[index];
                update_double(&mut sensor.u_sigma, row.u_sigma);
                update_double3(&mut sensor.u_measured, &row.u_measured);
                update_double3(&mut sensor.u_angle_measured, &row.u_angle_measured);
            }
        );
        apply_column!(
            power_sensor,
            ComponentKind::PowerSensor,
            |model: &mut Self, index: usize, row: &crate::update::PowerSensorUpdate| {
                let sensor = &mut model.input.power_sensor[index];
                update_double(&mut sensor.power_sigma, row.power_sigma);
                update_double3(&mut sensor.p_measured, &row.p_measured);
                update_double3(&mut sensor.q_measured, &row.q_measured);
            }
        );
        Ok(())
    }

    fn mark_params_stale(&mut self) {
        self.solvers_sym.stale_params = true;
        self.solvers_asym.stale_params = true;
    }

    /// Resolve the component sequence indices of an independent update
    /// batch once, from its first scenario.
    pub fn sequence_idx_map(&self, update: &UpdateDataset) -> Result<SequenceIdxMap> {
        let mut map = SequenceIdxMap::default();
        if update.n_scenarios == 0 {
            return Ok(map);
        }
        macro_rules! resolve_column {
            ($column:ident, $kind:path) => {
                for row in update.$column.scenario(0)? {
                    match self.lookup(row.id)? {
                        ($kind, index) => map.$column.push(index),
                        _ => return Err(PowerGridError::IdWrongType(row.id)),
                    }
                }
            };
        }
        resolve_column!(line, ComponentKind::Line);
        resolve_column!(link, ComponentKind::Link);
        resolve_column!(transformer, ComponentKind::Transformer);
        resolve_column!(
            three_winding_transformer,
            ComponentKind::ThreeWindingTransformer
        );
        resolve_column!(shunt, ComponentKind::Shunt);
        resolve_column!(source, ComponentKind::Source);
        resolve_column!(load_gen, ComponentKind::LoadGen);
        resolve_column!(voltage_sensor, ComponentKind::VoltageSensor);
        resolve_column!(power_sensor, ComponentKind::PowerSensor);
        Ok(map)
    }

    // ---- result projection ----

    fn project_output<S: Symmetry>(
        &self,
        state: &TopologyState,
        outputs: &[SolverOutput<S>],
    ) -> PhysicalOutput<S> {
        let coupling = &state.coupling;
        let mut result = PhysicalOutput::<S>::default();

        for (k, node) in self.input.node.iter().enumerate() {
            let idx = coupling.node[k];
            if idx.group < 0 {
                result.node.push(NodeOutput::de_energized(node.id));
                continue;
            }
            let u = &outputs[idx.group as usize].u[idx.pos as usize];
            let u_pu = S::cabs(u);
            let u_base = if S::BLOCK_SIZE == 1 {
                node.u_rated
            } else {
                node.u_rated / SQRT3
            };
            result.node.push(NodeOutput {
                id: node.id,
                energized: 1,
                u_pu,
                u: u_pu * u_base,
                u_angle: S::arg(u),
            });
        }

        let n_line = self.input.line.len();
        let n_link = self.input.link.len();
        for (k, line) in self.input.line.iter().enumerate() {
            let nodes = self.resolved.line_nodes[k];
            let rated_current = if line.i_n.is_nan() { 0.0 } else { line.i_n };
            result.line.push(self.branch_output::<S>(
                line.id,
                coupling.branch[k],
                outputs,
                nodes,
                BranchRating::Current(rated_current),
            ));
        }
        for (k, link) in self.input.link.iter().enumerate() {
            let nodes = self.resolved.link_nodes[k];
            result.link.push(self.branch_output::<S>(
                link.id,
                coupling.branch[n_line + k],
                outputs,
                nodes,
                BranchRating::None,
            ));
        }
        for (k, transformer) in self.input.transformer.iter().enumerate() {
            let nodes = self.resolved.transformer_nodes[k];
            result.transformer.push(self.branch_output::<S>(
                transformer.id,
                coupling.branch[n_line + n_link + k],
                outputs,
                nodes,
                BranchRating::Power(transformer.sn),
            ));
        }

        for (k, branch3) in self.input.three_winding_transformer.iter().enumerate() {
            let idx = coupling.branch3[k];
            if idx.group < 0 {
                result
                    .three_winding_transformer
                    .push(Branch3Output::de_energized(branch3.id));
                continue;
            }
            let nodes = self.resolved.branch3_nodes[k];
            let output = &outputs[idx.group as usize];
            // the terminal is the from side of each expanded branch
            let sides: Vec<_> = (0..3)
                .map(|side| {
                    let branch = &output.branch[idx.pos[side] as usize];
                    let base_i = BASE_POWER_3P / SQRT3 / self.u_rated(nodes[side]);
                    (
                        S::re(&branch.s_f) * power_base::<S>(),
                        S::im(&branch.s_f) * power_base::<S>(),
                        S::cabs(&branch.i_f) * base_i,
                        S::cabs(&branch.s_f) * power_base::<S>(),
                    )
                })
                .collect();
            let sn = [branch3.sn_1, branch3.sn_2, branch3.sn_3];
            let loading = sides
                .iter()
                .zip(sn)
                .map(|((_, _, _, s), sn)| phase_sum::<S>(s) / sn)
                .fold(0.0_f64, f64::max);
            result.three_winding_transformer.push(Branch3Output {
                id: branch3.id,
                energized: 1,
                loading,
                p_1: sides[0].0,
                q_1: sides[0].1,
                i_1: sides[0].2,
                s_1: sides[0].3,
                p_2: sides[1].0,
                q_2: sides[1].1,
                i_2: sides[1].2,
                s_2: sides[1].3,
                p_3: sides[2].0,
                q_3: sides[2].1,
                i_3: sides[2].2,
                s_3: sides[2].3,
            });
        }

        for (k, shunt) in self.input.shunt.iter().enumerate() {
            let node = self.resolved.shunt_node[k];
            result.shunt.push(self.appliance_output::<S>(
                shunt.id,
                shunt.status != 0,
                coupling.shunt[k],
                outputs,
                |output, pos| &output.shunt[pos],
                node,
            ));
        }
        for (k, source) in self.input.source.iter().enumerate() {
            let node = self.resolved.source_node[k];
            result.source.push(self.appliance_output::<S>(
                source.id,
                source.status != 0,
                coupling.source[k],
                outputs,
                |output, pos| &output.source[pos],
                node,
            ));
        }
        for (k, load_gen) in self.input.load_gen.iter().enumerate() {
            let node = self.resolved.load_gen_node[k];
            result.load_gen.push(self.appliance_output::<S>(
                load_gen.id,
                load_gen.status != 0,
                coupling.load_gen[k],
                outputs,
                |output, pos| &output.load_gen[pos],
                node,
            ));
        }

        result
    }

    fn branch_output<S: Symmetry>(
        &self,
        id: Id,
        idx: gridflow_core::Idx2D,
        outputs: &[SolverOutput<S>],
        nodes: [Idx; 2],
        rating: BranchRating,
    ) -> BranchOutput<S> {
        if idx.group < 0 {
            return BranchOutput::de_energized(id);
        }
        let branch = &outputs[idx.group as usize].branch[idx.pos as usize];
        let base = power_base::<S>();
        let base_i_from = BASE_POWER_3P / SQRT3 / self.u_rated(nodes[0]);
        let base_i_to = BASE_POWER_3P / SQRT3 / self.u_rated(nodes[1]);
        let i_from = S::cabs(&branch.i_f) * base_i_from;
        let i_to = S::cabs(&branch.i_t) * base_i_to;
        let s_from = S::cabs(&branch.s_f) * base;
        let s_to = S::cabs(&branch.s_t) * base;
        let loading = match rating {
            BranchRating::None => 0.0,
            BranchRating::Current(i_n) => {
                if i_n == 0.0 {
                    0.0
                } else {
                    S::max_val(&i_from).max(S::max_val(&i_to)) / i_n
                }
            }
            BranchRating::Power(sn) => phase_sum::<S>(&s_from).max(phase_sum::<S>(&s_to)) / sn,
        };
        BranchOutput {
            id,
            energized: 1,
            loading,
            p_from: S::re(&branch.s_f) * base,
            q_from: S::im(&branch.s_f) * base,
            i_from,
            s_from,
            p_to: S::re(&branch.s_t) * base,
            q_to: S::im(&branch.s_t) * base,
            i_to,
            s_to,
        }
    }

    fn appliance_output<S: Symmetry>(
        &self,
        id: Id,
        status: bool,
        idx: gridflow_core::Idx2D,
        outputs: &[SolverOutput<S>],
        select: impl Fn(&SolverOutput<S>, usize) -> &gridflow_math::types::ApplianceSolverOutput<S>,
        node: Idx,
    ) -> ApplianceOutput<S> {
        if idx.group < 0 {
            return ApplianceOutput::de_energized(id);
        }
        let appliance = select(&outputs[idx.group as usize], idx.pos as usize);
        let base = power_base::<S>();
        let base_i = BASE_POWER_3P / SQRT3 / self.u_rated(node);
        let p = S::re(&appliance.s) * base;
        let q = S::im(&appliance.s) * base;
        let s = S::cabs(&appliance.s) * base;
        let pf = S::real_from_fn(|phase| {
            let p_val = S::real_get(&p, phase);
            let s_val = S::real_get(&s, phase);
            if s_val == 0.0 {
                0.0
            } else {
                p_val / s_val
            }
        });
        ApplianceOutput {
            id,
            energized: status as i8,
            p,
            q,
            i: S::cabs(&appliance.i) * base_i,
            s,
            pf,
        }
    }
}

enum BranchRating {
    None,
    Current(f64),
    Power(f64),
}

fn power_base<S: Symmetry>() -> f64 {
    if S::BLOCK_SIZE == 1 {
        BASE_POWER_3P
    } else {
        BASE_POWER_1P
    }
}

fn phase_sum<S: Symmetry>(value: &S::RealValue) -> f64 {
    (0..S::BLOCK_SIZE).map(|p| S::real_get(value, p)).sum()
}
