//! Decomposition of the component graph into independent math subgrids.
//!
//! A directed graph is built on all physical nodes plus one internal vertex
//! per three-winding branch. Every energised branch contributes a pair of
//! anti-parallel edges carrying its phase shift. From each energised source
//! whose node is still ungrouped, a depth-first traversal discovers one
//! subgrid, accumulating per-node phase shifts along tree edges and
//! recording genuine back edges (an edge pointing straight back to the
//! direct predecessor is the anti-parallel twin of a tree edge, not a
//! cycle).
//!
//! The bus numbering of each subgrid is chosen for the LU solver:
//!
//! - no back edges: reversed DFS discovery order (leaves first, slack bus
//!   last) - zero fill-in under natural elimination;
//! - otherwise: nodes off the cycles keep reversed DFS order, the cyclic
//!   region is appended in minimum-degree elimination order. Below four
//!   cyclic nodes the reordering pass is skipped, its cost exceeds the
//!   benefit.
//!
//! Iteration order over components and adjacency lists is insertion order
//! throughout, so identical inputs give identical bus numberings.

use std::sync::Arc;

use petgraph::graph::DiGraph;

use gridflow_core::{
    Branch3Idx, BranchIdx, Idx, Idx2D, Idx2DBranch3, LoadGenType, MeasuredTerminalType, Symmetry,
};

use crate::sparse_mapping::build_sparse_mapping;
use crate::types::{MathModelParam, MathModelTopology, PowerFlowInput, StateEstimationInput};

/// Component indices at the physical-model side.
#[derive(Debug, Clone, Default)]
pub struct ComponentTopology {
    pub n_node: Idx,
    pub branch_node_idx: Vec<BranchIdx>,
    pub branch3_node_idx: Vec<Branch3Idx>,
    pub shunt_node_idx: Vec<Idx>,
    pub source_node_idx: Vec<Idx>,
    pub load_gen_node_idx: Vec<Idx>,
    pub load_gen_type: Vec<LoadGenType>,
    pub voltage_sensor_node_idx: Vec<Idx>,
    /// Observed object index, relative to the component class given by the
    /// terminal type.
    pub power_sensor_object_idx: Vec<Idx>,
    pub power_sensor_terminal_type: Vec<MeasuredTerminalType>,
}

impl ComponentTopology {
    /// Physical nodes plus one internal vertex per three-winding branch.
    pub fn n_node_total(&self) -> Idx {
        self.n_node + self.branch3_node_idx.len() as Idx
    }
}

/// Connection state of the components, physical-model side.
#[derive(Debug, Clone, Default)]
pub struct ComponentConnections {
    pub branch_connected: Vec<[bool; 2]>,
    pub branch3_connected: Vec<[bool; 3]>,
    /// Phase shift of each branch, `phase(from) - phase(to)`.
    pub branch_phase_shift: Vec<f64>,
    /// Per terminal, `phase(node) - phase(internal node)`.
    pub branch3_phase_shift: Vec<[f64; 3]>,
    pub source_connected: Vec<bool>,
}

/// Where every physical component ended up in the math model.
#[derive(Debug, Clone, Default)]
pub struct ComponentToMathCoupling {
    pub node: Vec<Idx2D>,
    pub branch: Vec<Idx2D>,
    pub branch3: Vec<Idx2DBranch3>,
    pub shunt: Vec<Idx2D>,
    pub load_gen: Vec<Idx2D>,
    pub source: Vec<Idx2D>,
    pub voltage_sensor: Vec<Idx2D>,
    pub power_sensor: Vec<Idx2D>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Node status during cyclic-region reordering.
const NOT_PROCESSED: Idx = -1;
const IN_CYCLE: Idx = -2;

/// Builder that turns a component topology into per-subgrid math
/// topologies plus the component coupling.
pub struct Topology<'a> {
    comp_topo: &'a ComponentTopology,
    comp_conn: &'a ComponentConnections,
    adjacency: Vec<Vec<(usize, f64)>>,
    phase_shift: Vec<f64>,
    predecessor: Vec<usize>,
    node_status: Vec<Idx>,
    math_topology: Vec<MathModelTopology>,
    coupling: ComponentToMathCoupling,
}

impl<'a> Topology<'a> {
    pub fn new(comp_topo: &'a ComponentTopology, comp_conn: &'a ComponentConnections) -> Self {
        let n_total = comp_topo.n_node_total() as usize;
        Topology {
            comp_topo,
            comp_conn,
            adjacency: Vec::new(),
            phase_shift: vec![0.0; n_total],
            predecessor: (0..n_total).collect(),
            node_status: vec![NOT_PROCESSED; n_total],
            math_topology: Vec::new(),
            coupling: ComponentToMathCoupling::default(),
        }
    }

    /// Run the decomposition.
    pub fn build(mut self) -> (Vec<Arc<MathModelTopology>>, Arc<ComponentToMathCoupling>) {
        self.reset_coupling();
        self.build_sparse_graph();
        self.dfs_search();
        self.couple_branch();
        self.couple_all_appliance();
        self.couple_sensors();
        let topologies = self
            .math_topology
            .into_iter()
            .map(Arc::new)
            .collect();
        (topologies, Arc::new(self.coupling))
    }

    fn reset_coupling(&mut self) {
        let topo = self.comp_topo;
        self.coupling.node = vec![Idx2D::ISOLATED; topo.n_node_total() as usize];
        self.coupling.branch = vec![Idx2D::ISOLATED; topo.branch_node_idx.len()];
        self.coupling.branch3 = vec![Idx2DBranch3::default(); topo.branch3_node_idx.len()];
        self.coupling.shunt = vec![Idx2D::ISOLATED; topo.shunt_node_idx.len()];
        self.coupling.load_gen = vec![Idx2D::ISOLATED; topo.load_gen_node_idx.len()];
        self.coupling.source = vec![Idx2D::ISOLATED; topo.source_node_idx.len()];
        self.coupling.voltage_sensor = vec![Idx2D::ISOLATED; topo.voltage_sensor_node_idx.len()];
        self.coupling.power_sensor = vec![Idx2D::ISOLATED; topo.power_sensor_object_idx.len()];
    }

    /// The graph lives in petgraph; the adjacency lists are materialised in
    /// edge insertion order so traversal order is reproducible.
    fn build_sparse_graph(&mut self) {
        let n_total = self.comp_topo.n_node_total() as usize;
        let mut graph: DiGraph<(), f64> = DiGraph::with_capacity(
            n_total,
            2 * self.comp_topo.branch_node_idx.len() + 6 * self.comp_topo.branch3_node_idx.len(),
        );
        for _ in 0..n_total {
            graph.add_node(());
        }
        for (k, &[i, j]) in self.comp_topo.branch_node_idx.iter().enumerate() {
            let [i_status, j_status] = self.comp_conn.branch_connected[k];
            // phase(from) - phase(to); the edge weight is the phase gained
            // moving along the edge
            let shift = self.comp_conn.branch_phase_shift[k];
            if i_status && j_status {
                graph.add_edge((i as u32).into(), (j as u32).into(), -shift);
                graph.add_edge((j as u32).into(), (i as u32).into(), shift);
            }
        }
        for (k, terminals) in self.comp_topo.branch3_node_idx.iter().enumerate() {
            let status = self.comp_conn.branch3_connected[k];
            let shift = self.comp_conn.branch3_phase_shift[k];
            let internal = self.comp_topo.n_node as usize + k;
            for m in 0..3 {
                if status[m] {
                    graph.add_edge(
                        (terminals[m] as u32).into(),
                        (internal as u32).into(),
                        -shift[m],
                    );
                    graph.add_edge(
                        (internal as u32).into(),
                        (terminals[m] as u32).into(),
                        shift[m],
                    );
                }
            }
        }
        use petgraph::visit::EdgeRef;
        let mut adjacency = vec![Vec::new(); n_total];
        for edge in graph.edge_references() {
            adjacency[edge.source().index()].push((edge.target().index(), *edge.weight()));
        }
        self.adjacency = adjacency;
    }

    fn dfs_search(&mut self) {
        let mut color = vec![Color::White; self.comp_topo.n_node_total() as usize];
        // m is the math subgrid sequence number
        let mut m: Idx = 0;
        for (k, &source_node) in self.comp_topo.source_node_idx.iter().enumerate() {
            if !self.comp_conn.source_connected[k] {
                continue;
            }
            if self.coupling.node[source_node as usize].group != -1 {
                // node already belongs to a subgrid found from another source
                continue;
            }
            let mut dfs_node: Vec<Idx> = Vec::new();
            let mut back_edges: Vec<(usize, usize)> = Vec::new();
            self.depth_first_visit(
                source_node as usize,
                m,
                &mut color,
                &mut dfs_node,
                &mut back_edges,
            );

            if back_edges.is_empty() {
                // pure tree: reversed discovery order gives zero fill-in
                dfs_node.reverse();
            } else {
                self.reorder_node(&mut dfs_node, &back_edges);
            }

            let mut topo_single = MathModelTopology {
                phase_shift: vec![0.0; dfs_node.len()],
                ..Default::default()
            };
            for (bus, &node) in dfs_node.iter().enumerate() {
                self.coupling.node[node as usize].pos = bus as Idx;
                topo_single.phase_shift[bus] = self.phase_shift[node as usize];
                debug_assert_eq!(self.coupling.node[node as usize].group, m);
            }
            topo_single.slack_bus = self.coupling.node[source_node as usize].pos;
            self.math_topology.push(topo_single);
            m += 1;
        }
    }

    /// Iterative DFS with boost-style edge classification.
    fn depth_first_visit(
        &mut self,
        start: usize,
        group: Idx,
        color: &mut [Color],
        dfs_node: &mut Vec<Idx>,
        back_edges: &mut Vec<(usize, usize)>,
    ) {
        color[start] = Color::Grey;
        self.coupling.node[start].group = group;
        dfs_node.push(start as Idx);
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if top.1 >= self.adjacency[node].len() {
                color[node] = Color::Black;
                stack.pop();
                continue;
            }
            let (target, shift) = self.adjacency[node][top.1];
            top.1 += 1;
            match color[target] {
                Color::White => {
                    // tree edge: accumulate phase shift, set predecessor
                    self.phase_shift[target] = self.phase_shift[node] + shift;
                    self.predecessor[target] = node;
                    color[target] = Color::Grey;
                    self.coupling.node[target].group = group;
                    dfs_node.push(target as Idx);
                    stack.push((target, 0));
                }
                Color::Grey => {
                    // pointing back to the direct predecessor it is the
                    // anti-parallel twin of a tree edge, otherwise a cycle
                    if self.predecessor[node] != target {
                        back_edges.push((node, target));
                    }
                }
                Color::Black => {
                    // forward edge in a symmetric directed graph, ignored
                }
            }
        }
    }

    /// Reorder a meshed subgrid: non-cyclic nodes first in reverse DFS
    /// order, then the cyclic region in minimum-degree elimination order.
    fn reorder_node(&mut self, dfs_node: &mut Vec<Idx>, back_edges: &[(usize, usize)]) {
        let dfs_node_copy = dfs_node.clone();
        dfs_node.clear();

        // walk predecessors from each back-edge start until a marked node;
        // everything on the way lies on or above a cycle
        for &(start, _) in back_edges {
            let mut node_in_cycle = start;
            while self.node_status[node_in_cycle] != IN_CYCLE {
                self.node_status[node_in_cycle] = IN_CYCLE;
                node_in_cycle = self.predecessor[node_in_cycle];
            }
        }

        // far-end non-cyclic nodes keep reversed DFS order
        dfs_node.extend(
            dfs_node_copy
                .iter()
                .rev()
                .filter(|&&x| self.node_status[x as usize] == NOT_PROCESSED),
        );
        let cyclic_node: Vec<Idx> = dfs_node_copy
            .iter()
            .copied()
            .filter(|&x| self.node_status[x as usize] == IN_CYCLE)
            .collect();
        let n_cycle_node = cyclic_node.len();

        // below four nodes the reordering cannot win anything
        if n_cycle_node < 4 {
            dfs_node.extend(cyclic_node.iter().rev());
            return;
        }

        // temporary dense numbering of the cyclic subgraph
        for (i, &node) in cyclic_node.iter().enumerate() {
            self.node_status[node as usize] = i as Idx;
        }
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n_cycle_node];
        for (i, &node) in cyclic_node.iter().enumerate() {
            for &(target, _) in &self.adjacency[node as usize] {
                let status = self.node_status[target];
                if status < 0 {
                    // neighbour outside the cyclic subgraph
                    continue;
                }
                let j = status as usize;
                if j != i && !adjacency[i].contains(&j) {
                    adjacency[i].push(j);
                }
            }
        }
        for &index in &minimum_degree_ordering(adjacency) {
            dfs_node.push(cyclic_node[index]);
        }
    }

    /// Couple two- and three-winding branches to their subgrids.
    fn couple_branch(&mut self) {
        for (k, &[i, j]) in self.comp_topo.branch_node_idx.iter().enumerate() {
            let [i_status, j_status] = self.comp_conn.branch_connected[k];
            let i_math = self.coupling.node[i as usize];
            let j_math = self.coupling.node[j as usize];
            let mut group = -1;
            if i_status && i_math.group != -1 {
                group = i_math.group;
            }
            if j_status && j_math.group != -1 {
                group = j_math.group;
            }
            if group == -1 {
                continue;
            }
            let branch_idx: BranchIdx = [
                if i_status { i_math.pos } else { -1 },
                if j_status { j_math.pos } else { -1 },
            ];
            let topo = &mut self.math_topology[group as usize];
            let branch_pos = topo.branch_bus_idx.len() as Idx;
            topo.branch_bus_idx.push(branch_idx);
            self.coupling.branch[k] = Idx2D::new(group, branch_pos);
        }

        for (k, terminals) in self.comp_topo.branch3_node_idx.iter().enumerate() {
            let status = self.comp_conn.branch3_connected[k];
            let terminal_math: [Idx2D; 3] = [
                self.coupling.node[terminals[0] as usize],
                self.coupling.node[terminals[1] as usize],
                self.coupling.node[terminals[2] as usize],
            ];
            let internal = self.comp_topo.n_node as usize + k;
            let internal_math = self.coupling.node[internal];
            let mut group = -1;
            for n in 0..3 {
                if status[n] && terminal_math[n].group != -1 {
                    group = terminal_math[n].group;
                }
            }
            if group == -1 {
                debug_assert_eq!(internal_math.group, -1);
                continue;
            }
            debug_assert_eq!(internal_math.group, group);
            let mut idx_branch3 = Idx2DBranch3 {
                group,
                pos: [-1; 3],
            };
            for n in 0..3 {
                // the internal side is always connected
                let branch_idx: BranchIdx = [
                    if status[n] { terminal_math[n].pos } else { -1 },
                    internal_math.pos,
                ];
                let topo = &mut self.math_topology[group as usize];
                let branch_pos = topo.branch_bus_idx.len() as Idx;
                topo.branch_bus_idx.push(branch_idx);
                idx_branch3.pos[n] = branch_pos;
            }
            self.coupling.branch3[k] = idx_branch3;
        }
    }

    fn couple_all_appliance(&mut self) {
        // shunt
        couple_object_components(
            &self.comp_topo.shunt_node_idx,
            &self.coupling.node,
            &mut self.math_topology,
            &mut self.coupling.shunt,
            |topo| topo.n_bus(),
            |topo, indptr| topo.shunt_bus_indptr = indptr,
            |_| true,
        );

        // load/gen
        couple_object_components(
            &self.comp_topo.load_gen_node_idx,
            &self.coupling.node,
            &mut self.math_topology,
            &mut self.coupling.load_gen,
            |topo| topo.n_bus(),
            |topo, indptr| topo.load_gen_bus_indptr = indptr,
            |_| true,
        );
        for topo in &mut self.math_topology {
            topo.load_gen_type = vec![LoadGenType::ConstPq; topo.n_load_gen() as usize];
        }
        for (k, &ty) in self.comp_topo.load_gen_type.iter().enumerate() {
            let idx_math = self.coupling.load_gen[k];
            if idx_math.group == -1 {
                continue;
            }
            self.math_topology[idx_math.group as usize].load_gen_type[idx_math.pos as usize] = ty;
        }

        // source, only when connected
        let source_connected = &self.comp_conn.source_connected;
        couple_object_components(
            &self.comp_topo.source_node_idx,
            &self.coupling.node,
            &mut self.math_topology,
            &mut self.coupling.source,
            |topo| topo.n_bus(),
            |topo, indptr| topo.source_bus_indptr = indptr,
            |i| source_connected[i as usize],
        );
    }

    fn couple_sensors(&mut self) {
        let terminal_type = &self.comp_topo.power_sensor_terminal_type;

        couple_object_components(
            &self.comp_topo.voltage_sensor_node_idx,
            &self.coupling.node,
            &mut self.math_topology,
            &mut self.coupling.voltage_sensor,
            |topo| topo.n_bus(),
            |topo, indptr| topo.voltage_sensor_indptr = indptr,
            |_| true,
        );

        couple_object_components(
            &self.comp_topo.power_sensor_object_idx,
            &self.coupling.source,
            &mut self.math_topology,
            &mut self.coupling.power_sensor,
            |topo| topo.n_source(),
            |topo, indptr| topo.source_power_sensor_indptr = indptr,
            |i| terminal_type[i as usize] == MeasuredTerminalType::Source,
        );

        couple_object_components(
            &self.comp_topo.power_sensor_object_idx,
            &self.coupling.shunt,
            &mut self.math_topology,
            &mut self.coupling.power_sensor,
            |topo| topo.n_shunt(),
            |topo, indptr| topo.shunt_power_sensor_indptr = indptr,
            |i| terminal_type[i as usize] == MeasuredTerminalType::Shunt,
        );

        couple_object_components(
            &self.comp_topo.power_sensor_object_idx,
            &self.coupling.load_gen,
            &mut self.math_topology,
            &mut self.coupling.power_sensor,
            |topo| topo.n_load_gen(),
            |topo, indptr| topo.load_gen_power_sensor_indptr = indptr,
            |i| {
                terminal_type[i as usize] == MeasuredTerminalType::Load
                    || terminal_type[i as usize] == MeasuredTerminalType::Generator
            },
        );

        couple_object_components(
            &self.comp_topo.power_sensor_object_idx,
            &self.coupling.branch,
            &mut self.math_topology,
            &mut self.coupling.power_sensor,
            |topo| topo.n_branch(),
            |topo, indptr| topo.branch_from_power_sensor_indptr = indptr,
            |i| terminal_type[i as usize] == MeasuredTerminalType::BranchFrom,
        );

        couple_object_components(
            &self.comp_topo.power_sensor_object_idx,
            &self.coupling.branch,
            &mut self.math_topology,
            &mut self.coupling.power_sensor,
            |topo| topo.n_branch(),
            |topo, indptr| topo.branch_to_power_sensor_indptr = indptr,
            |i| terminal_type[i as usize] == MeasuredTerminalType::BranchTo,
        );
    }
}

/// Couple one class of components to the subgrids of the objects they sit
/// on, writing the per-object CSR indptr into each math topology and the
/// `(subgrid, pos)` of each component into `coupling`.
fn couple_object_components(
    component_obj_idx: &[Idx],
    objects: &[Idx2D],
    math_topology: &mut [MathModelTopology],
    coupling: &mut [Idx2D],
    n_obj: impl Fn(&MathModelTopology) -> Idx,
    assign_indptr: impl Fn(&mut MathModelTopology, Vec<Idx>),
    include: impl Fn(Idx) -> bool,
) {
    let n_topo = math_topology.len();
    let mut topo_obj_idx: Vec<Vec<Idx>> = vec![Vec::new(); n_topo];
    let mut topo_component_idx: Vec<Vec<Idx>> = vec![Vec::new(); n_topo];

    for (component, &obj) in component_obj_idx.iter().enumerate() {
        if !include(component as Idx) {
            continue;
        }
        let math_idx = objects[obj as usize];
        if math_idx.group >= 0 {
            topo_obj_idx[math_idx.group as usize].push(math_idx.pos);
            topo_component_idx[math_idx.group as usize].push(component as Idx);
        }
    }

    for (topo_idx, topo) in math_topology.iter_mut().enumerate() {
        let mapping = build_sparse_mapping(&topo_obj_idx[topo_idx], n_obj(topo));
        assign_indptr(topo, mapping.indptr);
        for (new_pos, &old_pos) in mapping.reorder.iter().enumerate() {
            let component = topo_component_idx[topo_idx][old_pos as usize];
            coupling[component as usize] = Idx2D::new(topo_idx as Idx, new_pos as Idx);
        }
    }
}

/// Minimum-degree elimination ordering of a small undirected graph.
///
/// Eliminating a node joins its remaining neighbours into a clique; the
/// node with the lowest current degree is taken each round, lowest index on
/// ties.
fn minimum_degree_ordering(mut adjacency: Vec<Vec<usize>>) -> Vec<usize> {
    let n = adjacency.len();
    let mut eliminated = vec![false; n];
    let mut order = Vec::with_capacity(n);
    for _ in 0..n {
        let next = (0..n)
            .filter(|&v| !eliminated[v])
            .min_by_key(|&v| adjacency[v].iter().filter(|&&w| !eliminated[w]).count())
            .expect("graph not empty");
        eliminated[next] = true;
        order.push(next);
        let neighbours: Vec<usize> = adjacency[next]
            .iter()
            .copied()
            .filter(|&w| !eliminated[w])
            .collect();
        for (a_pos, &a) in neighbours.iter().enumerate() {
            for &b in &neighbours[a_pos + 1..] {
                if !adjacency[a].contains(&b) {
                    adjacency[a].push(b);
                    adjacency[b].push(a);
                }
            }
        }
    }
    order
}

/// Assemble per-subgrid power-flow inputs from physical per-component data.
///
/// `source_u_ref` and `load_gen_s` are indexed by physical component; the
/// coupling places each value at its math position.
pub fn assemble_power_flow_input<S: Symmetry>(
    coupling: &ComponentToMathCoupling,
    topologies: &[Arc<MathModelTopology>],
    source_u_ref: &[num_complex::Complex64],
    load_gen_s: &[S::ComplexValue],
) -> Vec<PowerFlowInput<S>> {
    let mut inputs: Vec<PowerFlowInput<S>> = topologies
        .iter()
        .map(|topo| PowerFlowInput {
            source: vec![num_complex::Complex64::default(); topo.n_source() as usize],
            s_injection: vec![S::ComplexValue::default(); topo.n_load_gen() as usize],
        })
        .collect();
    for (k, &u_ref) in source_u_ref.iter().enumerate() {
        let idx = coupling.source[k];
        if idx.group >= 0 {
            inputs[idx.group as usize].source[idx.pos as usize] = u_ref;
        }
    }
    for (k, &s) in load_gen_s.iter().enumerate() {
        let idx = coupling.load_gen[k];
        if idx.group >= 0 {
            inputs[idx.group as usize].s_injection[idx.pos as usize] = s;
        }
    }
    inputs
}

/// Assemble per-subgrid state-estimation inputs.
#[allow(clippy::too_many_arguments)]
pub fn assemble_state_estimation_input<S: Symmetry>(
    coupling: &ComponentToMathCoupling,
    topologies: &[Arc<MathModelTopology>],
    shunt_status: &[bool],
    load_gen_status: &[bool],
    source_status: &[bool],
    voltage_measurements: &[crate::types::SensorCalcParam<S>],
    power_measurements: &[crate::types::SensorCalcParam<S>],
    power_terminal_type: &[MeasuredTerminalType],
) -> Vec<StateEstimationInput<S>> {
    let mut inputs: Vec<StateEstimationInput<S>> = topologies
        .iter()
        .map(|topo| {
            let mut input = StateEstimationInput::<S>::default();
            input.shunt_status = vec![0; topo.n_shunt() as usize];
            input.load_gen_status = vec![0; topo.n_load_gen() as usize];
            input.source_status = vec![0; topo.n_source() as usize];
            input.measured_voltage =
                vec![Default::default(); *topo.voltage_sensor_indptr.last().unwrap_or(&0) as usize];
            input.measured_source_power = vec![
                Default::default();
                *topo.source_power_sensor_indptr.last().unwrap_or(&0) as usize
            ];
            input.measured_load_gen_power = vec![
                Default::default();
                *topo.load_gen_power_sensor_indptr.last().unwrap_or(&0) as usize
            ];
            input.measured_shunt_power = vec![
                Default::default();
                *topo.shunt_power_sensor_indptr.last().unwrap_or(&0) as usize
            ];
            input.measured_branch_from_power = vec![
                Default::default();
                *topo.branch_from_power_sensor_indptr.last().unwrap_or(&0) as usize
            ];
            input.measured_branch_to_power = vec![
                Default::default();
                *topo.branch_to_power_sensor_indptr.last().unwrap_or(&0) as usize
            ];
            input
        })
        .collect();

    for (k, &status) in shunt_status.iter().enumerate() {
        let idx = coupling.shunt[k];
        if idx.group >= 0 {
            inputs[idx.group as usize].shunt_status[idx.pos as usize] = status as i8;
        }
    }
    for (k, &status) in load_gen_status.iter().enumerate() {
        let idx = coupling.load_gen[k];
        if idx.group >= 0 {
            inputs[idx.group as usize].load_gen_status[idx.pos as usize] = status as i8;
        }
    }
    for (k, &status) in source_status.iter().enumerate() {
        let idx = coupling.source[k];
        if idx.group >= 0 {
            inputs[idx.group as usize].source_status[idx.pos as usize] = status as i8;
        }
    }
    for (k, &m) in voltage_measurements.iter().enumerate() {
        let idx = coupling.voltage_sensor[k];
        if idx.group >= 0 {
            inputs[idx.group as usize].measured_voltage[idx.pos as usize] = m;
        }
    }
    for (k, &m) in power_measurements.iter().enumerate() {
        let idx = coupling.power_sensor[k];
        if idx.group < 0 {
            continue;
        }
        let input = &mut inputs[idx.group as usize];
        let pos = idx.pos as usize;
        match power_terminal_type[k] {
            MeasuredTerminalType::Source => input.measured_source_power[pos] = m,
            MeasuredTerminalType::Shunt => input.measured_shunt_power[pos] = m,
            MeasuredTerminalType::Load | MeasuredTerminalType::Generator => {
                input.measured_load_gen_power[pos] = m;
            }
            MeasuredTerminalType::BranchFrom
            | MeasuredTerminalType::Branch3Side1
            | MeasuredTerminalType::Branch3Side2
            | MeasuredTerminalType::Branch3Side3 => {
                input.measured_branch_from_power[pos] = m;
            }
            MeasuredTerminalType::BranchTo => input.measured_branch_to_power[pos] = m,
        }
    }
    inputs
}

/// Assemble per-subgrid math parameters from per-component parameters.
pub fn assemble_math_param<S: Symmetry>(
    coupling: &ComponentToMathCoupling,
    topologies: &[Arc<MathModelTopology>],
    branch_param: &[crate::types::BranchCalcParam<S>],
    branch3_param: &[[crate::types::BranchCalcParam<S>; 3]],
    shunt_param: &[S::ComplexTensor],
    source_param: &[crate::types::SourceCalcParam],
) -> Vec<MathModelParam<S>> {
    let mut params: Vec<MathModelParam<S>> = topologies
        .iter()
        .map(|topo| MathModelParam {
            branch_param: vec![Default::default(); topo.n_branch() as usize],
            shunt_param: vec![S::ComplexTensor::default(); topo.n_shunt() as usize],
            source_param: vec![Default::default(); topo.n_source() as usize],
        })
        .collect();
    for (k, param) in branch_param.iter().enumerate() {
        let idx = coupling.branch[k];
        if idx.group >= 0 {
            params[idx.group as usize].branch_param[idx.pos as usize] = *param;
        }
    }
    for (k, param3) in branch3_param.iter().enumerate() {
        let idx = coupling.branch3[k];
        if idx.group >= 0 {
            for n in 0..3 {
                params[idx.group as usize].branch_param[idx.pos[n] as usize] = param3[n];
            }
        }
    }
    for (k, param) in shunt_param.iter().enumerate() {
        let idx = coupling.shunt[k];
        if idx.group >= 0 {
            params[idx.group as usize].shunt_param[idx.pos as usize] = *param;
        }
    }
    for (k, param) in source_param.iter().enumerate() {
        let idx = coupling.source[k];
        if idx.group >= 0 {
            params[idx.group as usize].source_param[idx.pos as usize] = *param;
        }
    }
    params
}
