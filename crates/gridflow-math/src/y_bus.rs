//! Block-CSR nodal admittance matrix.
//!
//! [`YBusStructure`] is the value-free part: the CSR pattern, the map from
//! every CSR slot back to the branch/shunt elements that feed it, the
//! position of each bus's diagonal, the transpose permutation, and the LU
//! pattern with fill-in. It is built once per topology and shared between
//! the symmetric and asymmetric [`YBus`] of the same subgrid.
//!
//! [`YBus`] adds the admittance values and the derived flow calculations.
//! Values are rebuilt (or patched incrementally) whenever branch or shunt
//! parameters change; the structure is untouched by parameter updates.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

use gridflow_core::{Idx, Symmetry, YBusElement, YBusElementType};

use crate::lu::LuPattern;
use crate::types::{
    BranchSolverOutput, ApplianceSolverOutput, MathModelParam, MathModelParamIncrement,
    MathModelTopology,
};

/// One emitted matrix coordinate with the element that feeds it.
#[derive(Debug, Clone, Copy)]
struct ElementMap {
    pos: (Idx, Idx),
    element: YBusElement,
}

/// Sparsity structure of the admittance matrix of one subgrid.
#[derive(Debug)]
pub struct YBusStructure {
    /// CSR row pointers.
    pub row_indptr: Vec<Idx>,
    /// CSR column indices.
    pub col_indices: Vec<Idx>,
    /// Row index per CSR entry, for entry-parallel loops.
    pub row_indices: Vec<Idx>,
    /// All contributing elements, grouped per CSR entry.
    pub y_bus_element: Vec<YBusElement>,
    /// Element range of CSR entry `k` is
    /// `y_bus_element[y_bus_entry_indptr[k]..y_bus_entry_indptr[k + 1]]`.
    pub y_bus_entry_indptr: Vec<Idx>,
    /// CSR entry of the diagonal `(i, i)` per bus.
    pub bus_entry: Vec<Idx>,
    /// CSR entry of `(j, i)` for the entry at `(i, j)`; an involution, the
    /// identity on diagonal entries.
    pub transpose_entry: Vec<Idx>,
    /// LU pattern row pointers (pattern of the Y-bus plus fill-in).
    pub row_indptr_lu: Arc<Vec<Idx>>,
    /// LU pattern column indices.
    pub col_indices_lu: Arc<Vec<Idx>>,
    /// LU entry of the diagonal per bus.
    pub diag_lu: Arc<Vec<Idx>>,
    /// Y-bus CSR entry per LU entry, `-1` for pure fill-in positions.
    pub map_lu_y_bus: Arc<Vec<Idx>>,
}

impl YBusStructure {
    pub fn new(topo: &MathModelTopology) -> Self {
        let n_bus = topo.n_bus();
        let n_branch = topo.n_branch();

        // emit all matrix coordinates with their element tag
        let mut elements: Vec<ElementMap> =
            Vec::with_capacity(4 * n_branch as usize + topo.n_shunt() as usize);
        for (branch, bus_idx) in topo.branch_bus_idx.iter().enumerate() {
            // ff, ft, tf, tt
            for (i, element_type) in YBusElementType::BRANCH.iter().enumerate() {
                let bus1 = bus_idx[i / 2];
                let bus2 = bus_idx[i % 2];
                if bus1 == -1 || bus2 == -1 {
                    continue;
                }
                elements.push(ElementMap {
                    pos: (bus1, bus2),
                    element: YBusElement {
                        element_type: *element_type,
                        idx: branch as Idx,
                    },
                });
            }
        }
        for bus in 0..n_bus {
            for shunt in topo.shunt_bus_indptr[bus as usize]..topo.shunt_bus_indptr[bus as usize + 1]
            {
                elements.push(ElementMap {
                    pos: (bus, bus),
                    element: YBusElement {
                        element_type: YBusElementType::Shunt,
                        idx: shunt,
                    },
                });
            }
        }
        counting_sort_elements(&mut elements, n_bus);

        // group elements into CSR entries; inject an artificial diagonal for
        // buses without any contribution (single-bus grids)
        let mut entry_pos: Vec<(Idx, Idx)> = Vec::new();
        let mut entry_elem_indptr: Vec<Idx> = vec![0];
        let mut bus_entry = vec![-1 as Idx; n_bus as usize];
        // CSR entry of the ft and tf element per branch
        let mut off_diag_map = vec![[-1 as Idx; 2]; n_branch as usize];

        let mut it = 0usize;
        for row in 0..n_bus {
            let mut has_diag = false;
            loop {
                let at_row = it < elements.len() && elements[it].pos.0 == row;
                if !at_row || (!has_diag && elements[it].pos.1 > row) {
                    if !has_diag {
                        // artificial diagonal with an empty element range
                        let entry = entry_pos.len() as Idx;
                        entry_pos.push((row, row));
                        entry_elem_indptr.push(it as Idx);
                        bus_entry[row as usize] = entry;
                        has_diag = true;
                        continue;
                    }
                    if !at_row {
                        break;
                    }
                }
                let pos = elements[it].pos;
                let entry = entry_pos.len() as Idx;
                entry_pos.push(pos);
                if pos.0 == pos.1 {
                    bus_entry[pos.0 as usize] = entry;
                    has_diag = true;
                }
                // consume all elements of this position
                while it < elements.len() && elements[it].pos == pos {
                    let element = elements[it].element;
                    if pos.0 != pos.1 {
                        // ft is 1 and tf is 2, mapped to slots 0 and 1
                        match element.element_type {
                            YBusElementType::Bft => {
                                off_diag_map[element.idx as usize][0] = entry;
                            }
                            YBusElementType::Btf => {
                                off_diag_map[element.idx as usize][1] = entry;
                            }
                            _ => {}
                        }
                    }
                    it += 1;
                }
                entry_elem_indptr.push(it as Idx);
            }
        }
        debug_assert_eq!(it, elements.len());

        let nnz = entry_pos.len();
        let mut row_indptr = vec![0 as Idx; n_bus as usize + 1];
        let mut col_indices = Vec::with_capacity(nnz);
        let mut row_indices = Vec::with_capacity(nnz);
        for &(row, col) in &entry_pos {
            row_indptr[row as usize + 1] += 1;
            col_indices.push(col);
            row_indices.push(row);
        }
        for i in 0..n_bus as usize {
            row_indptr[i + 1] += row_indptr[i];
        }

        // transpose entries: identity on the diagonal, swapped pairs for the
        // two off-diagonal entries of every fully connected branch
        let mut transpose_entry: Vec<Idx> = (0..nnz as Idx).collect();
        for map in &off_diag_map {
            let [entry_ft, entry_tf] = *map;
            if entry_ft != -1 && entry_tf != -1 {
                transpose_entry[entry_ft as usize] = entry_tf;
                transpose_entry[entry_tf as usize] = entry_ft;
            }
        }

        let y_bus_element: Vec<YBusElement> = elements.iter().map(|e| e.element).collect();

        let (row_indptr_lu, col_indices_lu, diag_lu, map_lu_y_bus) =
            lu_structure(n_bus, &row_indptr, &col_indices);

        YBusStructure {
            row_indptr,
            col_indices,
            row_indices,
            y_bus_element,
            y_bus_entry_indptr: entry_elem_indptr,
            bus_entry,
            transpose_entry,
            row_indptr_lu: Arc::new(row_indptr_lu),
            col_indices_lu: Arc::new(col_indices_lu),
            diag_lu: Arc::new(diag_lu),
            map_lu_y_bus: Arc::new(map_lu_y_bus),
        }
    }

    pub fn nnz(&self) -> Idx {
        *self.row_indptr.last().unwrap()
    }

    pub fn nnz_lu(&self) -> Idx {
        *self.row_indptr_lu.last().unwrap()
    }

    /// Pattern handed to the block-sparse LU solver.
    pub fn lu_pattern(&self) -> LuPattern {
        LuPattern {
            size: self.bus_entry.len() as Idx,
            row_indptr: Arc::clone(&self.row_indptr_lu),
            col_indices: Arc::clone(&self.col_indices_lu),
            diag: Arc::clone(&self.diag_lu),
            data_mapping: Arc::clone(&self.map_lu_y_bus),
        }
    }
}

/// Stable two-pass counting sort by column then row.
fn counting_sort_elements(elements: &mut [ElementMap], n_bus: Idx) {
    let mut scratch = elements.to_vec();
    let mut counter = vec![0 as Idx; n_bus as usize];
    // sort column
    for e in elements.iter() {
        counter[e.pos.1 as usize] += 1;
    }
    for i in 1..counter.len() {
        counter[i] += counter[i - 1];
    }
    for e in elements.iter().rev() {
        counter[e.pos.1 as usize] -= 1;
        scratch[counter[e.pos.1 as usize] as usize] = *e;
    }
    // sort row
    counter.fill(0);
    for e in scratch.iter() {
        counter[e.pos.0 as usize] += 1;
    }
    for i in 1..counter.len() {
        counter[i] += counter[i - 1];
    }
    for e in scratch.iter().rev() {
        counter[e.pos.0 as usize] -= 1;
        elements[counter[e.pos.0 as usize] as usize] = *e;
    }
}

/// Symbolic factorisation: close the pattern under elimination in natural
/// order, then lay it out as CSR with a map back to the Y-bus entries.
fn lu_structure(
    n_bus: Idx,
    row_indptr: &[Idx],
    col_indices: &[Idx],
) -> (Vec<Idx>, Vec<Idx>, Vec<Idx>, Vec<Idx>) {
    let n = n_bus as usize;
    let mut rows: Vec<BTreeSet<Idx>> = vec![BTreeSet::new(); n];
    let mut cols: Vec<BTreeSet<Idx>> = vec![BTreeSet::new(); n];
    for row in 0..n {
        for entry in row_indptr[row] as usize..row_indptr[row + 1] as usize {
            let col = col_indices[entry];
            rows[row].insert(col);
            cols[col as usize].insert(row as Idx);
        }
    }

    // a pivot with an entry below at (i, p) and to the right at (p, j)
    // forces (i, j) into the pattern
    for p in 0..n {
        let below: Vec<Idx> = cols[p].range(p as Idx + 1..).copied().collect();
        let right: Vec<Idx> = rows[p].range(p as Idx + 1..).copied().collect();
        for &i in &below {
            for &j in &right {
                if rows[i as usize].insert(j) {
                    cols[j as usize].insert(i);
                }
            }
        }
    }

    let mut row_indptr_lu = vec![0 as Idx; n + 1];
    let mut col_indices_lu = Vec::new();
    let mut diag_lu = vec![0 as Idx; n];
    let mut map_lu_y_bus = Vec::new();
    for row in 0..n {
        let mut y_entry = row_indptr[row] as usize;
        let y_end = row_indptr[row + 1] as usize;
        for &col in &rows[row] {
            let entry = col_indices_lu.len() as Idx;
            col_indices_lu.push(col);
            if col as usize == row {
                diag_lu[row] = entry;
            }
            // both row lists are sorted: advance the Y cursor and check for
            // a matching position
            while y_entry < y_end && col_indices[y_entry] < col {
                y_entry += 1;
            }
            if y_entry < y_end && col_indices[y_entry] == col {
                map_lu_y_bus.push(y_entry as Idx);
            } else {
                map_lu_y_bus.push(-1);
            }
        }
        row_indptr_lu[row + 1] = col_indices_lu.len() as Idx;
    }
    (row_indptr_lu, col_indices_lu, diag_lu, map_lu_y_bus)
}

/// Admittance matrix of one subgrid in one symmetry.
pub struct YBus<S: Symmetry> {
    y_bus_struct: Arc<YBusStructure>,
    admittance: Arc<Vec<S::ComplexTensor>>,
    math_topology: Arc<MathModelTopology>,
    math_model_param: Arc<MathModelParam<S>>,
}

impl<S: Symmetry> YBus<S> {
    /// Build the admittance matrix, reusing an existing structure when the
    /// sibling symmetry already computed one.
    pub fn new(
        topo: Arc<MathModelTopology>,
        param: Arc<MathModelParam<S>>,
        structure: Option<Arc<YBusStructure>>,
    ) -> Self {
        let y_bus_struct =
            structure.unwrap_or_else(|| Arc::new(YBusStructure::new(topo.as_ref())));
        let mut y_bus = YBus {
            y_bus_struct,
            admittance: Arc::new(Vec::new()),
            math_topology: topo,
            math_model_param: param.clone(),
        };
        y_bus.update_admittance(param);
        y_bus
    }

    pub fn size(&self) -> Idx {
        self.y_bus_struct.bus_entry.len() as Idx
    }

    pub fn nnz(&self) -> Idx {
        self.y_bus_struct.nnz()
    }

    pub fn structure(&self) -> &YBusStructure {
        &self.y_bus_struct
    }

    pub fn shared_structure(&self) -> Arc<YBusStructure> {
        Arc::clone(&self.y_bus_struct)
    }

    pub fn row_indptr(&self) -> &[Idx] {
        &self.y_bus_struct.row_indptr
    }

    pub fn col_indices(&self) -> &[Idx] {
        &self.y_bus_struct.col_indices
    }

    pub fn row_indices(&self) -> &[Idx] {
        &self.y_bus_struct.row_indices
    }

    pub fn bus_entry(&self) -> &[Idx] {
        &self.y_bus_struct.bus_entry
    }

    pub fn transpose_entry(&self) -> &[Idx] {
        &self.y_bus_struct.transpose_entry
    }

    pub fn admittance(&self) -> &[S::ComplexTensor] {
        &self.admittance
    }

    pub fn math_topology(&self) -> &MathModelTopology {
        &self.math_topology
    }

    pub fn shared_topology(&self) -> Arc<MathModelTopology> {
        Arc::clone(&self.math_topology)
    }

    pub fn math_model_param(&self) -> &MathModelParam<S> {
        &self.math_model_param
    }

    /// Rebuild all admittance values from new parameters.
    pub fn update_admittance(&mut self, param: Arc<MathModelParam<S>>) {
        self.math_model_param = param;
        let nnz = self.nnz() as usize;
        let mut admittance = vec![S::ComplexTensor::default(); nnz];
        for (entry, value) in admittance.iter_mut().enumerate() {
            *value = self.entry_admittance(entry);
        }
        self.admittance = Arc::new(admittance);
    }

    /// Recompute only the entries fed by changed branches or shunts.
    ///
    /// Every solver caching a factorisation of (a matrix derived from) this
    /// admittance must be invalidated afterwards.
    pub fn update_admittance_partial(
        &mut self,
        param: Arc<MathModelParam<S>>,
        increment: &MathModelParamIncrement,
    ) {
        self.math_model_param = param;
        let changed_branches: HashSet<Idx> =
            increment.branch_param_to_change.iter().copied().collect();
        let changed_shunts: HashSet<Idx> =
            increment.shunt_param_to_change.iter().copied().collect();

        let structure = Arc::clone(&self.y_bus_struct);
        let mut admittance = (*self.admittance).clone();
        for entry in 0..self.nnz() as usize {
            let begin = structure.y_bus_entry_indptr[entry] as usize;
            let end = structure.y_bus_entry_indptr[entry + 1] as usize;
            let touched = structure.y_bus_element[begin..end].iter().any(|e| {
                match e.element_type {
                    YBusElementType::Shunt => changed_shunts.contains(&e.idx),
                    _ => changed_branches.contains(&e.idx),
                }
            });
            if touched {
                admittance[entry] = self.entry_admittance(entry);
            }
        }
        self.admittance = Arc::new(admittance);
    }

    fn entry_admittance(&self, entry: usize) -> S::ComplexTensor {
        let structure = &self.y_bus_struct;
        let param = &self.math_model_param;
        let begin = structure.y_bus_entry_indptr[entry] as usize;
        let end = structure.y_bus_entry_indptr[entry + 1] as usize;
        let mut value = S::ComplexTensor::default();
        for element in &structure.y_bus_element[begin..end] {
            match element.element_type {
                YBusElementType::Shunt => {
                    value += param.shunt_param[element.idx as usize];
                }
                branch_element => {
                    value += param.branch_param[element.idx as usize].value
                        [branch_element.branch_value_index()];
                }
            }
        }
        value
    }

    /// Power injection into one bus: `s = conj(Σ_j Y_ij · u_j) · u_i`.
    pub fn calculate_injection_at(&self, u: &[S::ComplexValue], bus: Idx) -> S::ComplexValue {
        let begin = self.y_bus_struct.row_indptr[bus as usize] as usize;
        let end = self.y_bus_struct.row_indptr[bus as usize + 1] as usize;
        let mut i_inj = S::ComplexValue::default();
        for entry in begin..end {
            let j = self.y_bus_struct.col_indices[entry] as usize;
            i_inj += S::dot(&self.admittance[entry], &u[j]);
        }
        S::conj(&i_inj) * u[bus as usize]
    }

    /// Power injection at every bus.
    pub fn calculate_injection(&self, u: &[S::ComplexValue]) -> Vec<S::ComplexValue> {
        (0..self.size())
            .map(|bus| self.calculate_injection_at(u, bus))
            .collect()
    }

    /// Branch flows from a solved voltage vector.
    ///
    /// A disconnected side is treated as zero voltage.
    pub fn calculate_branch_flow(&self, u: &[S::ComplexValue]) -> Vec<BranchSolverOutput<S>> {
        self.math_topology
            .branch_bus_idx
            .iter()
            .zip(&self.math_model_param.branch_param)
            .map(|(&[f, t], param)| {
                let uf = if f != -1 {
                    u[f as usize]
                } else {
                    S::ComplexValue::default()
                };
                let ut = if t != -1 {
                    u[t as usize]
                } else {
                    S::ComplexValue::default()
                };
                let i_f = S::dot(param.yff(), &uf) + S::dot(param.yft(), &ut);
                let i_t = S::dot(param.ytf(), &uf) + S::dot(param.ytt(), &ut);
                BranchSolverOutput {
                    s_f: uf * S::conj(&i_f),
                    s_t: ut * S::conj(&i_t),
                    i_f,
                    i_t,
                }
            })
            .collect()
    }

    /// Shunt flows from a solved voltage vector, injection direction (the
    /// sign is negative for a passive shunt).
    pub fn calculate_shunt_flow(&self, u: &[S::ComplexValue]) -> Vec<ApplianceSolverOutput<S>> {
        let topo = &self.math_topology;
        let mut flow = vec![ApplianceSolverOutput::<S>::default(); topo.n_shunt() as usize];
        for bus in 0..self.size() {
            for shunt in topo.shunt_bus_indptr[bus as usize]..topo.shunt_bus_indptr[bus as usize + 1]
            {
                let i = -S::dot(
                    &self.math_model_param.shunt_param[shunt as usize],
                    &u[bus as usize],
                );
                flow[shunt as usize] = ApplianceSolverOutput {
                    s: u[bus as usize] * S::conj(&i),
                    i,
                };
            }
        }
        flow
    }
}
