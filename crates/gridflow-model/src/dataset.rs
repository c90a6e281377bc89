//! The dataset boundary of the engine.
//!
//! A dataset is a tagged collection of typed component buffers. The input
//! dataset carries one row per physical component; an update dataset
//! carries, per component type, a batch of scenario rows where numeric NaN
//! and the integer sentinels mean "leave unchanged".
//!
//! The attribute registry maps component and attribute names to typed
//! accessors, so generic callers can query rows without knowing the struct
//! layout; unknown names surface as
//! [`PowerGridError::UnknownAttributeName`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use gridflow_core::{Id, Idx, PowerGridError, Result};

use crate::component::{
    LineInput, LinkInput, LoadGenInput, NodeInput, PowerSensorInput, ShuntInput, SourceInput,
    ThreeWindingTransformerInput, TransformerInput, VoltageSensorInput,
};
use crate::update::{
    Branch3Update, BranchUpdate, LoadGenUpdate, PowerSensorUpdate, ShuntUpdate, SourceUpdate,
    TransformerUpdate, VoltageSensorUpdate,
};

/// The component classes the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentKind {
    Node,
    Line,
    Link,
    Transformer,
    ThreeWindingTransformer,
    Shunt,
    Source,
    LoadGen,
    VoltageSensor,
    PowerSensor,
}

impl ComponentKind {
    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Node => "node",
            ComponentKind::Line => "line",
            ComponentKind::Link => "link",
            ComponentKind::Transformer => "transformer",
            ComponentKind::ThreeWindingTransformer => "three_winding_transformer",
            ComponentKind::Shunt => "shunt",
            ComponentKind::Source => "source",
            ComponentKind::LoadGen => "load_gen",
            ComponentKind::VoltageSensor => "voltage_sensor",
            ComponentKind::PowerSensor => "power_sensor",
        }
    }
}

/// Scalar kind of one attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Double,
    Double3,
    IntS,
    Id,
}

/// One attribute of a component schema.
#[derive(Debug, Clone, Copy)]
pub struct AttributeDef {
    pub name: &'static str,
    pub kind: AttrKind,
}

macro_rules! attrs {
    ($(($name:literal, $kind:ident)),* $(,)?) => {
        &[$(AttributeDef { name: $name, kind: AttrKind::$kind }),*]
    };
}

/// Static schema registry, component name to attribute list.
static META: Lazy<BTreeMap<&'static str, &'static [AttributeDef]>> = Lazy::new(|| {
    let mut meta: BTreeMap<&'static str, &'static [AttributeDef]> = BTreeMap::new();
    meta.insert("node", attrs![("id", Id), ("u_rated", Double)]);
    meta.insert(
        "line",
        attrs![
            ("id", Id),
            ("from_node", Id),
            ("to_node", Id),
            ("from_status", IntS),
            ("to_status", IntS),
            ("r1", Double),
            ("x1", Double),
            ("c1", Double),
            ("tan1", Double),
            ("r0", Double),
            ("x0", Double),
            ("c0", Double),
            ("tan0", Double),
            ("i_n", Double),
        ],
    );
    meta.insert(
        "link",
        attrs![
            ("id", Id),
            ("from_node", Id),
            ("to_node", Id),
            ("from_status", IntS),
            ("to_status", IntS),
        ],
    );
    meta.insert(
        "transformer",
        attrs![
            ("id", Id),
            ("from_node", Id),
            ("to_node", Id),
            ("from_status", IntS),
            ("to_status", IntS),
            ("u1", Double),
            ("u2", Double),
            ("sn", Double),
            ("uk", Double),
            ("pk", Double),
            ("i0", Double),
            ("p0", Double),
            ("winding_from", IntS),
            ("winding_to", IntS),
            ("clock", IntS),
            ("tap_side", IntS),
            ("tap_pos", IntS),
            ("tap_min", IntS),
            ("tap_max", IntS),
            ("tap_nom", IntS),
            ("tap_size", Double),
            ("uk_min", Double),
            ("uk_max", Double),
            ("pk_min", Double),
            ("pk_max", Double),
            ("r_grounding_from", Double),
            ("x_grounding_from", Double),
            ("r_grounding_to", Double),
            ("x_grounding_to", Double),
        ],
    );
    meta.insert(
        "three_winding_transformer",
        attrs![
            ("id", Id),
            ("node_1", Id),
            ("node_2", Id),
            ("node_3", Id),
            ("status_1", IntS),
            ("status_2", IntS),
            ("status_3", IntS),
            ("u1", Double),
            ("u2", Double),
            ("u3", Double),
            ("sn_1", Double),
            ("sn_2", Double),
            ("sn_3", Double),
            ("uk_12", Double),
            ("uk_13", Double),
            ("uk_23", Double),
            ("pk_12", Double),
            ("pk_13", Double),
            ("pk_23", Double),
            ("i0", Double),
            ("p0", Double),
            ("winding_1", IntS),
            ("winding_2", IntS),
            ("winding_3", IntS),
            ("clock_12", IntS),
            ("clock_13", IntS),
            ("tap_side", IntS),
            ("tap_pos", IntS),
            ("tap_min", IntS),
            ("tap_max", IntS),
            ("tap_nom", IntS),
            ("tap_size", Double),
        ],
    );
    meta.insert(
        "shunt",
        attrs![
            ("id", Id),
            ("node", Id),
            ("status", IntS),
            ("g1", Double),
            ("b1", Double),
            ("g0", Double),
            ("b0", Double),
        ],
    );
    meta.insert(
        "source",
        attrs![
            ("id", Id),
            ("node", Id),
            ("status", IntS),
            ("u_ref", Double),
            ("sk", Double),
            ("rx_ratio", Double),
            ("z01_ratio", Double),
        ],
    );
    meta.insert(
        "load_gen",
        attrs![
            ("id", Id),
            ("node", Id),
            ("status", IntS),
            ("type", IntS),
            ("p_specified", Double3),
            ("q_specified", Double3),
        ],
    );
    meta.insert(
        "voltage_sensor",
        attrs![
            ("id", Id),
            ("measured_object", Id),
            ("u_sigma", Double),
            ("u_measured", Double3),
            ("u_angle_measured", Double3),
        ],
    );
    meta.insert(
        "power_sensor",
        attrs![
            ("id", Id),
            ("measured_object", Id),
            ("measured_terminal_type", IntS),
            ("power_sigma", Double),
            ("p_measured", Double3),
            ("q_measured", Double3),
        ],
    );
    meta
});

/// Schema of one component type.
pub fn component_attributes(component: &str) -> Result<&'static [AttributeDef]> {
    META.get(component)
        .copied()
        .ok_or_else(|| PowerGridError::UnknownAttributeName(component.to_string()))
}

/// Definition of one attribute, by component and attribute name.
pub fn attribute_def(component: &str, attribute: &str) -> Result<AttributeDef> {
    component_attributes(component)?
        .iter()
        .find(|def| def.name == attribute)
        .copied()
        .ok_or_else(|| {
            PowerGridError::UnknownAttributeName(format!("{component}/{attribute}"))
        })
}

/// One scenario of component configuration, the base of a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputDataset {
    pub node: Vec<NodeInput>,
    pub line: Vec<LineInput>,
    pub link: Vec<LinkInput>,
    pub transformer: Vec<TransformerInput>,
    pub three_winding_transformer: Vec<ThreeWindingTransformerInput>,
    pub shunt: Vec<ShuntInput>,
    pub source: Vec<SourceInput>,
    pub load_gen: Vec<LoadGenInput>,
    pub voltage_sensor: Vec<VoltageSensorInput>,
    pub power_sensor: Vec<PowerSensorInput>,
}

/// A batch buffer: `n_scenarios` slices of update rows, either ragged
/// through `indptr` or homogeneous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchColumn<T> {
    pub data: Vec<T>,
    /// `indptr[s + 1] - indptr[s]` rows in scenario `s`; when absent every
    /// scenario has `data.len() / n_scenarios` rows.
    pub indptr: Option<Vec<Idx>>,
    pub n_scenarios: Idx,
}

impl<T> Default for BatchColumn<T> {
    fn default() -> Self {
        BatchColumn {
            data: Vec::new(),
            indptr: None,
            n_scenarios: 0,
        }
    }
}

impl<T> BatchColumn<T> {
    pub fn empty(n_scenarios: Idx) -> Self {
        BatchColumn {
            data: Vec::new(),
            indptr: None,
            n_scenarios,
        }
    }

    /// Rows of one scenario. A malformed indptr is rejected rather than
    /// read out of bounds.
    pub fn scenario(&self, s: Idx) -> Result<&[T]> {
        if s < 0 || s >= self.n_scenarios {
            return Err(PowerGridError::InvalidScenarioIndex {
                index: s,
                n_scenarios: self.n_scenarios,
            });
        }
        match &self.indptr {
            Some(indptr) => {
                let begin = indptr[s as usize];
                let end = indptr[s as usize + 1];
                if begin < 0 || end < begin || end as usize > self.data.len() {
                    return Err(PowerGridError::MalformedBatchIndptr(s));
                }
                Ok(&self.data[begin as usize..end as usize])
            }
            None => {
                if self.n_scenarios == 0 {
                    return Ok(&[]);
                }
                let per_scenario = self.data.len() / self.n_scenarios as usize;
                Ok(&self.data[s as usize * per_scenario..(s as usize + 1) * per_scenario])
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A batch of scenario updates over a base model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDataset {
    pub n_scenarios: Idx,
    pub line: BatchColumn<BranchUpdate>,
    pub link: BatchColumn<BranchUpdate>,
    pub transformer: BatchColumn<TransformerUpdate>,
    pub three_winding_transformer: BatchColumn<Branch3Update>,
    pub shunt: BatchColumn<ShuntUpdate>,
    pub source: BatchColumn<SourceUpdate>,
    pub load_gen: BatchColumn<LoadGenUpdate>,
    pub voltage_sensor: BatchColumn<VoltageSensorUpdate>,
    pub power_sensor: BatchColumn<PowerSensorUpdate>,
}

impl UpdateDataset {
    pub fn new(n_scenarios: Idx) -> Self {
        UpdateDataset {
            n_scenarios,
            line: BatchColumn::empty(n_scenarios),
            link: BatchColumn::empty(n_scenarios),
            transformer: BatchColumn::empty(n_scenarios),
            three_winding_transformer: BatchColumn::empty(n_scenarios),
            shunt: BatchColumn::empty(n_scenarios),
            source: BatchColumn::empty(n_scenarios),
            load_gen: BatchColumn::empty(n_scenarios),
            voltage_sensor: BatchColumn::empty(n_scenarios),
            power_sensor: BatchColumn::empty(n_scenarios),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
            && self.link.is_empty()
            && self.transformer.is_empty()
            && self.three_winding_transformer.is_empty()
            && self.shunt.is_empty()
            && self.source.is_empty()
            && self.load_gen.is_empty()
            && self.voltage_sensor.is_empty()
            && self.power_sensor.is_empty()
    }

    /// True when every scenario updates the same components in the same
    /// order, so sequence indices can be resolved once and base-model
    /// copies can be reused across scenarios.
    pub fn is_update_independent(&self) -> Result<bool> {
        Ok(column_independent(&self.line, |row| row.id)?
            && column_independent(&self.link, |row| row.id)?
            && column_independent(&self.transformer, |row| row.id)?
            && column_independent(&self.three_winding_transformer, |row| row.id)?
            && column_independent(&self.shunt, |row| row.id)?
            && column_independent(&self.source, |row| row.id)?
            && column_independent(&self.load_gen, |row| row.id)?
            && column_independent(&self.voltage_sensor, |row| row.id)?
            && column_independent(&self.power_sensor, |row| row.id)?)
    }

    /// True when no scenario touches any switching status, so the subgrid
    /// decomposition and Y-bus structure survive the whole batch.
    ///
    /// The reading is conservative: any non-sentinel status invalidates the
    /// cache, even when it rewrites the present value.
    pub fn is_topology_cacheable(&self) -> bool {
        self.line.data.iter().all(|row| row.keeps_topology())
            && self.link.data.iter().all(|row| row.keeps_topology())
            && self.transformer.data.iter().all(|row| row.keeps_topology())
            && self
                .three_winding_transformer
                .data
                .iter()
                .all(|row| row.keeps_topology())
            && self.source.data.iter().all(|row| row.keeps_topology())
    }
}

/// All scenarios of one column have the same length and id sequence.
fn column_independent<T>(
    column: &BatchColumn<T>,
    id_of: impl Fn(&T) -> Id,
) -> Result<bool> {
    if column.n_scenarios <= 1 {
        return Ok(true);
    }
    let first = column.scenario(0)?;
    for s in 1..column.n_scenarios {
        let rows = column.scenario(s)?;
        if rows.len() != first.len() {
            return Ok(false);
        }
        if rows
            .iter()
            .zip(first)
            .any(|(row, first_row)| id_of(row) != id_of(first_row))
        {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_components_and_attributes() {
        assert!(component_attributes("node").is_ok());
        let def = attribute_def("line", "r1").unwrap();
        assert_eq!(def.kind, AttrKind::Double);
        let def = attribute_def("load_gen", "p_specified").unwrap();
        assert_eq!(def.kind, AttrKind::Double3);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            component_attributes("flux_capacitor"),
            Err(PowerGridError::UnknownAttributeName(_))
        ));
        assert!(matches!(
            attribute_def("node", "banana"),
            Err(PowerGridError::UnknownAttributeName(_))
        ));
    }

    #[test]
    fn homogeneous_batch_splits_evenly() {
        let column = BatchColumn::<i32> {
            data: vec![1, 2, 3, 4, 5, 6],
            indptr: None,
            n_scenarios: 3,
        };
        assert_eq!(column.scenario(0).unwrap(), &[1, 2]);
        assert_eq!(column.scenario(2).unwrap(), &[5, 6]);
        assert!(matches!(
            column.scenario(3),
            Err(PowerGridError::InvalidScenarioIndex {
                index: 3,
                n_scenarios: 3,
            })
        ));
    }

    #[test]
    fn ragged_batch_follows_indptr() {
        let column = BatchColumn::<i32> {
            data: vec![10, 20, 30],
            indptr: Some(vec![0, 2, 2, 3]),
            n_scenarios: 3,
        };
        assert_eq!(column.scenario(0).unwrap(), &[10, 20]);
        assert_eq!(column.scenario(1).unwrap(), &[] as &[i32]);
        assert_eq!(column.scenario(2).unwrap(), &[30]);
    }

    #[test]
    fn malformed_indptr_is_rejected() {
        let column = BatchColumn::<i32> {
            data: vec![1],
            indptr: Some(vec![0, 5, 5, 1]),
            n_scenarios: 3,
        };
        assert!(matches!(
            column.scenario(0),
            Err(PowerGridError::MalformedBatchIndptr(0))
        ));
    }
}
