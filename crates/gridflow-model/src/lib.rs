//! # gridflow-model: the physical data plane
//!
//! Everything between an input dataset and the numerical solver stack:
//!
//! - [`component`] - typed component tables (nodes, lines, links,
//!   transformers, three-winding transformers, shunts, sources, loads and
//!   generators, sensors) with their SI-to-per-unit parameter conversion
//! - [`dataset`] - the dataset boundary: input rows, batched update rows
//!   with the NaN/sentinel "leave unchanged" policy, and the attribute
//!   schema registry
//! - [`update`] - scenario update rows and application helpers
//! - [`main_model`] - [`MainModel`]: validation, topology assembly, solver
//!   dispatch per subgrid, and projection of solver results back onto the
//!   physical components
//! - [`output`] - result rows in SI units
//!
//! The model caches the subgrid decomposition and the Y-bus structures;
//! clones share them, which keeps per-scenario copies in batch runs cheap.

pub mod component;
pub mod dataset;
pub mod main_model;
pub mod output;
pub mod update;

pub use component::{
    ApplianceDirection, LineInput, LinkInput, LoadGenInput, NodeInput, PowerSensorInput,
    ShuntInput, SourceInput, ThreeWindingTransformerInput, TransformerInput, VoltageSensorInput,
};
pub use dataset::{
    attribute_def, component_attributes, AttrKind, AttributeDef, BatchColumn, ComponentKind,
    InputDataset, UpdateDataset,
};
pub use main_model::{MainModel, SequenceIdxMap};
pub use output::{ApplianceOutput, Branch3Output, BranchOutput, NodeOutput, PhysicalOutput};
