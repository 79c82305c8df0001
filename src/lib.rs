//! STRATA MIR - Mid-level IR and lowering passes
//!
//! This crate handles:
//! - Layer extraction: nestable conditional design regions are pulled out
//!   of module bodies into freestanding private modules with synthesized
//!   interfaces, instantiated through conditionally-included bindings
//! - Output directory assignment: modules without explicit placement get
//!   the most specific directory still valid for every caller, via a
//!   least-common-ancestor computation over the directory forest

pub mod compiler;
pub mod instance_graph;
pub mod lower_layers;
pub mod mir;
pub mod namespace;
pub mod output_dirs;
pub mod pass;
pub mod validation;

// Re-export main types
pub use compiler::CircuitCompiler;
pub use instance_graph::{InstanceGraph, InstanceSite};
pub use lower_layers::LowerLayers;
pub use mir::{
    Annotation, Circuit, ConnectOp, DataType, InstanceOp, LayerBlockId, LayerBlockOp, LayerDef,
    LayerPath, Module, ModuleId, Operation, OutputFile, Port, PortDirection, PrimKind, PrimOp,
    RefCastOp, RefDefineOp, RefResolveOp, RefSendOp, RefSubOp, ValueId, ValueInfo, Verbatim,
    WireOp, DECLARE_OUTPUT_DIR_ANNOTATION,
};
pub use namespace::{Namespace, NamingAuthority};
pub use output_dirs::{AssignOutputDirs, OutputDirTable};
pub use pass::{Pass, PassManager};
pub use validation::{validate_circuit, ValidationError};

use anyhow::Result;

/// Lower a circuit with the default pipeline.
pub fn lower_circuit(circuit: &mut Circuit) -> Result<()> {
    CircuitCompiler::new().lower(circuit)
}
