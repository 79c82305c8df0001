//! MIR - Mid-level Intermediate Representation
//!
//! This represents hardware designs at the level consumed by the lowering
//! passes in this crate:
//! - Layer extraction (`lower_layers`)
//! - Output directory assignment (`output_dirs`)
//!
//! Modules own a flat value table plus an ordered operation body. Reference
//! types may carry a layer requirement, which is erased when the layer is
//! extracted into its own module.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Annotation class declaring an output directory hierarchy entry.
///
/// Members: `name` (the directory) and optionally `parent` (another
/// directory name; absent means a direct child of the output root).
pub const DECLARE_OUTPUT_DIR_ANNOTATION: &str = "strata.DeclareOutputDirAnnotation";

/// A complete circuit: the unit of one compiler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    /// Circuit name
    pub name: String,
    /// All modules, including extracted ones
    pub modules: Vec<Module>,
    /// Tree of layer definitions
    pub layers: Vec<LayerDef>,
    /// Free-form annotations attached to the circuit
    pub annotations: Vec<Annotation>,
    /// Generated textual artifacts (inclusion guards and the like)
    pub artifacts: Vec<Verbatim>,
    /// Next unassigned module id
    pub(crate) next_module: u32,
}

/// A hardware module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Module identifier
    pub id: ModuleId,
    /// Module name, unique within the circuit
    pub name: String,
    /// Whether the module is visible outside the circuit
    pub public: bool,
    /// Input/output ports, in declaration order
    pub ports: Vec<Port>,
    /// Table of every value live in this module's body
    pub values: IndexMap<ValueId, ValueInfo>,
    /// Ordered instruction sequence
    pub body: Vec<Operation>,
    /// Explicit output placement, if any
    pub output_file: Option<OutputFile>,
    /// Next unassigned value id
    pub(crate) next_value: u32,
}

/// Module identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// Value identifier, scoped to one module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Layer block identifier, unique within the circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerBlockId(pub u32);

/// Name and type of a value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueInfo {
    /// Source-level name, used when synthesizing port names
    pub name: String,
    /// Value type
    pub ty: DataType,
}

/// Port of a module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// Port name
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Port type
    pub ty: DataType,
    /// The value representing this port inside the module body
    pub value: ValueId,
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Bit vector
    Bit(usize),
    /// Clock signal
    Clock,
    /// Reset signal
    Reset,
    /// Reference to a remote value, optionally requiring a layer
    Ref {
        ty: Box<DataType>,
        layer: Option<LayerPath>,
    },
}

impl DataType {
    /// Whether this is a reference type.
    pub fn is_ref(&self) -> bool {
        matches!(self, DataType::Ref { .. })
    }

    /// The layer requirement carried by a reference type, if any.
    pub fn layer(&self) -> Option<&LayerPath> {
        match self {
            DataType::Ref { layer, .. } => layer.as_ref(),
            _ => None,
        }
    }

    /// The referenced type for references, the type itself otherwise.
    pub fn deref_type(&self) -> &DataType {
        match self {
            DataType::Ref { ty, .. } => ty,
            other => other,
        }
    }

    /// A copy of this type with any layer requirement removed, or `None`
    /// if there was nothing to remove.
    pub fn without_layer(&self) -> Option<DataType> {
        match self {
            DataType::Ref {
                ty,
                layer: Some(_),
            } => Some(DataType::Ref {
                ty: ty.clone(),
                layer: None,
            }),
            _ => None,
        }
    }
}

/// Qualified path to a layer definition, e.g. `A::B::C`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerPath(pub Vec<String>);

impl LayerPath {
    /// Build a path from name segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LayerPath(segments.into_iter().map(Into::into).collect())
    }

    /// The flattened name: segments joined with underscores (`A_B_C`).
    pub fn flattened(&self) -> String {
        self.0.join("_")
    }
}

/// A layer definition. Nested definitions form a tree hanging off
/// [`Circuit::layers`]; definitions are never instantiated directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDef {
    /// Layer name
    pub name: String,
    /// Nested layer definitions
    pub children: Vec<LayerDef>,
}

/// Free-form annotation attached to the circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation class
    pub class: String,
    /// Named members
    pub members: HashMap<String, String>,
}

/// A generated textual artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verbatim {
    /// Literal text
    pub text: String,
    /// Output placement
    pub output_file: Option<OutputFile>,
}

/// Output placement attribute for modules, instances and artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFile {
    /// Emit into a directory, file name chosen downstream
    Directory(String),
    /// Emit into a specific file
    File {
        name: String,
        exclude_from_filelist: bool,
    },
}

impl OutputFile {
    /// The directory component of this placement, if any.
    pub fn directory(&self) -> Option<&str> {
        match self {
            OutputFile::Directory(dir) => Some(dir),
            OutputFile::File { name, .. } => {
                let idx = name.rfind(|c| c == '/' || c == '\\')?;
                Some(&name[..=idx])
            }
        }
    }
}

/// Operation in a module body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    /// Value declaration
    Wire(WireOp),
    /// Combinational primitive
    Prim(PrimOp),
    /// Turn a value into a reference to it
    RefSend(RefSendOp),
    /// Read the value behind a reference
    RefResolve(RefResolveOp),
    /// Project a sub-element out of a reference
    RefSub(RefSubOp),
    /// Reinterpret a reference at a different type
    RefCast(RefCastOp),
    /// Drive a reference with another reference
    RefDefine(RefDefineOp),
    /// Assignment
    Connect(ConnectOp),
    /// Module instantiation
    Instance(InstanceOp),
    /// Conditional design region to be extracted
    LayerBlock(LayerBlockOp),
}

/// Value declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOp {
    pub result: ValueId,
}

/// Combinational primitive with an operand list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimOp {
    pub result: ValueId,
    pub kind: PrimKind,
    pub args: Vec<ValueId>,
}

/// Primitive operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimKind {
    Not,
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mux,
    Cat,
}

/// Turn a value into a reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefSendOp {
    pub result: ValueId,
    pub base: ValueId,
}

/// Read the value behind a reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefResolveOp {
    pub result: ValueId,
    pub source: ValueId,
}

/// Project a sub-element out of a reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefSubOp {
    pub result: ValueId,
    pub base: ValueId,
    pub index: usize,
}

/// Reinterpret a reference at the result value's type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefCastOp {
    pub result: ValueId,
    pub input: ValueId,
}

/// Drive a reference-typed destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefDefineOp {
    pub dest: ValueId,
    pub src: ValueId,
}

/// Assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOp {
    pub dest: ValueId,
    pub src: ValueId,
}

/// Module instantiation. One result value per port of the instantiated
/// module, positionally; inputs are driven by connecting to the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceOp {
    /// Instance name
    pub name: String,
    /// Instantiated module
    pub module: ModuleId,
    /// One value per port
    pub results: Vec<ValueId>,
    /// Emit as a conditionally-included binding. Bind instances cannot be
    /// nested inside one another.
    pub lower_to_bind: bool,
    /// Output placement hint
    pub output_file: Option<OutputFile>,
    /// Instance annotations
    pub annotations: Vec<Annotation>,
    /// Per-port annotations, positionally
    pub port_annotations: Vec<Vec<Annotation>>,
}

/// One occurrence of a layer in a module body. Consumed exactly once by
/// layer extraction and replaced with an [`InstanceOp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerBlockOp {
    /// Block identifier, unique within the circuit
    pub id: LayerBlockId,
    /// The layer this block belongs to
    pub layer: LayerPath,
    /// Region body
    pub body: Vec<Operation>,
}

impl Operation {
    /// Values defined by this operation.
    pub fn results(&self) -> Vec<ValueId> {
        match self {
            Operation::Wire(op) => vec![op.result],
            Operation::Prim(op) => vec![op.result],
            Operation::RefSend(op) => vec![op.result],
            Operation::RefResolve(op) => vec![op.result],
            Operation::RefSub(op) => vec![op.result],
            Operation::RefCast(op) => vec![op.result],
            Operation::RefDefine(_) => vec![],
            Operation::Connect(_) => vec![],
            Operation::Instance(op) => op.results.clone(),
            Operation::LayerBlock(_) => vec![],
        }
    }

    /// Values read by this operation. Destinations of connect-like
    /// operations are uses, not definitions.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Operation::Wire(_) => vec![],
            Operation::Prim(op) => op.args.clone(),
            Operation::RefSend(op) => vec![op.base],
            Operation::RefResolve(op) => vec![op.source],
            Operation::RefSub(op) => vec![op.base],
            Operation::RefCast(op) => vec![op.input],
            Operation::RefDefine(op) => vec![op.dest, op.src],
            Operation::Connect(op) => vec![op.dest, op.src],
            Operation::Instance(_) => vec![],
            Operation::LayerBlock(_) => vec![],
        }
    }

    /// Rewrite every operand through `f`. Results are left alone, and
    /// nested layer block bodies are not entered.
    pub fn map_operands<F: FnMut(ValueId) -> ValueId>(&mut self, f: &mut F) {
        match self {
            Operation::Wire(_) => {}
            Operation::Prim(op) => {
                for arg in &mut op.args {
                    *arg = f(*arg);
                }
            }
            Operation::RefSend(op) => op.base = f(op.base),
            Operation::RefResolve(op) => op.source = f(op.source),
            Operation::RefSub(op) => op.base = f(op.base),
            Operation::RefCast(op) => op.input = f(op.input),
            Operation::RefDefine(op) => {
                op.dest = f(op.dest);
                op.src = f(op.src);
            }
            Operation::Connect(op) => {
                op.dest = f(op.dest);
                op.src = f(op.src);
            }
            Operation::Instance(_) => {}
            Operation::LayerBlock(_) => {}
        }
    }
}

/// Visit every operation in a body, entering layer block bodies, in
/// pre-order.
pub fn walk_ops<'a, F: FnMut(&'a Operation)>(body: &'a [Operation], f: &mut F) {
    for op in body {
        f(op);
        if let Operation::LayerBlock(block) = op {
            walk_ops(&block.body, f);
        }
    }
}

/// Apply a value rename map to every operand in a body, entering layer
/// block bodies. Chains in the map (a renamed to b, b renamed to c) are
/// followed to their end.
pub fn rename_operands(body: &mut [Operation], map: &HashMap<ValueId, ValueId>) {
    for op in body {
        op.map_operands(&mut |mut v| {
            while let Some(&next) = map.get(&v) {
                v = next;
            }
            v
        });
        if let Operation::LayerBlock(block) = op {
            rename_operands(&mut block.body, map);
        }
    }
}

impl Circuit {
    /// Create a new empty circuit.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
            layers: Vec::new(),
            annotations: Vec::new(),
            artifacts: Vec::new(),
            next_module: 0,
        }
    }

    /// Allocate a fresh module id.
    pub fn alloc_module_id(&mut self) -> ModuleId {
        let id = ModuleId(self.next_module);
        self.next_module += 1;
        id
    }

    /// Add a module to the circuit.
    pub fn add_module(&mut self, module: Module) {
        self.next_module = self.next_module.max(module.id.0 + 1);
        self.modules.push(module);
    }

    /// Look up a module by id.
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Look up a module by id, mutably.
    pub fn module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.iter_mut().find(|m| m.id == id)
    }

    /// All annotations of a given class.
    pub fn annotations_of_class<'a>(
        &'a self,
        class: &'a str,
    ) -> impl Iterator<Item = &'a Annotation> {
        self.annotations.iter().filter(move |a| a.class == class)
    }
}

impl Module {
    /// Create a new empty module.
    pub fn new(id: ModuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            public: false,
            ports: Vec::new(),
            values: IndexMap::new(),
            body: Vec::new(),
            output_file: None,
            next_value: 0,
        }
    }

    /// Allocate a fresh value in this module's table.
    pub fn new_value(&mut self, name: impl Into<String>, ty: DataType) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.values.insert(
            id,
            ValueInfo {
                name: name.into(),
                ty,
            },
        );
        id
    }

    /// Add a port and its body value.
    pub fn add_port(
        &mut self,
        name: impl Into<String>,
        direction: PortDirection,
        ty: DataType,
    ) -> ValueId {
        let name = name.into();
        let value = self.new_value(name.clone(), ty.clone());
        self.ports.push(Port {
            name,
            direction,
            ty,
            value,
        });
        value
    }

    /// The type of a value, if it exists.
    pub fn value_type(&self, id: ValueId) -> Option<&DataType> {
        self.values.get(&id).map(|info| &info.ty)
    }
}
