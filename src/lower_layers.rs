//! Layer extraction.
//!
//! Every layer block in every module is converted into a freestanding
//! private module plus a bind instance at the original position:
//! - values read inside a block but defined outside become input ports,
//! - values defined inside a block but observed outside become reference
//!   output ports,
//! - instances created from nested blocks are hoisted out, since bind
//!   instances cannot nest,
//! - layer requirements on reference types are erased everywhere.
//!
//! Module names and ids for every block are decided in a serial pre-pass;
//! the per-module rewriting then runs in parallel, with module insertion
//! as the only critical section. After the parallel region joins, stale
//! instantiation sites of retyped modules are rebuilt and the per-layer
//! inclusion-guard artifacts are emitted.

use crate::instance_graph::InstanceGraph;
use crate::mir::{
    rename_operands, walk_ops, Circuit, ConnectOp, DataType, InstanceOp, LayerBlockId,
    LayerBlockOp, LayerDef, Module, ModuleId, Operation, OutputFile, Port, PortDirection,
    RefDefineOp, RefResolveOp, RefSendOp, ValueId, ValueInfo, Verbatim,
};
use crate::namespace::{Namespace, NamingAuthority};
use crate::pass::Pass;
use anyhow::Result;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// Indicates the kind of value a synthesized port connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectKind {
    /// A normal captured value: read of a value outside the block, or a
    /// plain destination driven through a resolve.
    NonRef,
    /// A reference: the destination of a reference define.
    Ref,
}

#[derive(Debug, Clone)]
struct ConnectInfo {
    value: ValueId,
    kind: ConnectKind,
}

/// Module name and id decided for one layer block before parallel work
/// begins.
#[derive(Debug, Clone)]
struct PlannedModule {
    id: ModuleId,
    name: String,
}

/// The layer extraction pass.
pub struct LowerLayers {
    workers: usize,
}

impl LowerLayers {
    /// Create the pass with the default worker count.
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get(),
        }
    }

    /// Set the number of worker threads. One worker runs the per-module
    /// extraction serially.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

impl Default for LowerLayers {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for LowerLayers {
    fn run(&mut self, circuit: &mut Circuit) -> Result<bool> {
        log::debug!("lowering layers of circuit {}", circuit.name);

        // Seed the namespace with every existing symbol.
        let mut namespace = Namespace::new();
        for module in &circuit.modules {
            namespace.reserve(&module.name);
        }
        reserve_layer_names(&mut namespace, &circuit.layers);

        // Decide the name and id of every module that will be created.
        // Done serially so the parallel region is free of naming
        // nondeterminism.
        let mut hints: Vec<(LayerBlockId, String)> = Vec::new();
        for module in &circuit.modules {
            walk_ops(&module.body, &mut |op| {
                if let Operation::LayerBlock(block) = op {
                    hints.push((
                        block.id,
                        format!("{}_{}", module.name, block.layer.flattened()),
                    ));
                }
            });
        }
        let mut planned: HashMap<LayerBlockId, PlannedModule> = HashMap::new();
        for (block, hint) in hints {
            planned.insert(
                block,
                PlannedModule {
                    id: circuit.alloc_module_id(),
                    name: namespace.new_name(&hint),
                },
            );
        }

        let authority = NamingAuthority::new(namespace);
        let circuit_name = circuit.name.clone();

        // Lower the layer blocks of each module.
        let mut modules = std::mem::take(&mut circuit.modules);
        let modified: Vec<ModuleId> = if self.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()?;
            pool.install(|| {
                modules
                    .par_iter_mut()
                    .filter_map(|m| run_on_module(m, &circuit_name, &authority, &planned).then(|| m.id))
                    .collect()
            })
        } else {
            modules
                .iter_mut()
                .filter_map(|m| run_on_module(m, &circuit_name, &authority, &planned).then(|| m.id))
                .collect()
        };
        circuit.modules = modules;
        for module in authority.into_modules() {
            circuit.add_module(module);
        }

        // Rebuild every instantiation site that still refers to an old
        // module signature.
        repair_instance_sites(circuit, &modified);

        // Emit the header/footer of each bindings file. The definitions
        // are consumed: nothing references them once the blocks are gone,
        // and leaving them would re-emit the guards on a second run.
        let emitted = emit_guards(circuit);
        circuit.layers.clear();

        Ok(!modified.is_empty() || emitted)
    }

    fn name(&self) -> &str {
        "Lower Layers"
    }
}

fn reserve_layer_names(namespace: &mut Namespace, layers: &[LayerDef]) {
    for layer in layers {
        namespace.reserve(&layer.name);
        reserve_layer_names(namespace, &layer.children);
    }
}

/// Extract the layer blocks of one module and strip layer requirements
/// from all of its values. Returns true if the module was changed.
fn run_on_module(
    module: &mut Module,
    circuit_name: &str,
    authority: &NamingAuthority,
    planned: &HashMap<LayerBlockId, PlannedModule>,
) -> bool {
    log::debug!("module: {}", module.name);

    let mut changed = remove_layers_from_ports(module);

    let Module {
        ref mut body,
        ref mut values,
        ref mut next_value,
        ..
    } = *module;

    // Strip layer requirements from values throughout the body. A cast
    // that becomes a no-op is erased and its uses redirected.
    let mut rename: HashMap<ValueId, ValueId> = HashMap::new();
    changed |= strip_body(body, values, &mut rename);
    if !rename.is_empty() {
        rename_operands(body, &rename);
    }

    let mut extracted: HashSet<ModuleId> = HashSet::new();
    let mut ctx = Extraction {
        circuit_name,
        authority,
        planned,
        values,
        next_value,
        extracted: &mut extracted,
    };
    changed |= lower_body(body, &mut ctx);
    changed
}

/// Update the module's port types to remove any explicit layer
/// requirements. Returns true if any port type changed.
fn remove_layers_from_ports(module: &mut Module) -> bool {
    let mut changed = false;
    for port in &mut module.ports {
        if let Some(stripped) = port.ty.without_layer() {
            port.ty = stripped.clone();
            if let Some(info) = module.values.get_mut(&port.value) {
                info.ty = stripped;
            }
            changed = true;
        }
    }
    changed
}

fn strip_value(values: &mut IndexMap<ValueId, ValueInfo>, id: ValueId) -> bool {
    if let Some(info) = values.get_mut(&id) {
        if let Some(stripped) = info.ty.without_layer() {
            info.ty = stripped;
            return true;
        }
    }
    false
}

/// Strip layer requirements from every value defined in a body, entering
/// layer block bodies. Casts that become no-ops are removed; `rename`
/// collects the use redirections to apply afterwards.
fn strip_body(
    body: &mut Vec<Operation>,
    values: &mut IndexMap<ValueId, ValueInfo>,
    rename: &mut HashMap<ValueId, ValueId>,
) -> bool {
    let mut changed = false;
    body.retain_mut(|op| {
        match op {
            Operation::LayerBlock(block) => {
                changed |= strip_body(&mut block.body, values, rename);
            }
            Operation::Wire(wire) => {
                changed |= strip_value(values, wire.result);
            }
            Operation::RefSub(sub) => {
                changed |= strip_value(values, sub.result);
            }
            Operation::Instance(inst) => {
                for result in &inst.results {
                    changed |= strip_value(values, *result);
                }
            }
            Operation::RefCast(cast) => {
                let Some(result_ty) = values.get(&cast.result).map(|i| i.ty.clone()) else {
                    return true;
                };
                let Some(stripped) = result_ty.without_layer() else {
                    return true;
                };
                changed = true;
                if values.get(&cast.input).map(|i| &i.ty) == Some(&stripped) {
                    // The cast is now a no-op; erase it.
                    rename.insert(cast.result, cast.input);
                    values.shift_remove(&cast.result);
                    return false;
                }
                if let Some(info) = values.get_mut(&cast.result) {
                    info.ty = stripped;
                }
            }
            _ => {}
        }
        true
    });
    changed
}

/// Shared extraction state for one module.
struct Extraction<'a> {
    circuit_name: &'a str,
    authority: &'a NamingAuthority,
    planned: &'a HashMap<LayerBlockId, PlannedModule>,
    values: &'a mut IndexMap<ValueId, ValueInfo>,
    next_value: &'a mut u32,
    /// Modules created from layer blocks of this module.
    extracted: &'a mut HashSet<ModuleId>,
}

impl Extraction<'_> {
    /// Allocate a fresh value in the host module.
    fn fresh(&mut self, name: String, ty: DataType) -> ValueId {
        let id = ValueId(*self.next_value);
        *self.next_value += 1;
        self.values.insert(id, ValueInfo { name, ty });
        id
    }
}

/// Per-block extraction state.
struct BlockExtraction {
    /// Ports of the module derived from this block, in encounter order
    ports: Vec<Port>,
    /// Value to connect to each port, positionally
    connects: Vec<ConnectInfo>,
    /// In-block use redirections (captured value -> replacement)
    rename: HashMap<ValueId, ValueId>,
    /// Value table of the new module
    new_values: IndexMap<ValueId, ValueInfo>,
    /// Reference wrappers placed at the start of the new body
    prelude: Vec<Operation>,
    /// Transplanted block body
    inner: Vec<Operation>,
    /// Ops moved out to precede the bind instance
    hoisted: Vec<Operation>,
    /// Values currently defined inside the block
    defined: HashSet<ValueId>,
}

/// Whether a value is visible as in-block: either defined there, or an
/// outside value already retargeted to an in-block replacement.
fn is_inside(ext: &BlockExtraction, value: ValueId) -> bool {
    ext.defined.contains(&value) || ext.rename.contains_key(&value)
}

/// Allocate a value belonging to the new module.
fn alloc_in_new(
    ctx: &mut Extraction<'_>,
    ext: &mut BlockExtraction,
    name: String,
    ty: DataType,
) -> ValueId {
    let id = ValueId(*ctx.next_value);
    *ctx.next_value += 1;
    ext.new_values.insert(id, ValueInfo { name, ty });
    id
}

/// Create an input port for an operand captured from outside the block.
/// Reference-typed captures are passed by value and re-wrapped inside the
/// new body so in-block readers still see reference semantics. A value
/// captured once is reused on every later encounter.
fn create_input_port(ctx: &mut Extraction<'_>, ext: &mut BlockExtraction, operand: ValueId) {
    if ext.rename.contains_key(&operand) {
        return;
    }
    let info = ctx
        .values
        .get(&operand)
        .expect("captured value has no resolvable defining block")
        .clone();
    let ty = info.ty.deref_type().clone();
    let arg = alloc_in_new(ctx, ext, info.name.clone(), ty.clone());
    ext.ports.push(Port {
        name: format!("_{}", info.name),
        direction: PortDirection::Input,
        ty: ty.clone(),
        value: arg,
    });
    let replacement = if info.ty.is_ref() {
        let send = alloc_in_new(
            ctx,
            ext,
            info.name.clone(),
            DataType::Ref {
                ty: Box::new(ty),
                layer: None,
            },
        );
        ext.prelude
            .push(Operation::RefSend(RefSendOp { result: send, base: arg }));
        send
    } else {
        arg
    };
    ext.rename.insert(operand, replacement);
    ext.connects.push(ConnectInfo {
        value: operand,
        kind: ConnectKind::NonRef,
    });
}

/// Create an output reference port for a destination outside the block.
/// If the destination was already reference-typed the original define is
/// kept, now targeting the port; otherwise the port is driven from the
/// in-block source and the original assignment is dropped by the caller.
fn create_output_port(
    ctx: &mut Extraction<'_>,
    ext: &mut BlockExtraction,
    dest: ValueId,
    src: ValueId,
) {
    let info = ctx
        .values
        .get(&dest)
        .expect("produced reference has no resolvable defining block")
        .clone();
    let (ref_ty, dest_is_ref) = match &info.ty {
        DataType::Ref { .. } => (info.ty.clone(), true),
        other => (
            DataType::Ref {
                ty: Box::new(other.clone()),
                layer: None,
            },
            false,
        ),
    };
    let arg = alloc_in_new(ctx, ext, info.name.clone(), ref_ty.clone());
    ext.ports.push(Port {
        name: format!("_{}", info.name),
        direction: PortDirection::Output,
        ty: ref_ty,
        value: arg,
    });
    if dest_is_ref {
        ext.rename.insert(dest, arg);
        ext.connects.push(ConnectInfo {
            value: dest,
            kind: ConnectKind::Ref,
        });
        return;
    }
    ext.connects.push(ConnectInfo {
        value: dest,
        kind: ConnectKind::NonRef,
    });
    let src_ty = ctx
        .values
        .get(&src)
        .map(|i| i.ty.clone())
        .or_else(|| ext.new_values.get(&src).map(|i| i.ty.clone()))
        .expect("in-block source has no type");
    let src_name = ctx
        .values
        .get(&src)
        .map(|i| i.name.clone())
        .unwrap_or_default();
    let send = alloc_in_new(
        ctx,
        ext,
        src_name,
        DataType::Ref {
            ty: Box::new(src_ty),
            layer: None,
        },
    );
    ext.inner
        .push(Operation::RefSend(RefSendOp { result: send, base: src }));
    ext.inner.push(Operation::RefDefine(RefDefineOp {
        dest: arg,
        src: send,
    }));
}

/// Lower every layer block found directly in a body, innermost first.
fn lower_body(body: &mut Vec<Operation>, ctx: &mut Extraction<'_>) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < body.len() {
        if let Operation::LayerBlock(block) = &mut body[i] {
            // Nested blocks are fully lowered before the enclosing block's
            // capture analysis runs.
            lower_body(&mut block.body, ctx);
            let Operation::LayerBlock(block) = body.remove(i) else {
                unreachable!()
            };
            let replacement = extract_block(block, ctx);
            let count = replacement.len();
            body.splice(i..i, replacement);
            i += count;
            changed = true;
        } else {
            i += 1;
        }
    }
    changed
}

/// Convert one layer block into a new module plus a wired-up bind
/// instance, returning the operations that replace the block.
fn extract_block(block: LayerBlockOp, ctx: &mut Extraction<'_>) -> Vec<Operation> {
    let planned = ctx
        .planned
        .get(&block.id)
        .expect("layer block without a pre-assigned module name")
        .clone();
    let layer_name = block.layer.flattened();
    log::debug!("  - layer: {}", layer_name);

    let mut ext = BlockExtraction {
        ports: Vec::new(),
        connects: Vec::new(),
        rename: HashMap::new(),
        new_values: IndexMap::new(),
        prelude: Vec::new(),
        inner: Vec::new(),
        hoisted: Vec::new(),
        defined: block.body.iter().flat_map(|op| op.results()).collect(),
    };

    // Use information for the resolve/connect pre-hoist below.
    let mut use_count: HashMap<ValueId, usize> = HashMap::new();
    let mut connect_dest_of: HashMap<ValueId, ValueId> = HashMap::new();
    for op in &block.body {
        for v in op.operands() {
            *use_count.entry(v).or_insert(0) += 1;
        }
        if let Operation::Connect(connect) = op {
            connect_dest_of.insert(connect.src, connect.dest);
        }
    }

    for op in block.body {
        match op {
            // Instances created from nested layer blocks move out in front
            // of the block: bind instances cannot nest. Values feeding
            // them are exported through reference ports by the connect
            // handling below.
            Operation::Instance(inst) if ctx.extracted.contains(&inst.module) => {
                log::debug!("    hoisting nested bind instance: {}", inst.name);
                for result in &inst.results {
                    ext.defined.remove(result);
                }
                ext.hoisted.push(Operation::Instance(inst));
            }
            Operation::RefSend(send) => {
                if !is_inside(&ext, send.base) {
                    create_input_port(ctx, &mut ext, send.base);
                }
                ext.inner.push(Operation::RefSend(send));
            }
            Operation::RefCast(cast) => {
                if !is_inside(&ext, cast.input) {
                    create_input_port(ctx, &mut ext, cast.input);
                }
                ext.inner.push(Operation::RefCast(cast));
            }
            op @ (Operation::Connect(_) | Operation::RefDefine(_)) => {
                let (dest, src) = match &op {
                    Operation::Connect(c) => (c.dest, c.src),
                    Operation::RefDefine(d) => (d.dest, d.src),
                    _ => unreachable!(),
                };
                let src_in = is_inside(&ext, src);
                let dest_in = is_inside(&ext, dest);
                if !src_in && !dest_in {
                    // Neither side involves the block; move the whole
                    // assignment out.
                    ext.hoisted.push(op);
                } else if !src_in {
                    create_input_port(ctx, &mut ext, src);
                    ext.inner.push(op);
                } else if !dest_in {
                    let dest_is_ref = ctx
                        .values
                        .get(&dest)
                        .map(|i| i.ty.is_ref())
                        .unwrap_or(false);
                    create_output_port(ctx, &mut ext, dest, src);
                    if dest_is_ref {
                        // The define now targets the port.
                        ext.inner.push(op);
                    }
                } else {
                    ext.inner.push(op);
                }
            }
            Operation::RefResolve(resolve) => {
                // A resolve of an outside reference feeding exactly one
                // assignment whose destination is also outside is hoisted
                // whole instead of taking a detour through a port; the
                // assignment follows it out on a later iteration.
                let source_outside = !is_inside(&ext, resolve.source);
                let pre_hoist = source_outside
                    && use_count.get(&resolve.result).copied().unwrap_or(0) == 1
                    && connect_dest_of
                        .get(&resolve.result)
                        .map_or(false, |dest| !is_inside(&ext, *dest));
                if pre_hoist {
                    ext.defined.remove(&resolve.result);
                    ext.hoisted.push(Operation::RefResolve(resolve));
                } else {
                    if source_outside {
                        create_input_port(ctx, &mut ext, resolve.source);
                    }
                    ext.inner.push(Operation::RefResolve(resolve));
                }
            }
            Operation::LayerBlock(_) => {
                unreachable!("nested layer blocks are lowered before their parent")
            }
            // For any other op, capture operands defined outside.
            other => {
                for operand in other.operands() {
                    if !is_inside(&ext, operand) {
                        create_input_port(ctx, &mut ext, operand);
                    }
                }
                ext.inner.push(other);
            }
        }
    }

    let BlockExtraction {
        ports,
        connects,
        rename,
        mut new_values,
        prelude,
        inner,
        hoisted,
        defined,
    } = ext;

    // Move the block's definitions into the new module's table, in id
    // order so the table layout does not depend on hash iteration.
    let mut moved: Vec<ValueId> = defined.iter().copied().collect();
    moved.sort();
    for value in moved {
        if let Some(info) = ctx.values.shift_remove(&value) {
            new_values.insert(value, info);
        }
    }

    // Retarget captured values in the transplanted body.
    let mut new_body = prelude;
    new_body.extend(inner);
    for op in &mut new_body {
        op.map_operands(&mut |v| rename.get(&v).copied().unwrap_or(v));
    }

    let port_meta: Vec<(String, PortDirection, DataType)> = ports
        .iter()
        .map(|p| (p.name.clone(), p.direction, p.ty.clone()))
        .collect();

    // Create the new module. Insertion grabs the circuit lock.
    let new_module = Module {
        id: planned.id,
        name: planned.name.clone(),
        public: false,
        ports,
        values: new_values,
        body: new_body,
        output_file: None,
        next_value: *ctx.next_value,
    };
    log::debug!(
        "    new module: {} ({} ports)",
        new_module.name,
        new_module.ports.len()
    );
    ctx.authority.insert_module(new_module);
    ctx.extracted.insert(planned.id);

    // Replace the block: hoisted ops first, then the bind instance, then
    // the port wiring.
    assert_eq!(
        port_meta.len(),
        connects.len(),
        "the number of instance ports and values to connect to them must be equal"
    );
    let mut replacement = hoisted;
    let inst_name = lower_first(&planned.name);
    let results: Vec<ValueId> = port_meta
        .iter()
        .map(|(name, _, ty)| ctx.fresh(format!("{}.{}", inst_name, name), ty.clone()))
        .collect();
    replacement.push(Operation::Instance(InstanceOp {
        name: inst_name.clone(),
        module: planned.id,
        results: results.clone(),
        lower_to_bind: true,
        output_file: Some(OutputFile::File {
            name: format!("groups_{}_{}.sv", ctx.circuit_name, layer_name),
            exclude_from_filelist: true,
        }),
        annotations: Vec::new(),
        port_annotations: Vec::new(),
    }));

    for (i, (_, direction, ty)) in port_meta.iter().enumerate() {
        let connect = &connects[i];
        let base_name = ctx
            .values
            .get(&connect.value)
            .map(|info| info.name.clone())
            .unwrap_or_default();
        match direction {
            PortDirection::Input => {
                let mut src = connect.value;
                let src_is_ref = ctx
                    .values
                    .get(&src)
                    .map(|info| info.ty.is_ref())
                    .unwrap_or(false);
                if src_is_ref {
                    let read = ctx.fresh(base_name, ty.clone());
                    replacement.push(Operation::RefResolve(RefResolveOp {
                        result: read,
                        source: src,
                    }));
                    src = read;
                }
                replacement.push(Operation::Connect(ConnectOp {
                    dest: results[i],
                    src,
                }));
            }
            PortDirection::Output => {
                if connect.kind == ConnectKind::Ref {
                    replacement.push(Operation::RefDefine(RefDefineOp {
                        dest: connect.value,
                        src: results[i],
                    }));
                } else {
                    let read = ctx.fresh(base_name, ty.deref_type().clone());
                    replacement.push(Operation::RefResolve(RefResolveOp {
                        result: read,
                        source: results[i],
                    }));
                    replacement.push(Operation::Connect(ConnectOp {
                        dest: connect.value,
                        src: read,
                    }));
                }
            }
        }
    }
    replacement
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Rebuild every instantiation site of a modified module in place,
/// preserving instance name, binding flag, placement and annotations.
/// Replacement modules are all built before any site is rewritten.
fn repair_instance_sites(circuit: &mut Circuit, modified: &[ModuleId]) {
    if modified.is_empty() {
        return;
    }
    let graph = InstanceGraph::build(circuit);
    let mut port_lists: HashMap<ModuleId, Vec<(String, DataType)>> = HashMap::new();
    for &id in modified {
        if let Some(module) = circuit.module(id) {
            port_lists.insert(
                id,
                module
                    .ports
                    .iter()
                    .map(|p| (p.name.clone(), p.ty.clone()))
                    .collect(),
            );
        }
    }
    let mut sites: Vec<(ModuleId, Vec<usize>, ModuleId)> = Vec::new();
    for &id in modified {
        for site in graph.uses(id) {
            sites.push((site.parent, site.path.clone(), id));
        }
    }
    drop(graph);

    let index_of: HashMap<ModuleId, usize> = circuit
        .modules
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id, i))
        .collect();
    for (parent, path, target) in sites {
        let ports = &port_lists[&target];
        let Some(&pi) = index_of.get(&parent) else {
            continue;
        };
        let module = &mut circuit.modules[pi];
        let Some(Operation::Instance(old)) = op_at_path(&module.body, &path).cloned() else {
            continue;
        };
        assert_eq!(
            old.results.len(),
            ports.len(),
            "instance port count must match the module signature"
        );
        let mut rename: HashMap<ValueId, ValueId> = HashMap::new();
        let mut results = Vec::with_capacity(ports.len());
        for (i, (name, ty)) in ports.iter().enumerate() {
            let new = module.new_value(format!("{}.{}", old.name, name), ty.clone());
            rename.insert(old.results[i], new);
            results.push(new);
        }
        for stale in &old.results {
            module.values.shift_remove(stale);
        }
        rename_operands(&mut module.body, &rename);
        if let Some(op) = op_at_path_mut(&mut module.body, &path) {
            *op = Operation::Instance(InstanceOp {
                name: old.name,
                module: target,
                results,
                lower_to_bind: old.lower_to_bind,
                output_file: old.output_file,
                annotations: old.annotations,
                port_annotations: old.port_annotations,
            });
        }
    }
}

fn op_at_path<'a>(body: &'a [Operation], path: &[usize]) -> Option<&'a Operation> {
    let (&first, rest) = path.split_first()?;
    let op = body.get(first)?;
    if rest.is_empty() {
        return Some(op);
    }
    match op {
        Operation::LayerBlock(block) => op_at_path(&block.body, rest),
        _ => None,
    }
}

fn op_at_path_mut<'a>(body: &'a mut [Operation], path: &[usize]) -> Option<&'a mut Operation> {
    let (&first, rest) = path.split_first()?;
    let op = body.get_mut(first)?;
    if rest.is_empty() {
        return Some(op);
    }
    match op {
        Operation::LayerBlock(block) => op_at_path_mut(&mut block.body, rest),
        _ => None,
    }
}

/// Emit the header and footer of each bindings file. The body is filled
/// in later when binds are exported. This produces text like:
///
/// ```text
/// `include "groups_Circuit_A.sv"
/// `ifndef groups_Circuit_A_B
/// `define groups_Circuit_A_B
/// <body>
/// `endif // groups_Circuit_A_B
/// ```
///
/// Headers are inserted at the front of the artifact list and footers at
/// the back.
fn emit_guards(circuit: &mut Circuit) -> bool {
    let circuit_name = circuit.name.clone();
    let layers = circuit.layers.clone();
    let mut enclosing: Vec<String> = Vec::new();
    let mut includes: Vec<String> = Vec::new();
    let mut emitted = false;
    emit_guard_walk(
        &layers,
        &circuit_name,
        &mut enclosing,
        &mut includes,
        &mut circuit.artifacts,
        &mut emitted,
    );
    emitted
}

fn emit_guard_walk(
    layers: &[LayerDef],
    circuit_name: &str,
    enclosing: &mut Vec<String>,
    includes: &mut Vec<String>,
    artifacts: &mut Vec<Verbatim>,
    emitted: &mut bool,
) {
    for layer in layers {
        let mut prefix = format!("groups_{}_", circuit_name);
        for name in enclosing.iter() {
            prefix.push_str(name);
            prefix.push('_');
        }
        prefix.push_str(&layer.name);

        let output_file = Some(OutputFile::File {
            name: format!("{}.sv", prefix),
            exclude_from_filelist: true,
        });

        let mut header = String::new();
        for include in includes.iter() {
            header.push_str(include);
            header.push('\n');
        }
        header.push_str(&format!("`ifndef {}\n`define {}", prefix, prefix));
        artifacts.insert(
            0,
            Verbatim {
                text: header,
                output_file: output_file.clone(),
            },
        );
        artifacts.push(Verbatim {
            text: format!("`endif // {}", prefix),
            output_file,
        });
        *emitted = true;

        if !layer.children.is_empty() {
            includes.push(format!("`include \"{}.sv\"", prefix));
            enclosing.push(layer.name.clone());
            emit_guard_walk(
                &layer.children,
                circuit_name,
                enclosing,
                includes,
                artifacts,
                emitted,
            );
            enclosing.pop();
            includes.pop();
        }
    }
}
