//! Circuit invariant validation.
//!
//! Catches transformation bugs early by checking that a circuit is
//! well-formed: the instantiation relation is acyclic, instances agree
//! with their module's signature, bind instances are not nested inside
//! layer blocks, and every referenced value exists in its module's table.

use crate::instance_graph::InstanceGraph;
use crate::mir::{Circuit, Module, Operation, ValueId};
use thiserror::Error;

/// Validation error types
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// A module transitively instantiates itself
    #[error("instance graph contains a cycle")]
    CyclicInstanceGraph,

    /// An instance's result count disagrees with the module signature
    #[error(
        "instance '{instance}' in module '{module}' has {actual} results \
         but module '{target}' has {expected} ports"
    )]
    PortArityMismatch {
        module: String,
        instance: String,
        target: String,
        expected: usize,
        actual: usize,
    },

    /// An instance references a module that does not exist
    #[error("instance '{instance}' in module '{module}' references an unknown module")]
    UnknownModule { module: String, instance: String },

    /// Bind instances cannot be nested inside a layer block, which itself
    /// becomes a bind instance
    #[error("bind instance '{instance}' in module '{module}' is nested inside a layer block")]
    NestedBindInstance { module: String, instance: String },

    /// An operation references a value missing from the module's table
    #[error("module '{module}' references value {value:?} with no table entry")]
    UnknownValue { module: String, value: ValueId },
}

/// Validate that all circuit invariants are satisfied.
pub fn validate_circuit(circuit: &Circuit) -> Result<(), ValidationError> {
    let graph = InstanceGraph::build(circuit);
    if graph.is_cyclic() {
        return Err(ValidationError::CyclicInstanceGraph);
    }
    for module in &circuit.modules {
        validate_module(circuit, module)?;
    }
    Ok(())
}

fn validate_module(circuit: &Circuit, module: &Module) -> Result<(), ValidationError> {
    for port in &module.ports {
        if !module.values.contains_key(&port.value) {
            return Err(ValidationError::UnknownValue {
                module: module.name.clone(),
                value: port.value,
            });
        }
    }
    validate_body(circuit, module, &module.body, false)
}

fn validate_body(
    circuit: &Circuit,
    module: &Module,
    body: &[Operation],
    in_layer_block: bool,
) -> Result<(), ValidationError> {
    for op in body {
        for value in op.results().into_iter().chain(op.operands()) {
            if !module.values.contains_key(&value) {
                return Err(ValidationError::UnknownValue {
                    module: module.name.clone(),
                    value,
                });
            }
        }
        match op {
            Operation::Instance(inst) => {
                let Some(target) = circuit.module(inst.module) else {
                    return Err(ValidationError::UnknownModule {
                        module: module.name.clone(),
                        instance: inst.name.clone(),
                    });
                };
                if inst.results.len() != target.ports.len() {
                    return Err(ValidationError::PortArityMismatch {
                        module: module.name.clone(),
                        instance: inst.name.clone(),
                        target: target.name.clone(),
                        expected: target.ports.len(),
                        actual: inst.results.len(),
                    });
                }
                if in_layer_block && inst.lower_to_bind {
                    return Err(ValidationError::NestedBindInstance {
                        module: module.name.clone(),
                        instance: inst.name.clone(),
                    });
                }
            }
            Operation::LayerBlock(block) => {
                validate_body(circuit, module, &block.body, true)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{InstanceOp, LayerBlockId, LayerBlockOp, LayerPath, Module, ModuleId};

    #[test]
    fn test_empty_circuit_is_valid() {
        let circuit = Circuit::new("test");
        assert!(validate_circuit(&circuit).is_ok());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut circuit = Circuit::new("test");
        let mut a = Module::new(ModuleId(0), "A");
        a.body.push(Operation::Instance(InstanceOp {
            name: "b".to_string(),
            module: ModuleId(1),
            results: vec![],
            lower_to_bind: false,
            output_file: None,
            annotations: vec![],
            port_annotations: vec![],
        }));
        let mut b = Module::new(ModuleId(1), "B");
        b.body.push(Operation::Instance(InstanceOp {
            name: "a".to_string(),
            module: ModuleId(0),
            results: vec![],
            lower_to_bind: false,
            output_file: None,
            annotations: vec![],
            port_annotations: vec![],
        }));
        circuit.add_module(a);
        circuit.add_module(b);
        assert!(matches!(
            validate_circuit(&circuit),
            Err(ValidationError::CyclicInstanceGraph)
        ));
    }

    #[test]
    fn test_bind_instance_in_layer_block_is_rejected() {
        let mut circuit = Circuit::new("test");
        let child = Module::new(ModuleId(1), "Child");
        let mut top = Module::new(ModuleId(0), "Top");
        top.body.push(Operation::LayerBlock(LayerBlockOp {
            id: LayerBlockId(0),
            layer: LayerPath::new(["A"]),
            body: vec![Operation::Instance(InstanceOp {
                name: "child".to_string(),
                module: ModuleId(1),
                results: vec![],
                lower_to_bind: true,
                output_file: None,
                annotations: vec![],
                port_annotations: vec![],
            })],
        }));
        circuit.add_module(top);
        circuit.add_module(child);
        assert!(matches!(
            validate_circuit(&circuit),
            Err(ValidationError::NestedBindInstance { .. })
        ));
    }
}
