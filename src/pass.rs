//! Transformation passes over a circuit.

use crate::mir::Circuit;
use anyhow::Result;

/// A circuit transformation pass.
pub trait Pass {
    /// Apply the pass. Returns whether the circuit was changed.
    fn run(&mut self, circuit: &mut Circuit) -> Result<bool>;

    /// Get the name of this pass.
    fn name(&self) -> &str;
}

/// Runs a sequence of passes in order.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Create an empty pass manager.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Register a pass.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Run all registered passes. Returns whether any pass changed the
    /// circuit.
    pub fn run(&mut self, circuit: &mut Circuit) -> Result<bool> {
        let mut changed = false;
        for pass in &mut self.passes {
            log::debug!("running pass: {}", pass.name());
            changed |= pass.run(circuit)?;
        }
        Ok(changed)
    }

    /// Create a manager with the default lowering pipeline.
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.add_pass(Box::new(crate::lower_layers::LowerLayers::new()));
        manager.add_pass(Box::new(crate::output_dirs::AssignOutputDirs::new()));
        manager
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
