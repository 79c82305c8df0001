//! Main lowering pipeline driver.
//!
//! Runs layer extraction and output directory assignment over a circuit
//! and validates the result.

use crate::lower_layers::LowerLayers;
use crate::mir::Circuit;
use crate::output_dirs::AssignOutputDirs;
use crate::pass::PassManager;
use crate::validation::validate_circuit;
use anyhow::Result;

/// Circuit lowering driver.
pub struct CircuitCompiler {
    /// Worker threads for the parallel extraction region
    workers: Option<usize>,
    /// Enable verbose progress output
    verbose: bool,
}

impl CircuitCompiler {
    /// Create a new compiler with default settings.
    pub fn new() -> Self {
        Self {
            workers: None,
            verbose: false,
        }
    }

    /// Set the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Enable verbose output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Lower a circuit in place.
    pub fn lower(&self, circuit: &mut Circuit) -> Result<()> {
        let mut manager = PassManager::new();
        let lower_layers = match self.workers {
            Some(workers) => LowerLayers::new().with_workers(workers),
            None => LowerLayers::new(),
        };
        manager.add_pass(Box::new(lower_layers));
        manager.add_pass(Box::new(AssignOutputDirs::new()));

        if self.verbose {
            log::info!("lowering circuit {}", circuit.name);
        }
        let changed = manager.run(circuit)?;
        if self.verbose {
            log::info!(
                "lowering {} circuit {}",
                if changed { "changed" } else { "did not change" },
                circuit.name
            );
        }

        // Catch transformation bugs before handing the circuit on.
        if let Err(e) = validate_circuit(circuit) {
            anyhow::bail!("circuit validation failed after lowering: {}", e);
        }
        Ok(())
    }
}

impl Default for CircuitCompiler {
    fn default() -> Self {
        Self::new()
    }
}
