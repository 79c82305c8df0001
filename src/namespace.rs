//! Circuit-level namespace and the shared naming/insertion authority.
//!
//! All symbol names in a circuit live in one namespace. The extraction
//! pass pre-allocates every new module name (and id) serially through a
//! [`Namespace`], then shares a [`NamingAuthority`] with the parallel
//! workers; the authority's two methods are the only critical sections in
//! the whole pass.

use crate::mir::{Module, ModuleId};
use std::collections::HashSet;
use std::sync::Mutex;

/// Collision-free name allocation within one circuit.
///
/// A requested name is returned as-is when free; otherwise a numeric
/// suffix is appended (`hint_0`, `hint_1`, ...) until a free name is
/// found. Allocated names are themselves reserved, so two hints that
/// collide after suffixing still resolve to distinct names.
#[derive(Debug, Default)]
pub struct Namespace {
    used: HashSet<String>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an existing name without allocating it.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    /// Whether a name is already taken.
    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Allocate a globally unique name for `hint`.
    pub fn new_name(&mut self, hint: &str) -> String {
        if self.used.insert(hint.to_string()) {
            return hint.to_string();
        }
        let mut n = 0;
        loop {
            let candidate = format!("{}_{}", hint, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Shared naming and module-insertion authority.
///
/// Passed by reference to every worker during parallel lowering. The
/// namespace is only consulted from the serial pre-pass; `insert_module`
/// is the single lock taken inside the parallel region, held for the
/// duration of one push.
#[derive(Debug)]
pub struct NamingAuthority {
    namespace: Mutex<Namespace>,
    pending: Mutex<Vec<Module>>,
}

impl NamingAuthority {
    /// Wrap a seeded namespace.
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace: Mutex::new(namespace),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a globally unique name.
    pub fn allocate(&self, hint: &str) -> String {
        self.namespace
            .lock()
            .expect("namespace lock poisoned")
            .new_name(hint)
    }

    /// Insert a newly created module into the circuit. The module's id and
    /// name must already have been allocated.
    pub fn insert_module(&self, module: Module) -> ModuleId {
        let id = module.id;
        self.pending
            .lock()
            .expect("module insertion lock poisoned")
            .push(module);
        id
    }

    /// Drain the inserted modules, ordered by id.
    pub fn into_modules(self) -> Vec<Module> {
        let mut modules = self
            .pending
            .into_inner()
            .expect("module insertion lock poisoned");
        modules.sort_by_key(|m| m.id);
        modules
    }
}
