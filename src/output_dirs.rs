//! Output directory resolution.
//!
//! Output directories form a forest ordered by "specificity". A module
//! that could live in more than one directory is placed in the
//! least-common-ancestor of the candidates: the most specific directory
//! that is still general enough to cover every use. The implicit root of
//! the forest is the top-level output directory and means "no placement
//! constraint".

use crate::instance_graph::InstanceGraph;
use crate::mir::{Circuit, ModuleId, OutputFile, DECLARE_OUTPUT_DIR_ANNOTATION};
use crate::pass::Pass;
use anyhow::Result;
use std::collections::HashMap;

/// Normalize a directory name: native separators, forced trailing
/// separator. Directory names are always compared in this form.
pub fn canonicalize(dir: &str) -> String {
    let sep = std::path::MAIN_SEPARATOR;
    let mut out: String = dir
        .chars()
        .map(|c| if c == '/' || c == '\\' { sep } else { c })
        .collect();
    if !out.ends_with(sep) {
        out.push(sep);
    }
    out
}

#[derive(Debug, Clone)]
struct DirInfo {
    depth: u32,
    parent: Option<String>,
}

/// Table answering least-common-ancestor queries over the directory
/// forest.
///
/// Directories never declared anywhere are treated as direct children of
/// the implicit root. `None` stands for the root itself: no constraint.
#[derive(Debug)]
pub struct OutputDirTable {
    info: HashMap<String, DirInfo>,
}

impl OutputDirTable {
    /// Build the table for a circuit.
    ///
    /// The table is pre-seeded with the built-in relation that the
    /// testbench directory is a child of the views directory, then
    /// extended with every `DeclareOutputDirAnnotation` on the circuit.
    pub fn new(circuit: &Circuit) -> Self {
        // Stage 1: child directory -> parent directory.
        let mut parent_table: HashMap<String, Option<String>> = HashMap::new();
        parent_table.insert(canonicalize("testbench"), Some(canonicalize("views")));
        for anno in circuit.annotations_of_class(DECLARE_OUTPUT_DIR_ANNOTATION) {
            let Some(name) = anno.members.get("name") else {
                continue;
            };
            let parent = anno.members.get("parent").map(|p| canonicalize(p));
            parent_table.insert(canonicalize(name), parent);
        }

        // Stage 2: compile the parent table into a depth + parent index.
        // Walk each unvisited entry's ancestor chain, pushing unresolved
        // ancestors until one with a known depth is found (the root has
        // depth 0), then unwind assigning depth = parent's depth + 1.
        let mut info: HashMap<String, DirInfo> = HashMap::new();
        let mut stack: Vec<(String, Option<String>)> = Vec::new();
        for (current, parent) in &parent_table {
            if info.contains_key(current) {
                continue;
            }
            let mut current = current.clone();
            let mut parent = parent.clone();
            loop {
                let parent_depth = match &parent {
                    None => Some(0),
                    Some(p) => info.get(p).map(|i| i.depth),
                };
                match parent_depth {
                    Some(depth) => {
                        info.insert(
                            current,
                            DirInfo {
                                depth: depth + 1,
                                parent,
                            },
                        );
                        match stack.pop() {
                            Some((c, p)) => {
                                current = c;
                                parent = p;
                            }
                            None => break,
                        }
                    }
                    None => {
                        let ancestor = parent.clone().expect("unresolved parent is never root");
                        stack.push((current, parent));
                        parent = parent_table.get(&ancestor).cloned().unwrap_or(None);
                        current = ancestor;
                    }
                }
            }
        }

        Self { info }
    }

    fn info_of(&mut self, dir: Option<&str>) -> DirInfo {
        match dir {
            None => DirInfo {
                depth: 0,
                parent: None,
            },
            Some(d) => self
                .info
                .entry(d.to_string())
                .or_insert_with(|| DirInfo {
                    depth: 1,
                    parent: None,
                })
                .clone(),
        }
    }

    /// The least-common-ancestor of two directories.
    ///
    /// `None` denotes "no placement constraint" and absorbs: joining with
    /// it yields no constraint, and an LCA that turns out to be the
    /// implicit root is likewise returned as `None`.
    pub fn join(&mut self, a: Option<&str>, b: Option<&str>) -> Option<String> {
        let (Some(a), Some(b)) = (a, b) else {
            return None;
        };
        let mut a = Some(canonicalize(a));
        let mut b = Some(canonicalize(b));
        if a == b {
            return a;
        }
        let mut ainfo = self.info_of(a.as_deref());
        let mut binfo = self.info_of(b.as_deref());
        while ainfo.depth > binfo.depth {
            a = ainfo.parent;
            ainfo = self.info_of(a.as_deref());
        }
        while binfo.depth > ainfo.depth {
            b = binfo.parent;
            binfo = self.info_of(b.as_deref());
        }
        while a != b {
            a = ainfo.parent;
            b = binfo.parent;
            ainfo = self.info_of(a.as_deref());
            binfo = self.info_of(b.as_deref());
        }
        a
    }
}

/// Assign an output directory to every module that has none.
///
/// A module without explicit placement that is not public inherits the
/// join of its direct callers' directories. Modules are visited callers
/// before callees, so by the time a module is processed every module
/// instantiating it has been finalized.
pub struct AssignOutputDirs;

impl AssignOutputDirs {
    /// Create the pass.
    pub fn new() -> Self {
        Self
    }
}

impl Default for AssignOutputDirs {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for AssignOutputDirs {
    fn run(&mut self, circuit: &mut Circuit) -> Result<bool> {
        let mut table = OutputDirTable::new(circuit);
        let graph = InstanceGraph::build(circuit);
        let order = graph.inverse_post_order();
        let index_of: HashMap<ModuleId, usize> = circuit
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id, i))
            .collect();

        let mut changed = false;
        for id in order {
            let Some(&mi) = index_of.get(&id) else {
                continue;
            };
            if circuit.modules[mi].public || circuit.modules[mi].output_file.is_some() {
                continue;
            }

            // No callers seen yet; the first caller's directory becomes
            // the accumulator, each further distinct caller joins into it.
            let mut acc: Option<Option<String>> = None;
            for caller in graph.parents(id) {
                let dir = index_of
                    .get(&caller)
                    .and_then(|&ci| circuit.modules[ci].output_file.as_ref())
                    .and_then(|f| f.directory())
                    .map(str::to_string);
                acc = Some(match acc {
                    None => dir,
                    Some(prev) => table.join(prev.as_deref(), dir.as_deref()),
                });
            }

            if let Some(Some(dir)) = acc {
                log::debug!(
                    "assigning output directory {:?} to module {}",
                    dir,
                    circuit.modules[mi].name
                );
                circuit.modules[mi].output_file = Some(OutputFile::Directory(dir));
                changed = true;
            }
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "Assign Output Directories"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::Annotation;
    use std::collections::HashMap as StdHashMap;

    fn declare(name: &str, parent: Option<&str>) -> Annotation {
        let mut members = StdHashMap::new();
        members.insert("name".to_string(), name.to_string());
        if let Some(parent) = parent {
            members.insert("parent".to_string(), parent.to_string());
        }
        Annotation {
            class: DECLARE_OUTPUT_DIR_ANNOTATION.to_string(),
            members,
        }
    }

    fn sep() -> char {
        std::path::MAIN_SEPARATOR
    }

    #[test]
    fn test_canonicalize_appends_separator() {
        assert_eq!(canonicalize("a"), format!("a{}", sep()));
        assert_eq!(canonicalize(&format!("a{}", sep())), format!("a{}", sep()));
    }

    #[test]
    fn test_depth_monotonicity() {
        // c -> b -> a -> root, declared in an order that forces the
        // ancestor-chain stack walk.
        let mut circuit = Circuit::new("test");
        circuit.annotations.push(declare("c", Some("b")));
        circuit.annotations.push(declare("b", Some("a")));
        let table = OutputDirTable::new(&circuit);
        let depth = |d: &str| table.info[&canonicalize(d)].depth;
        assert_eq!(depth("a"), 1);
        assert_eq!(depth("b"), 2);
        assert_eq!(depth("c"), 3);
        for info in table.info.values() {
            match &info.parent {
                None => assert_eq!(info.depth, 1),
                Some(p) => assert_eq!(info.depth, table.info[p].depth + 1),
            }
        }
    }

    #[test]
    fn test_builtin_testbench_under_views() {
        let circuit = Circuit::new("test");
        let mut table = OutputDirTable::new(&circuit);
        assert_eq!(
            table.join(Some("testbench"), Some("views")),
            Some(canonicalize("views"))
        );
    }

    #[test]
    fn test_join_of_unrelated_is_unconstrained() {
        let circuit = Circuit::new("test");
        let mut table = OutputDirTable::new(&circuit);
        // Both unseen: lazily inserted as children of the implicit root,
        // whose LCA is the root itself.
        assert_eq!(table.join(Some("a"), Some("b")), None);
    }

    #[test]
    fn test_join_finds_common_ancestor() {
        let mut circuit = Circuit::new("test");
        circuit.annotations.push(declare("common", None));
        circuit.annotations.push(declare("a", Some("common")));
        circuit.annotations.push(declare("b", Some("common")));
        let mut table = OutputDirTable::new(&circuit);
        assert_eq!(
            table.join(Some("a"), Some("b")),
            Some(canonicalize("common"))
        );
    }

    #[test]
    fn test_join_uneven_depths() {
        let mut circuit = Circuit::new("test");
        circuit.annotations.push(declare("a", None));
        circuit.annotations.push(declare("b", Some("a")));
        circuit.annotations.push(declare("c", Some("b")));
        let mut table = OutputDirTable::new(&circuit);
        assert_eq!(table.join(Some("c"), Some("a")), Some(canonicalize("a")));
        assert_eq!(table.join(Some("a"), Some("c")), Some(canonicalize("a")));
    }

    #[test]
    fn test_join_identities() {
        let circuit = Circuit::new("test");
        let mut table = OutputDirTable::new(&circuit);
        assert_eq!(table.join(Some("a"), Some("a")), Some(canonicalize("a")));
        assert_eq!(table.join(Some("a"), None), None);
        assert_eq!(table.join(None, Some("a")), None);
        assert_eq!(table.join(None, None), None);
    }
}
