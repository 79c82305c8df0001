//! Tests for output directory assignment

use std::collections::HashMap;
use strata_mir::mir::*;
use strata_mir::output_dirs::{canonicalize, AssignOutputDirs, OutputDirTable};
use strata_mir::pass::Pass;

fn declare_dir(circuit: &mut Circuit, name: &str, parent: Option<&str>) {
    let mut members = HashMap::new();
    members.insert("name".to_string(), name.to_string());
    if let Some(parent) = parent {
        members.insert("parent".to_string(), parent.to_string());
    }
    circuit.annotations.push(Annotation {
        class: DECLARE_OUTPUT_DIR_ANNOTATION.to_string(),
        members,
    });
}

fn instance_of(target: ModuleId) -> Operation {
    Operation::Instance(InstanceOp {
        name: format!("u{}", target.0),
        module: target,
        results: vec![],
        lower_to_bind: false,
        output_file: None,
        annotations: vec![],
        port_annotations: vec![],
    })
}

fn module_in_dir(id: ModuleId, name: &str, dir: Option<&str>) -> Module {
    let mut module = Module::new(id, name);
    module.output_file = dir.map(|d| OutputFile::Directory(canonicalize(d)));
    module
}

fn find_module<'a>(circuit: &'a Circuit, name: &str) -> &'a Module {
    circuit
        .modules
        .iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| panic!("no module named {}", name))
}

fn run(circuit: &mut Circuit) -> bool {
    AssignOutputDirs::new().run(circuit).expect("pass failed")
}

#[test]
fn test_join_is_commutative_over_a_forest() {
    let mut circuit = Circuit::new("Test");
    declare_dir(&mut circuit, "common", None);
    declare_dir(&mut circuit, "a", Some("common"));
    declare_dir(&mut circuit, "b", Some("common"));
    declare_dir(&mut circuit, "c", Some("a"));
    let mut table = OutputDirTable::new(&circuit);

    let dirs = ["common", "a", "b", "c"];
    for x in dirs {
        for y in dirs {
            let xy = table.join(Some(x), Some(y));
            let yx = table.join(Some(y), Some(x));
            assert_eq!(xy, yx, "join({}, {}) is not commutative", x, y);
        }
    }
    assert_eq!(
        table.join(Some("c"), Some("b")),
        Some(canonicalize("common"))
    );
    assert_eq!(table.join(Some("c"), Some("a")), Some(canonicalize("a")));
}

/// Leaf instantiated by Top1 ("a/") and Top2 ("b/"), where both
/// directories are depth-1 children of the implicit root. The LCA is the
/// root, so Leaf stays unconstrained.
#[test]
fn test_leaf_under_unrelated_directories_is_unconstrained() {
    let mut circuit = Circuit::new("Test");
    let mut top1 = module_in_dir(ModuleId(0), "Top1", Some("a"));
    let mut top2 = module_in_dir(ModuleId(1), "Top2", Some("b"));
    top1.public = true;
    top2.public = true;
    top1.body.push(instance_of(ModuleId(2)));
    top2.body.push(instance_of(ModuleId(2)));
    circuit.add_module(top1);
    circuit.add_module(top2);
    circuit.add_module(Module::new(ModuleId(2), "Leaf"));
    run(&mut circuit);

    assert!(find_module(&circuit, "Leaf").output_file.is_none());
}

#[test]
fn test_leaf_under_sibling_directories_gets_their_parent() {
    let mut circuit = Circuit::new("Test");
    declare_dir(&mut circuit, "common", None);
    declare_dir(&mut circuit, "a", Some("common"));
    declare_dir(&mut circuit, "b", Some("common"));
    let mut top1 = module_in_dir(ModuleId(0), "Top1", Some("a"));
    let mut top2 = module_in_dir(ModuleId(1), "Top2", Some("b"));
    top1.body.push(instance_of(ModuleId(2)));
    top2.body.push(instance_of(ModuleId(2)));
    circuit.add_module(top1);
    circuit.add_module(top2);
    circuit.add_module(Module::new(ModuleId(2), "Leaf"));
    assert!(run(&mut circuit));

    assert_eq!(
        find_module(&circuit, "Leaf").output_file,
        Some(OutputFile::Directory(canonicalize("common")))
    );
}

#[test]
fn test_single_caller_directory_propagates_down() {
    let mut circuit = Circuit::new("Test");
    let mut top = module_in_dir(ModuleId(0), "Top", Some("x"));
    top.body.push(instance_of(ModuleId(1)));
    let mut mid = Module::new(ModuleId(1), "Mid");
    mid.body.push(instance_of(ModuleId(2)));
    circuit.add_module(top);
    circuit.add_module(mid);
    circuit.add_module(Module::new(ModuleId(2), "Leaf"));
    run(&mut circuit);

    // Mid is finalized before Leaf, so Leaf sees Mid's assigned
    // directory.
    assert_eq!(
        find_module(&circuit, "Mid").output_file,
        Some(OutputFile::Directory(canonicalize("x")))
    );
    assert_eq!(
        find_module(&circuit, "Leaf").output_file,
        Some(OutputFile::Directory(canonicalize("x")))
    );
}

#[test]
fn test_unconstrained_caller_wins() {
    let mut circuit = Circuit::new("Test");
    let mut top1 = module_in_dir(ModuleId(0), "Top1", Some("a"));
    // Top2 has no placement constraint at all.
    let mut top2 = Module::new(ModuleId(1), "Top2");
    top2.public = true;
    top1.body.push(instance_of(ModuleId(2)));
    top2.body.push(instance_of(ModuleId(2)));
    circuit.add_module(top1);
    circuit.add_module(top2);
    circuit.add_module(Module::new(ModuleId(2), "Leaf"));
    run(&mut circuit);

    assert!(find_module(&circuit, "Leaf").output_file.is_none());
}

#[test]
fn test_public_modules_are_not_assigned() {
    let mut circuit = Circuit::new("Test");
    let mut top = module_in_dir(ModuleId(0), "Top", Some("x"));
    top.body.push(instance_of(ModuleId(1)));
    let mut leaf = Module::new(ModuleId(1), "Leaf");
    leaf.public = true;
    circuit.add_module(top);
    circuit.add_module(leaf);
    run(&mut circuit);

    assert!(find_module(&circuit, "Leaf").output_file.is_none());
}

#[test]
fn test_explicit_directory_is_preserved() {
    let mut circuit = Circuit::new("Test");
    let mut top = module_in_dir(ModuleId(0), "Top", Some("x"));
    top.body.push(instance_of(ModuleId(1)));
    circuit.add_module(top);
    circuit.add_module(module_in_dir(ModuleId(1), "Leaf", Some("y")));
    run(&mut circuit);

    assert_eq!(
        find_module(&circuit, "Leaf").output_file,
        Some(OutputFile::Directory(canonicalize("y")))
    );
}

#[test]
fn test_testbench_joins_into_views() {
    let mut circuit = Circuit::new("Test");
    let mut top1 = module_in_dir(ModuleId(0), "Top1", Some("testbench"));
    let mut top2 = module_in_dir(ModuleId(1), "Top2", Some("views"));
    top1.body.push(instance_of(ModuleId(2)));
    top2.body.push(instance_of(ModuleId(2)));
    circuit.add_module(top1);
    circuit.add_module(top2);
    circuit.add_module(Module::new(ModuleId(2), "Leaf"));
    run(&mut circuit);

    // The built-in seed makes testbench/ a child of views/.
    assert_eq!(
        find_module(&circuit, "Leaf").output_file,
        Some(OutputFile::Directory(canonicalize("views")))
    );
}

#[test]
fn test_module_instantiated_twice_by_same_caller() {
    let mut circuit = Circuit::new("Test");
    let mut top = module_in_dir(ModuleId(0), "Top", Some("x"));
    top.body.push(instance_of(ModuleId(1)));
    top.body.push(instance_of(ModuleId(1)));
    circuit.add_module(top);
    circuit.add_module(Module::new(ModuleId(1), "Leaf"));
    run(&mut circuit);

    assert_eq!(
        find_module(&circuit, "Leaf").output_file,
        Some(OutputFile::Directory(canonicalize("x")))
    );
}
