//! End-to-end scenarios: real files on disk, the filesystem loader, a full
//! build and generation pass.

use logger::RecordingLogger;
use module_fixture::{module_tree, ModuleTree};
use pretty_assertions::assert_eq;

use crate::{Bundle, BundleError, FsLoader, ModuleIdx};

fn build_bundle<'a>(
    tree: &ModuleTree,
    logger: &'a RecordingLogger,
    entry: &str,
) -> Bundle<FsLoader, &'a RecordingLogger> {
    let mut bundle = Bundle::new(FsLoader::new(), logger);
    bundle
        .build(&tree.id(entry))
        .expect("build should succeed");
    bundle
}

fn bundle_code(tree: &ModuleTree, entry: &str) -> String {
    let logger = RecordingLogger::new();
    let mut bundle = build_bundle(tree, &logger, entry);
    bundle.generate().expect("generate should succeed")
}

/// Every dependency of an included statement must resolve to an included
/// statement, an import, a delegate, or an assumed global.
fn assert_dependency_closure(bundle: &Bundle<FsLoader, &RecordingLogger>) {
    for module in &bundle.modules {
        for statement in &module.statements {
            if !statement.is_included || statement.is_import_declaration {
                continue;
            }
            for name in &statement.depends_on {
                let satisfied = module.imports.contains_key(name)
                    || module.export_alls.contains_key(name)
                    || bundle.assumed_globals.contains(name)
                    || module
                        .definitions
                        .get(name)
                        .map(|index| module.statements[*index].is_included)
                        .unwrap_or(false);
                assert!(
                    satisfied,
                    "dependency '{}' of an included statement in {} resolves to nothing",
                    name, module.id
                );
            }
        }
    }
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("expected {needle:?} in:\n{haystack}"))
}

#[test]
fn dead_code_is_dropped() {
    let tmp = module_tree!(
        "main.js" => "import { a } from './m.js';\nconsole.log(a);\n",
        "m.js" => "export var a = 1;\nexport var b = 2;\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("var a = 1;"), "{code}");
    assert!(code.contains("console.log(a);"), "{code}");
    assert!(!code.contains("b = 2"), "dead declaration survived:\n{code}");
    assert!(!code.contains("import"), "{code}");
    assert!(!code.contains("export"), "{code}");
}

#[test]
fn dead_declarators_of_a_split_declaration_are_dropped() {
    let tmp = module_tree!(
        "main.js" => "import { used } from './m.js';\nconsole.log(used);\n",
        "m.js" => "var used = 1, unused = 2;\nexport { used };\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("var used = 1;"), "{code}");
    assert!(!code.contains("unused"), "{code}");
}

#[test]
fn import_cycles_terminate_and_emit_once() {
    let tmp = module_tree!(
        "main.js" => "import { fx } from './x.js';\nimport { fy } from './y.js';\nconsole.log(fx(), fy());\n",
        "x.js" => "import { fy } from './y.js';\nexport function fx() { return fy(); }\n",
        "y.js" => "import { fx } from './x.js';\nexport function fy() { return fx(); }\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = build_bundle(&tmp, &logger, "main.js");
    assert_dependency_closure(&bundle);
    let code = bundle.generate().unwrap();
    assert_eq!(code.matches("function fx").count(), 1, "{code}");
    assert_eq!(code.matches("function fy").count(), 1, "{code}");
}

#[test]
fn export_all_resolves_through_the_delegate() {
    let tmp = module_tree!(
        "main.js" => "import { deep } from './a.js';\nconsole.log(deep);\n",
        "a.js" => "export * from './b.js';\n",
        "b.js" => "export const deep = 7;\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = build_bundle(&tmp, &logger, "main.js");

    let a_idx = bundle.module_by_id[&tmp.id("a.js")];
    let b_idx = bundle.module_by_id[&tmp.id("b.js")];
    let a = bundle.module(a_idx);
    let delegate = &a.export_delegates[a.export_alls["deep"]];
    assert_eq!(delegate.module, Some(b_idx));
    // the delegate statement gained the ordering edge
    let delegate_statement = &a.statements[delegate.statement_index];
    assert!(delegate_statement.depends_on.contains("deep"));
    assert!(delegate_statement.strongly_depends_on.contains("deep"));

    let code = bundle.generate().unwrap();
    assert!(code.contains("const deep = 7;"), "{code}");
    assert!(code.contains("console.log(deep);"), "{code}");
    // the re-exporting module contributes no code of its own
    assert!(!code.contains("export *"), "{code}");
}

#[test]
fn missing_name_tries_every_delegate_then_fails() {
    let tmp = module_tree!(
        "main.js" => "import { ghost } from './a.js';\nconsole.log(ghost);\n",
        "a.js" => "export * from './b.js';\nexport * from './c.js';\n",
        "b.js" => "export const real = 1;\n",
        "c.js" => "export const other = 2;\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = Bundle::new(FsLoader::new(), &logger);
    let result = bundle.build(&tmp.id("main.js"));
    match result {
        Err(BundleError::NoSuchExport {
            module,
            name,
            importer,
        }) => {
            assert_eq!(name, "ghost");
            assert_eq!(module, tmp.id("a.js"));
            assert_eq!(importer, tmp.id("main.js"));
        }
        other => panic!("expected NoSuchExport, got {:?}", other.err()),
    }
}

#[test]
fn modified_default_export_keeps_textual_order() {
    let tmp = module_tree!(
        "main.js" => "let foo = 1;\nexport default foo;\nfoo = 2;\n"
    );
    let code = bundle_code(&tmp, "main.js");
    let declaration = position(&code, "let foo = 1;");
    let default_binding = position(&code, "var main = foo;");
    let reassignment = position(&code, "foo = 2;");
    assert!(
        declaration < default_binding && default_binding < reassignment,
        "default statement drifted out of order:\n{code}"
    );
    assert!(code.contains("export default main;"), "{code}");
}

#[test]
fn imported_modified_default_is_reordered_too() {
    let tmp = module_tree!(
        "main.js" => "import value from './counter.js';\nconsole.log(value);\n",
        "counter.js" => "let count = 1;\nexport default count;\ncount += 1;\n"
    );
    let code = bundle_code(&tmp, "main.js");
    let declaration = position(&code, "let count = 1;");
    let default_binding = position(&code, "var counter = count;");
    let reassignment = position(&code, "count += 1;");
    assert!(declaration < default_binding && default_binding < reassignment, "{code}");
    // the importer reads the snapshot, not the mutated identifier
    assert!(code.contains("console.log(counter);"), "{code}");
}

#[test]
fn conflicting_names_are_deconflicted() {
    let tmp = module_tree!(
        "main.js" => "import * as n1 from './m1.js';\nimport * as n2 from './m2.js';\nconsole.log(n1.util, n2.util);\n",
        "m1.js" => "export const util = 'm1';\n",
        "m2.js" => "export const util = 'm2';\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = build_bundle(&tmp, &logger, "main.js");
    let code = bundle.generate().unwrap();

    assert!(code.contains("const _util = 'm1';"), "{code}");
    assert!(code.contains("const util = 'm2';"), "{code}");
    assert!(code.contains("get util () { return _util; }"), "{code}");
    assert!(code.contains("get util () { return util; }"), "{code}");
    // the namespace objects exist under their import names
    assert!(code.contains("var n1 = {"), "{code}");
    assert!(code.contains("var n2 = {"), "{code}");
    // the usage site is untouched
    assert!(code.contains("console.log(n1.util, n2.util);"), "{code}");

    // invariant: no two surviving top-level bindings share a canonical name
    let mut seen = std::collections::HashSet::new();
    let mut pending: Vec<(ModuleIdx, String)> = Vec::new();
    for (index, module) in bundle.modules.iter().enumerate() {
        for statement in &module.statements {
            if statement.is_included {
                for name in &statement.defines {
                    pending.push((ModuleIdx(index), name.clone()));
                }
            }
        }
    }
    for (midx, name) in pending {
        let canonical = bundle.get_canonical_name(midx, &name);
        assert!(
            seen.insert(canonical.clone()),
            "canonical name '{canonical}' assigned twice"
        );
    }
}

#[test]
fn free_names_become_assumed_globals() {
    let tmp = module_tree!(
        "main.js" => "console.log(Math.max(1, 2));\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = build_bundle(&tmp, &logger, "main.js");
    assert!(bundle.assumed_globals.contains("Math"));
    assert!(bundle.assumed_globals.contains("console"));
    let code = bundle.generate().unwrap();
    assert!(code.contains("console.log(Math.max(1, 2));"), "{code}");
    let warnings = logger.warnings();
    assert!(
        warnings.iter().any(|line| line.contains("'Math'")),
        "expected a warning about Math, got {warnings:?}"
    );
}

#[test]
fn marking_is_memoised_and_idempotent() {
    let tmp = module_tree!(
        "main.js" => "import { a } from './m.js';\nconsole.log(a);\n",
        "m.js" => "export var a = 1;\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = build_bundle(&tmp, &logger, "main.js");
    let entry = bundle.entry_module.unwrap();
    let first = bundle.define(entry, "a").unwrap();
    let second = bundle.define(entry, "a").unwrap();
    assert_eq!(first, second);
    // marking never un-includes anything
    let included_before: usize = bundle
        .modules
        .iter()
        .map(|m| m.included_statement_count())
        .sum();
    bundle.define(entry, "a").unwrap();
    let included_after: usize = bundle
        .modules
        .iter()
        .map(|m| m.included_statement_count())
        .sum();
    assert_eq!(included_before, included_after);
}

#[test]
fn statement_order_is_consistent_with_module_index_order() {
    let tmp = module_tree!(
        "main.js" => "import { one, two } from './lib.js';\nconsole.log(two, one);\n",
        "lib.js" => "export const one = 1;\nexport const two = one + 1;\n"
    );
    let logger = RecordingLogger::new();
    let bundle = build_bundle(&tmp, &logger, "main.js");
    let mut last_index_by_module: std::collections::HashMap<usize, usize> =
        std::collections::HashMap::new();
    for sref in &bundle.statements {
        if let Some(previous) = last_index_by_module.insert(sref.module.0, sref.index) {
            assert!(
                previous < sref.index,
                "statements of module {} emitted out of index order",
                bundle.module(sref.module).id
            );
        }
    }
    assert_dependency_closure(&bundle);
}

#[test]
fn canonical_names_are_stable_across_import_path_shapes() {
    let direct = module_tree!(
        "main.js" => "import { util } from './lib.js';\nconsole.log(util);\n",
        "lib.js" => "export const util = 42;\n"
    );
    let facade = module_tree!(
        "main.js" => "import { util } from './facade.js';\nconsole.log(util);\n",
        "facade.js" => "export { util } from './lib.js';\n",
        "lib.js" => "export const util = 42;\n"
    );
    let namespace = module_tree!(
        "main.js" => "import * as lib from './lib.js';\nconsole.log(lib.util);\n",
        "lib.js" => "export const util = 42;\n"
    );
    for tmp in [&direct, &facade, &namespace] {
        let code = bundle_code(tmp, "main.js");
        assert!(code.contains("const util = 42;"), "{code}");
    }
}

#[test]
fn default_import_of_a_named_declaration_uses_the_declared_name() {
    let tmp = module_tree!(
        "main.js" => "import h from './dep.js';\nconsole.log(h());\n",
        "dep.js" => "export default function helper() { return 1; }\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("function helper() { return 1; }"), "{code}");
    assert!(code.contains("console.log(helper());"), "{code}");
}

#[test]
fn anonymous_default_takes_the_importer_name() {
    let tmp = module_tree!(
        "main.js" => "import two from './dep.js';\nconsole.log(two());\n",
        "dep.js" => "export default function () { return 2; }\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("var two = function () { return 2; };"), "{code}");
    assert!(code.contains("console.log(two());"), "{code}");
}

#[test]
fn untouched_identifier_default_collapses_into_its_declaration() {
    let tmp = module_tree!(
        "main.js" => "import impl from './dep.js';\nconsole.log(impl);\n",
        "dep.js" => "const impl = 1;\nexport default impl;\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("const impl = 1;"), "{code}");
    assert!(code.contains("console.log(impl);"), "{code}");
    assert!(
        !code.contains("var impl"),
        "redundant default binding emitted:\n{code}"
    );
}

#[test]
fn side_effect_imports_run_before_the_importer() {
    let tmp = module_tree!(
        "main.js" => "import './setup.js';\nconsole.log(ready);\n",
        "setup.js" => "var ready = 1;\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(
        position(&code, "var ready = 1;") < position(&code, "console.log(ready);"),
        "{code}"
    );
}

#[test]
fn cyclic_side_effect_imports_terminate() {
    let tmp = module_tree!(
        "main.js" => "import './a.js';\nconsole.log('done');\n",
        "a.js" => "import './b.js';\nvar a = 1;\n",
        "b.js" => "import './a.js';\nvar b = 2;\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert_eq!(code.matches("var a = 1;").count(), 1, "{code}");
    assert_eq!(code.matches("var b = 2;").count(), 1, "{code}");
    let done = position(&code, "console.log('done');");
    assert!(position(&code, "var a = 1;") < done, "{code}");
    assert!(position(&code, "var b = 2;") < done, "{code}");
}

#[test]
fn external_modules_survive_as_imports() {
    let tmp = module_tree!(
        "main.js" => "import _ from 'underscore';\nimport { map } from 'lodash';\nimport * as fs from 'fs';\nimport 'polyfill';\nconsole.log(_, map, fs.sep);\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = build_bundle(&tmp, &logger, "main.js");
    let code = bundle.generate().unwrap();
    assert!(code.contains("import _ from 'underscore';"), "{code}");
    assert!(code.contains("import { map } from 'lodash';"), "{code}");
    assert!(code.contains("import * as fs from 'fs';"), "{code}");
    assert!(code.contains("import 'polyfill';"), "{code}");
    assert!(code.contains("console.log(_, map, fs.sep);"), "{code}");

    let report = bundle.report();
    let mut externals = report.external_modules.clone();
    externals.sort();
    assert_eq!(externals, vec!["fs", "lodash", "polyfill", "underscore"]);
}

#[test]
fn renamed_external_imports_resolve_to_the_exporter_name() {
    let tmp = module_tree!(
        "main.js" => "import { map as m } from 'lodash';\nconsole.log(m([]));\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("import { map } from 'lodash';"), "{code}");
    assert!(code.contains("console.log(map([]));"), "{code}");
}

#[test]
fn namespace_blocks_expose_default_exports() {
    let tmp = module_tree!(
        "main.js" => "import * as m from './m.js';\nconsole.log(m.x);\n",
        "m.js" => "export const x = 1;\nexport default 2;\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("var m__default = 2;"), "{code}");
    assert!(code.contains("get 'default' () { return m__default; }"), "{code}");
    assert!(code.contains("get x () { return x; }"), "{code}");
}

#[test]
fn entry_exports_are_re_emitted() {
    let tmp = module_tree!(
        "main.js" => "const a = 1;\nexport { a as b };\nexport default function run() { return a; }\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("const a = 1;"), "{code}");
    assert!(code.contains("function run() { return a; }"), "{code}");
    assert!(!code.contains("export default function"), "{code}");
    assert!(code.contains("export { a as b };"), "{code}");
    assert!(code.contains("export default run;"), "{code}");
}

#[test]
fn entry_reexports_from_other_modules_survive() {
    let tmp = module_tree!(
        "main.js" => "export { helper } from './lib.js';\n",
        "lib.js" => "export function helper() { return 1; }\nexport function unused() { return 2; }\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("function helper() { return 1; }"), "{code}");
    assert!(!code.contains("unused"), "{code}");
    assert!(code.contains("export { helper };"), "{code}");
}

#[test]
fn unused_imports_never_touch_the_loader() {
    // the missing module is only fetched if something actually needs it
    let tmp = module_tree!(
        "main.js" => "import { ghost } from './missing.js';\nconsole.log(1);\n"
    );
    let code = bundle_code(&tmp, "main.js");
    assert!(code.contains("console.log(1);"), "{code}");
}

#[test]
fn used_imports_of_missing_modules_fail() {
    let tmp = module_tree!(
        "main.js" => "import { ghost } from './missing.js';\nconsole.log(ghost);\n"
    );
    let logger = RecordingLogger::new();
    let mut bundle = Bundle::new(FsLoader::new(), &logger);
    let result = bundle.build(&tmp.id("main.js"));
    assert!(matches!(
        result,
        Err(BundleError::ModuleNotFound { specifier, .. }) if specifier == "./missing.js"
    ));
}

#[test]
fn report_counts_inclusion_and_usage() {
    let tmp = module_tree!(
        "main.js" => "import { a } from './m.js';\nconsole.log(a);\n",
        "m.js" => "export var a = 1;\nexport var b = 2;\n"
    );
    let logger = RecordingLogger::new();
    let bundle = build_bundle(&tmp, &logger, "main.js");
    let report = bundle.report();

    assert_eq!(report.modules.len(), 2);
    let entry = &report.modules[0];
    assert_eq!(entry.id, tmp.id("main.js"));
    assert_eq!(entry.total_statements, 2);
    assert_eq!(entry.included_statements, 1);
    let m = &report.modules[1];
    assert_eq!(m.total_statements, 2);
    assert_eq!(m.included_statements, 1);
    assert_eq!(m.used_exports, 1);
    assert_eq!(report.assumed_globals, vec!["console"]);

    let rendered = report.to_string();
    assert!(rendered.contains("1/2 statements included"), "{rendered}");
    let json = report.to_json().unwrap();
    assert!(json.contains("\"assumed_globals\""), "{json}");
}
