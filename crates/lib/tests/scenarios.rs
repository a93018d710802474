//! End-to-end scenarios: write a description tree to a temp directory,
//! load it, evaluate entries, and check the products (and, where it
//! matters, the emitted manifest).

use std::fs;

use tempfile::TempDir;

use tessera_lib::env::Value;
use tessera_lib::eval::{EvalError, Evaluator, evaluate_entries};
use tessera_lib::ident::Ident;
use tessera_lib::loader::load;
use tessera_lib::ninja::{EmitOptions, write_manifest};
use tessera_lib::project::Project;

fn write_tree(files: &[(&str, &str)]) -> TempDir {
  let dir = TempDir::new().unwrap();
  for (path, contents) in files {
    let full = dir.path().join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
  }
  dir
}

fn entry(text: &str) -> Ident {
  Ident::parse(text, None).unwrap()
}

fn load_project(dir: &TempDir, entries: &[Ident]) -> Project {
  load(dir.path(), &dir.path().join("build"), entries).unwrap()
}

fn emit(project: &Project, products: &tessera_lib::product::ProductSet) -> String {
  let options = EmitOptions {
    regen_command: "tessera gen".to_string(),
    dump_env: false,
  };
  let path = write_manifest(project, products, &options).unwrap();
  fs::read_to_string(path).unwrap()
}

#[test]
fn empty_project_reports_unknown_target() {
  let dir = write_tree(&[("BUILD.conf.lua", "-- nothing registered\n")]);
  let wanted = entry("//greet:hello");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let err = evaluate_entries(&project, &[wanted]).unwrap_err();
  assert!(matches!(err, EvalError::UnknownTarget { .. }), "got: {}", err);
  assert!(!dir.path().join("build/build.ninja").exists());
}

#[test]
fn single_copy_file_target() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", r#"install("copy")"#),
    ("greet/BUILD.lua", r#"copy_file("hello", { sources = {"a.txt"} })"#),
    ("greet/a.txt", "hi\n"),
  ]);
  let wanted = entry("//greet:hello");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let mut evaluator = Evaluator::new(&project);
  let evaluation = evaluator.evaluate_entry(&wanted).unwrap();

  assert_eq!(evaluation.products.len(), 1);
  let product = &evaluation.products[0];
  assert_eq!(product.inputs, vec!["greet/a.txt".to_string()]);
  assert_eq!(product.outputs, vec!["greet/hello/a.txt".to_string()]);
  assert_eq!(product.rule, "copy_file");

  // The copy narrowed everything away, so its fingerprint is the empty
  // environment's.
  let empty_fp = tessera_lib::env::Env::empty().fingerprint(&project.registry).unwrap();
  assert_eq!(product.fingerprint, empty_fp);

  let manifest = emit(&project, evaluator.products());
  assert!(manifest.contains("build greet/hello/a.txt: copy_file greet/a.txt"));
  assert!(manifest.contains("rule copy_file"));
  assert!(manifest.contains("rule regenerate_manifest"));
}

#[test]
fn down_deltas_flow_to_dependencies_not_into_self() {
  let dir = write_tree(&[
    (
      "BUILD.conf.lua",
      r#"
        install("shell")
        define_key("c_flags", { type = "list", default = {} })
      "#,
    ),
    (
      "lib/BUILD.lua",
      r#"
        shell("foo", {
          cmd = "gen-foo $out",
          deps = {"//leaf:leaf"},
          down = { c_flags = { append = {"-O2"} } },
          uses = {"c_flags"},
        })
      "#,
    ),
    (
      "leaf/BUILD.lua",
      r#"shell("leaf", { cmd = "gen-leaf $out", uses = {"c_flags"} })"#,
    ),
  ]);
  let wanted = entry("//lib:foo");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let mut evaluator = Evaluator::new(&project);
  let foo = evaluator.evaluate_entry(&wanted).unwrap();

  // foo's own product does not see -O2: `down` flows to dependencies,
  // not into the target itself.
  assert_eq!(foo.products.len(), 1);
  assert_eq!(foo.products[0].env.get("c_flags"), None);

  // The dependency's product does.
  let leaf = evaluator
    .products()
    .in_emission_order()
    .into_iter()
    .find(|p| p.target == Ident::new("leaf", "leaf"))
    .unwrap()
    .clone();
  assert_eq!(leaf.env.get("c_flags"), Some(&Value::list(["-O2"])));
}

#[test]
fn product_references_bind_to_concrete_outputs() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\ninstall(\"shell\")\n"),
    (
      "gen/BUILD.lua",
      r#"shell("codegen", { cmd = "make-tables $out", outputs = {"tables.c"} })"#,
    ),
    (
      "lib/BUILD.lua",
      r#"copy_file("foo", { sources = {"//gen:codegen#tables.c"} })"#,
    ),
  ]);
  let wanted = entry("//lib:foo");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  // Phase one recorded a static edge to the producing target.
  let target = project.find_target(&wanted).unwrap();
  assert_eq!(target.deps, vec![Ident::new("gen", "codegen")]);

  let mut evaluator = Evaluator::new(&project);
  let foo = evaluator.evaluate_entry(&wanted).unwrap();

  // Phase two bound the reference to codegen's actual output path.
  assert_eq!(foo.products[0].inputs, vec!["gen/codegen/tables.c".to_string()]);

  // And the manifest is internally consistent: the input is produced.
  let manifest = emit(&project, evaluator.products());
  assert!(manifest.contains("build gen/codegen/tables.c: shell"));
}

#[test]
fn unknown_product_reference_fails() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\ninstall(\"shell\")\n"),
    (
      "gen/BUILD.lua",
      r#"shell("codegen", { cmd = "make-tables $out", outputs = {"tables.c"} })"#,
    ),
    (
      "lib/BUILD.lua",
      r#"copy_file("foo", { sources = {"//gen:codegen#nope.c"} })"#,
    ),
  ]);
  let wanted = entry("//lib:foo");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let err = evaluate_entries(&project, &[wanted]).unwrap_err();
  let text = err.to_string();
  assert!(text.contains("does not produce"), "got: {}", text);
  assert!(text.contains("nope.c"), "got: {}", text);
}

#[test]
fn diamond_evaluates_shared_dependency_once() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\n"),
    (
      "top/BUILD.lua",
      r#"
        copy_file("a", { sources = {"a.txt"}, deps = {"//shared:c"} })
        copy_file("b", { sources = {"b.txt"}, deps = {"//shared:c"} })
      "#,
    ),
    ("top/a.txt", "a"),
    ("top/b.txt", "b"),
    ("shared/BUILD.lua", r#"copy_file("c", { sources = {"c.txt"} })"#),
    ("shared/c.txt", "c"),
  ]);
  let entries = [entry("//top:a"), entry("//top:b")];
  let project = load_project(&dir, &entries);

  let mut evaluator = Evaluator::new(&project);
  evaluator.evaluate_entry(&entries[0]).unwrap();
  evaluator.evaluate_entry(&entries[1]).unwrap();

  // a, b, and exactly one copy of c.
  assert_eq!(evaluator.products().len(), 3);
  let c_products: Vec<_> = evaluator
    .products()
    .in_emission_order()
    .into_iter()
    .filter(|p| p.target == Ident::new("shared", "c"))
    .collect();
  assert_eq!(c_products.len(), 1);
}

#[test]
fn memoization_returns_the_same_evaluation() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\n"),
    ("greet/BUILD.lua", r#"copy_file("hello", { sources = {"a.txt"} })"#),
    ("greet/a.txt", "hi"),
  ]);
  let wanted = entry("//greet:hello");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let mut evaluator = Evaluator::new(&project);
  let first = evaluator.evaluate_entry(&wanted).unwrap();
  let second = evaluator.evaluate_entry(&wanted).unwrap();
  assert!(std::rc::Rc::ptr_eq(&first, &second));
}

#[test]
fn static_cycle_with_matching_environments_is_reported() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"shell\")\n"),
    ("a/BUILD.lua", r#"shell("a", { cmd = "x", deps = {"//b:b"} })"#),
    ("b/BUILD.lua", r#"shell("b", { cmd = "y", deps = {"//a:a"} })"#),
  ]);
  let wanted = entry("//a:a");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let err = evaluate_entries(&project, &[wanted]).unwrap_err();
  match err {
    EvalError::DependencyCycle { chain } => {
      assert_eq!(chain.len(), 3);
      assert!(chain[0].starts_with("//a:a"));
      assert!(chain[1].starts_with("//b:b"));
      assert!(chain[2].starts_with("//a:a"));
    }
    other => panic!("expected DependencyCycle, got: {}", other),
  }
}

#[test]
fn narrowed_cycle_traversal_keeps_task_keys_distinct() {
  // b sets a key on the way down, so the second visit of a happens in a
  // different environment. The traversal is still a cycle one level
  // deeper, and the reported chain names the narrowed keys.
  let dir = write_tree(&[
    (
      "BUILD.conf.lua",
      "install(\"shell\")\ndefine_key(\"stage\", { type = \"string\" })\n",
    ),
    ("a/BUILD.lua", r#"shell("a", { cmd = "x", deps = {"//b:b"} })"#),
    (
      "b/BUILD.lua",
      r#"shell("b", { cmd = "y", deps = {"//a:a"}, down = { stage = "inner" } })"#,
    ),
  ]);
  let wanted = entry("//a:a");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let err = evaluate_entries(&project, &[wanted]).unwrap_err();
  match err {
    EvalError::DependencyCycle { chain } => {
      // The cycle closes on the inner environment, not the entry one:
      // a@empty -> b@empty -> a@inner -> b@inner -> a@inner.
      assert_eq!(chain.len(), 3);
      let first = &chain[0];
      assert!(first.starts_with("//a:a"));
      // All links in the reported cycle share the narrowed environment.
      let fp = first.rsplit(' ').next().unwrap();
      assert!(chain[2].ends_with(fp));
    }
    other => panic!("expected DependencyCycle, got: {}", other),
  }
}

#[test]
fn not_concrete_targets_are_rejected_as_entries() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"c\")\n"),
    ("lib/BUILD.lua", r#"c_library("codec", { sources = {"codec.c"} })"#),
    ("lib/codec.c", "int x;"),
  ]);
  let wanted = entry("//lib:codec");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let err = evaluate_entries(&project, &[wanted]).unwrap_err();
  assert!(matches!(err, EvalError::NotConcrete { .. }), "got: {}", err);
}

#[test]
fn named_base_environment_feeds_entry_evaluation() {
  let dir = write_tree(&[
    (
      "BUILD.conf.lua",
      r#"
        install("shell")
        define_key("mode", { type = "enum", choices = {"debug", "release"} })
        environment("default", { values = { mode = "release" } })
      "#,
    ),
    (
      "app/BUILD.lua",
      r#"shell("banner", { cmd = "echo ${mode} > $out", uses = {"mode"} })"#,
    ),
  ]);
  let wanted = entry("//app:banner");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let mut evaluator = Evaluator::new(&project);
  let banner = evaluator.evaluate_entry(&wanted).unwrap();
  let product = &banner.products[0];
  assert_eq!(product.variables.get("cmd").unwrap(), "echo release > $out");
  // mode is in the narrowed environment, so the output is spelled apart
  // under an env prefix.
  assert!(product.outputs[0].starts_with("env/"), "got: {}", product.outputs[0]);
}

#[test]
fn c_binary_links_library_archives() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"c\")\n"),
    (
      "lib/BUILD.lua",
      r#"
        c_library("codec", {
          sources = {"codec.c"},
          using = { c_flags = { append = {"-Ilib"} } },
        })
      "#,
    ),
    ("lib/codec.c", "int codec;"),
    (
      "app/BUILD.lua",
      r#"c_binary("tool", { sources = {"main.c"}, deps = {"//lib:codec"} })"#,
    ),
    ("app/main.c", "int main(void) { return 0; }"),
  ]);
  let wanted = entry("//app:tool");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let mut evaluator = Evaluator::new(&project);
  evaluator.evaluate_entry(&wanted).unwrap();
  let products = evaluator.products();

  // codec.o, libcodec.a, main.o, and the linked tool.
  assert_eq!(products.len(), 4);

  let by_rule = |rule: &str| {
    products
      .in_emission_order()
      .into_iter()
      .filter(|p| p.rule == rule)
      .cloned()
      .collect::<Vec<_>>()
  };

  // The library compiles without the using-flags it surfaces...
  let objects = by_rule("compile_c_object");
  let codec_o = objects.iter().find(|p| p.target.package == "lib").unwrap();
  assert_eq!(codec_o.variables.get("c_flags").unwrap(), "");
  assert_eq!(codec_o.outputs, vec!["lib/codec.c.o".to_string()]);

  // ...while the dependent binary compiles with them.
  let main_o = objects.iter().find(|p| p.target.package == "app").unwrap();
  assert_eq!(main_o.variables.get("c_flags").unwrap(), "-Ilib");
  assert!(main_o.outputs[0].starts_with("env/"));

  // The link consumes the binary's object and the library archive.
  let link = by_rule("link_c_program");
  assert_eq!(link.len(), 1);
  assert!(link[0].inputs.iter().any(|i| i.ends_with("main.c.o")));
  assert!(link[0].inputs.contains(&"lib/libcodec.a".to_string()));

  let manifest = emit(&project, products);
  assert!(manifest.contains("rule link_c_program"));
  assert!(manifest.contains("build lib/libcodec.a: archive_c_library"));
  // Compilation tracks headers through a depfile, and archives are
  // marked content-stable.
  assert!(manifest.contains("depfile = $out.d"));
  assert!(manifest.contains("restat = 1"));
}

#[test]
fn shell_products_carry_depfile_and_restat() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"shell\")\n"),
    (
      "app/BUILD.lua",
      r#"
        shell("scan", {
          cmd = "scan --deps $out.d > $out",
          depfile = "$out.d",
          restat = true,
        })
      "#,
    ),
  ]);
  let wanted = entry("//app:scan");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let mut evaluator = Evaluator::new(&project);
  let scan = evaluator.evaluate_entry(&wanted).unwrap();
  let product = &scan.products[0];
  assert_eq!(product.depfile.as_deref(), Some("$out.d"));
  assert!(product.restat);

  // Both land on the build statement itself.
  let manifest = emit(&project, evaluator.products());
  assert!(manifest.contains("build app/scan: shell\n  cmd = scan --deps $out.d > $out\n  depfile = $out.d\n  restat = 1\n"));
}

#[test]
fn missing_input_fails_at_emission() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\n"),
    ("greet/BUILD.lua", r#"copy_file("hello", { sources = {"missing.txt"} })"#),
  ]);
  let wanted = entry("//greet:hello");
  let project = load_project(&dir, std::slice::from_ref(&wanted));
  let products = evaluate_entries(&project, &[wanted]).unwrap();

  let options = EmitOptions {
    regen_command: "tessera gen".to_string(),
    dump_env: false,
  };
  let err = write_manifest(&project, &products, &options).unwrap_err();
  let text = err.to_string();
  assert!(text.contains("missing.txt"), "got: {}", text);
  assert!(!dir.path().join("build/build.ninja").exists());
}

#[test]
fn regeneration_depends_on_description_files() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\n"),
    ("greet/BUILD.lua", r#"copy_file("hello", { sources = {"a.txt"} })"#),
    ("greet/a.txt", "hi"),
  ]);
  let wanted = entry("//greet:hello");
  let project = load_project(&dir, std::slice::from_ref(&wanted));
  let products = evaluate_entries(&project, &[wanted]).unwrap();
  emit(&project, &products);

  let deps = fs::read_to_string(dir.path().join("build/build.ninja.deps")).unwrap();
  assert!(deps.starts_with("build.ninja:"));
  assert!(deps.contains("BUILD.conf.lua"));
  assert!(deps.contains("BUILD.lua"));
}

#[test]
fn reruns_emit_byte_identical_manifests() {
  let files: &[(&str, &str)] = &[
    (
      "BUILD.conf.lua",
      r#"
        install("copy")
        install("c")
        define_key("mode", { type = "enum", choices = {"debug", "release"}, default = "debug" })
      "#,
    ),
    (
      "lib/BUILD.lua",
      r#"
        c_library("codec", { sources = {"codec.c"} })
      "#,
    ),
    ("lib/codec.c", "int codec;"),
    (
      "app/BUILD.lua",
      r#"
        c_binary("tool", { sources = {"main.c"}, deps = {"//lib:codec"} })
        copy_file("doc", { sources = {"README"} })
      "#,
    ),
    ("app/main.c", "int main(void) { return 0; }"),
    ("app/README", "docs"),
  ];
  let entries = [entry("//app:tool"), entry("//app:doc")];

  let render = || {
    let dir = write_tree(files);
    let project = load(dir.path(), &dir.path().join("build"), &entries).unwrap();
    let products = evaluate_entries(&project, &entries).unwrap();
    let options = EmitOptions {
      regen_command: "tessera gen //app:tool //app:doc".to_string(),
      dump_env: false,
    };
    let path = write_manifest(&project, &products, &options).unwrap();
    fs::read_to_string(path).unwrap()
  };

  assert_eq!(render(), render());
}

#[test]
fn vars_file_is_visible_to_descriptions() {
  let dir = write_tree(&[
    ("BUILD.vars.toml", "[toolchain]\ncc = \"clang\"\n"),
    (
      "BUILD.conf.lua",
      r#"
        install("shell")
        assert(vars.toolchain.cc == "clang", "vars should be loaded")
      "#,
    ),
    (
      "app/BUILD.lua",
      r#"
        assert(vars.toolchain.cc == "clang", "vars reach packages too")
        shell("x", { cmd = "true" })
      "#,
    ),
  ]);
  let wanted = entry("//app:x");
  load_project(&dir, std::slice::from_ref(&wanted));
}

#[test]
fn interpolation_in_target_name_is_rejected() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\n"),
    (
      "greet/BUILD.lua",
      r#"copy_file("hello-${mode}", { sources = {"a.txt"} })"#,
    ),
  ]);
  let wanted = entry("//greet:whatever");
  let err = load(dir.path(), &dir.path().join("build"), std::slice::from_ref(&wanted)).unwrap_err();
  let text = err.to_string();
  assert!(text.contains("not allowed"), "got: {}", text);
  assert!(text.contains("target name"), "got: {}", text);
}

#[test]
fn genroot_prefix_is_rejected() {
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"copy\")\n"),
    (
      "greet/BUILD.lua",
      r#"copy_file("hello", { sources = {"@gen/tables.c"} })"#,
    ),
  ]);
  let wanted = entry("//greet:hello");
  let err = load(dir.path(), &dir.path().join("build"), std::slice::from_ref(&wanted)).unwrap_err();
  assert!(err.to_string().contains("no longer supported"), "got: {}", err);
}

#[test]
fn dependency_chain_is_attached_to_failures() {
  // The leaf target's delta references an unregistered key; the error
  // should carry the chain that reached it.
  let dir = write_tree(&[
    ("BUILD.conf.lua", "install(\"shell\")\n"),
    (
      "app/BUILD.lua",
      r#"shell("top", { cmd = "x", deps = {"//leaf:leaf"} })"#,
    ),
    (
      "leaf/BUILD.lua",
      r#"shell("leaf", { cmd = "y", local = { unregistered = "v" } })"#,
    ),
  ]);
  let wanted = entry("//app:top");
  let project = load_project(&dir, std::slice::from_ref(&wanted));

  let err = evaluate_entries(&project, &[wanted]).unwrap_err();
  let text = err.to_string();
  assert!(text.contains("unknown environment key"), "got: {}", text);
  assert!(text.contains("dependency chain:"), "got: {}", text);
  assert!(text.contains("//app:top"), "got: {}", text);
  assert!(text.contains("//leaf:leaf"), "got: {}", text);
}
