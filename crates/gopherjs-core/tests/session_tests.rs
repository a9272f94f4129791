use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, SystemTime};

use gopherjs_core::sourcemap::SourceMap;
use gopherjs_core::{BuildError, Env, Options, Session};
use gopherjs_test_helpers::{CountingFrontEnd, GoTree, TEST_GO_RELEASE};
use indoc::indoc;

fn session(tree: &GoTree, front: &CountingFrontEnd, options: Options) -> Session {
    Session::new(options, tree.env(), front.shared()).unwrap()
}

/// `example.com/a` imports `example.com/b`. Returns b's source file.
fn chain(tree: &GoTree) -> PathBuf {
    let b = tree.gopath_package(
        "example.com/b",
        &[("b.go", "package b\n\nfunc B() int { return 2 }\n")],
    );
    tree.gopath_package(
        "example.com/a",
        &[(
            "a.go",
            indoc! {r#"
                package a

                import "example.com/b"

                func A() int { return b.B() }
            "#},
        )],
    );
    b.join("b.go")
}

#[test]
fn test_dependency_change_recompiles_importer() {
    let tree = GoTree::new();
    let b_file = chain(&tree);
    let front = CountingFrontEnd::new();

    let mut first = session(&tree, &front, Options::new());
    first.build_import_path("example.com/a").unwrap();
    assert_eq!(front.count("example.com/a"), 1);
    assert_eq!(front.count("example.com/b"), 1);

    front.reset();
    let mut second = session(&tree, &front, Options::new());
    let (pkg, _) = second.build_import_path("example.com/a").unwrap();
    assert_eq!(front.total(), 0, "unchanged packages come from the cache");
    assert!(pkg.up_to_date);

    tree.touch(&b_file, SystemTime::now() + Duration::from_secs(60));
    front.reset();
    let mut third = session(&tree, &front, Options::new());
    let (pkg, _) = third.build_import_path("example.com/a").unwrap();
    assert_eq!(front.order(), vec!["example.com/b", "example.com/a"]);
    assert!(pkg.src_mod_time > SystemTime::now());
}

#[test]
fn test_each_package_compiles_at_most_once() {
    let tree = GoTree::new();
    tree.gopath_package("example.com/base", &[("base.go", "package base\n\nvar N = 1\n")]);
    for side in ["left", "right"] {
        tree.gopath_package(
            &format!("example.com/{side}"),
            &[(
                "side.go",
                format!("package {side}\n\nimport \"example.com/base\"\n\nvar M = base.N\n").as_str(),
            )],
        );
    }
    tree.gopath_package(
        "example.com/top",
        &[(
            "top.go",
            indoc! {r#"
                package top

                import (
                	"example.com/left"
                	"example.com/right"
                )

                var T = left.M + right.M
            "#},
        )],
    );

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new().no_cache(true));
    s.build_import_path("example.com/top").unwrap();
    s.build_import_path("example.com/left").unwrap();
    s.build_import_path("example.com/top").unwrap();

    assert_eq!(front.count("example.com/base"), 1);
    assert_eq!(front.count("example.com/left"), 1);
    assert_eq!(front.count("example.com/right"), 1);
    assert_eq!(front.count("example.com/top"), 1);
    assert_eq!(front.total(), 4);
    assert_eq!(front.order().first().map(String::as_str), Some("example.com/base"));
}

#[test]
fn test_no_cache_ignores_stored_archives() {
    let tree = GoTree::new();
    chain(&tree);
    let front = CountingFrontEnd::new();
    session(&tree, &front, Options::new())
        .build_import_path("example.com/a")
        .unwrap();

    front.reset();
    session(&tree, &front, Options::new().no_cache(true))
        .build_import_path("example.com/a")
        .unwrap();
    assert_eq!(front.total(), 2);
}

#[test]
fn test_build_files_writes_program() {
    let tree = GoTree::new();
    chain(&tree);
    let main = tree.write(
        "work/app/main.go",
        indoc! {r#"
            package main

            import "example.com/b"

            func main() { b.B() }
        "#},
    );
    let helper = tree.write("work/app/helper.inc.js", "console.log('helper');");
    let out = tree.root().join("out/main.js");

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new());
    s.build_files(&[main, helper], &out, tree.root()).unwrap();

    let code = fs::read_to_string(&out).unwrap();
    let runtime_at = code.find("$packages.$register(\"runtime\"").unwrap();
    let b_at = code.find("$packages.$register(\"example.com/b\"").unwrap();
    let main_at = code.find("$packages.$register(\"main\"").unwrap();
    assert!(runtime_at < b_at && b_at < main_at);
    assert!(code.contains("\t(function() {\nconsole.log('helper');\n\t}).call($global);\n"));
    assert!(code.contains(&format!("var $goVersion = \"{TEST_GO_RELEASE}\";")));
    assert!(code.contains("$packages.$start(\"main\");"));
    assert!(!code.contains('\x08'));
    assert!(!out.with_extension("js.map").exists());
}

#[test]
fn test_build_files_relative_to_cwd() {
    let tree = GoTree::new();
    tree.write("work/app/main.go", "package main\n\nfunc main() {}\n");
    let out = tree.root().join("main.js");

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new());
    s.build_files(&[PathBuf::from("work/app/main.go")], &out, tree.root())
        .unwrap();
    assert!(out.exists());
    assert_eq!(front.count("main"), 1);
}

#[test]
fn test_build_files_rejects_bad_input() {
    let tree = GoTree::new();
    let front = CountingFrontEnd::new();
    let out = tree.root().join("out.js");

    let mut s = session(&tree, &front, Options::new());
    assert!(matches!(
        s.build_files(&[], &out, tree.root()),
        Err(BuildError::NoSources)
    ));

    let a = tree.write("work/one/a.go", "package main\n");
    let b = tree.write("work/two/b.go", "package main\n");
    assert!(matches!(
        s.build_files(&[a, b], &out, tree.root()),
        Err(BuildError::MixedDirectories { .. })
    ));

    let lib = tree.write("work/lib/lib.go", "package lib\n\nfunc F() {}\n");
    assert!(matches!(
        s.build_files(&[lib], &out, tree.root()),
        Err(BuildError::NotMain)
    ));
    assert!(!out.exists());
}

#[test]
fn test_source_map_is_written() {
    let tree = GoTree::new();
    chain(&tree);
    let main = tree.write(
        "gopath/src/app/main.go",
        "package main\n\nimport \"example.com/b\"\n\nfunc main() { b.B() }\n",
    );
    let out = tree.root().join("dist/main.js");

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new().create_map_file(true));
    s.build_files(&[main], &out, tree.root()).unwrap();

    let code = fs::read_to_string(&out).unwrap();
    assert!(code.ends_with("//# sourceMappingURL=main.js.map\n"));

    let map: SourceMap =
        serde_json::from_str(&fs::read_to_string(tree.root().join("dist/main.js.map")).unwrap())
            .unwrap();
    assert_eq!(map.version, 3);
    assert_eq!(map.file, "main.js");
    for source in ["runtime/runtime.go", "/example.com/b/b.go", "/app/main.go"] {
        assert!(map.sources.iter().any(|s| s == source), "{source} in {:?}", map.sources);
    }
    assert!(!map.mappings.is_empty());
}

#[test]
fn test_overlay_files_are_compiled_in() {
    let tree = GoTree::new();
    chain(&tree);
    tree.native_package(
        "example.com/b",
        &[
            (
                "b.go",
                "package b\n\n//gopherjs:keep-original\nfunc B() int { return _gopherjs_original_B() * 10 }\n",
            ),
            ("b.inc.js", "var nativeB = true;"),
        ],
    );

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new());
    let (_, archive) = s.build_import_path("example.com/b").unwrap();
    assert!(archive.code.contains("gopherjs__b.go"));
    assert!(archive.code.contains("func _gopherjs_original_B() int"));
    assert!(archive
        .inc_js_code
        .contains("\t(function() {\nvar nativeB = true;\n\t}).call($global);\n"));
}

#[test]
fn test_import_cycle_is_reported() {
    let tree = GoTree::new();
    tree.gopath_package("example.com/x", &[("x.go", "package x\n\nimport \"example.com/y\"\n\nvar X = y.Y\n")]);
    tree.gopath_package("example.com/y", &[("y.go", "package y\n\nimport \"example.com/x\"\n\nvar Y = x.X\n")]);

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new().no_cache(true));
    let err = s.build_import_path("example.com/x").unwrap_err();
    assert!(
        matches!(err, BuildError::ImportCycle(ref chain) if chain == "example.com/x -> example.com/y -> example.com/x"),
        "{err}"
    );
    assert_eq!(front.total(), 0);
}

#[test]
fn test_named_files_are_never_cached() {
    let tree = GoTree::new();
    let main = tree.write("work/app/main.go", "package main\n\nfunc main() {}\n");
    let out = tree.root().join("main.js");

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new());
    s.build_files(&[main.clone()], &out, tree.root()).unwrap();
    assert!(!s.cache().entry_path("main").exists());
    assert!(s.cache().entry_path("runtime").exists());

    front.reset();
    let mut again = session(&tree, &front, Options::new());
    again.build_files(&[main], &out, tree.root()).unwrap();
    assert_eq!(front.count("main"), 1);
    assert_eq!(front.count("runtime"), 0);
}

#[test]
fn test_embedded_files_are_compiled_in() {
    let tree = GoTree::new();
    tree.goroot_package("embed", &[("embed.go", "package embed\n")]);
    tree.gopath_package(
        "example.com/assets",
        &[
            (
                "assets.go",
                indoc! {r#"
                    package assets

                    import _ "embed"

                    //go:embed greeting.txt
                    var Greeting string

                    //go:embed logo.bin
                    var Logo []byte
                "#},
            ),
            ("greeting.txt", "hello"),
            ("logo.bin", "PNG"),
        ],
    );

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new());
    let (_, archive) = s.build_import_path("example.com/assets").unwrap();
    assert_eq!(archive.imports, vec!["embed"]);
    assert!(archive.code.contains("$pkg.$sources[\"_gopherjs_embed.go\"]"));
    assert!(archive.code.contains(r#"_gopherjs_embed_0 = \"hello\""#));
    assert!(archive.code.contains(r#"_gopherjs_embed_1 = \"PNG\""#));
    assert!(archive.code.contains("var Greeting string = _gopherjs_embed_0"));
    assert!(archive.code.contains("var Logo []byte = []byte(_gopherjs_embed_1)"));
}

#[test]
fn test_embed_without_matching_file_fails() {
    let tree = GoTree::new();
    tree.goroot_package("embed", &[("embed.go", "package embed\n")]);
    tree.gopath_package(
        "example.com/assets",
        &[(
            "assets.go",
            "package assets\n\nimport _ \"embed\"\n\n//go:embed missing.txt\nvar S string\n",
        )],
    );

    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new());
    let err = s.build_import_path("example.com/assets").unwrap_err();
    assert!(matches!(err, BuildError::Embed { ref msg, .. } if msg.contains("missing.txt")), "{err}");
    assert_eq!(front.count("example.com/assets"), 0);
}

#[test]
fn test_wait_for_change_forgets_built_packages() {
    let tree = GoTree::new();
    let b_file = chain(&tree);
    let front = CountingFrontEnd::new();

    let mut s = session(&tree, &front, Options::new().watch(true));
    s.build_import_path("example.com/a").unwrap();
    assert!(s.archive("example.com/a").is_some());
    assert!(!s.types().is_empty());

    let added = b_file.with_file_name("extra.go");
    let writer = {
        let added = added.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            fs::write(added, "package b\n\nfunc Extra() int { return 3 }\n").unwrap();
        })
    };
    s.wait_for_change();
    writer.join().unwrap();

    assert!(s.archive("example.com/a").is_none());
    assert!(s.archive("example.com/b").is_none());
    assert!(s.types().is_empty());

    tree.touch(&added, SystemTime::now() + Duration::from_secs(60));
    front.reset();
    let mut next = session(&tree, &front, Options::new());
    next.build_import_path("example.com/a").unwrap();
    assert_eq!(front.order(), vec!["example.com/b", "example.com/a"]);
}

#[test]
fn test_missing_import_aborts_build() {
    let tree = GoTree::new();
    tree.gopath_package(
        "example.com/a",
        &[("a.go", "package a\n\nimport \"example.com/nowhere\"\n")],
    );
    let front = CountingFrontEnd::new();
    let mut s = session(&tree, &front, Options::new());
    let err = s.build_import_path("example.com/a").unwrap_err();
    assert!(matches!(err, BuildError::PackageNotFound { ref path, .. } if path == "example.com/nowhere"));
}

#[test]
fn test_session_settings() {
    let tree = GoTree::new();
    let front = CountingFrontEnd::new();

    let plain = session(&tree, &front, Options::new());
    assert_eq!(plain.install_suffix(), "");
    assert_eq!(plain.go_release(), TEST_GO_RELEASE);

    let minified = session(&tree, &front, Options::new().minify(true));
    assert_eq!(minified.install_suffix(), "min");
    assert_ne!(plain.cache().fingerprint(), minified.cache().fingerprint());

    let broken = Env::for_roots(tree.root().join("missing"), Vec::new());
    assert!(matches!(
        Session::new(Options::new(), broken, front.shared()).err(),
        Some(BuildError::InvalidGoRoot(_))
    ));
}
