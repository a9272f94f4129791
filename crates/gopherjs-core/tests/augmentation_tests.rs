use gopherjs_core::ast::{parse_file, print_file, Mode};
use gopherjs_core::augment::{parse_and_augment, NOSYNC_PATH};
use gopherjs_core::BuildContext;
use gopherjs_test_helpers::GoTree;
use indoc::indoc;

fn context(tree: &GoTree) -> BuildContext {
    BuildContext::new(tree.env(), "", Vec::new())
}

fn printed(tree: &GoTree, import_path: &str) -> Vec<String> {
    let ctx = context(tree);
    let pkg = ctx.import(import_path, std::path::Path::new("")).unwrap();
    let (files, _) = parse_and_augment(&ctx, &pkg, false).unwrap();
    files.iter().map(print_file).collect()
}

#[test]
fn test_keep_original_function() {
    let tree = GoTree::new();
    tree.goroot_package(
        "strconv",
        &[("itoa.go", "package strconv\n\nfunc F() int { return 1 }\n\nfunc G() int { return F() }\n")],
    );
    tree.native_package(
        "strconv",
        &[(
            "itoa.go",
            indoc! {"
                package strconv

                //gopherjs:keep-original
                func F() int { return _gopherjs_original_F() + 1 }
            "},
        )],
    );

    let files = printed(&tree, "strconv");
    assert_eq!(files.len(), 2);
    assert!(files[0].contains("func F() int { return _gopherjs_original_F() + 1 }"));
    assert!(files[1].contains("func _gopherjs_original_F() int { return 1 }"));
    assert!(files[1].contains("func G() int { return F() }"));
    assert!(!files[1].contains("func F()"));
}

#[test]
fn test_partially_overridden_value_keeps_side_effects() {
    let tree = GoTree::new();
    tree.goroot_package(
        "os",
        &[(
            "vars.go",
            indoc! {"
                package os

                var X, Y = 1, sideEffect()

                func sideEffect() int { return 2 }
            "},
        )],
    );
    tree.native_package("os", &[("vars.go", "package os\n\nvar X = 42\n")]);

    let files = printed(&tree, "os");
    assert!(files[0].contains("var X = 42"));
    assert!(files[1].contains("var Y = sideEffect()"), "{}", files[1]);
    assert!(!files[1].contains("X,"));
}

#[test]
fn test_package_without_overlays_is_unchanged() {
    let tree = GoTree::new();
    let src = indoc! {r#"
        package plain

        import (
        	"errors"
        	"unused"
        )

        // Err is returned on failure.
        var Err = errors.New("plain")

        func init() {}
    "#};
    let dir = tree.gopath_package("example.com/plain", &[("plain.go", src)]);

    let files = printed(&tree, "example.com/plain");
    let direct = parse_file(&dir.join("plain.go"), src, Mode::Full).unwrap();
    assert_eq!(files, vec![print_file(&direct)]);
}

#[test]
fn test_sync_is_redirected_for_selected_packages() {
    let tree = GoTree::new();
    let src = "package rand\n\nimport \"sync\"\n\nvar mu sync.Mutex\n";
    tree.goroot_package("math/rand", &[("rand.go", src)]);
    tree.goroot_package("bufio", &[("bufio.go", src.replace("rand", "bufio").as_str())]);

    let redirected = printed(&tree, "math/rand");
    assert!(redirected[0].contains(&format!("import sync \"{NOSYNC_PATH}\"")));

    let untouched = printed(&tree, "bufio");
    assert!(untouched[0].contains("import \"sync\""));
}

#[test]
fn test_purged_type_takes_its_methods() {
    let tree = GoTree::new();
    tree.goroot_package(
        "reflect",
        &[(
            "value.go",
            indoc! {"
                package reflect

                type Value struct{ ptr uintptr }

                func (v Value) Kind() int { return 0 }

                func (v *Value) Set(x Value) {}

                func Keep() {}
            "},
        )],
    );
    tree.native_package(
        "reflect",
        &[(
            "value.go",
            indoc! {"
                package reflect

                //gopherjs:purge
                type Value struct{ ptr uintptr }
            "},
        )],
    );

    let files = printed(&tree, "reflect");
    assert!(!files[0].contains("type Value"));
    assert!(!files[1].contains("Value"), "{}", files[1]);
    assert!(files[1].contains("func Keep() {}"));
}
