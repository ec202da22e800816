//! Directory Weave Tests
//!
//! End-to-end runs reading `weft.toml`, an aspects JSON file and `.wmod`
//! files from a temporary directory.
//!
//! Run with: cargo test -p weft-weaver --test directory_weave

mod common;

use std::fs;
use std::path::Path;

use common::*;
use weft_metadata::{Module, ModuleRef};
use weft_weaver::wellknown::is_woven_by;
use weft_weaver::{weave_config, DiagnosticId, Weaver, WeaverConfig, WeaverError};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

const CONFIG: &str = r#"
repository = "audit"
advice_module = "Aspects"
target_modules = ["App"]
input_dirs = ["modules"]
output_dir = "woven"
aspects = "aspects.json"
"#;

const DESCRIBING: &str = r#"[
    {
        "name": "Describing",
        "pointcut": { "Types": { "types": "App.Order" } },
        "advice": { "TypeMembers": { "source": "Aspects.Audit" } }
    }
]"#;

const TWICE: &str = r#"[
    {
        "name": "First",
        "pointcut": { "Types": { "types": "App.Order" } },
        "advice": { "TypeMembers": { "source": "Aspects.Audit" } }
    },
    {
        "name": "Second",
        "pointcut": { "Types": { "types": "App.Order" } },
        "advice": { "TypeMembers": { "source": "Aspects.Audit" } }
    }
]"#;

fn write_module(dir: &Path, module: &Module) {
    fs::write(dir.join(format!("{}.wmod", module.name)), module.encode()).unwrap();
}

/// Lay out `modules/`, `aspects.json` and `weft.toml` under `root`
fn layout(root: &Path, aspects: &str) {
    let modules = root.join("modules");
    fs::create_dir_all(&modules).unwrap();
    write_module(&modules, &advice_module());
    write_module(&modules, &target_module(false));
    write_module(&modules, &Module::new("Lib"));
    fs::write(root.join("aspects.json"), aspects).unwrap();
    fs::write(root.join("weft.toml"), CONFIG).unwrap();
}

fn read_module(path: &Path) -> Module {
    Module::decode(&fs::read(path).unwrap()).unwrap()
}

// =============================================================================
// DIRECTORY RUNS
// =============================================================================

mod directory_tests {
    use super::*;

    #[test]
    fn test_weave_from_config_file() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), DESCRIBING);

        let report = weave_config(&root.path().join("weft.toml")).unwrap();
        assert!(report.is_success(), "{:?}", report.diagnostics);
        assert_eq!(report.written, vec![TARGET.to_string()]);

        let woven = root.path().join("woven");
        let app = read_module(&woven.join("App.wmod"));
        let order = app.types.iter().find(|def| def.name == "Order").unwrap();
        assert!(order.method("Describe").is_some());
        assert!(is_woven_by(&order.attributes, "Describing"));
        assert!(woven.join("Lib.wmod").is_file());
        assert!(!woven.join("Aspects.wmod").exists());
    }

    #[test]
    fn test_rejected_weave_leaves_output_empty() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), TWICE);
        let woven = root.path().join("woven");
        fs::create_dir_all(&woven).unwrap();
        fs::write(woven.join("stale.wmod"), b"stale").unwrap();

        let report = weave_config(&root.path().join("weft.toml")).unwrap();
        assert_eq!(report.diagnostics.count(DiagnosticId::AlreadyApplied), 2);
        assert!(woven.is_dir());
        assert_eq!(fs::read_dir(&woven).unwrap().count(), 0);
    }

    #[test]
    fn test_configured_reference_is_injected() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), DESCRIBING);
        let extra = root.path().join("extra");
        fs::create_dir_all(&extra).unwrap();
        write_module(&extra, &Module::new("Extra"));
        let config = format!(
            "{}\n[[references]]\npath = \"extra/Extra.wmod\"\ntarget = \"App\"\n",
            CONFIG
        );
        fs::write(root.path().join("weft.toml"), config).unwrap();

        let report = weave_config(&root.path().join("weft.toml")).unwrap();
        assert!(report.is_success(), "{:?}", report.diagnostics);
        let woven = root.path().join("woven");
        let app = read_module(&woven.join("App.wmod"));
        assert!(app.references_module("Extra"));
        assert!(woven.join("Extra.wmod").is_file());
    }

    #[test]
    fn test_missing_target_module() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), DESCRIBING);
        fs::remove_file(root.path().join("modules").join("App.wmod")).unwrap();
        let result = weave_config(&root.path().join("weft.toml"));
        assert!(matches!(result, Err(WeaverError::ModuleNotFound(name)) if name == "App"));
    }

    #[test]
    fn test_missing_dependency_is_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), DESCRIBING);
        let mut target = target_module(false);
        target.references.push(ModuleRef::new("Gone"));
        write_module(&root.path().join("modules"), &target);

        let report = weave_config(&root.path().join("weft.toml")).unwrap();
        assert!(report.is_success(), "{:?}", report.diagnostics);
        assert!(!report.copied.contains(&"Gone".to_string()));
    }

    #[test]
    fn test_missing_aspects_file() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), DESCRIBING);
        fs::remove_file(root.path().join("aspects.json")).unwrap();
        let config = WeaverConfig::from_file(&root.path().join("weft.toml")).unwrap();
        let result = Weaver::open(config).weave();
        assert!(matches!(result, Err(WeaverError::Io { .. })));
    }

    #[test]
    fn test_malformed_module_file() {
        let root = tempfile::tempdir().unwrap();
        layout(root.path(), DESCRIBING);
        fs::write(root.path().join("modules").join("App.wmod"), b"not a module").unwrap();
        let result = weave_config(&root.path().join("weft.toml"));
        assert!(matches!(result, Err(WeaverError::Module { .. })));
    }
}
