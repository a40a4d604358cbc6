use lazyload_core::{
    load_manifest, ExtensionState, LoadPolicy, Loader, ManifestError, StartupContext, Tier,
};
use std::fs;

const MANIFEST: &str = r#"{
  "plugins": [
    { "name": "plenary", "source": "nvim-lua/plenary.nvim" },
    { "name": "telescope", "source": "nvim-telescope/telescope.nvim",
      "dependencies": ["plenary"], "load": "now" },
    { "name": "nvim-treesitter", "source": "nvim-treesitter/nvim-treesitter",
      "load": "on_file_argument", "build": "make",
      "settings": { "ensure_installed": ["rust", "lua"] } },
    { "name": "dashboard", "load": "now" }
  ]
}"#;

#[test]
fn loads_manifest_from_disk_and_declares_it() {
    let temp = tempfile::tempdir().expect("temp dir");
    let path = temp.path().join("plugins.json");
    fs::write(&path, MANIFEST).expect("write manifest");

    let manifest = load_manifest(&path).expect("manifest should load");
    assert_eq!(manifest.plugins.len(), 4);
    assert_eq!(manifest.plugins[2].load, LoadPolicy::OnFileArgument);

    let mut loader = Loader::new(StartupContext::new(true));
    for plugin in &manifest.plugins {
        loader
            .declare(plugin.to_declaration())
            .expect("manifest plugins should declare");
    }

    assert_eq!(loader.tier("plenary"), Some(Tier::Later));
    assert_eq!(loader.tier("telescope"), Some(Tier::Later));
    assert_eq!(loader.tier("nvim-treesitter"), Some(Tier::Now));
    assert_eq!(loader.tier("dashboard"), Some(Tier::Now));

    loader.idle_tick();
    let report = loader.report();
    assert!(report
        .extensions
        .iter()
        .all(|status| status.state == ExtensionState::Loaded));
}

#[test]
fn missing_file_reports_io_error_with_path() {
    let temp = tempfile::tempdir().expect("temp dir");
    let path = temp.path().join("absent.json");
    let err = load_manifest(&path).expect_err("missing file must fail");
    assert!(matches!(err, ManifestError::Io { .. }));
    assert!(err.to_string().contains("absent.json"));
}

#[test]
fn malformed_json_reports_parse_error() {
    let temp = tempfile::tempdir().expect("temp dir");
    let path = temp.path().join("broken.json");
    fs::write(&path, "{ \"plugins\": [ { \"name\": ").expect("write manifest");
    let err = load_manifest(&path).expect_err("malformed file must fail");
    assert!(matches!(err, ManifestError::Parse(_)));
}

#[test]
fn report_serializes_with_flat_state() {
    let mut loader = Loader::new(StartupContext::new(false));
    let manifest = lazyload_core::parse_manifest(
        r#"{"plugins": [{"name": "a"}, {"name": "b", "dependencies": ["zzz"]}]}"#,
    )
    .expect("manifest");
    for plugin in &manifest.plugins {
        loader.declare(plugin.to_declaration()).expect("declare");
    }
    loader.idle_tick();

    let json = serde_json::to_value(loader.report()).expect("report serializes");
    assert_eq!(json["has_file_argument"], false);
    assert_eq!(json["now"], "drained");
    assert_eq!(json["later"], "drained");
    assert_eq!(json["extensions"][0]["name"], "a");
    assert_eq!(json["extensions"][0]["tier"], "later");
    assert_eq!(json["extensions"][0]["state"], "loaded");
    assert_eq!(json["extensions"][1]["tier"], serde_json::Value::Null);
    assert_eq!(json["extensions"][1]["state"], "blocked");
}
