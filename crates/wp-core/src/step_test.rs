use super::*;

fn modules(names: &[&str]) -> Vec<ModuleName> {
    names.iter().map(|n| ModuleName::new(*n)).collect()
}

#[test]
fn test_parse_tagged_documents_sorted_by_version() {
    let yaml = r#"
--- !Migration
version: 0.0.3
app_version: 10.0
--- !Migration
version: 0.0.1
app_version: 10.0
--- !Migration
version: 0.0.2
app_version: 10.0
"#;
    let steps = parse_all(yaml).unwrap();
    let versions: Vec<String> = steps.iter().map(|s| s.version().to_string()).collect();
    assert_eq!(versions, vec!["0.0.1", "0.0.2", "0.0.3"]);
    assert!(steps.iter().all(|s| s.is_noop()));
    assert_eq!(steps[0].app_version(), "10.0");
}

#[test]
fn test_parse_untagged_mapping() {
    let yaml = "version: 0.1.1\napp_version: '12.0'\ninstall:\n- board\n";
    let steps = parse_all(yaml).unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].operations().install, modules(&["board"]));
    assert!(!steps[0].is_noop());
}

#[test]
fn test_parse_all_operation_fields() {
    let yaml = r#"
--- !Migration
version: 1.0.0
app_version: 11.0
upgrade: [document, account]
install: [board]
uninstall: [project]
remove: [removed_code]
service: odoo
pre_scripts: [./migrate/pre.sql]
post_scripts: [./migrate/post.sql]
"#;
    let step = parse_all(yaml).unwrap().remove(0);
    let ops = step.operations();
    assert_eq!(ops.upgrade, modules(&["document", "account"]));
    assert_eq!(ops.install, modules(&["board"]));
    assert_eq!(ops.uninstall, modules(&["project"]));
    assert_eq!(ops.remove, modules(&["removed_code"]));
    assert_eq!(step.service(), Some(ServiceName::Odoo));
    assert_eq!(ops.pre_scripts, vec![PathBuf::from("./migrate/pre.sql")]);
    assert_eq!(ops.post_scripts, vec![PathBuf::from("./migrate/post.sql")]);
    assert!(ops.reconciles_modules());
}

#[test]
fn test_duplicate_modules_collapse_in_order() {
    let yaml = "version: 0.1.0\nupgrade: [b, a, b, c, a]\n";
    let step = parse_all(yaml).unwrap().remove(0);
    assert_eq!(step.operations().upgrade, modules(&["b", "a", "c"]));
}

#[test]
fn test_null_operation_fields_are_absent() {
    let yaml = "version: 0.1.0\nupgrade:\nservice:\n";
    let step = parse_all(yaml).unwrap().remove(0);
    assert!(step.is_noop());
}

#[test]
fn test_empty_documents_are_skipped() {
    let yaml = "---\n--- !Migration\nversion: 0.0.1\n---\n";
    assert_eq!(parse_all(yaml).unwrap().len(), 1);
    assert!(parse_all("").unwrap().is_empty());
}

#[test]
fn test_missing_version_is_parse_error() {
    let err = parse_all("--- !Migration\napp_version: 10.0\n").unwrap_err();
    match err {
        CoreError::Parse { field, example, .. } => {
            assert_eq!(field, "version");
            assert_eq!(example, USAGE_EXAMPLE);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bad_version_is_parse_error() {
    let err = parse_all("version: 1.0\n").unwrap_err();
    assert!(matches!(err, CoreError::Parse { ref field, .. } if field == "version"));
}

#[test]
fn test_module_list_must_be_list_of_strings() {
    for yaml in [
        "version: 0.1.0\ninstall: board\n",
        "version: 0.1.0\ninstall: []\n",
        "version: 0.1.0\ninstall: [1, 2]\n",
        "version: 0.1.0\nuninstall: ['']\n",
    ] {
        let err = parse_all(yaml).unwrap_err();
        assert!(
            matches!(err, CoreError::Parse { .. }),
            "expected parse error for {yaml:?}, got {err}"
        );
    }
}

#[test]
fn test_module_error_names_field_and_contract() {
    let err = parse_all("version: 0.1.0\nremove: {a: 1}\n").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("`remove`"), "{message}");
    assert!(message.contains("list of module names"), "{message}");
    assert!(message.contains("--- !Migration"), "{message}");
}

#[test]
fn test_unknown_service_is_parse_error() {
    let err = parse_all("version: 0.1.0\nservice: acme\n").unwrap_err();
    match err {
        CoreError::Parse { field, message, .. } => {
            assert_eq!(field, "service");
            assert!(message.contains("odoo, oca"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_field_is_parse_error() {
    let err = parse_all("version: 0.1.0\ninstal: [board]\n").unwrap_err();
    assert!(matches!(err, CoreError::Parse { ref field, .. } if field == "instal"));
}

#[test]
fn test_unknown_tag_is_parse_error() {
    let err = parse_all("--- !Step\nversion: 0.1.0\n").unwrap_err();
    assert!(matches!(err, CoreError::Parse { ref field, .. } if field == "tag"));
}

#[test]
fn test_scalar_document_is_parse_error() {
    let err = parse_all("just a string\n").unwrap_err();
    assert!(matches!(err, CoreError::Parse { ref field, .. } if field == "document"));
}

#[test]
fn test_duplicate_version_is_rejected() {
    let yaml = "--- !Migration\nversion: 0.0.1\n--- !Migration\nversion: 0.0.1\ninstall: [a]\n";
    let err = parse_all(yaml).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateStep { ref version } if version == "0.0.1"));
}

#[test]
fn test_usage_example_parses() {
    let steps = parse_all(USAGE_EXAMPLE).unwrap();
    assert_eq!(steps.len(), 4);
    assert!(steps[1].is_noop());
    assert_eq!(steps[3].service(), Some(ServiceName::Odoo));
}

#[test]
fn test_operations_snapshot_roundtrip_tolerates_missing_fields() {
    let ops: Operations = serde_json::from_str(r#"{"install": ["board"]}"#).unwrap();
    assert_eq!(ops.install, modules(&["board"]));
    assert!(ops.service.is_none());
}

#[test]
fn test_load_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    let err = load_file(&missing).unwrap_err();
    assert!(matches!(err, CoreError::IoWithPath { .. }));

    let path = dir.path().join(".migrations.yaml");
    std::fs::write(&path, "--- !Migration\nversion: 0.0.1\n").unwrap();
    assert_eq!(load_file(&path).unwrap().len(), 1);
}

#[test]
fn test_service_names() {
    assert_eq!(ServiceName::from_name("oca"), Some(ServiceName::Oca));
    assert_eq!(ServiceName::from_name("OCA"), None);
    assert_eq!(ServiceName::Odoo.to_string(), "odoo");
}
