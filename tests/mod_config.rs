use resourcekit::config::{AppConfig, load_with};
use resourcekit::{ConfigError, SchemaRegistry, SchemaProvider};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn explicit_file_is_read_and_env_wins() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rk.toml");
    fs::write(&path, "data_dir = \"from-file\"\nlog_level = \"warn\"\ndefault_relate = true\n").unwrap();

    let cfg = load_with(Some(&path), |_| None).unwrap();
    assert_eq!(cfg.data_dir(), PathBuf::from("from-file"));
    assert!(cfg.default_relate());

    let cfg = load_with(Some(&path), |k| (k == "RESOURCEKIT_DATA_DIR").then(|| "from-env".to_string())).unwrap();
    assert_eq!(cfg.data_dir(), PathBuf::from("from-env"));
    assert_eq!(cfg.log_level.as_deref(), Some("warn"));

    // CLI values sit above everything else.
    let cli = AppConfig { log_level: Some("trace".into()), ..AppConfig::default() };
    assert_eq!(cli.merge(cfg).log_level.as_deref(), Some("trace"));
}

#[test]
fn config_env_var_points_at_a_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("env.toml");
    fs::write(&path, "schema_path = \"s.toml\"\n").unwrap();
    let p = path.display().to_string();
    let cfg = load_with(None, |k| (k == "RESOURCEKIT_CONFIG").then(|| p.clone())).unwrap();
    assert_eq!(cfg.schema_path(), PathBuf::from("s.toml"));
}

#[test]
fn bad_config_is_reported() {
    let dir = tempdir().unwrap();
    assert!(matches!(load_with(Some(&dir.path().join("missing.toml")), |_| None), Err(ConfigError::Io { .. })));
    let path = dir.path().join("bad.toml");
    fs::write(&path, "unknown_key = 1\n").unwrap();
    assert!(matches!(load_with(Some(&path), |_| None), Err(ConfigError::Toml(_))));
}

#[test]
fn schema_files_load_and_reject_duplicates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schema.toml");
    fs::write(
        &path,
        r#"
        [[collection]]
        name = "a"
        fields = [{ name = "b", ref = "b", array = true }]

        [[collection]]
        name = "b"
        indexes = [{ field = "loc", kind = "2dsphere" }]
        "#,
    )
    .unwrap();
    let reg = SchemaRegistry::from_file(&path).unwrap();
    assert_eq!(reg.collection_names(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(reg.schema("b").unwrap().find_spatial_field(), Some("loc"));

    let dup = "[[collection]]\nname = \"a\"\n[[collection]]\nname = \"a\"\n";
    assert!(matches!(SchemaRegistry::from_toml_str(dup), Err(ConfigError::DuplicateCollection(_))));
}
