//! Configuration discovery and graceful degradation
//!
//! Tests that manipulate FLORA_* environment variables are marked #[serial]
//! so they run sequentially, not in parallel.

use flora_common::config::{
    ensure_root_folder, load_toml_or_default, locate_config_file, resolve_root_folder,
    LoggingConfig,
};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
struct ServiceToml {
    root_folder: Option<PathBuf>,
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_env_var_beats_toml_value() {
    env::set_var("FLORA_TEST_ROOT_FOLDER", "/tmp/from-env");

    let root = resolve_root_folder(
        None,
        "FLORA_TEST_ROOT_FOLDER",
        Some(Path::new("/tmp/from-toml")),
    );
    assert_eq!(root, PathBuf::from("/tmp/from-env"));

    env::remove_var("FLORA_TEST_ROOT_FOLDER");
}

#[test]
#[serial]
fn test_default_root_folder_when_nothing_configured() {
    env::remove_var("FLORA_TEST_ROOT_FOLDER");

    let root = resolve_root_folder(None, "FLORA_TEST_ROOT_FOLDER", None);
    assert!(root.to_string_lossy().contains("flora"));
}

#[test]
#[serial]
fn test_config_file_from_env_var() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flora-id.toml");
    std::fs::write(&path, "root_folder = \"/srv/flora\"\n[logging]\nlevel = \"debug\"\n").unwrap();

    env::set_var("FLORA_TEST_CONFIG", &path);
    let located = locate_config_file(None, "FLORA_TEST_CONFIG", "flora-id.toml");
    env::remove_var("FLORA_TEST_CONFIG");

    assert_eq!(located.as_deref(), Some(path.as_path()));

    let loaded: ServiceToml = load_toml_or_default(located.as_deref()).unwrap();
    assert_eq!(loaded.root_folder, Some(PathBuf::from("/srv/flora")));
    assert_eq!(loaded.logging.level, "debug");
}

#[test]
fn test_broken_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "root_folder = [unterminated").unwrap();

    let result: flora_common::Result<ServiceToml> = load_toml_or_default(Some(&path));
    assert!(matches!(result, Err(flora_common::Error::Config(_))));
}

#[test]
fn test_ensure_root_folder_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("flora");

    let db_path = ensure_root_folder(&root, "flora.db").unwrap();
    assert!(root.is_dir());
    assert_eq!(db_path, root.join("flora.db"));
}
