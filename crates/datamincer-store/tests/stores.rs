use std::path::PathBuf;

use datamincer_store::{CACHE_INDEX, Cache, DEFAULT_BIN, STATE_FILE, State, content_id};
use serde_json::json;

fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("datamincer_{label}_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn state_persists_across_reopen() {
    let dir = temp_dir("state");
    let mut state = State::open(&dir).expect("open state");
    assert!(state.get("orders", "next").is_none());

    state.set("orders", "next", json!(42)).expect("set state");
    assert!(dir.join(STATE_FILE).exists());

    let reopened = State::open(&dir).expect("reopen state");
    assert_eq!(reopened.get("orders", "next"), Some(&json!(42)));
    assert!(reopened.get("orders", "missing").is_none());
    assert!(reopened.get("customers", "next").is_none());
}

#[test]
fn state_file_keeps_collection_layout() {
    let dir = temp_dir("state_layout");
    let mut state = State::open(&dir).expect("open state");
    state.set("a", "x", json!("one")).expect("set");
    state.set("b", "y", json!({"nested": [1, 2]})).expect("set");

    let raw = std::fs::read_to_string(dir.join(STATE_FILE)).expect("read state file");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse state file");
    assert_eq!(parsed, json!({"a": {"x": "one"}, "b": {"y": {"nested": [1, 2]}}}));
}

#[test]
fn cache_round_trips_nested_data() {
    let dir = temp_dir("cache");
    let mut cache = Cache::new(&dir);
    let value = json!({"rows": [{"id": 1, "tags": ["a", "b"]}], "meta": {"count": 1}});

    assert!(!cache.exists("report", DEFAULT_BIN).expect("exists"));
    assert!(cache.get_data("report", DEFAULT_BIN).expect("get").is_none());

    cache.set_data("report", &value, DEFAULT_BIN).expect("set data");
    assert!(cache.exists("report", DEFAULT_BIN).expect("exists"));
    assert_eq!(cache.get_data("report", DEFAULT_BIN).expect("get"), Some(value.clone()));
    assert!(cache.last_write("report", DEFAULT_BIN).expect("last write").is_some());

    let bin_dir = dir.join(DEFAULT_BIN);
    assert!(bin_dir.join(content_id("report")).exists());
    assert!(bin_dir.join(CACHE_INDEX).exists());

    let mut reopened = Cache::new(&dir);
    assert_eq!(reopened.get_data("report", DEFAULT_BIN).expect("get"), Some(value));
}

#[test]
fn cache_bins_are_isolated() {
    let dir = temp_dir("cache_bins");
    let mut cache = Cache::new(&dir);
    cache.set_data("key", &json!(1), "left").expect("set data");
    assert!(cache.exists("key", "left").expect("exists"));
    assert!(!cache.exists("key", "right").expect("exists"));
}

#[test]
fn cache_stores_files() {
    let dir = temp_dir("cache_files");
    let source = dir.join("source.txt");
    std::fs::write(&source, "payload").expect("write source");

    let mut cache = Cache::new(dir.join("cache"));
    assert!(cache.get_file("asset", DEFAULT_BIN).expect("get file").is_none());
    let stored = cache.set_file("asset", &source, DEFAULT_BIN).expect("set file");
    assert_eq!(cache.get_file("asset", DEFAULT_BIN).expect("get file"), Some(stored.clone()));
    assert_eq!(std::fs::read_to_string(stored).expect("read cached"), "payload");
}
