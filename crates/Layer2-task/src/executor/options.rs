//! Processing options
//!
//! 우선순위: 작업 옵션 > 설정 파일 기본값 > 내장 기본값.
//! `true` 는 플래그만, `false`/`null` 은 생략, 나머지는 `--key value`.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Built-in defaults for drone imagery
pub fn default_options() -> Map<String, Value> {
    let defaults = json!({
        "dem": true,
        "orthophoto": true,
        "dsm": true,
        "dtm": true,
        "mesh-octree-depth": 11,
        "mesh-size": 200000,
        "orthophoto-resolution": 5,
        "dem-resolution": 5,
        "feature-quality": "high",
        "pc-quality": "high",
        "texturing-data-term": "area",
        "auto-boundary": true,
        "max-concurrency": "auto",
        "rerun-all": false,
        "fast-orthophoto": false,
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Layer overrides over the built-in defaults, sorted by key
pub fn merge_options(
    configured: &Map<String, Value>,
    task: &Map<String, Value>,
) -> BTreeMap<String, Value> {
    let mut merged: BTreeMap<String, Value> = default_options().into_iter().collect();
    for (key, value) in configured.iter().chain(task.iter()) {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Render options as command-line arguments
pub fn render_options(options: &BTreeMap<String, Value>) -> Vec<String> {
    let mut args = Vec::with_capacity(options.len() * 2);
    for (key, value) in options {
        match value {
            Value::Bool(true) => args.push(format!("--{}", key)),
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => {
                args.push(format!("--{}", key));
                args.push(s.clone());
            }
            other => {
                args.push(format!("--{}", key));
                args.push(other.to_string());
            }
        }
    }
    args
}

/// Full argument list after the tool path
pub fn build_command_args(
    project_name: &str,
    input: &Path,
    output: &Path,
    temp: &Path,
    options: &BTreeMap<String, Value>,
) -> Vec<String> {
    let mut args = vec![
        "process".to_string(),
        "--project".to_string(),
        project_name.to_string(),
        "--images".to_string(),
        input.display().to_string(),
        "--output".to_string(),
        output.display().to_string(),
        "--temp".to_string(),
        temp.display().to_string(),
    ];
    args.extend(render_options(options));
    args
}
