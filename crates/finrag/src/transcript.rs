//! Append-only JSON log of agent exchanges.

use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde_json::{json, Value};

/// Serialises read-modify-write cycles within the process.
static APPEND_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Append `items` to the JSON array stored at `path`.
///
/// A missing or unreadable file, or one that does not hold an array, is
/// treated as empty. Non-object items are wrapped as `{"value": item}`;
/// objects without a `"timestamp"` get one in the given UTC offset.
///
/// Appends are serialised and the file is replaced by rename, so a reader
/// never observes a half-written array. This does blocking I/O; async
/// callers should go through `spawn_blocking`.
pub fn append_to_response(items: Vec<Value>, path: &Path, utc_offset_minutes: i32) -> Result<()> {
    let _guard = APPEND_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut log = read_log(path);
    let now = timestamp(utc_offset_minutes);

    for item in items {
        let mut entry = match item {
            Value::Object(_) => item,
            other => json!({ "value": other }),
        };
        if let Some(obj) = entry.as_object_mut() {
            obj.entry("timestamp").or_insert_with(|| Value::String(now.clone()));
        }
        log.push(entry);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(&Value::Array(log))?;
    let tmp = staging_path(path);
    std::fs::write(&tmp, body)
        .with_context(|| format!("Failed to write transcript: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace transcript: {}", path.display()))?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

fn read_log(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str::<Value>(&s).ok())
        .and_then(|v| match v {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default()
}

fn timestamp(utc_offset_minutes: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or(Utc.fix());
    Utc::now().with_timezone(&offset).to_rfc3339()
}
