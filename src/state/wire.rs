//! Projects the typed `task_counters` map onto the flat wire shape the state
//! document contract (spec §3/§9) describes — `retry_count_<id>`,
//! `last_error_<id>`, `repeated_error_count_<id>`,
//! `interrogation_performed_<id>_attempt_<n>` — and back.
//!
//! This is the only place that flat shape should ever be constructed or
//! parsed; everywhere else in the crate works against the typed
//! `HashMap<TaskId, TaskCounters>`.

use super::{SupervisorState, TaskCounters};
use anyhow::{Context, Result};
use serde_json::{Map, Value};

const RETRY_PREFIX: &str = "retry_count_";
const LAST_ERROR_PREFIX: &str = "last_error_";
const REPEATED_ERROR_PREFIX: &str = "repeated_error_count_";
const INTERROGATION_INFIX: &str = "_attempt_";
const INTERROGATION_PREFIX: &str = "interrogation_performed_";

pub fn to_wire_json(state: &SupervisorState) -> Result<Value> {
    let mut value = serde_json::to_value(state).context("serializing SupervisorState")?;
    let obj = value
        .as_object_mut()
        .context("SupervisorState did not serialize to a JSON object")?;

    obj.remove("task_counters");
    for (task_id, counters) in &state.task_counters {
        obj.insert(
            format!("{RETRY_PREFIX}{task_id}"),
            Value::from(counters.retry_count),
        );
        if let Some(err) = &counters.last_error {
            obj.insert(format!("{LAST_ERROR_PREFIX}{task_id}"), Value::from(err.clone()));
        }
        obj.insert(
            format!("{REPEATED_ERROR_PREFIX}{task_id}"),
            Value::from(counters.repeated_error_count),
        );
        for attempt in &counters.interrogations_performed {
            obj.insert(
                format!("{INTERROGATION_PREFIX}{task_id}{INTERROGATION_INFIX}{attempt}"),
                Value::from(true),
            );
        }
    }

    Ok(value)
}

pub fn from_wire_json(mut value: Value) -> Result<SupervisorState> {
    let obj = value
        .as_object_mut()
        .context("state document is not a JSON object")?;

    let mut counters_map: std::collections::HashMap<String, TaskCounters> =
        std::collections::HashMap::new();
    let keys: Vec<String> = obj.keys().cloned().collect();

    for key in keys {
        if let Some(task_id) = key.strip_prefix(RETRY_PREFIX) {
            let n = obj.remove(&key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            counters_map.entry(task_id.to_string()).or_default().retry_count = n;
        } else if let Some(task_id) = key.strip_prefix(LAST_ERROR_PREFIX) {
            let s = obj
                .remove(&key)
                .and_then(|v| v.as_str().map(|s| s.to_string()));
            counters_map.entry(task_id.to_string()).or_default().last_error = s;
        } else if let Some(task_id) = key.strip_prefix(REPEATED_ERROR_PREFIX) {
            let n = obj.remove(&key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            counters_map
                .entry(task_id.to_string())
                .or_default()
                .repeated_error_count = n;
        } else if let Some(rest) = key.strip_prefix(INTERROGATION_PREFIX) {
            if let Some((task_id, attempt_str)) = rest.split_once(INTERROGATION_INFIX) {
                if let Ok(attempt) = attempt_str.parse::<u32>() {
                    obj.remove(&key);
                    counters_map
                        .entry(task_id.to_string())
                        .or_default()
                        .interrogations_performed
                        .insert(attempt);
                }
            }
        }
    }

    obj.insert(
        "task_counters".to_string(),
        serde_json::to_value(&counters_map)?,
    );

    // Ensure the `extra` bucket doesn't also catch these (it would not, since
    // they're consumed above, but guard against an empty object panicking).
    if obj.get("extra").is_none() {
        obj.insert("extra".to_string(), Value::Object(Map::new()));
    }

    serde_json::from_value(value).context("parsing SupervisorState from wire document")
}
