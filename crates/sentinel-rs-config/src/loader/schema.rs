//! Structural validation of raw JSON5 layers before decoding.
//!
//! Serde would silently ignore typos such as `simlarity_threshold`; this pass
//! rejects unknown keys and wrong value kinds with a dotted path.

use crate::ConfigError;
use serde_json::{Map, Value};

const MEMORY_TYPES: &[&str] = &["FACT", "PREFERENCE", "DECISION"];
const OUTCOMES: &[&str] = &["allow", "block", "flag_review"];
const RULES: &[&str] = &[
    "boundary_rejected",
    "memory_conflict",
    "drift_detected",
    "drift_unmeasurable",
];
const STORE_PROVIDERS: &[&str] = &["file", "memory"];

/// Validate a whole layer (or the merged effective value).
pub(super) fn validate_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(
        map,
        &["$schema", "drift", "policy", "memory", "boundary", "store"],
        layer,
        "",
    )?;
    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("drift") {
        validate_drift(value, layer, "drift")?;
    }
    if let Some(value) = map.get("policy") {
        validate_policy(value, layer, "policy")?;
    }
    if let Some(value) = map.get("memory") {
        validate_memory(value, layer, "memory")?;
    }
    if let Some(value) = map.get("boundary") {
        validate_boundary(value, layer, "boundary")?;
    }
    if let Some(value) = map.get("store") {
        validate_store(value, layer, "store")?;
    }
    Ok(())
}

fn validate_drift(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "similarity_threshold",
            "structural_threshold",
            "embedding_timeout_ms",
        ],
        layer,
        path,
    )?;
    for key in ["similarity_threshold", "structural_threshold"] {
        if let Some(value) = map.get(key) {
            expect_f64(value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("embedding_timeout_ms") {
        expect_u64(value, layer, &join_path(path, "embedding_timeout_ms"))?;
    }
    Ok(())
}

fn validate_policy(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["version", "rules"], layer, path)?;
    if let Some(value) = map.get("version") {
        expect_string(value, layer, &join_path(path, "version"))?;
    }
    if let Some(value) = map.get("rules") {
        let rules_path = join_path(path, "rules");
        for (idx, rule) in expect_array(value, layer, &rules_path)?.iter().enumerate() {
            let rule_path = format!("{rules_path}[{idx}]");
            let rule_map = expect_object(rule, layer, &rule_path)?;
            ensure_allowed_keys(rule_map, &["rule", "outcome"], layer, &rule_path)?;
            expect_required_enum(rule_map, "rule", RULES, layer, &rule_path)?;
            expect_required_enum(rule_map, "outcome", OUTCOMES, layer, &rule_path)?;
        }
    }
    Ok(())
}

fn validate_memory(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["default_allowed_types", "scopes"], layer, path)?;
    if let Some(value) = map.get("default_allowed_types") {
        validate_enum_array(value, MEMORY_TYPES, layer, &join_path(path, "default_allowed_types"))?;
    }
    if let Some(value) = map.get("scopes") {
        let scopes_path = join_path(path, "scopes");
        for (idx, entry) in expect_array(value, layer, &scopes_path)?.iter().enumerate() {
            let entry_path = format!("{scopes_path}[{idx}]");
            let entry_map = expect_object(entry, layer, &entry_path)?;
            ensure_allowed_keys(entry_map, &["pattern", "allowed_types"], layer, &entry_path)?;
            let pattern_path = join_path(&entry_path, "pattern");
            let Some(pattern) = entry_map.get("pattern") else {
                return Err(invalid_field(layer, &pattern_path, "missing required field"));
            };
            expect_string(pattern, layer, &pattern_path)?;
            if let Some(types) = entry_map.get("allowed_types") {
                validate_enum_array(
                    types,
                    MEMORY_TYPES,
                    layer,
                    &join_path(&entry_path, "allowed_types"),
                )?;
            }
        }
    }
    Ok(())
}

fn validate_boundary(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["registrations"], layer, path)?;
    let Some(value) = map.get("registrations") else {
        return Ok(());
    };
    let list_path = join_path(path, "registrations");
    for (idx, entry) in expect_array(value, layer, &list_path)?.iter().enumerate() {
        let entry_path = format!("{list_path}[{idx}]");
        let entry_map = expect_object(entry, layer, &entry_path)?;
        ensure_allowed_keys(
            entry_map,
            &["user_id", "scope", "sessions", "active"],
            layer,
            &entry_path,
        )?;
        for key in ["user_id", "scope"] {
            let field_path = join_path(&entry_path, key);
            let Some(value) = entry_map.get(key) else {
                return Err(invalid_field(layer, &field_path, "missing required field"));
            };
            expect_string(value, layer, &field_path)?;
        }
        if let Some(value) = entry_map.get("sessions") {
            validate_string_array(value, layer, &join_path(&entry_path, "sessions"))?;
        }
        if let Some(value) = entry_map.get("active") {
            expect_bool(value, layer, &join_path(&entry_path, "active"))?;
        }
    }
    Ok(())
}

fn validate_store(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["provider", "path"], layer, path)?;
    if let Some(value) = map.get("provider") {
        expect_enum(value, STORE_PROVIDERS, layer, &join_path(path, "provider"))?;
    }
    if let Some(value) = map.get("path") {
        expect_string(value, layer, &join_path(path, "path"))?;
    }
    Ok(())
}

fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    value
        .as_object()
        .ok_or_else(|| invalid_field(layer, path, "expected object"))
}

fn expect_array<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Vec<Value>, ConfigError> {
    value
        .as_array()
        .ok_or_else(|| invalid_field(layer, path, "expected array"))
}

fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    match value {
        Value::String(_) => Ok(()),
        _ => Err(invalid_field(layer, path, "expected string")),
    }
}

fn expect_bool(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    match value {
        Value::Bool(_) => Ok(()),
        _ => Err(invalid_field(layer, path, "expected bool")),
    }
}

fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected non-negative integer"))
    }
}

fn expect_f64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_number() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected number"))
    }
}

fn expect_enum(value: &Value, allowed: &[&str], layer: &str, path: &str) -> Result<(), ConfigError> {
    match value.as_str() {
        Some(name) if allowed.contains(&name) => Ok(()),
        Some(name) => Err(invalid_field(
            layer,
            path,
            &format!("unknown value {name:?}, expected one of {}", allowed.join(", ")),
        )),
        None => Err(invalid_field(layer, path, "expected string")),
    }
}

fn expect_required_enum(
    map: &Map<String, Value>,
    key: &str,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let field_path = join_path(path, key);
    match map.get(key) {
        Some(value) => expect_enum(value, allowed, layer, &field_path),
        None => Err(invalid_field(layer, &field_path, "missing required field")),
    }
}

fn validate_enum_array(
    value: &Value,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for (idx, entry) in expect_array(value, layer, path)?.iter().enumerate() {
        expect_enum(entry, allowed, layer, &format!("{path}[{idx}]"))?;
    }
    Ok(())
}

fn validate_string_array(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    for (idx, entry) in expect_array(value, layer, path)?.iter().enumerate() {
        expect_string(entry, layer, &format!("{path}[{idx}]"))?;
    }
    Ok(())
}

fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(invalid_field(layer, &join_path(path, key), "unknown key")),
        None => Ok(()),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{path}"),
        message: message.to_string(),
    }
}
