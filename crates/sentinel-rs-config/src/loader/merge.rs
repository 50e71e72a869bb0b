//! Deep merge of JSON layers.

use serde_json::Value;

/// Merge `overlay` into `base`. Objects merge key by key; anything else,
/// arrays included, is replaced wholesale.
pub(super) fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
