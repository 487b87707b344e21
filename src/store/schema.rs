use serde_json::Value;

use crate::constants::CHARS_PER_TOKEN;

/// Rewrites any `chars` field (in `contributions`, `usage`, or a fulfillment
/// record) to `tokens := round(chars / 4)`, removing the legacy key, applied
/// recursively so it works regardless of where in the document the field sits.
pub fn migrate_chars_to_tokens(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(chars) = map.remove("chars") {
                if !map.contains_key("tokens") {
                    if let Some(chars) = chars.as_f64() {
                        let tokens = (chars / CHARS_PER_TOKEN).round() as i64;
                        map.insert("tokens".to_string(), Value::from(tokens));
                    }
                }
            }
            for v in map.values_mut() {
                migrate_chars_to_tokens(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                migrate_chars_to_tokens(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_nested_chars_field() {
        let mut value = serde_json::json!({
            "contributions": { "chars": 400, "fulfillments": 3 },
            "usage": { "chars": 40 },
        });
        migrate_chars_to_tokens(&mut value);
        assert_eq!(value["contributions"]["tokens"], 100);
        assert!(value["contributions"].get("chars").is_none());
        assert_eq!(value["usage"]["tokens"], 10);
    }

    #[test]
    fn leaves_tokens_untouched_when_already_present() {
        let mut value = serde_json::json!({ "contributions": { "chars": 400, "tokens": 999 } });
        migrate_chars_to_tokens(&mut value);
        assert_eq!(value["contributions"]["tokens"], 999);
    }

    #[test]
    fn converts_chars_inside_arrays() {
        let mut value = serde_json::json!([{ "chars": 80 }, { "chars": 120 }]);
        migrate_chars_to_tokens(&mut value);
        assert_eq!(value[0]["tokens"], 20);
        assert_eq!(value[1]["tokens"], 30);
    }
}
