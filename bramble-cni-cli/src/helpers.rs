use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use serde_json::Value;

pub(crate) fn run(file: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    println!("{}", expand_nested_json(&raw));
    Ok(())
}

/// Expands JSON fragments embedded in a diagnostic buffer. Fragments may
/// follow a `key:` or `key=` prefix, carry escaped quotes, or hide
/// inside JSON string values; string values that parse as JSON are
/// expanded recursively. Input without a parseable fragment is returned
/// unchanged, and malformed input is never an error.
pub(crate) fn expand_nested_json(input: &str) -> String {
    expand_fragment(input).unwrap_or_else(|| input.to_string())
}

fn expand_fragment(input: &str) -> Option<String> {
    let start = input.find(['{', '['])?;
    let (prefix, fragment) = input.split_at(start);
    let value = parse_lenient(fragment)?;
    let value = expand_value(value);
    let pretty = serde_json::to_string_pretty(&value).ok()?;
    Some(format!("{prefix}{pretty}"))
}

fn parse_lenient(fragment: &str) -> Option<Value> {
    serde_json::from_str(fragment)
        .ok()
        .or_else(|| serde_json::from_str(&unescape(fragment)).ok())
}

fn unescape(fragment: &str) -> String {
    fragment.replace("\\\"", "\"").replace("\\n", "\n")
}

fn expand_value(value: Value) -> Value {
    match value {
        Value::String(s) => expand_string(s),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, expand_value(value)))
                .collect(),
        ),
        other => other,
    }
}

/// A string value that contains a JSON object or array is replaced by
/// the parsed value; with a non-JSON prefix the expansion stays inside
/// the string.
fn expand_string(s: String) -> Value {
    let Some(start) = s.find(['{', '[']) else {
        return Value::String(s);
    };
    let (prefix, fragment) = s.split_at(start);
    let Some(value) = parse_lenient(fragment) else {
        return Value::String(s);
    };
    if !value.is_object() && !value.is_array() {
        return Value::String(s);
    }
    let value = expand_value(value);
    if prefix.is_empty() {
        value
    } else {
        match serde_json::to_string_pretty(&value) {
            Ok(pretty) => Value::String(format!("{prefix}{pretty}")),
            Err(_) => Value::String(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::expand_nested_json;

    #[test]
    fn returns_non_json_input_unchanged() {
        assert_eq!(expand_nested_json("not json at all"), "not json at all");
        assert_eq!(expand_nested_json("{not json}"), "{not json}");
        assert_eq!(expand_nested_json(""), "");
    }

    #[test]
    fn expands_escaped_json() {
        let expanded = expand_nested_json(r#"{\n\"escapedJson\": \"foo\"}"#);
        assert!(expanded.contains(r#""escapedJson": "foo""#));
        assert!(!expanded.contains('\\'));
    }

    #[test]
    fn keeps_key_prefixes() {
        let expanded = expand_nested_json(r#"nonjson={\n\"escapedJson\": \"foo\"}"#);
        assert!(expanded.starts_with("nonjson="));
        assert!(expanded.contains(r#""escapedJson": "foo""#));

        let expanded = expand_nested_json(r#"nonjson:morenonjson={\n\"escapedJson\": \"foo\"}"#);
        assert!(expanded.starts_with("nonjson:morenonjson="));
        assert!(expanded.contains(r#""escapedJson": "foo""#));
    }

    #[test]
    fn expands_json_hidden_in_string_values() {
        let input = r#"{"foo": ["{\n  \"port\": 8080,\n  \"protocol\": \"TCP\"\n}"]}"#;
        let expanded = expand_nested_json(input);
        assert!(expanded.contains(r#""port": 8080"#));
        assert!(expanded.contains(r#""protocol": "TCP""#));
        assert!(!expanded.contains("\\\""));
    }

    #[test]
    fn expands_prefixed_json_inside_string_values() {
        let input = "\"foo\": [\n  \"bar:baz/alice={\\\"bob\\\":{\\\"charlie\\\":4}}\\n\"\n]";
        let expanded = expand_nested_json(input);
        assert!(expanded.contains("bar:baz/alice="));
        assert!(expanded.contains("charlie"));
    }

    #[test]
    fn plain_json_is_pretty_printed() {
        let expanded = expand_nested_json(r#"{"a":1}"#);
        assert_eq!(expanded, "{\n  \"a\": 1\n}");
    }
}
