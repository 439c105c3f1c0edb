//! Renders a JSON-shaped tree as HCL attribute syntax.

use std::fmt::Write as _;

use serde_json::{Map, Value};

use crate::hcl_reader::decode_hcl_body;

const INDENT_UNIT: &str = "  ";

fn indent_for(level: usize) -> String {
    INDENT_UNIT.repeat(level)
}

/// Encodes every entry of `body` as an HCL attribute at `indent` levels.
///
/// Maps become `key = { ... }`, lists become `key = [ ... ]` with one item per
/// line, and scalars are rendered as HCL literals. The output always ends with a
/// newline when `body` is non-empty.
pub fn encode_hcl_body(body: &Map<String, Value>, indent: usize) -> String {
    let mut out = String::new();
    for (key, value) in body {
        encode_attribute(&mut out, key, value, indent);
    }
    out
}

fn encode_attribute(out: &mut String, key: &str, value: &Value, indent: usize) {
    let pad = indent_for(indent);
    let key = render_hcl_key(key);
    match value {
        Value::Object(map) => {
            let _ = writeln!(out, "{pad}{key} = {{");
            out.push_str(&encode_hcl_body(map, indent + 1));
            let _ = writeln!(out, "{pad}}}");
        }
        Value::Array(items) => {
            let _ = writeln!(out, "{pad}{key} = [");
            for item in items {
                match item {
                    Value::Object(map) => {
                        let _ = writeln!(out, "{pad}{INDENT_UNIT}{{");
                        out.push_str(&encode_hcl_body(map, indent + 2));
                        let _ = writeln!(out, "{pad}{INDENT_UNIT}}},");
                    }
                    other => {
                        let _ = writeln!(out, "{pad}{INDENT_UNIT}{},", render_inline_value(other));
                    }
                }
            }
            let _ = writeln!(out, "{pad}]");
        }
        scalar => {
            let _ = writeln!(out, "{pad}{key} = {}", render_inline_value(scalar));
        }
    }
}

/// Renders a value on a single line. Used for scalars and for list items that
/// are not maps (nested lists render as `[a, b]`).
fn render_inline_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => bare_template_expression(text)
            .map(str::to_string)
            .unwrap_or_else(|| render_hcl_string(text)),
        Value::Array(items) => {
            let rendered = items
                .iter()
                .map(render_inline_value)
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{rendered}]")
        }
        Value::Object(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let rendered = map
                .iter()
                .map(|(key, value)| format!("{} = {}", render_hcl_key(key), render_inline_value(value)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {rendered} }}")
        }
    }
}

/// Returns the inner expression of a string that is one `${...}` template
/// spanning the whole value, provided the reader turns that bare expression
/// back into the same string. Such values are written unquoted.
fn bare_template_expression(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("${")?.strip_suffix('}')?;
    if inner.is_empty() || inner.trim() != inner {
        return None;
    }
    let decoded = decode_hcl_body(&format!("value = {inner}\n")).ok()?;
    (decoded.len() == 1 && decoded.get("value").and_then(Value::as_str) == Some(text)).then_some(inner)
}

/// Keys that are valid HCL identifiers stay bare, everything else is quoted.
pub fn render_hcl_key(key: &str) -> String {
    if is_hcl_identifier(key) {
        key.to_string()
    } else {
        render_hcl_string(key)
    }
}

pub(crate) fn is_hcl_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if matches!(raw, "true" | "false" | "null") {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

/// Quotes `text` as an HCL string literal.
///
/// Backslash and quote are escaped and control characters use `\n`/`\r`/`\t`
/// or `\uXXXX`. Interpolation sequences are written through unchanged so
/// existing `${...}` references survive a rewrite.
pub fn render_hcl_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_control() => {
                let _ = write!(out, "\\u{:04x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{encode_hcl_body, render_hcl_key, render_hcl_string};

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().expect("object fixture")
    }

    #[test]
    fn unit_encode_renders_scalars_with_literal_forms() {
        let body = object(json!({
            "name": "prod",
            "nodes": 3,
            "ratio": 0.5,
            "enabled": true,
            "region": null,
        }));
        assert_eq!(
            encode_hcl_body(&body, 0),
            "name = \"prod\"\nnodes = 3\nratio = 0.5\nenabled = true\nregion = null\n"
        );
    }

    #[test]
    fn unit_encode_nests_maps_and_lists_with_two_space_indent() {
        let body = object(json!({
            "prod": {
                "workers": 3,
                "pools": [
                    {"name": "gpu", "size": 2},
                    "spot"
                ]
            }
        }));
        let expected = concat!(
            "  prod = {\n",
            "    workers = 3\n",
            "    pools = [\n",
            "      {\n",
            "        name = \"gpu\"\n",
            "        size = 2\n",
            "      },\n",
            "      \"spot\",\n",
            "    ]\n",
            "  }\n",
        );
        assert_eq!(encode_hcl_body(&body, 1), expected);
    }

    #[test]
    fn unit_encode_keeps_fractional_numbers_fractional() {
        let body = object(json!({"whole": 2, "fraction": 2.0, "negative": -7}));
        assert_eq!(
            encode_hcl_body(&body, 0),
            "whole = 2\nfraction = 2.0\nnegative = -7\n"
        );
    }

    #[test]
    fn unit_render_hcl_string_escapes_quotes_and_backslashes() {
        assert_eq!(render_hcl_string(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(render_hcl_string("line\nnext\ttab"), r#""line\nnext\ttab""#);
        assert_eq!(render_hcl_string("${var.prefix}-prod"), r#""${var.prefix}-prod""#);
        assert_eq!(render_hcl_string("bell\u{7}"), r#""bell\u0007""#);
    }

    #[test]
    fn regression_encode_writes_whole_template_strings_as_bare_expressions() {
        let body = object(json!({
            "name": "${format(\"%s-dev\", \"x\")}",
            "zones": ["${var.zone}", "${a}-${b}", "${ spaced }"],
            "literal": "${[1]}",
        }));
        assert_eq!(
            encode_hcl_body(&body, 0),
            concat!(
                "name = format(\"%s-dev\", \"x\")\n",
                "zones = [\n",
                "  var.zone,\n",
                "  \"${a}-${b}\",\n",
                "  \"${ spaced }\",\n",
                "]\n",
                "literal = \"${[1]}\"\n",
            )
        );
    }

    #[test]
    fn unit_render_hcl_key_quotes_non_identifiers() {
        assert_eq!(render_hcl_key("node_pool-a"), "node_pool-a");
        assert_eq!(render_hcl_key("kubernetes.io/role"), "\"kubernetes.io/role\"");
        assert_eq!(render_hcl_key("1st"), "\"1st\"");
        assert_eq!(render_hcl_key("true"), "\"true\"");
        assert_eq!(render_hcl_key(""), "\"\"");
    }

    #[test]
    fn unit_encode_renders_nested_lists_inline() {
        let body = object(json!({"matrix": [[1, 2], [], {}]}));
        assert_eq!(
            encode_hcl_body(&body, 0),
            "matrix = [\n  [1, 2],\n  [],\n  {\n  },\n]\n"
        );
    }
}
