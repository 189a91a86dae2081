//! Convenience TOML loader for `iron-node`: reads a TOML file and
//! flattens its tables into the dotted-key `BTreeMap<String, String>` the
//! core's configuration structs expect (spec.md §6, "no disk state" for
//! anything but configuration).

use crate::error::{IronError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use toml::Value;

/// Read `path` as TOML and flatten it into a dotted-key string map, e.g.
/// `[bpf]\npool_capacity = 4096` becomes `"bpf.pool_capacity" => "4096"`.
pub fn load_from_path(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path)?;
    parse_toml_str(&text)
}

pub fn parse_toml_str(text: &str) -> Result<BTreeMap<String, String>> {
    let value: Value = text
        .parse()
        .map_err(|e| IronError::Config(format!("invalid TOML: {e}")))?;
    let mut out = BTreeMap::new();
    flatten(&value, "", &mut out);
    Ok(out)
}

fn flatten(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Table(table) => {
            for (k, v) in table {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(v, &key, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Integer(i) => {
            out.insert(prefix.to_string(), i.to_string());
        }
        Value::Float(f) => {
            out.insert(prefix.to_string(), f.to_string());
        }
        Value::Boolean(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Datetime(d) => {
            out.insert(prefix.to_string(), d.to_string());
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(value_to_plain_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
    }
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Reject a configuration map that is structurally nonsensical before it
/// reaches the typed parsers (e.g. an empty bin map would make the node
/// unable to forward anything).
pub fn validate_config(map: &BTreeMap<String, String>) -> Result<()> {
    if map.is_empty() {
        return Err(IronError::Config("configuration map is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_tables_into_dotted_keys() {
        let toml = r#"
            [bpf]
            pool_capacity = 4096

            [osc]
            sample_size = 1024
        "#;
        let map = parse_toml_str(toml).unwrap();
        assert_eq!(map.get("bpf.pool_capacity").map(String::as_str), Some("4096"));
        assert_eq!(map.get("osc.sample_size").map(String::as_str), Some("1024"));
    }

    #[test]
    fn rejects_empty_map() {
        assert!(validate_config(&BTreeMap::new()).is_err());
    }
}
