//! Data file parsing.
//!
//! Every leaf node defines one variable. Child blocks nest with dots:
//!
//! ```kdl
//! mission {
//!     name "Alpha"
//!     version 3
//! }
//! ```
//!
//! defines `mission.name = "Alpha"` and `mission.version = "3"`.

use kdl::{KdlDocument, KdlNode};
use std::collections::HashMap;

use crate::nodes::get_first_scalar_arg;
use crate::{ConfigError, ConfigResult};

/// Parse a data file into a flat map of dotted variable names.
pub fn parse_data(kdl: &str) -> ConfigResult<HashMap<String, String>> {
    let doc: KdlDocument = kdl.parse()?;
    let mut vars = HashMap::new();
    flatten(&doc, "", &mut vars)?;
    Ok(vars)
}

fn flatten(doc: &KdlDocument, prefix: &str, vars: &mut HashMap<String, String>) -> ConfigResult<()> {
    for node in doc.nodes() {
        let key = if prefix.is_empty() {
            node.name().value().to_string()
        } else {
            format!("{}.{}", prefix, node.name().value())
        };
        define(node, key, vars)?;
    }
    Ok(())
}

fn define(node: &KdlNode, key: String, vars: &mut HashMap<String, String>) -> ConfigResult<()> {
    let has_args = node.entries().iter().any(|e| e.name().is_none());

    if has_args {
        let value = get_first_scalar_arg(node).ok_or_else(|| ConfigError::InvalidValue {
            field: key.clone(),
            message: "null is not a value".to_string(),
        })?;
        if vars.insert(key.clone(), value).is_some() {
            return Err(ConfigError::Duplicate(format!("variable '{}'", key)));
        }
    }

    match node.children() {
        Some(children) => flatten(children, &key, vars),
        None if has_args => Ok(()),
        None => Err(ConfigError::MissingField(format!("value for '{}'", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_values() {
        let vars = parse_data(
            r#"
            title "Operation Alpha"
            players 12
            ratio 0.5
            night #true
            "#,
        )
        .unwrap();
        assert_eq!(vars["title"], "Operation Alpha");
        assert_eq!(vars["players"], "12");
        assert_eq!(vars["ratio"], "0.5");
        assert_eq!(vars["night"], "true");
    }

    #[test]
    fn test_nested_blocks_use_dots() {
        let vars = parse_data(
            r#"
            mission {
                name "alpha"
                map {
                    terrain "altis"
                }
            }
            "#,
        )
        .unwrap();
        assert_eq!(vars["mission.name"], "alpha");
        assert_eq!(vars["mission.map.terrain"], "altis");
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let err = parse_data("name \"a\"\nname \"b\"").unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_empty_node_rejected() {
        let err = parse_data("orphan").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn test_null_rejected() {
        assert!(parse_data("name #null").is_err());
    }

    #[test]
    fn test_invalid_kdl() {
        let err = parse_data("name \"unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
