//! `npm ls -a --json` output.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::LocalDependencies;
use crate::error::{Result, XfiError};

#[derive(Debug, Deserialize)]
struct NpmNode {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, NpmNode>,
}

/// Parse the JSON tree npm prints. The root package itself is dropped;
/// its dependencies become the top level.
pub fn parse(output: &str) -> Result<Vec<LocalDependencies>> {
    let root: NpmNode = serde_json::from_str(output).map_err(|e| {
        XfiError::DependencyResolution(format!("unreadable npm ls output: {}", e))
    })?;
    Ok(convert(root.dependencies))
}

fn convert(children: BTreeMap<String, NpmNode>) -> Vec<LocalDependencies> {
    children
        .into_iter()
        .map(|(name, node)| LocalDependencies {
            name,
            // deduped and missing entries carry no version
            version: node.version.unwrap_or_default(),
            dependencies: convert(node.dependencies),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_tree() {
        let output = r#"{
            "name": "web-app",
            "version": "1.0.0",
            "dependencies": {
                "react": {
                    "version": "18.2.0",
                    "dependencies": {
                        "loose-envify": {"version": "1.4.0"}
                    }
                },
                "@types/node": {"version": "20.1.0"}
            }
        }"#;

        let deps = parse(output).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "@types/node");
        assert_eq!(deps[1].name, "react");
        assert_eq!(deps[1].dependencies[0].name, "loose-envify");
        assert_eq!(deps[1].dependencies[0].version, "1.4.0");
    }

    #[test]
    fn test_parse_without_dependencies() {
        let deps = parse(r#"{"name": "empty", "version": "0.1.0"}"#).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse("npm ERR! missing script").unwrap_err();
        assert!(matches!(err, XfiError::DependencyResolution(_)));
    }
}
