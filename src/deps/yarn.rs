//! `yarn list --json` output.
//!
//! Yarn prints one JSON object per line. The dependency tree is the line
//! whose `type` is `"tree"`; every other line is progress or info noise.

use serde::Deserialize;

use super::LocalDependencies;
use crate::error::{Result, XfiError};

#[derive(Debug, Deserialize)]
struct Line {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<TreeData>,
}

#[derive(Debug, Deserialize)]
struct TreeData {
    #[serde(default)]
    trees: Vec<YarnNode>,
}

#[derive(Debug, Deserialize)]
struct YarnNode {
    name: String,
    #[serde(default)]
    children: Vec<YarnNode>,
}

pub fn parse(output: &str) -> Result<Vec<LocalDependencies>> {
    for raw in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(line) = serde_json::from_str::<Line>(raw) else {
            continue;
        };
        if line.kind != "tree" {
            continue;
        }
        let trees = line.data.map(|d| d.trees).unwrap_or_default();
        return Ok(trees.into_iter().map(convert).collect());
    }

    Err(XfiError::DependencyResolution(
        "yarn list output contained no dependency tree".to_string(),
    ))
}

fn convert(node: YarnNode) -> LocalDependencies {
    let (name, version) = split_name(&node.name);
    LocalDependencies {
        name,
        version,
        dependencies: node.children.into_iter().map(convert).collect(),
    }
}

/// Split `name@version`, keeping a leading scope `@` with the name.
pub(crate) fn split_name(qualified: &str) -> (String, String) {
    match qualified.rfind('@') {
        Some(idx) if idx > 0 => (
            qualified[..idx].to_string(),
            qualified[idx + 1..].to_string(),
        ),
        _ => (qualified.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("react@18.2.0"),
            ("react".to_string(), "18.2.0".to_string())
        );
        assert_eq!(
            split_name("@babel/core@7.22.5"),
            ("@babel/core".to_string(), "7.22.5".to_string())
        );
        assert_eq!(split_name("@scope/bare"), ("@scope/bare".to_string(), String::new()));
    }

    #[test]
    fn test_parse_skips_noise_lines() {
        let output = concat!(
            "{\"type\":\"info\",\"data\":\"fetching\"}\n",
            "not json at all\n",
            "{\"type\":\"tree\",\"data\":{\"type\":\"list\",\"trees\":[",
            "{\"name\":\"react@18.2.0\",\"children\":[{\"name\":\"loose-envify@1.4.0\",\"color\":\"dim\",\"shadow\":true}]},",
            "{\"name\":\"@babel/core@7.22.5\",\"children\":[]}",
            "]}}\n"
        );

        let deps = parse(output).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "react");
        assert_eq!(deps[0].dependencies[0].name, "loose-envify");
        assert_eq!(deps[1].name, "@babel/core");
        assert_eq!(deps[1].version, "7.22.5");
    }

    #[test]
    fn test_parse_without_tree_line_fails() {
        let err = parse("{\"type\":\"warning\",\"data\":\"x\"}").unwrap_err();
        assert!(matches!(err, XfiError::DependencyResolution(_)));
    }
}
