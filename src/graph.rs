//! Immutable text description of the engine's node graph.
//!
//! The text is handed to the engine as-is. Only a shallow scan is done here:
//! brace balance, the `calculator: "..."` names of the nodes, and the stream
//! wired into a flow limiter's `FINISHED` back edge.

use std::{fs, path::Path, sync::Arc};

use crate::error::GraphLoadError;

const FLOW_LIMITER: &str = "FlowLimiterCalculator";
const FINISHED_TAG: &str = "FINISHED:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphDescription {
    text: Arc<str>,
}

impl GraphDescription {
    pub fn new(text: impl Into<String>) -> Result<Self, GraphLoadError> {
        let text: String = text.into();
        if text.trim().is_empty() {
            return Err(GraphLoadError::Empty);
        }
        check_balanced(&text)?;

        let description = Self {
            text: Arc::from(text),
        };
        if description.calculators().is_empty() {
            return Err(GraphLoadError::NoNodes);
        }
        Ok(description)
    }

    pub fn from_file(path: &Path) -> Result<Self, GraphLoadError> {
        let text = fs::read_to_string(path).map_err(|source| GraphLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Calculator names in declaration order.
    pub fn calculators(&self) -> Vec<&str> {
        self.field_values("calculator").collect()
    }

    pub fn has_flow_limiter(&self) -> bool {
        self.calculators().contains(&FLOW_LIMITER)
    }

    /// Output stream fed back into the flow limiter, e.g. `output_video` for
    /// `input_stream: "FINISHED:output_video"`.
    pub fn flow_limiter_gate(&self) -> Option<&str> {
        self.field_values("input_stream")
            .find_map(|value| value.strip_prefix(FINISHED_TAG))
    }

    /// Graph-level and node-level `output_stream` names with any `TAG:` prefix removed.
    pub fn output_streams(&self) -> Vec<&str> {
        self.field_values("output_stream")
            .map(|value| value.rsplit(':').next().unwrap_or(value))
            .collect()
    }

    fn field_values<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.text.lines().filter_map(move |line| {
            let line = strip_comment(line).trim();
            let rest = line.strip_prefix(field)?.trim_start();
            let rest = rest.strip_prefix(':')?;
            quoted_value(rest)
        })
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn quoted_value(rest: &str) -> Option<&str> {
    let start = rest.find('"')? + 1;
    let len = rest[start..].find('"')?;
    Some(&rest[start..start + len])
}

fn check_balanced(text: &str) -> Result<(), GraphLoadError> {
    let mut depth: i64 = 0;
    for (line_no, line) in text.lines().enumerate() {
        let mut in_quotes = false;
        for ch in strip_comment(line).chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                '{' if !in_quotes => depth += 1,
                '}' if !in_quotes => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(GraphLoadError::Malformed(format!(
                            "unexpected `}}` on line {}",
                            line_no + 1
                        )));
                    }
                }
                _ => {}
            }
        }
        if in_quotes {
            return Err(GraphLoadError::Malformed(format!(
                "unterminated string on line {}",
                line_no + 1
            )));
        }
    }

    if depth != 0 {
        return Err(GraphLoadError::Malformed(format!(
            "{depth} unclosed `{{` at end of description"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSE_GRAPH: &str = r#"
# Pose tracking on GPU.
input_stream: "input_video"
output_stream: "output_video"
output_stream: "pose_world_landmarks"

node {
  calculator: "FlowLimiterCalculator"
  input_stream: "input_video"
  input_stream: "FINISHED:output_video"
  input_stream_info: {
    tag_index: "FINISHED"
    back_edge: true
  }
  output_stream: "throttled_input_video"
}

node {
  calculator: "PoseLandmarkGpu"  # subgraph
  input_stream: "IMAGE:throttled_input_video"
  output_stream: "WORLD_LANDMARKS:pose_world_landmarks"
}
"#;

    #[test]
    fn scans_calculators_and_gate() {
        let graph = GraphDescription::new(POSE_GRAPH).unwrap();
        assert_eq!(
            graph.calculators(),
            vec!["FlowLimiterCalculator", "PoseLandmarkGpu"]
        );
        assert!(graph.has_flow_limiter());
        assert_eq!(graph.flow_limiter_gate(), Some("output_video"));
        assert!(graph.output_streams().contains(&"pose_world_landmarks"));
        assert_eq!(graph.as_str(), POSE_GRAPH);
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            GraphDescription::new("  \n "),
            Err(GraphLoadError::Empty)
        ));
    }

    #[test]
    fn rejects_unbalanced_braces() {
        let text = "node {\n calculator: \"PassThroughCalculator\"\n";
        assert!(matches!(
            GraphDescription::new(text),
            Err(GraphLoadError::Malformed(_))
        ));
        assert!(matches!(
            GraphDescription::new("}\nnode { calculator: \"A\" }"),
            Err(GraphLoadError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_graph_without_nodes() {
        assert!(matches!(
            GraphDescription::new("input_stream: \"input_video\""),
            Err(GraphLoadError::NoNodes)
        ));
    }

    #[test]
    fn ignores_braces_in_comments_and_strings() {
        let text = "# {{{\nnode {\n  calculator: \"A{\"\n}\n";
        let graph = GraphDescription::new(text).unwrap();
        assert_eq!(graph.calculators(), vec!["A{"]);
        assert_eq!(graph.flow_limiter_gate(), None);
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.pbtxt");
        fs::write(&path, POSE_GRAPH).unwrap();
        let graph = GraphDescription::from_file(&path).unwrap();
        assert_eq!(graph.calculators().len(), 2);

        let missing = GraphDescription::from_file(&dir.path().join("missing.pbtxt"));
        assert!(matches!(missing, Err(GraphLoadError::Read { .. })));
    }
}
