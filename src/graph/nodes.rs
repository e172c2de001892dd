//! Graph nodes and the static transition function

use super::PipelineState;

/// Closed set of graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Retrieve,
    WebSearch,
    Generate,
}

impl Node {
    /// Progress label published when the node is entered
    pub fn label(self) -> &'static str {
        match self {
            Node::Retrieve => "retrieve",
            Node::WebSearch => "web_search",
            Node::Generate => "generate",
        }
    }

    /// Human-readable progress message for a label
    pub fn message_for(label: &str) -> Option<&'static str> {
        match label {
            "retrieve" => Some("Searching the documents."),
            "web_search" => Some("Searching the web."),
            "generate" => Some("Generating an answer from the documents."),
            _ => None,
        }
    }
}

/// Next node after `from` (`None` is START); `None` result is END
///
/// ```text
/// START      -> RETRIEVE
/// RETRIEVE   -> GENERATE    if documents non-empty
/// RETRIEVE   -> WEB_SEARCH  if documents empty
/// WEB_SEARCH -> GENERATE
/// GENERATE   -> END
/// ```
pub fn transition(from: Option<Node>, state: &PipelineState) -> Option<Node> {
    match from {
        None => Some(Node::Retrieve),
        Some(Node::Retrieve) if state.documents.is_empty() => Some(Node::WebSearch),
        Some(Node::Retrieve) | Some(Node::WebSearch) => Some(Node::Generate),
        Some(Node::Generate) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::RetrievedDocument;

    fn path(state: &PipelineState) -> Vec<&'static str> {
        let mut labels = Vec::new();
        let mut current = transition(None, state);
        while let Some(node) = current {
            labels.push(node.label());
            current = transition(Some(node), state);
        }
        labels
    }

    #[test]
    fn test_path_with_documents() {
        let mut state = PipelineState::new("q", Vec::new());
        state.documents.push(RetrievedDocument {
            content: "c".to_string(),
            source: "s".to_string(),
            page: None,
        });
        assert_eq!(path(&state), vec!["retrieve", "generate"]);
    }

    #[test]
    fn test_path_without_documents() {
        let state = PipelineState::new("q", Vec::new());
        assert_eq!(path(&state), vec!["retrieve", "web_search", "generate"]);
    }

    #[test]
    fn test_every_label_has_a_message() {
        for node in [Node::Retrieve, Node::WebSearch, Node::Generate] {
            assert!(Node::message_for(node.label()).is_some());
        }
        assert!(Node::message_for("grade_documents").is_none());
    }
}
