//! Answer generation prompt
//!
//! The template is opaque text with `{question}`, `{context}` and
//! `{chat_history}` placeholders, substituted in a single pass so that
//! placeholder-looking text inside a question or document stays literal.

use crate::error::{RagError, Result};
use crate::retrieval::RetrievedDocument;
use crate::session::{render_history, ChatMessage};
use std::path::Path;

const DEFAULT_TEMPLATE: &str = "You are an assistant for question-answering tasks. \
Answer the question using the retrieved context and the previous conversation. \
If the context does not contain the answer, say that you do not know. \
Answer in the language of the question and mention the sources you used.

# Previous conversation:
{chat_history}

# Question:
{question}

# Context:
{context}

# Answer:";

const PLACEHOLDERS: [&str; 3] = ["question", "context", "chat_history"];

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Parse a template; it must reference `{question}` and `{context}`
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for required in ["{question}", "{context}"] {
            if !template.contains(required) {
                return Err(RagError::InvalidConfigValue {
                    path: "prompts.rag_template".to_string(),
                    message: format!("Template is missing the {} placeholder", required),
                });
            }
        }
        Ok(Self { template })
    }

    /// Load from a file, or use the built-in template when no path is set
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read prompt template: {}", path.display()),
        })?;
        Self::new(content)
    }

    pub fn render(
        &self,
        question: &str,
        documents: &[RetrievedDocument],
        chat_history: &[ChatMessage],
    ) -> String {
        let context = format_documents(documents);
        let history = render_history(chat_history);

        let mut out = String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let matched = PLACEHOLDERS.iter().find(|name| {
                after.starts_with(*name) && after[name.len()..].starts_with('}')
            });

            match matched {
                Some(&name) => {
                    out.push_str(match name {
                        "question" => question,
                        "context" => &context,
                        _ => &history,
                    });
                    rest = &after[name.len() + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Documents as `<document>` blocks separated by blank lines
pub fn format_documents(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|doc| {
            let source = if doc.source.is_empty() {
                "unknown".to_string()
            } else {
                percent_decode(&doc.source)
            };
            let page = doc
                .page
                .map(|p| (u64::from(p) + 1).to_string())
                .unwrap_or_else(|| "N/A".to_string());
            format!(
                "<document><content>{}</content><source>{}</source><page>{}</page></document>",
                doc.content, source, page
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Decode `%XX` escapes; malformed escapes are kept as-is
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            decoded.push(hex_value(bytes[i + 1]) << 4 | hex_value(bytes[i + 2]));
            i += 3;
            continue;
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
