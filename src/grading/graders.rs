//! Binary graders over retrieved documents and generated answers

use super::{content_tokens, parse_binary_score, AnswerGrade, Groundedness, Relevance};
use crate::error::{RagError, Result};
use crate::llm::{GenerationService, Prompt};
use crate::retrieval::RetrievedDocument;
use std::sync::Arc;

const RELEVANCE_SYSTEM: &str = "You grade whether a retrieved document is relevant to a user question. \
Be generous: a document that shares keywords or concepts with the question, or holds any information \
that might help answer it, is relevant. Only completely unrelated documents are irrelevant. \
If unsure, answer yes. Respond with a JSON object {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"}.";

const GROUNDEDNESS_SYSTEM: &str = "You grade whether an answer is grounded in, and supported by, a set of \
retrieved facts. 'yes' means every claim in the answer is supported by the facts. \
Respond with a JSON object {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"}.";

const ANSWER_SYSTEM: &str = "You grade whether an answer addresses and resolves a question. \
'yes' means the answer resolves the question. \
Respond with a JSON object {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"}.";

/// Lenient document relevance grader
///
/// A document sharing a content token with the question is Relevant without a
/// model call; otherwise the model decides, and anything but a clear "no" is
/// Relevant.
pub struct RelevanceGrader {
    service: Arc<dyn GenerationService>,
}

impl RelevanceGrader {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    pub async fn grade(&self, document: &RetrievedDocument, question: &str) -> Result<Relevance> {
        let question_tokens = content_tokens(question);
        if content_tokens(&document.content)
            .iter()
            .any(|token| question_tokens.contains(token))
        {
            return Ok(Relevance::Relevant);
        }

        let prompt = Prompt::new(
            RELEVANCE_SYSTEM,
            format!(
                "Retrieved document:\n\n{}\n\nUser question: {}",
                document.content, question
            ),
        )
        .json();

        let output = self.service.complete(prompt).await?;
        Ok(match parse_binary_score(&output) {
            Some(false) => Relevance::Irrelevant,
            Some(true) => Relevance::Relevant,
            None => {
                tracing::debug!("Unparseable relevance grade, treating as relevant: {:?}", output);
                Relevance::Relevant
            }
        })
    }
}

/// Checks that a generation is supported by the documents it was given
pub struct GroundednessGrader {
    service: Arc<dyn GenerationService>,
}

impl GroundednessGrader {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    pub async fn grade(
        &self,
        documents: &[RetrievedDocument],
        generation: &str,
    ) -> Result<Groundedness> {
        let facts = documents
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = Prompt::new(
            GROUNDEDNESS_SYSTEM,
            format!("Set of facts:\n\n{}\n\nLLM generation: {}", facts, generation),
        )
        .json();

        let output = self.service.complete(prompt).await?;
        match parse_binary_score(&output) {
            Some(true) => Ok(Groundedness::Grounded),
            Some(false) => Ok(Groundedness::Ungrounded),
            None => Err(RagError::GradingService(format!(
                "groundedness grader returned no binary score: {}",
                truncate(&output)
            ))),
        }
    }
}

/// Checks that a generation resolves the question
pub struct AnswerGrader {
    service: Arc<dyn GenerationService>,
}

impl AnswerGrader {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    pub async fn grade(&self, question: &str, generation: &str) -> Result<AnswerGrade> {
        let prompt = Prompt::new(
            ANSWER_SYSTEM,
            format!("User question:\n\n{}\n\nLLM generation: {}", question, generation),
        )
        .json();

        let output = self.service.complete(prompt).await?;
        match parse_binary_score(&output) {
            Some(true) => Ok(AnswerGrade::Resolves),
            Some(false) => Ok(AnswerGrade::DoesNotResolve),
            None => Err(RagError::GradingService(format!(
                "answer grader returned no binary score: {}",
                truncate(&output)
            ))),
        }
    }
}

fn truncate(output: &str) -> String {
    output.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replies with a fixed string and counts calls
    struct Scripted {
        reply: std::result::Result<String, String>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("upstream 500".to_string()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationService for Scripted {
        async fn complete(&self, _prompt: Prompt) -> Result<String> {
            *self.calls.lock() += 1;
            self.reply.clone().map_err(RagError::GenerationService)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn doc(content: &str) -> RetrievedDocument {
        RetrievedDocument {
            content: content.to_string(),
            source: "a.pdf".to_string(),
            page: None,
        }
    }

    #[tokio::test]
    async fn test_shared_token_is_relevant_without_call() {
        let service = Scripted::ok(r#"{"binary_score": "no"}"#);
        let grader = RelevanceGrader::new(service.clone());

        let grade = grader
            .grade(&doc("Hybrid retrieval uses BM25."), "How does retrieval work?")
            .await
            .unwrap();
        assert_eq!(grade, Relevance::Relevant);
        assert_eq!(*service.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_clear_no_is_irrelevant() {
        let service = Scripted::ok(r#"{"binary_score": "no"}"#);
        let grader = RelevanceGrader::new(service.clone());

        let grade = grader
            .grade(&doc("Sourdough fermentation takes hours."), "What is RAG?")
            .await
            .unwrap();
        assert_eq!(grade, Relevance::Irrelevant);
        assert_eq!(*service.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_relevance_defaults_to_relevant() {
        let grader = RelevanceGrader::new(Scripted::ok("maybe?"));
        let grade = grader
            .grade(&doc("Sourdough fermentation takes hours."), "What is RAG?")
            .await
            .unwrap();
        assert_eq!(grade, Relevance::Relevant);
    }

    #[tokio::test]
    async fn test_groundedness_parses_and_rejects_garbage() {
        let grader = GroundednessGrader::new(Scripted::ok(r#"{"binary_score": "yes"}"#));
        assert_eq!(
            grader.grade(&[doc("fact")], "answer").await.unwrap(),
            Groundedness::Grounded
        );

        let grader = GroundednessGrader::new(Scripted::ok("I cannot tell"));
        let err = grader.grade(&[doc("fact")], "answer").await.unwrap_err();
        assert_eq!(err.status(), "grading_service_error");
    }

    #[tokio::test]
    async fn test_service_failure_is_generation_error() {
        let grader = AnswerGrader::new(Scripted::failing());
        let err = grader.grade("q", "a").await.unwrap_err();
        assert_eq!(err.status(), "generation_service_error");
    }
}
