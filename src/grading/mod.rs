//! Grading chains
//!
//! Stateless wrappers around one generation-service call each, returning
//! closed two-variant grades. They are composable checks: the orchestration
//! graph does not call them, `RagService` runs [`GradingSuite::audit`] when
//! answer auditing is enabled.

mod graders;
mod router;

pub use graders::{AnswerGrader, GroundednessGrader, RelevanceGrader};
pub use router::{
    minority_script_terms, restore_minority_terms, QueryRewriter, QuestionRouter, RoutingPolicy,
};

use crate::config::GradingConfig;
use crate::embedding::STOPWORDS;
use crate::error::Result;
use crate::llm::GenerationService;
use crate::retrieval::RetrievedDocument;
use ahash::AHashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Relevant,
    Irrelevant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Groundedness {
    Grounded,
    Ungrounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerGrade {
    Resolves,
    DoesNotResolve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    RetrieveFromCorpus,
    Other,
}

/// Post-hoc check of one generated answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerAudit {
    pub grounded: Groundedness,
    pub resolves: AnswerGrade,
}

/// All grading chains over one generation service
pub struct GradingSuite {
    pub relevance: RelevanceGrader,
    pub groundedness: GroundednessGrader,
    pub answer: AnswerGrader,
    pub router: QuestionRouter,
    pub rewriter: QueryRewriter,
}

impl GradingSuite {
    pub fn new(service: Arc<dyn GenerationService>, config: &GradingConfig) -> Result<Self> {
        let policy = RoutingPolicy::parse(&config.routing_policy)?;

        Ok(Self {
            relevance: RelevanceGrader::new(Arc::clone(&service)),
            groundedness: GroundednessGrader::new(Arc::clone(&service)),
            answer: AnswerGrader::new(Arc::clone(&service)),
            router: QuestionRouter::new(Arc::clone(&service), policy),
            rewriter: QueryRewriter::new(service),
        })
    }

    /// Grade groundedness and resolution concurrently
    pub async fn audit(
        &self,
        question: &str,
        documents: &[RetrievedDocument],
        generation: &str,
    ) -> Result<AnswerAudit> {
        let (grounded, resolves) = tokio::join!(
            self.groundedness.grade(documents, generation),
            self.answer.grade(question, generation)
        );

        Ok(AnswerAudit {
            grounded: grounded?,
            resolves: resolves?,
        })
    }

    /// Keep documents the relevance grader accepts, preserving order
    pub async fn filter_relevant(
        &self,
        question: &str,
        documents: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>> {
        let grades = futures::future::join_all(
            documents
                .iter()
                .map(|document| self.relevance.grade(document, question)),
        )
        .await;

        let mut kept = Vec::with_capacity(documents.len());
        for (document, grade) in documents.into_iter().zip(grades) {
            if grade? == Relevance::Relevant {
                kept.push(document);
            }
        }
        Ok(kept)
    }
}

/// Read a `{"binary_score": "yes"|"no"}` verdict out of model output
///
/// Accepts surrounding prose or code fences, and a bare yes/no. `None` when
/// no verdict can be found.
pub fn parse_binary_score(output: &str) -> Option<bool> {
    let trimmed = output.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
                return value
                    .get("binary_score")
                    .and_then(|v| v.as_str())
                    .and_then(yes_no);
            }
        }
    }

    yes_no(trimmed.trim_end_matches('.'))
}

fn yes_no(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

/// Lowercased words of two or more characters, minus common English stopwords
pub fn content_tokens(text: &str) -> AHashSet<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("token pattern is valid"));

    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|token| token.chars().count() >= 2 && !STOPWORDS.contains(&token.as_str()))
        .collect()
}
