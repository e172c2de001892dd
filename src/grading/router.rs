//! Question routing and query rewriting

use super::{parse_binary_score, Route};
use crate::error::{RagError, Result};
use crate::llm::{GenerationService, Prompt};
use regex::Regex;
use std::sync::{Arc, OnceLock};

const ROUTER_SYSTEM: &str = "You route user questions. Decide whether the question should be answered \
from the document corpus. Answer yes for any question, including conversational follow-ups, that the \
corpus might help with. Respond with a JSON object {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"}.";

const REWRITER_SYSTEM: &str = "You rewrite a question into a better version for document retrieval. \
Reason about the underlying intent. Keep the language of the input. When the input mixes languages, \
keep the same mix and copy every foreign-language term verbatim. Output only the rewritten question.";

/// How [`QuestionRouter`] decides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Every question goes to the corpus; no model call
    CorpusFirst,
    /// Ask the model
    Classifier,
}

impl RoutingPolicy {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "corpus_first" => Ok(RoutingPolicy::CorpusFirst),
            "classifier" => Ok(RoutingPolicy::Classifier),
            other => Err(RagError::InvalidConfigValue {
                path: "grading.routing_policy".to_string(),
                message: format!("Unknown routing policy: {}", other),
            }),
        }
    }
}

pub struct QuestionRouter {
    service: Arc<dyn GenerationService>,
    policy: RoutingPolicy,
}

impl QuestionRouter {
    pub fn new(service: Arc<dyn GenerationService>, policy: RoutingPolicy) -> Self {
        Self { service, policy }
    }

    pub async fn route(&self, question: &str) -> Result<Route> {
        if self.policy == RoutingPolicy::CorpusFirst {
            return Ok(Route::RetrieveFromCorpus);
        }

        let output = self
            .service
            .complete(Prompt::new(ROUTER_SYSTEM, question).json())
            .await?;

        // Corpus retrieval is the safe default
        Ok(match parse_binary_score(&output) {
            Some(false) => Route::Other,
            _ => Route::RetrieveFromCorpus,
        })
    }
}

/// Rewrites questions for retrieval without losing foreign-script terms
pub struct QueryRewriter {
    service: Arc<dyn GenerationService>,
}

impl QueryRewriter {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    pub async fn rewrite(&self, question: &str) -> Result<String> {
        let output = self
            .service
            .complete(Prompt::new(
                REWRITER_SYSTEM,
                format!(
                    "Here is the initial question:\n\n{}\n\nFormulate an improved question.",
                    question
                ),
            ))
            .await?;

        let rewritten = output.trim();
        if rewritten.is_empty() {
            return Ok(question.to_string());
        }

        Ok(restore_minority_terms(question, rewritten))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Script {
    Latin,
    Hangul,
    Han,
    Kana,
    Cyrillic,
    Other,
}

fn char_script(c: char) -> Option<Script> {
    if !c.is_alphabetic() {
        return None;
    }
    let script = match c as u32 {
        0x0041..=0x024F => Script::Latin,
        0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7A3 => Script::Hangul,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF => Script::Han,
        0x3040..=0x30FF => Script::Kana,
        0x0400..=0x04FF => Script::Cyrillic,
        _ => Script::Other,
    };
    Some(script)
}

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}\-_.]*").expect("word pattern is valid"))
}

/// Terms of `question` written in a script other than its dominant one
pub fn minority_script_terms(question: &str) -> Vec<String> {
    let words: Vec<(&str, Script)> = word_pattern()
        .find_iter(question)
        .filter_map(|m| {
            let word = m.as_str().trim_end_matches(&['.', '-', '_'][..]);
            word.chars().find_map(char_script).map(|s| (word, s))
        })
        .collect();

    let mut counts: Vec<(Script, usize)> = Vec::new();
    for (_, script) in &words {
        match counts.iter_mut().find(|(s, _)| s == script) {
            Some((_, n)) => *n += 1,
            None => counts.push((*script, 1)),
        }
    }

    // Ties go to the script seen first
    let Some(dominant) = counts
        .iter()
        .fold(None, |best: Option<(Script, usize)>, &(s, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((s, n)),
        })
        .map(|(s, _)| s)
    else {
        return Vec::new();
    };

    let mut terms: Vec<String> = Vec::new();
    for (word, script) in words {
        if script != dominant && !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
    }
    terms
}

/// Append minority-script terms of `original` that `rewritten` dropped
pub fn restore_minority_terms(original: &str, rewritten: &str) -> String {
    let kept: Vec<&str> = word_pattern()
        .find_iter(rewritten)
        .map(|m| m.as_str().trim_end_matches(&['.', '-', '_'][..]))
        .collect();
    let missing: Vec<String> = minority_script_terms(original)
        .into_iter()
        .filter(|term| !kept.contains(&term.as_str()))
        .collect();

    if missing.is_empty() {
        rewritten.to_string()
    } else {
        tracing::debug!("Rewriter dropped {} term(s), restoring", missing.len());
        format!("{} ({})", rewritten, missing.join(", "))
    }
}
