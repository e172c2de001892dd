mod common;

use adaptive_rag::error::{RagError, Result};
use adaptive_rag::grading::{AnswerGrade, Groundedness};
use adaptive_rag::llm::{GenerationService, Prompt};
use adaptive_rag::service::{AskRequest, AskResponse, RagService, StepUpdate};
use async_trait::async_trait;
use common::{write_bread_corpus, write_corpus, write_metadata, write_rag_corpus, Harness, WEB_SOURCE};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Answers only after `delay`
struct SlowGenerator {
    delay: Duration,
}

#[async_trait]
impl GenerationService for SlowGenerator {
    async fn complete(&self, _prompt: Prompt) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok("too late".to_string())
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Fails every call like an unreachable endpoint
struct UnreachableGenerator;

#[async_trait]
impl GenerationService for UnreachableGenerator {
    async fn complete(&self, _prompt: Prompt) -> Result<String> {
        Err(RagError::GenerationService("connection refused".to_string()))
    }

    fn model_name(&self) -> &str {
        "unreachable"
    }
}

fn ask(question: &str, corpus: &str, execution_id: &str) -> AskRequest {
    AskRequest {
        question: question.to_string(),
        corpus_id: Some(corpus.to_string()),
        execution_id: Some(execution_id.to_string()),
        session_id: None,
    }
}

async fn trace(service: &RagService, execution_id: &str) -> Vec<StepUpdate> {
    service.subscribe(execution_id).collect().await
}

fn steps(updates: &[StepUpdate]) -> Vec<&str> {
    updates
        .iter()
        .filter_map(|u| match u {
            StepUpdate::Step { step, .. } => Some(step.as_str()),
            StepUpdate::Done { .. } => None,
        })
        .collect()
}

fn terminal_count(updates: &[StepUpdate]) -> usize {
    updates
        .iter()
        .filter(|u| matches!(u, StepUpdate::Done { done: true }))
        .count()
}

#[tokio::test]
async fn test_matching_corpus_generates_without_web_search() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let service = harness.service();

    let subscription = tokio::spawn({
        let stream = service.subscribe("exec-a");
        async move { stream.collect::<Vec<_>>().await }
    });

    let response = service.submit(ask("What is RAG?", "papers", "exec-a")).await;
    let updates = subscription.await.unwrap();

    match response {
        AskResponse::Answer {
            answer,
            execution_id,
            documents_used,
            ..
        } => {
            assert_eq!(execution_id, "exec-a");
            assert!(documents_used >= 1);
            assert!(answer.contains("rag.pdf"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    assert_eq!(harness.web.call_count(), 0);
    assert_eq!(harness.generator.answer_count(), 1);
    assert_eq!(steps(&updates), vec!["retrieve", "generate"]);
    assert_eq!(updates.last(), Some(&StepUpdate::Done { done: true }));
    assert_eq!(terminal_count(&updates), 1);
}

#[tokio::test]
async fn test_unrelated_corpus_falls_back_to_web_search() {
    let harness = Harness::new();
    write_bread_corpus(harness.root(), "baking");
    let service = harness.service();

    let response = service.submit(ask("What is RAG?", "baking", "exec-b")).await;
    let updates = trace(&service, "exec-b").await;

    match response {
        AskResponse::Answer {
            answer,
            documents_used,
            ..
        } => {
            assert_eq!(documents_used, 1);
            assert!(answer.contains(WEB_SOURCE));
            assert!(!answer.contains("bread.txt"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    assert_eq!(harness.web.call_count(), 1);
    assert_eq!(harness.generator.answer_count(), 1);
    assert_eq!(steps(&updates), vec!["retrieve", "web_search", "generate"]);
    assert_eq!(terminal_count(&updates), 1);
}

#[tokio::test]
async fn test_function_words_alone_do_not_count_as_matches() {
    let harness = Harness::new();
    write_corpus(
        harness.root(),
        "kitchen",
        &[
            ("What is the best oven for bread?", "oven.txt", None, common::OTHER_AXIS),
            ("How long is a proof for rye? It is about an hour.", "rye.txt", None, common::OTHER_AXIS),
        ],
    );
    let service = harness.service();

    let response = service.submit(ask("What is RAG?", "kitchen", "exec-fw")).await;
    let updates = trace(&service, "exec-fw").await;

    match response {
        AskResponse::Answer { answer, .. } => {
            assert!(answer.contains(WEB_SOURCE));
            assert!(!answer.contains("oven.txt"));
            assert!(!answer.contains("rye.txt"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }
    assert_eq!(harness.web.call_count(), 1);
    assert_eq!(steps(&updates), vec!["retrieve", "web_search", "generate"]);
}

#[tokio::test]
async fn test_empty_corpus_falls_back_to_web_search() {
    let harness = Harness::new();
    write_corpus(harness.root(), "empty", &[]);
    let service = harness.service();

    let response = service.submit(ask("What is RAG?", "empty", "exec-empty")).await;
    let updates = trace(&service, "exec-empty").await;

    match response {
        AskResponse::Answer {
            answer,
            documents_used,
            ..
        } => {
            assert_eq!(documents_used, 1);
            assert!(answer.contains(WEB_SOURCE));
        }
        other => panic!("expected an answer, got {:?}", other),
    }
    assert_eq!(harness.web.call_count(), 1);
    assert_eq!(steps(&updates), vec!["retrieve", "web_search", "generate"]);
    assert_eq!(terminal_count(&updates), 1);
}

#[tokio::test]
async fn test_slow_generation_times_out_with_one_terminal_event() {
    let mut harness = Harness::new();
    harness.config.graph.execution_timeout = "200ms".to_string();
    write_rag_corpus(harness.root(), "papers");
    let service = harness.service_with_generator(Arc::new(SlowGenerator {
        delay: Duration::from_secs(5),
    }));

    let subscription = tokio::spawn({
        let stream = service.subscribe("exec-slow");
        async move { stream.collect::<Vec<_>>().await }
    });

    let start = Instant::now();
    let response = service.submit(ask("What is RAG?", "papers", "exec-slow")).await;
    let updates = subscription.await.unwrap();

    match response {
        AskResponse::Error { status, execution_id, .. } => {
            assert_eq!(status, "execution_timeout");
            assert_eq!(execution_id, "exec-slow");
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(steps(&updates), vec!["retrieve", "generate"]);
    assert_eq!(updates.last(), Some(&StepUpdate::Done { done: true }));
    assert_eq!(terminal_count(&updates), 1);
}

#[tokio::test]
async fn test_generation_failure_ends_trace_after_streamed_steps() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let service = harness.service_with_generator(Arc::new(UnreachableGenerator));

    let subscription = tokio::spawn({
        let stream = service.subscribe("exec-down");
        async move { stream.collect::<Vec<_>>().await }
    });

    let response = service.submit(ask("What is RAG?", "papers", "exec-down")).await;
    let updates = subscription.await.unwrap();

    match response {
        AskResponse::Error { status, error, execution_id } => {
            assert_eq!(status, "generation_service_error");
            assert!(error.contains("connection refused"));
            assert_eq!(execution_id, "exec-down");
        }
        other => panic!("expected an error, got {:?}", other),
    }
    assert_eq!(steps(&updates), vec!["retrieve", "generate"]);
    assert_eq!(updates.last(), Some(&StepUpdate::Done { done: true }));
    assert_eq!(terminal_count(&updates), 1);
}

#[tokio::test]
async fn test_subscribe_to_unknown_execution_times_out() {
    let harness = Harness::new();
    let service = harness.service();

    let start = Instant::now();
    let updates = trace(&service, "never-started").await;

    assert_eq!(updates, vec![StepUpdate::Done { done: true }]);
    assert!(start.elapsed() >= service.bus().subscription_horizon());
    assert_eq!(service.bus().active_channels(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_stay_on_their_corpus() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    write_metadata(harness.root(), r#"{"baking": {"display_name": "Baking"}}"#);
    common::write_corpus(
        harness.root(),
        "baking",
        &[("RAG is also a rough cloth used in bakeries.", "bakery.txt", None, common::RAG_AXIS)],
    );
    let service = Arc::new(harness.service());

    let first = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.submit(ask("What is RAG?", "papers", "d-1")).await })
    };
    let second = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.submit(ask("What is RAG?", "baking", "d-2")).await })
    };

    let first = first.await.unwrap();
    let second = second.await.unwrap();

    match (first, second) {
        (
            AskResponse::Answer { answer: a, execution_id: ea, .. },
            AskResponse::Answer { answer: b, execution_id: eb, .. },
        ) => {
            assert_eq!(ea, "d-1");
            assert_eq!(eb, "d-2");
            assert!(a.contains("rag.pdf") && !a.contains("bakery.txt"));
            assert!(b.contains("bakery.txt") && !b.contains("rag.pdf"));
        }
        other => panic!("expected two answers, got {:?}", other),
    }

    let first_trace = trace(&service, "d-1").await;
    let second_trace = trace(&service, "d-2").await;
    assert_eq!(steps(&first_trace), vec!["retrieve", "generate"]);
    assert_eq!(steps(&second_trace), vec!["retrieve", "generate"]);
}

#[tokio::test]
async fn test_failed_submission_still_terminates_trace() {
    let harness = Harness::new();
    let service = harness.service();

    let subscription = tokio::spawn({
        let stream = service.subscribe("exec-missing");
        async move { stream.collect::<Vec<_>>().await }
    });

    let response = service.submit(ask("What is RAG?", "ghost", "exec-missing")).await;
    let updates = subscription.await.unwrap();

    match response {
        AskResponse::Error { status, execution_id, .. } => {
            assert_eq!(status, "corpus_not_found");
            assert_eq!(execution_id, "exec-missing");
        }
        other => panic!("expected an error, got {:?}", other),
    }
    assert_eq!(updates, vec![StepUpdate::Done { done: true }]);
    assert_eq!(harness.generator.answer_count(), 0);
}

#[tokio::test]
async fn test_session_history_feeds_next_question() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let service = harness.service();

    let selection = service.select_corpus("papers", None).await.unwrap();
    assert_eq!(selection.display_name, "papers");

    let follow_up = |question: &str| AskRequest {
        question: question.to_string(),
        corpus_id: None,
        execution_id: None,
        session_id: Some(selection.session_id.clone()),
    };

    let first = service.submit(follow_up("What is RAG?")).await;
    assert!(!first.is_error());
    let second = service.submit(follow_up("And hybrid retrieval?")).await;
    assert!(!second.is_error());

    let prompt = harness.generator.last_prompt().unwrap();
    assert!(prompt.contains("User: What is RAG?"));
    assert!(prompt.contains("Assistant: ANSWER"));
    assert_eq!(service.sessions().history(&selection.session_id).len(), 4);
}

#[tokio::test]
async fn test_select_corpus_resets_conversation() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    write_bread_corpus(harness.root(), "baking");
    let service = harness.service();

    let selection = service.select_corpus("papers", None).await.unwrap();
    let session = selection.session_id.clone();
    service
        .submit(AskRequest {
            question: "What is RAG?".to_string(),
            session_id: Some(session.clone()),
            ..Default::default()
        })
        .await;
    assert_eq!(service.sessions().history(&session).len(), 2);

    let switched = service.select_corpus("baking", Some(&session)).await.unwrap();
    assert_eq!(switched.session_id, session);
    assert!(service.sessions().history(&session).is_empty());
    assert_eq!(service.sessions().corpus_of(&session).as_deref(), Some("baking"));

    service.clear_session(&session).unwrap();
    assert!(service.clear_session("ghost").is_err());
}

#[tokio::test]
async fn test_submit_without_selected_corpus_fails() {
    let harness = Harness::new();
    let service = harness.service();

    let response = service
        .submit(AskRequest {
            question: "What is RAG?".to_string(),
            ..Default::default()
        })
        .await;

    assert!(matches!(
        response,
        AskResponse::Error { ref status, .. } if status == "corpus_not_found"
    ));
}

#[tokio::test]
async fn test_list_corpora_reports_build_state() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    write_bread_corpus(harness.root(), "baking");
    write_metadata(
        harness.root(),
        r#"{"papers": {"display_name": "RAG Papers", "category": "Research"}}"#,
    );
    let service = harness.service();
    service.select_corpus("papers", None).await.unwrap();

    let corpora = service.list_corpora().unwrap();
    assert_eq!(corpora.len(), 2);
    assert_eq!(corpora[0].id, "baking");
    assert!(!corpora[0].built);
    assert_eq!(corpora[0].category, "Other");
    assert_eq!(corpora[1].display_name, "RAG Papers");
    assert!(corpora[1].built);

    let status = service.status();
    assert_eq!(status.built_corpora, vec!["papers".to_string()]);
}

#[tokio::test]
async fn test_audit_runs_when_enabled() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let service = harness.service_with_audit(true);

    let response = service.submit(ask("What is RAG?", "papers", "audited")).await;

    match response {
        AskResponse::Answer { audit: Some(audit), .. } => {
            assert_eq!(audit.grounded, Groundedness::Grounded);
            assert_eq!(audit.resolves, AnswerGrade::Resolves);
        }
        other => panic!("expected an audited answer, got {:?}", other),
    }
    assert_eq!(harness.generator.answer_count(), 1);
}
