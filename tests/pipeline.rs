//! End-to-end pipeline behavior against in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use fund_query_agent::error::{AgentError, GatewayError};
use fund_query_agent::gateway::StaticGateway;
use fund_query_agent::models::{
    AnswerSource, FundRecord, HistoryWindow, PerformanceMetrics, SchemeCode, TaskKind,
};
use fund_query_agent::reasoning::{ScriptedReasoning, ScriptedReply};
use fund_query_agent::{AgentOrchestrator, Settings};

fn code(raw: &str) -> SchemeCode {
    SchemeCode::parse(raw).unwrap()
}

fn record(raw: &str, name: &str, house: &str, nav: f64, one_year: f64) -> FundRecord {
    let mut performance = PerformanceMetrics::default();
    performance.set(HistoryWindow::OneYear, one_year);

    FundRecord {
        scheme_code: code(raw),
        scheme_name: name.to_string(),
        fund_house: house.to_string(),
        scheme_type: "Open Ended Schemes".to_string(),
        scheme_category: "Equity Scheme - Large Cap Fund".to_string(),
        latest_nav: Some(nav),
        nav_date: NaiveDate::from_ymd_opt(2024, 3, 28),
        performance,
    }
}

fn sbi() -> FundRecord {
    record("119598", "SBI Bluechip Fund - Direct Plan - Growth", "SBI", 86.1204, 28.41)
}

fn icici() -> FundRecord {
    record(
        "120586",
        "ICICI Prudential Bluechip Fund - Direct Plan - Growth",
        "ICICI Prudential",
        98.31,
        37.02,
    )
}

fn settings(timeout_ms: u64) -> Settings {
    Settings {
        request_timeout: Duration::from_millis(timeout_ms),
        retry_base_delay: Duration::from_millis(1),
        ..Settings::default()
    }
}

fn orchestrator(
    gateway: &Arc<StaticGateway>,
    reasoning: &Arc<ScriptedReasoning>,
    timeout_ms: u64,
) -> AgentOrchestrator {
    AgentOrchestrator::from_settings(&settings(timeout_ms), gateway.clone(), reasoning.clone())
}

#[tokio::test]
async fn compare_by_name_with_full_evidence() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()).with_fund(icici()));
    let reasoning = Arc::new(ScriptedReasoning::new(vec![ScriptedReply::Text(
        "SBI Bluechip Fund (119598) has a NAV of 86.1204 and a 1Y return of 28.41%. \
         ICICI Prudential Bluechip Fund (120586) has a NAV of 98.31 and a 1Y return of 37.02%."
            .into(),
    )]));

    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 5000)
            .handle("Compare SBI Bluechip with ICICI Bluechip fund")
            .await
    );

    assert!(answer.completeness);
    assert!(!answer.degraded);
    assert_eq!(answer.source, AnswerSource::Reasoning);
    assert!(answer.summary.contains("SBI Bluechip"));
    assert!(answer.summary.contains("ICICI Prudential Bluechip"));
    assert_eq!(answer.evidence.fund_records().len(), 2);
    assert_eq!(answer.evidence_fingerprint.len(), 64);
}

#[tokio::test]
async fn one_missing_fund_gives_degraded_answer() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()));
    let reasoning = Arc::new(ScriptedReasoning::default());

    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 5000)
            .handle("Compare 119598 vs 120586")
            .await
    );

    assert!(!answer.completeness);
    assert!(answer.degraded);
    assert!(answer.summary.contains("SBI Bluechip Fund"));
    assert!(answer.summary.contains("scheme code 120586: not found"));
}

#[tokio::test]
async fn both_missing_funds_is_insufficient_evidence() {
    let gateway = Arc::new(StaticGateway::new());
    let reasoning = Arc::new(ScriptedReasoning::default());

    let result = orchestrator(&gateway, &reasoning, 5000)
        .handle("Compare 119598 vs 120586")
        .await;

    assert!(matches!(result, Err(AgentError::InsufficientEvidence(_))));
    assert_eq!(reasoning.call_count(), 0);
}

#[tokio::test]
async fn gibberish_makes_no_outbound_calls() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()));
    let reasoning = Arc::new(ScriptedReasoning::default());

    let result = orchestrator(&gateway, &reasoning, 5000)
        .handle("asdkjasd")
        .await;

    assert!(matches!(result, Err(AgentError::AmbiguousIntent(_))));
    assert_eq!(gateway.call_count(), 0);
    assert_eq!(reasoning.call_count(), 0);
}

#[tokio::test]
async fn unsupported_operation_makes_no_outbound_calls() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()));
    let reasoning = Arc::new(ScriptedReasoning::default());

    let result = orchestrator(&gateway, &reasoning, 5000)
        .handle("Sell my SBI Bluechip units")
        .await;

    assert!(matches!(result, Err(AgentError::UnsupportedIntent(_))));
    assert_eq!(gateway.call_count(), 0);
}

#[tokio::test]
async fn reasoning_timeouts_fall_back_to_template() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()).with_fund(icici()));
    let reasoning = Arc::new(ScriptedReasoning::always(ScriptedReply::Stall));

    let started = Instant::now();
    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 600)
            .handle("Compare 119598 vs 120586")
            .await
    );

    assert_eq!(answer.source, AnswerSource::Fallback);
    assert!(answer.degraded);
    assert!(answer.completeness);
    assert_eq!(answer.generation_attempts, 2);
    assert_eq!(reasoning.call_count(), 2);
    assert!(answer.summary.contains("ICICI Prudential Bluechip Fund"));
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn identical_inputs_share_evidence_fingerprint() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()).with_fund(icici()));

    let first = Arc::new(ScriptedReasoning::new(vec![ScriptedReply::Text(
        "SBI Bluechip Fund (119598) returned 28.41% over 1Y.".into(),
    )]));
    let second = Arc::new(ScriptedReasoning::new(vec![ScriptedReply::Text(
        "Over 1Y, 119598 returned 28.41% while 120586 returned 37.02%.".into(),
    )]));

    let a = assert_ok!(
        orchestrator(&gateway, &first, 5000)
            .handle("Compare 119598 vs 120586")
            .await
    );
    let b = assert_ok!(
        orchestrator(&gateway, &second, 5000)
            .handle("Compare 119598 vs 120586")
            .await
    );

    assert_ne!(a.summary, b.summary);
    assert_ne!(a.request_id, b.request_id);
    assert_eq!(a.evidence, b.evidence);
    assert_eq!(a.evidence_fingerprint, b.evidence_fingerprint);
}

#[tokio::test]
async fn compare_of_n_codes_issues_n_lookups() {
    let gateway = Arc::new(
        StaticGateway::new()
            .with_fund(record("100001", "Alpha Equity Fund", "Alpha", 11.5, 9.25))
            .with_fund(record("100002", "Beta Equity Fund", "Beta", 21.75, 12.5))
            .with_fund(record("100003", "Gamma Equity Fund", "Gamma", 31.0, 15.75)),
    );
    let reasoning = Arc::new(ScriptedReasoning::default());

    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 5000)
            .handle("compare 100001, 100002 and 100003")
            .await
    );

    let lookups = answer
        .evidence
        .entries()
        .iter()
        .filter(|e| matches!(e.task.kind, TaskKind::Lookup { .. }))
        .count();
    assert_eq!(lookups, 3);
    assert_eq!(gateway.call_count(), 3);
}

#[tokio::test]
async fn gateway_calls_run_concurrently() {
    let gateway = Arc::new(
        StaticGateway::new()
            .with_fund(record("100001", "Alpha Equity Fund", "Alpha", 11.5, 9.25))
            .with_fund(record("100002", "Beta Equity Fund", "Beta", 21.75, 12.5))
            .with_fund(record("100003", "Gamma Equity Fund", "Gamma", 31.0, 15.75))
            .with_delay(Duration::from_millis(200)),
    );
    let reasoning = Arc::new(ScriptedReasoning::default());

    let started = Instant::now();
    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 5000)
            .handle("compare 100001, 100002 and 100003")
            .await
    );

    assert!(answer.completeness);
    // sequential dispatch would need 600ms
    assert!(started.elapsed() < Duration::from_millis(450));
}

#[tokio::test]
async fn transient_gateway_failure_is_retried_once() {
    let gateway = Arc::new(
        StaticGateway::new()
            .with_fund(sbi())
            .with_fund(icici())
            .with_transient_failure("120586", GatewayError::Timeout, 1),
    );
    let reasoning = Arc::new(ScriptedReasoning::default());

    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 5000)
            .handle("Compare 119598 vs 120586")
            .await
    );

    assert!(answer.completeness);
    assert_eq!(gateway.call_count(), 3);
}

#[tokio::test]
async fn slow_gateway_is_executor_timeout() {
    let gateway = Arc::new(
        StaticGateway::new()
            .with_fund(sbi())
            .with_delay(Duration::from_secs(5)),
    );
    let reasoning = Arc::new(ScriptedReasoning::default());

    let started = Instant::now();
    let result = orchestrator(&gateway, &reasoning, 300)
        .handle("Tell me about 119598")
        .await;

    assert!(matches!(result, Err(AgentError::ExecutorTimeout(_))));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn cancellation_stops_outstanding_work() {
    let gateway = Arc::new(
        StaticGateway::new()
            .with_fund(sbi())
            .with_delay(Duration::from_secs(5)),
    );
    let reasoning = Arc::new(ScriptedReasoning::default());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = orchestrator(&gateway, &reasoning, 10_000)
        .handle_with_cancel("Tell me about 119598", cancel)
        .await;

    assert_eq!(result.unwrap_err(), AgentError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn history_window_adds_best_effort_task() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()));
    let reasoning = Arc::new(ScriptedReasoning::default());

    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 5000)
            .handle("How has 119598 done over the last 3 years?")
            .await
    );

    // history is missing from the gateway: answer still produced, marked degraded
    assert!(answer
        .evidence
        .entries()
        .iter()
        .any(|e| matches!(e.task.kind, TaskKind::History { window: HistoryWindow::ThreeYears, .. })));
    assert!(!answer.completeness);
    assert!(answer.degraded);
    assert_eq!(answer.evidence.fund_records().len(), 1);
}

#[tokio::test]
async fn same_fund_by_code_and_name_is_not_a_full_comparison() {
    let gateway = Arc::new(StaticGateway::new().with_fund(sbi()).with_fund(icici()));
    let reasoning = Arc::new(ScriptedReasoning::default());

    let answer = assert_ok!(
        orchestrator(&gateway, &reasoning, 5000)
            .handle("Compare 119598 with SBI Bluechip")
            .await
    );

    let codes: Vec<&str> = answer
        .evidence
        .fund_records()
        .iter()
        .map(|r| r.scheme_code.as_str())
        .collect();
    assert_eq!(codes, vec!["119598"]);
    assert!(!answer.completeness);
    assert!(answer.degraded);
    assert!(answer.summary.contains("same fund as another in the question"));
}
