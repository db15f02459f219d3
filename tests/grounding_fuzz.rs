//! Randomized grounding checks: whatever the reasoning service writes, a
//! returned Answer never cites a scheme code or figure outside its evidence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fund_query_agent::budget::{RequestScope, TimeBudget};
use fund_query_agent::models::{
    AnswerSource, EvidenceEntry, EvidenceSet, FundRecord, FundRef, HistoryWindow, Intent,
    PerformanceMetrics, Question, SchemeCode, Task, TaskFailure, TaskKind, TaskOutput,
    TaskResult,
};
use fund_query_agent::reasoning::{ScriptedReasoning, ScriptedReply};
use fund_query_agent::retry::RetryPolicy;
use fund_query_agent::synthesis::AnswerSynthesizer;
use fund_query_agent::verification::{
    create_default_grounding_verifier, tokenize_numbers, EvidenceFacts,
};

const ROUNDS: usize = 64;

struct Scenario {
    evidence: EvidenceSet,
    codes: HashSet<String>,
    first: FundRecord,
}

fn random_record(rng: &mut StdRng, code: SchemeCode, index: usize) -> FundRecord {
    let mut performance = PerformanceMetrics::default();
    for window in HistoryWindow::ALL {
        if rng.gen_bool(0.7) {
            performance.set(window, rng.gen_range(-3000..6000) as f64 / 100.0);
        }
    }

    FundRecord {
        scheme_code: code,
        scheme_name: format!("Fuzz Fund {} - Direct Plan - Growth", ["Alpha", "Beta", "Gamma", "Delta"][index % 4]),
        fund_house: "Fuzz Mutual Fund".to_string(),
        scheme_type: "Open Ended Schemes".to_string(),
        scheme_category: "Equity".to_string(),
        latest_nav: Some(rng.gen_range(10_000..5_000_000) as f64 / 10_000.0),
        nav_date: NaiveDate::from_ymd_opt(
            rng.gen_range(2019..=2024),
            rng.gen_range(1..=12),
            rng.gen_range(1..=28),
        ),
        performance,
    }
}

fn random_scenario(rng: &mut StdRng) -> Scenario {
    let fund_count = rng.gen_range(1..=4);
    let mut codes: HashSet<String> = HashSet::new();
    let mut ordered: Vec<SchemeCode> = Vec::new();

    while ordered.len() < fund_count {
        let raw = rng.gen_range(100_000..=999_999).to_string();
        if codes.insert(raw.clone()) {
            ordered.push(SchemeCode::parse(&raw).unwrap());
        }
    }

    let mut entries = Vec::new();
    let mut first = None;

    for (index, code) in ordered.iter().enumerate() {
        let task = Task::new(TaskKind::Lookup { code: code.clone() });
        // the first fund always succeeds so the evidence is usable
        let result = if index > 0 && rng.gen_bool(0.3) {
            TaskResult::Failure(TaskFailure::NotFound(code.to_string()))
        } else {
            let record = random_record(rng, code.clone(), index);
            if first.is_none() {
                first = Some(record.clone());
            }
            TaskResult::Success(TaskOutput::Fund { record })
        };
        entries.push(EvidenceEntry { task, result });
    }

    let intent = if ordered.len() >= 2 {
        Intent::compare(ordered.iter().cloned().map(FundRef::Code).collect(), None).unwrap()
    } else {
        Intent::lookup(FundRef::Code(ordered[0].clone()), None).unwrap()
    };

    Scenario {
        evidence: EvidenceSet::assemble(intent, entries),
        codes,
        first: first.unwrap(),
    }
}

fn unseen_code(rng: &mut StdRng, codes: &HashSet<String>) -> String {
    loop {
        let candidate = rng.gen_range(100_000..=999_999).to_string();
        if !codes.contains(&candidate) {
            return candidate;
        }
    }
}

/// A 2-decimal figure no evidence value rounds to
fn unseen_figure(rng: &mut StdRng, facts: &EvidenceFacts) -> String {
    loop {
        let candidate = format!("{:.2}", rng.gen_range(1000..99_999) as f64 / 100.0);
        let token = tokenize_numbers(&candidate).remove(0);
        if !facts.supports(&token) {
            return candidate;
        }
    }
}

fn grounded_text(record: &FundRecord) -> String {
    format!(
        "{} ({}) last reported a NAV of {:.4}.",
        record.scheme_name,
        record.scheme_code,
        record.latest_nav.unwrap_or_default()
    )
}

fn synthesizer(reasoning: Arc<ScriptedReasoning>) -> AnswerSynthesizer {
    AnswerSynthesizer::new(reasoning, RetryPolicy::with_base_delay(Duration::from_millis(1)))
}

fn question() -> Question {
    Question::new("compare these funds", 500).unwrap()
}

fn budget() -> TimeBudget {
    TimeBudget::new(Duration::from_secs(2))
}

#[tokio::test]
async fn unseen_code_always_takes_fallback() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let verifier = create_default_grounding_verifier();

    for _ in 0..ROUNDS {
        let scenario = random_scenario(&mut rng);
        let invented = unseen_code(&mut rng, &scenario.codes);
        let reasoning = Arc::new(ScriptedReasoning::always(ScriptedReply::Text(format!(
            "{} You may also like scheme {}.",
            grounded_text(&scenario.first),
            invented
        ))));

        let answer = synthesizer(reasoning.clone())
            .synthesize(&RequestScope::detached(), &question(), scenario.evidence.clone(), budget())
            .await
            .unwrap();

        assert_eq!(answer.source, AnswerSource::Fallback);
        assert!(answer.degraded);
        assert!(!answer.summary.contains(&invented));
        assert_eq!(reasoning.call_count(), 2);
        assert!(verifier.verify(&answer.summary, &answer.evidence).is_ok());
    }
}

#[tokio::test]
async fn corrected_answer_is_accepted() {
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..ROUNDS {
        let scenario = random_scenario(&mut rng);
        let invented = unseen_code(&mut rng, &scenario.codes);
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            ScriptedReply::Text(format!("Scheme {} is the better pick.", invented)),
            ScriptedReply::Text(grounded_text(&scenario.first)),
        ]));

        let answer = synthesizer(reasoning)
            .synthesize(&RequestScope::detached(), &question(), scenario.evidence.clone(), budget())
            .await
            .unwrap();

        assert_eq!(answer.source, AnswerSource::Reasoning);
        assert_eq!(answer.generation_attempts, 2);
        assert!(!answer.summary.contains(&invented));
    }
}

#[tokio::test]
async fn invented_figure_never_reaches_the_answer() {
    let mut rng = StdRng::seed_from_u64(2024);

    for _ in 0..ROUNDS {
        let scenario = random_scenario(&mut rng);
        let facts = EvidenceFacts::from_evidence(&scenario.evidence);
        let figure = unseen_figure(&mut rng, &facts);
        let reasoning = Arc::new(ScriptedReasoning::always(ScriptedReply::Text(format!(
            "{} Expect about {}% next year.",
            grounded_text(&scenario.first),
            figure
        ))));

        let answer = synthesizer(reasoning)
            .synthesize(&RequestScope::detached(), &question(), scenario.evidence.clone(), budget())
            .await
            .unwrap();

        assert_eq!(answer.source, AnswerSource::Fallback);
        assert!(!answer.summary.contains(&format!("{}%", figure)));
    }
}

/// A whole percentage no evidence value rounds to, if one exists
fn unseen_small_percentage(rng: &mut StdRng, facts: &EvidenceFacts) -> Option<u32> {
    (0..32)
        .map(|_| rng.gen_range(1..=12u32))
        .find(|n| {
            let token = tokenize_numbers(&format!("{}%", n)).remove(0);
            !facts.supports(&token)
        })
}

#[tokio::test]
async fn small_invented_percentage_never_reaches_the_answer() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut checked = 0;

    for _ in 0..ROUNDS {
        let scenario = random_scenario(&mut rng);
        let facts = EvidenceFacts::from_evidence(&scenario.evidence);
        let Some(percent) = unseen_small_percentage(&mut rng, &facts) else {
            continue;
        };
        let claim = format!("returned {}% over 3Y", percent);
        let reasoning = Arc::new(ScriptedReasoning::always(ScriptedReply::Text(format!(
            "{} It {}.",
            grounded_text(&scenario.first),
            claim
        ))));

        let answer = synthesizer(reasoning)
            .synthesize(&RequestScope::detached(), &question(), scenario.evidence.clone(), budget())
            .await
            .unwrap();

        assert_eq!(answer.source, AnswerSource::Fallback);
        assert!(!answer.summary.contains(&claim));
        checked += 1;
    }

    assert!(checked > ROUNDS / 2);
}
