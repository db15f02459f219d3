use fund_query_agent::{
    agent::{describe_rejection, AgentOrchestrator},
    config::Settings,
    gateway::create_default_gateway,
    reasoning::create_default_reasoning,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        eprintln!("usage: fund-agent <question>");
        eprintln!("  e.g. fund-agent \"Compare 119551 vs 120586 over 3 years\"");
        std::process::exit(2);
    }

    // Create components
    let gateway = create_default_gateway(&settings)?;
    let reasoning = create_default_reasoning(&settings);
    let orchestrator = AgentOrchestrator::from_settings(&settings, gateway, reasoning);

    info!(question = %question, "Running orchestrator");

    // Ctrl-C cancels whatever is still in flight
    let cancel = tokio_util::sync::CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match orchestrator.handle_with_cancel(&question, cancel).await {
        Ok(answer) => {
            println!("\n=== ANSWER ===");
            println!("{}", answer.summary);
            println!("\nRequest ID: {}", answer.request_id);
            println!("Source: {:?}", answer.source);
            println!(
                "Complete: {} | Degraded: {} | Confidence: {:.1}",
                answer.completeness, answer.degraded, answer.confidence
            );
            println!("Evidence fingerprint: {}", answer.evidence_fingerprint);
            println!("\nReasoning Trace:");
            for (i, step) in answer.reasoning_trace.iter().enumerate() {
                println!("  {}: {}", i + 1, step);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} ({})", describe_rejection(&e), e.kind());
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
