use fund_query_agent::{
    agent::AgentOrchestrator,
    api::{start_server, ApiState},
    config::Settings,
    gateway::create_default_gateway,
    reasoning::create_default_reasoning,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    let settings = Settings::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Mutual Fund Query Agent - API Server");
    info!("📍 Port: {}", settings.port);
    info!(
        environment = %settings.app_env,
        data_source = %settings.mfapi_base_url,
        cache = settings.enable_cache,
        timeout_ms = settings.request_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    // Create components
    let gateway = create_default_gateway(&settings)?;
    let reasoning = create_default_reasoning(&settings);

    // Create orchestrator
    let orchestrator = Arc::new(AgentOrchestrator::from_settings(
        &settings,
        gateway.clone(),
        reasoning,
    ));

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    let state = ApiState {
        orchestrator,
        gateway,
        environment: settings.app_env.clone(),
    };

    // Start API server
    start_server(state, settings.port).await?;

    Ok(())
}
