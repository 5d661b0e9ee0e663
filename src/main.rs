mod audit;
mod config;
mod guard;
mod handlers;
mod models;
mod redis_client;
mod routes;
mod state;

use std::time::Duration;

use dotenvy::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = config::Config::from_env();
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    println!("🔐 Initializing guard systems...");
    let state = state::AppState::new(config.clone(), metrics_handle).await?;
    println!("✅ Guard systems initialized");

    spawn_audit_cleanup_job(state.clone());
    spawn_integrity_job(state.clone());

    let app = routes::create_router(state);

    println!("🚀 Guard server running on http://{}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Applies the configured retention once a day. The first tick fires
/// immediately so a long-stopped server catches up on restart.
fn spawn_audit_cleanup_job(state: state::AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            interval.tick().await;
            match state
                .audit
                .cleanup_older_than(state.config.audit_retention_days)
                .await
            {
                Ok(0) => {}
                Ok(removed) => println!("🧹 Audit retention removed {} entries", removed),
                Err(e) => eprintln!("Audit retention pass failed: {}", e),
            }
        }
    });
}

/// Periodically re-hashes the most recent audit entries and reports
/// tampering. Report-only; nothing is modified.
fn spawn_integrity_job(state: state::AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            match state
                .verifier
                .verify_batch(state.config.integrity_batch_size as usize)
                .await
            {
                Ok(report) if report.mismatches.is_empty() => {}
                Ok(report) => eprintln!(
                    "🚨 Integrity check: {} of {} entries mismatched",
                    report.mismatches.len(),
                    report.checked
                ),
                Err(e) => eprintln!("Integrity check failed: {}", e),
            }
        }
    });
}
