use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum::{http::StatusCode, Router};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod attendance;
mod config;
mod error;
mod feed;
mod models;
mod report;
mod risk;
mod routes;
mod seed;
mod store;
mod timetable;

use models::StudentId;
use risk::EngagementRiskCalculator;
use seed::SeedData;

#[derive(Parser)]
#[command(name = "athena")]
#[command(about = "Athena student engagement API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,
    /// Create the schema or workbook sheets
    InitDb,
    /// Load the demo timetable, student and posts
    Seed,
    /// Write a markdown engagement report for one student
    Report {
        #[arg(long)]
        student: Option<String>,
        #[arg(long, default_value = "engagement-report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=debug,tower_http=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let cli = Cli::parse();
    let env_vars = config::EnvVars::new()?;
    let store = store::connect(&env_vars.backend)
        .await
        .with_context(|| format!("failed to open {} store", env_vars.backend.name()))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::InitDb => {
            store.init().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store.init().await?;
            if store.seed(&SeedData::demo(Utc::now())).await? {
                println!("Seed data inserted.");
            } else {
                println!("Store already holds users, nothing seeded.");
            }
        }
        Commands::Report { student, out } => {
            let student_id = student
                .map(StudentId::new)
                .unwrap_or_else(|| env_vars.default_student_id.clone());
            let now = Utc::now();
            let calculator = EngagementRiskCalculator::with_placeholder_sources();
            let assessment = calculator.assess(store.as_ref(), &student_id, now).await?;
            let history = attendance::attendance_history(store.as_ref(), &student_id, now).await?;
            let report = report::build_report(now, &assessment, &history);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve => serve(env_vars, store).await?,
    }

    Ok(())
}

async fn serve(
    env_vars: config::EnvVars,
    store: std::sync::Arc<dyn store::Store>,
) -> anyhow::Result<()> {
    info!("Starting server...");
    store.init().await?;
    if env_vars.seed_on_startup && store.seed(&SeedData::demo(Utc::now())).await? {
        info!("seeded demo data");
    }

    let port = env_vars.port;
    let app_state = routes::AppState {
        store,
        risk: EngagementRiskCalculator::with_placeholder_sources(),
        default_student_id: env_vars.default_student_id.clone(),
    };

    let app = with_middleware(
        routes::router(app_state),
        env_vars.request_body_size_limit,
        Duration::from_millis(env_vars.request_timeout_in_ms),
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, backend = env_vars.backend.name(), "listening");
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("Server error: {}", err);
    }
    Ok(())
}

fn with_middleware(app: Router, body_limit: usize, timeout: Duration) -> Router {
    app.layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn stalled_requests_time_out_with_408() {
        let app = Router::new().route("/stall", get(|| std::future::pending::<()>()));
        let app = with_middleware(app, 1024, Duration::from_millis(20));

        let request = Request::builder().uri("/stall").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
