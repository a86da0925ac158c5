use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use carclaim::artifacts::ArtifactStore;
use carclaim::config::AppConfig;
use carclaim::error::AppError;
use carclaim::explain::ExplanationClient;
use carclaim::history::{HistoryEntry, HistoryStore};
use carclaim::routes::{claims_router, validate_claim_dates, ClaimsState, CLAIM_DATE_FIELD};
use carclaim::scoring::{ClaimScorer, RawClaimRecord, RawValue, ScoredClaim};
use carclaim::telemetry;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "CarClaim AI",
    about = "Score automobile insurance claims for fraud risk from the command line or over HTTP",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Score a single claim from a JSON file of raw form fields
    Analyze(AnalyzeArgs),
    /// Score every row of a CSV export, headers naming the raw form fields
    Batch(BatchArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Claimant name used to key the history entry
    #[arg(long)]
    claimant: String,
    /// JSON object mapping raw field names to values
    #[arg(long)]
    input: PathBuf,
    /// Ask the explanation gateway for prose after scoring
    #[arg(long)]
    explain: bool,
    /// Explanation credential; falls back to OPENAI_API_KEY
    #[arg(long)]
    api_key: Option<String>,
    /// Skip persisting the analysis to the history file
    #[arg(long)]
    no_history: bool,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// CSV file with one claim per row
    #[arg(long)]
    input: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Analyze(args) => run_analyze(args).await,
        Command::Batch(args) => run_batch(args),
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let scorer = Arc::new(load_scorer(&config)?);
    let history = Arc::new(Mutex::new(HistoryStore::load(&config.history.file)?));
    let explainer = Arc::new(ExplanationClient::new(&config.explain));
    let claims_state = ClaimsState {
        scorer,
        history,
        explainer,
        default_credential: config.explain.api_key.clone(),
    };

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(claims_router(claims_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "claim scoring service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn load_scorer(config: &AppConfig) -> Result<ClaimScorer, AppError> {
    let artifacts = ArtifactStore::load(&config.artifacts.dir)?;
    Ok(artifacts.into_scorer())
}

async fn run_analyze(args: AnalyzeArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry).ok();

    let AnalyzeArgs {
        claimant,
        input,
        explain,
        api_key,
        no_history,
    } = args;

    let mut record = read_claim_file(&input)?;
    let now = Local::now();
    if !record.contains(CLAIM_DATE_FIELD) {
        record.insert(
            CLAIM_DATE_FIELD,
            RawValue::Text(now.format("%d/%m/%Y").to_string()),
        );
    }

    let issues = validate_claim_dates(&record);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("rejected: {issue}");
        }
        return Ok(());
    }

    let scorer = load_scorer(&config)?;
    let assessment = scorer.analyze(&record)?;
    render_verdict(&claimant, &assessment.claim);

    if !no_history {
        let mut history = HistoryStore::load(&config.history.file)?;
        let id = history.append(
            &claimant,
            now.naive_local(),
            HistoryEntry {
                entrada: record.clone(),
                resultado: assessment.claim.clone(),
                explicacion_ia: None,
            },
        )?;
        println!("\nStored in history as {id}");

        if explain {
            let credential = api_key.or_else(|| config.explain.api_key.clone());
            match credential {
                Some(credential) => {
                    let client = ExplanationClient::new(&config.explain);
                    match client.explain(&assessment.claim, &record, &credential).await {
                        Ok(text) => {
                            history.attach_explanation(&id, text.clone())?;
                            println!("\nExplanation:\n{text}");
                        }
                        Err(error) => warn!(%error, "explanation unavailable"),
                    }
                }
                None => warn!("no explanation credential provided; skipping explanation"),
            }
        }
    }

    Ok(())
}

fn run_batch(args: BatchArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry).ok();

    let scorer = load_scorer(&config)?;
    let mut reader = csv::Reader::from_path(&args.input).map_err(|err| match err.into_kind() {
        csv::ErrorKind::Io(io) => AppError::Io(io),
        other => AppError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid CSV: {other:?}"),
        )),
    })?;

    let headers = reader
        .headers()
        .map_err(|err| AppError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))?
        .clone();

    let mut scored = 0_usize;
    let mut failed = 0_usize;
    for (row_number, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(error) => {
                failed += 1;
                eprintln!("row {}: unreadable ({error})", row_number + 1);
                continue;
            }
        };

        let mut record = RawClaimRecord::new();
        for (field, value) in headers.iter().zip(row.iter()) {
            if !value.trim().is_empty() {
                record.insert(field, RawValue::Text(value.trim().to_string()));
            }
        }

        match scorer.analyze(&record) {
            Ok(assessment) => {
                scored += 1;
                println!(
                    "row {}: score {:.4} -> {}",
                    row_number + 1,
                    assessment.claim.score,
                    assessment.claim.riesgo.label()
                );
            }
            Err(error) => {
                failed += 1;
                eprintln!("row {}: {error}", row_number + 1);
            }
        }
    }

    println!("\n{scored} claims scored, {failed} rejected");
    Ok(())
}

fn read_claim_file(path: &PathBuf) -> Result<RawClaimRecord, AppError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|err| {
        AppError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} is not a JSON claim record: {err}", path.display()),
        ))
    })
}

fn render_verdict(claimant: &str, claim: &ScoredClaim) {
    println!("Claim analysis for {claimant}");
    println!("Fraud score: {:.4}", claim.score);
    println!("Risk tier: {}", claim.riesgo.label());
    println!("\nRecommendations");
    for recommendation in &claim.recomendaciones {
        println!("- {recommendation}");
    }
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serving() {
        let cli = Cli::parse_from(["carclaim"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn analyze_subcommand_parses_flags() {
        let cli = Cli::parse_from([
            "carclaim",
            "analyze",
            "--claimant",
            "maria perez",
            "--input",
            "claim.json",
            "--explain",
        ]);
        match cli.command {
            Some(Command::Analyze(args)) => {
                assert_eq!(args.claimant, "maria perez");
                assert_eq!(args.input, PathBuf::from("claim.json"));
                assert!(args.explain);
                assert!(args.api_key.is_none());
                assert!(!args.no_history);
            }
            other => panic!("expected analyze command, got {other:?}"),
        }
    }

    #[test]
    fn batch_subcommand_takes_a_csv_path() {
        let cli = Cli::parse_from(["carclaim", "batch", "--input", "claims.csv"]);
        assert!(matches!(cli.command, Some(Command::Batch(_))));
    }

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let Json(body) = healthcheck().await;
        assert_eq!(body["status"], "ok");
    }
}
