use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use rust_decimal::Decimal;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod config;
mod errors;
mod fare;
mod gate;
mod jobs;
mod journey;
mod ledger;
mod notification;
mod store;

use fare::{CardClass, FareSchedule};
use gate::scanner::PgScannerDirectory;
use gate::{GateOrchestrator, GateTokenService, TokenRegistry};
use journey::JourneyService;
use ledger::CardLedger;
use notification::Notifier;
use store::postgres::PgStore;

/// Shared application state passed to handlers.
pub struct AppState {
    pub config: config::Config,
    pub store: PgStore,
    pub fares: FareSchedule,
    pub tokens: GateTokenService,
    pub journeys: JourneyService,
    pub ledger: CardLedger,
    pub gate: GateOrchestrator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "faregate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Card { command }) => {
            let state = build_state(cfg).await?;
            handle_card_command(command, &state).await
        }
        Some(cli::Commands::Station { command }) => {
            let state = build_state(cfg).await?;
            handle_station_command(command, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Connect collaborators and assemble the service graph.
async fn build_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let store = PgStore::connect(&cfg.database_url)
        .await
        .context("failed to connect to database")?;

    let notifier = Notifier::new(cfg.webhook_urls.clone(), cfg.webhook_secret.clone());

    let registry = TokenRegistry::new();
    let scanners = Arc::new(PgScannerDirectory::new(store.clone()));
    let tokens = GateTokenService::new(
        registry,
        scanners,
        chrono::Duration::seconds(cfg.token_validity_secs),
    );

    let journeys = JourneyService::new(
        store.clone(),
        cfg.fares,
        notifier.clone(),
        cfg.min_entry_balance,
        cfg.low_balance_threshold,
    );
    let ledger = CardLedger::new(store.clone(), cfg.payment_secret.clone(), notifier);
    let gate = GateOrchestrator::new(tokens.clone(), journeys.clone(), store.clone());

    Ok(Arc::new(AppState {
        fares: cfg.fares,
        config: cfg,
        store,
        tokens,
        journeys,
        ledger,
        gate,
    }))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let state = build_state(cfg).await?;

    tracing::info!("Running migrations...");
    state.store.migrate().await?;

    let app = axum::Router::new()
        // Health endpoints (no auth)
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .nest("/api/v1", api::api_router())
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(64 * 1024))
        // A gate scan must answer quickly or not at all.
        .layer(tower_http::timeout::TimeoutLayer::new(
            std::time::Duration::from_secs(10),
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::Method;
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("FAREGATE_DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    axum::http::HeaderName::from_static("content-type"),
                    axum::http::HeaderName::from_static("authorization"),
                    axum::http::HeaderName::from_static("x-request-id"),
                ])
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    // Periodic gate-token sweep (the registry also sweeps inline).
    jobs::sweep::spawn(state.tokens.registry().clone());
    tracing::info!("Background token sweep started (every 60s)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("faregate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn readiness_check() -> &'static str {
    "ok"
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate gate denials with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.remove("Server");

    resp
}

async fn handle_card_command(
    cmd: cli::CardCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        cli::CardCommands::Create { rider_id, class } => {
            let class = parse_card_class(&class)?;
            let card = state.ledger.issue_card(&rider_id, class).await?;
            println!(
                "Card issued:\n  ID:      {}\n  Number:  {}\n  Class:   {:?}\n  Balance: {}",
                card.id, card.card_number, card.card_class, card.balance
            );
        }
        cli::CardCommands::List { rider_id } => {
            let cards = state.ledger.list_cards(&rider_id).await?;
            if cards.is_empty() {
                println!("No cards found.");
            } else {
                println!(
                    "{:<38} {:<18} {:<16} {:<10} ACTIVE",
                    "ID", "NUMBER", "CLASS", "BALANCE"
                );
                for c in cards {
                    println!(
                        "{:<38} {:<18} {:<16} {:<10} {}",
                        c.id,
                        c.card_number,
                        format!("{:?}", c.card_class),
                        c.balance,
                        c.is_active
                    );
                }
            }
        }
        cli::CardCommands::Credit { card_id, amount } => {
            let card_id = uuid::Uuid::parse_str(&card_id).context("Invalid card ID")?;
            let amount: Decimal = amount.parse().context("Invalid amount")?;
            let balance = state.ledger.credit(card_id, amount).await?;
            println!("Card credited. New balance: {}", balance);
        }
    }
    Ok(())
}

async fn handle_station_command(
    cmd: cli::StationCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        cli::StationCommands::List => {
            let stations = state.store.list_stations().await?;
            if stations.is_empty() {
                println!("No stations found.");
            } else {
                println!("{:<24} {:<28} {:<8} LINE", "ID", "NAME", "CODE");
                for s in stations {
                    println!("{:<24} {:<28} {:<8} {}", s.id, s.name, s.code, s.line);
                }
            }
        }
    }
    Ok(())
}

fn parse_card_class(raw: &str) -> anyhow::Result<CardClass> {
    match raw.to_uppercase().as_str() {
        "REGULAR" => Ok(CardClass::Regular),
        "STUDENT" => Ok(CardClass::Student),
        "SENIOR_CITIZEN" => Ok(CardClass::SeniorCitizen),
        "DISABLED" => Ok(CardClass::Disabled),
        other => anyhow::bail!(
            "invalid card class: {}. Must be REGULAR, STUDENT, SENIOR_CITIZEN or DISABLED",
            other
        ),
    }
}
