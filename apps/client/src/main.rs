use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobmatch_client::api_client::ApiClient;
use jobmatch_client::config::Config;
use jobmatch_client::credentials::FileCredentialStore;
use jobmatch_client::matching::MatchStatus;
use jobmatch_client::models::LoginCredentials;
use jobmatch_client::session::SessionStatus;
use jobmatch_client::state::{AppState, Backends};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting jobmatch client v{}", env!("CARGO_PKG_VERSION"));

    let settings = config.settings();
    let client = ApiClient::new(&config.api_base_url, settings.request_timeout)
        .context("Failed to build HTTP client")?;
    info!("API client initialized ({})", config.api_base_url);

    let app = AppState::new(
        settings,
        Backends::single(Arc::new(client)),
        Arc::new(FileCredentialStore::new(config.credential_path.clone())),
    );

    if app.start().await == SessionStatus::Anonymous {
        let (Some(email), Some(password)) = (config.login_email.clone(), config.login_password.clone())
        else {
            bail!("No stored session; set LOGIN_EMAIL and LOGIN_PASSWORD to sign in");
        };
        if let Err(e) = app.login(&LoginCredentials { email, password }).await {
            let notice = e.notice();
            bail!("{}: {}", notice.code, notice.message);
        }
    }

    let Some(session) = app.session.current() else {
        bail!("Session ended during startup");
    };
    info!("Signed in as {} <{}>", session.display_name, session.email);

    match app.search_committed().await {
        Ok(outcome) => info!("Search finished: {outcome:?}"),
        Err(e) => {
            let notice = e.notice();
            warn!("{}: {}", notice.code, notice.message);
            return Ok(());
        }
    }

    let cards = tokio::time::timeout(Duration::from_secs(30), app.resolved_job_cards())
        .await
        .context("Timed out waiting for match scores")?;

    for card in cards {
        let score = match &card.score {
            MatchStatus::Ready(record) => format!("{:>3}%", record.percent()),
            _ => "  ?".to_string(),
        };
        let saved = if card.saved.saved { "*" } else { " " };
        println!(
            "{saved} {score}  {} at {} ({})",
            card.job.title, card.job.company, card.job.location
        );
    }

    Ok(())
}
