use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use workspace_token::config::Config;
use workspace_token::factory::build_token_manager;
use workspace_token::jwt::{TokenGrant, TokenType};
use workspace_token::kms::LocalKeyProvider;
use workspace_token::metrics::TokenMetrics;
use workspace_token::observability::{init_tracing, SERVICE_NAME};
use workspace_token::refresh::TokenManager;

const USAGE: &str = "usage: workspace-token issue <user> [group...] | validate <token>";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.tracing)?;

    info!(service = SERVICE_NAME, signing_type = config.signing_type.as_str(), "Starting");

    let provider = Arc::new(LocalKeyProvider::new(config.master_key));
    let metrics = Arc::new(TokenMetrics::new().context("failed to register metrics")?);
    let manager = build_token_manager(&config, provider, metrics)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.split_first() {
        Some((command, rest)) if command == "issue" => issue(&manager, rest).await,
        Some((command, [token])) if command == "validate" => validate(&manager, token).await,
        _ => bail!(USAGE),
    }
}

async fn issue(manager: &TokenManager, args: &[String]) -> Result<()> {
    let Some((user, groups)) = args.split_first() else {
        bail!(USAGE);
    };

    let grant = TokenGrant::new(user.clone(), TokenType::Session).with_groups(groups.to_vec());
    let token = manager.generate_token(&grant).await?;
    println!("{}", token);
    Ok(())
}

async fn validate(manager: &TokenManager, token: &str) -> Result<()> {
    let claims = manager.validate_token(token).await?;

    let report = serde_json::json!({
        "claims": claims,
        "shouldRefresh": manager.should_refresh(&claims),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
