//! Sign a results file and publish it from inside a GitHub Actions run.
//!
//! ```text
//! cargo run --example sign_and_publish -- results.json
//! ```
//!
//! Needs `permissions: id-token: write` on the workflow. Set `RUST_LOG=debug`
//! to see the bundle.

use log::{error, info};
use scorecard_signing::{
    GithubActionsIdentity, IdentityProvider, RetryingPublisher, SigningSession,
    trust::tuf::TufTrustRoot,
};
use std::process::ExitCode;

const ENV_REPO_TOKEN: &str = "INPUT_INTERNAL_DEFAULT_TOKEN";
const ENV_PUBLISH_BASE_URL: &str = "INPUT_INTERNAL_PUBLISH_BASE_URL";
const ENV_PUBLISH_RESULTS: &str = "INPUT_PUBLISH_RESULTS";
const ENV_EVENT_NAME: &str = "GITHUB_EVENT_NAME";
const ENV_REPOSITORY: &str = "GITHUB_REPOSITORY";
const ENV_REF: &str = "GITHUB_REF";

const DEFAULT_PUBLISH_BASE_URL: &str = "https://api.scorecard.dev";

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let event = env(ENV_EVENT_NAME);
    if event == "pull_request_target" {
        return Err("pull_request_target trigger is not supported for security reasons".into());
    }
    // `pull_request` runs lack the id-token permission
    if env(ENV_PUBLISH_RESULTS) != "true" || event == "pull_request" {
        info!("Publishing disabled, nothing to do");
        return Ok(());
    }

    let results_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "results.json".to_string());
    let payload = tokio::fs::read(&results_path).await?;
    let result = std::str::from_utf8(&payload)?;

    let identity = GithubActionsIdentity::from_env()?;
    info!("Requesting identity token from {}", identity.provider_type());
    let identity_token = identity.identity_token().await?;

    let session = SigningSession::new(&env(ENV_REPO_TOKEN), &identity_token)?;
    let signed = session.sign(&payload, &TufTrustRoot::new()?).await?;

    let base_url = std::env::var(ENV_PUBLISH_BASE_URL)
        .unwrap_or_else(|_| DEFAULT_PUBLISH_BASE_URL.to_string());
    let publisher = RetryingPublisher::new(&base_url)?;
    session
        .publish(
            &publisher,
            result,
            &env(ENV_REPOSITORY),
            &env(ENV_REF),
            &signed,
        )
        .await?;

    info!("Published results at tlog index {}", signed.tlog_index);
    Ok(())
}
