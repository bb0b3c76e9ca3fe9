use std::sync::Arc;
use std::time::Duration;

use clap::arg;
use clap::command;
use clap::Parser;
use directory_facade::cache::token_cache::TokenCache;
use directory_facade::directory::scim::ScimDirectoryClient;
use directory_facade::directory::Directory;
use directory_facade::reset::events::{log_events, EventPublisher};
use directory_facade::reset::protocol::EntitlementResetTokens;
use directory_facade::reset::workflow::PasswordResetWorkflow;
use directory_facade::server;
use directory_facade::sources::oauth2::OAuth2TokenSource;
use directory_facade::utils::config_loader;
use directory_facade::utils::logging;
use directory_facade::utils::logging::LogLevel;
use anyhow::Result;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "directory-facade.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL" , value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Load YAML config, init logging
    // -------------------------------

    let args = Args::parse();
    let service_config = config_loader::run(&args.config).await?;
    logging::run(&service_config, args.log_level.to_owned()).await?;

    let request_timeout = Duration::from_millis(service_config.directory.request_timeout_ms);

    // -------------------------------
    // 2. Shared token cache over the client credentials source
    // -------------------------------

    let token_source = OAuth2TokenSource::new(service_config.oauth.clone(), request_timeout)?;
    let refresh_budget = token_source.refresh_budget();
    info!("token refresh may take up to {} ms including retries", refresh_budget.as_millis());
    let tokens = Arc::new(
        TokenCache::new(Arc::new(token_source), service_config.oauth.safety_margin_seconds)
            .with_refresh_timeout(refresh_budget),
    );

    // -------------------------------
    // 3. Directory client
    // -------------------------------

    let scim = ScimDirectoryClient::new(&service_config.directory.base_url, request_timeout)?;
    let directory = Directory::new(tokens, Arc::new(scim), request_timeout);

    // -------------------------------
    // 4. Workflow and event listener
    // -------------------------------

    let events = EventPublisher::new();
    let event_listener = log_events(events.subscribe());
    let workflow = Arc::new(PasswordResetWorkflow::new(
        directory,
        Arc::new(EntitlementResetTokens::new()),
        service_config.reset.reset_url_allow_list.clone(),
        events,
    ));

    // -------------------------------
    // 5. Start http server
    // -------------------------------

    let http_server = server::server::start(&service_config.settings, workflow);

    info!("Service starting...");
    tokio::select! {
        result = http_server => result?,
        result = event_listener => result?,
    }

    Ok(())
}
