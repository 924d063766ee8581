//! Tail the real-time stream of one DonorLink session.
//!
//! Environment (a `.env` file is honoured):
//!   DONORLINK_IDENTITY_ID  - identity the session belongs to (required)
//!   DONORLINK_TOKEN        - bearer token; empty means no connection attempt
//!   DONORLINK_ROLE         - donor | volunteer | ngo_staff | ngo_admin | platform_admin
//!   DONORLINK_ORG_ID       - organization for NGO roles (optional)
//! plus the `DONORLINK_*` connection settings and `LOG_*` logging settings.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};

use donorlink_core::{Identity, Role, Session};
use donorlink_realtime::{
    init_tracing, Collaborators, HttpApi, LogConfig, RealtimeConfig, SessionContext, WsConnector,
};

fn session_from_env() -> anyhow::Result<Session> {
    let identity_id =
        std::env::var("DONORLINK_IDENTITY_ID").context("DONORLINK_IDENTITY_ID is not set")?;
    let role: Role = std::env::var("DONORLINK_ROLE")
        .unwrap_or_else(|_| "donor".to_string())
        .parse()
        .context("DONORLINK_ROLE")?;
    let token = std::env::var("DONORLINK_TOKEN").unwrap_or_default();

    let mut identity = Identity::new(identity_id, role);
    if let Ok(org_id) = std::env::var("DONORLINK_ORG_ID") {
        identity = identity.with_organization(org_id);
    }
    Ok(Session::new(identity, token))
}

fn status_line(context: &SessionContext) -> String {
    let progress = context.progress().snapshot();
    format!(
        "[{}] unread={} points={} level={} badges={} celebration={:?} toasts={}",
        context.connection_state(),
        context.inbox().unread_count(),
        progress.points,
        progress.level,
        progress.badges.len(),
        context.progress().celebration(),
        context.toasts().len(),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing(&LogConfig::from_env());

    let config = RealtimeConfig::from_env();
    let session = session_from_env()?;
    info!(
        identity_id = %session.identity.id,
        role = %session.identity.role,
        ws_url = %config.ws_url,
        api_url = %config.api_url,
        reconnect = %config.reconnect,
        "Starting donorlink-watch"
    );

    let api = Arc::new(HttpApi::new(config.api_url.clone(), session.auth_token.clone()));
    let connector = Arc::new(
        WsConnector::new(config.ws_url.clone()).with_outbound_buffer(config.outbound_buffer),
    );
    let collaborators = Collaborators {
        connector,
        fetcher: api.clone(),
        inbox_api: api.clone(),
        progress_api: Some(api),
    };

    let mut context = SessionContext::start(Some(session), config, collaborators);

    if let Err(e) = context.inbox().open().await {
        warn!(error = %e, "Initial inbox load failed");
    }
    if let Err(e) = context.load_progress().await {
        warn!(error = %e, "Initial progress load failed");
    }
    println!("{}", status_line(&context));

    let mut state = context.state_changes();
    let mut inbox = context.inbox().changes();
    let mut progress = context.progress().changes();

    // Without a connection the state sender is already gone.
    let mut state_open = context.connection().is_some();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            changed = state.changed(), if state_open => {
                if changed.is_err() {
                    state_open = false;
                    continue;
                }
                if context.inbox().needs_reload() {
                    if let Err(e) = context.inbox().open().await {
                        warn!(error = %e, "Inbox reload failed");
                    }
                }
            }
            Ok(()) = inbox.changed() => {}
            Ok(()) = progress.changed() => {}
        }
        println!("{}", status_line(&context));
    }

    context.shutdown().await;
    Ok(())
}
