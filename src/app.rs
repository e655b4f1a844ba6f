use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api;
use crate::auth;
use crate::config;
use crate::data::{
    AccountService, ApiAccountService, ApiFeedService, ApiShareService, FeedService,
    MockAccountService, MockFeedService, ShareService,
};
use crate::feed::FeedController;
use crate::logging;
use crate::session::{self, SharedToken};
use crate::storage;
use crate::ui;
use crate::video::{MpvStage, StageConfig};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub offline: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let config_path = opts.config_file.clone().or_else(config::default_path);
    let display_path = friendly_path(config_path.as_ref());

    let log_path = match logging::init() {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };
    info!(version = crate::VERSION, config = %display_path, "starting");

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
    let token = SharedToken::default();
    let offline = opts.offline || cfg.api.offline;

    let (feed_service, share_service, account_service): (
        Arc<dyn FeedService>,
        Arc<dyn ShareService>,
        Arc<dyn AccountService>,
    ) = if offline {
        info!("offline mode, using sample data");
        let feeds = MockFeedService::default();
        let shares = feeds.share_service("you");
        (
            Arc::new(feeds),
            Arc::new(shares),
            Arc::new(MockAccountService::new(Arc::clone(&store))),
        )
    } else {
        let client = api::Client::new(api::ClientConfig {
            base_url: cfg.api.base_url.clone(),
            user_agent: cfg.api.user_agent.clone(),
            timeout: cfg.api.timeout,
            http_client: None,
        })
        .context("create api client")?
        .with_token_provider(Arc::new(token.clone()));
        let client = Arc::new(client);
        info!(base_url = %client.base_url(), "api client ready");
        (
            Arc::new(ApiFeedService::new(Arc::clone(&client))),
            Arc::new(ApiShareService::new(Arc::clone(&client))),
            Arc::new(ApiAccountService::new(client)),
        )
    };

    let qr_dir = auth::default_qr_dir().unwrap_or_else(std::env::temp_dir);
    let session = Arc::new(session::Manager::new(
        Arc::clone(&store),
        auth::Flow::new(account_service),
        token,
        qr_dir,
    ));
    if let Err(err) = session.load_existing() {
        warn!(%err, "failed to restore session");
    }

    let stage = MpvStage::new(StageConfig {
        command: cfg.player.video_command.clone(),
        autoplay: cfg.player.autoplay,
    });
    let controller =
        FeedController::new(stage, cfg.feed.swipe_guard).with_start_muted(cfg.player.start_muted);

    let mode = if offline { "offline" } else { "online" };
    let mut status_message = format!("Config: {display_path} · {mode}");
    if let Some(path) = log_path.as_ref() {
        status_message.push_str(&format!(" · log: {}", friendly_path(Some(path))));
    }

    let mut model = ui::Model::new(ui::Options {
        controller,
        feed_service,
        share_service,
        session,
        load_private: cfg.feed.load_private,
        status_message,
    });
    let result = model.run();
    info!("exiting");
    result
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/funny-tui/config.yaml".to_string()
    }
}
