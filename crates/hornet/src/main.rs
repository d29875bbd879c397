use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use hornet_core::{
    config::Config,
    dispatch::PipelineHooks,
    hooks::InMemoryArchive,
    registry::{CommandRegistry, CommandTier},
    session::{ExitStatus, SessionManager},
    settings::SettingsStore,
    state::SharedState,
};
use hornet_gateway::{GatewayConfig, GatewayTransport};

const ARCHIVE_CAPACITY: usize = 512;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hornet_core::logging::init("hornet")?;

    let cfg = Arc::new(Config::load()?);

    let settings = Arc::new(SettingsStore::load(cfg.settings_file.clone()));
    settings.apply_env_overrides(&cfg).await;

    let public = Arc::new(CommandRegistry::load(
        CommandTier::Public,
        hornet_plugins::public_exports(),
    ));
    let owner = Arc::new(CommandRegistry::load(
        CommandTier::OwnerOnly,
        hornet_plugins::owner_exports(),
    ));
    info!(
        "loaded {} public and {} owner commands",
        public.len(),
        owner.len()
    );

    let transport = Arc::new(GatewayTransport::new(GatewayConfig {
        program: cfg.gateway_path.clone(),
        session_dir: cfg.session_dir.clone(),
    }));

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    let manager = SessionManager::new(
        cfg,
        transport,
        settings,
        Arc::new(SharedState::new()),
        public,
        owner,
        PipelineHooks {
            archive: Arc::new(InMemoryArchive::new(ARCHIVE_CAPACITY)),
            moderation: hornet_plugins::moderation_hooks(),
            chat: None,
        },
        shutdown,
    );

    match manager.run().await? {
        ExitStatus::Graceful => info!("shut down cleanly"),
        ExitStatus::TestModeSkip => info!("test mode finished without connecting"),
    }

    Ok(())
}
