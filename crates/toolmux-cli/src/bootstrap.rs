//! CLI bootstrap - the composition root.
//!
//! The only place where concrete implementations are chosen:
//! - config store (`toolmux-store`, JSON file)
//! - environment resolver and runtime context (`toolmux-mcp`)
//! - session factory and connection manager (`toolmux-mcp`)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use toolmux_core::paths::{ResolvedPaths, ensure_directory};
use toolmux_core::{NoopEmitter, ServerConfigRepository, Settings};
use toolmux_mcp::{
    ConnectionManager, EnvironmentResolver, McpSessionFactory, RuntimeBundle, RuntimeContext,
    SandboxLayout,
};
use toolmux_store::JsonFileServerRepository;

use crate::error::CliError;

/// Bootstrap configuration for the CLI.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Data directory override. `None` uses the platform default.
    pub data_dir: Option<PathBuf>,
}

/// Fully composed context for CLI commands.
pub struct CliContext {
    pub paths: ResolvedPaths,
    pub settings: Settings,
    pub repository: Arc<dyn ServerConfigRepository>,
    pub resolver: Arc<EnvironmentResolver>,
    pub manager: ConnectionManager,
}

/// Build the runtime context from settings: stage the bundled runtime under
/// the data root when one is configured, install packages under it always.
pub fn runtime_context(paths: &ResolvedPaths, settings: &Settings) -> RuntimeContext {
    let context = RuntimeContext::default().with_packages_dir(&paths.packages_dir);
    match settings.runtime_bundle_dir.as_deref() {
        Some(source) => context.with_bundle(RuntimeBundle::new(source, &paths.runtime_dir)),
        None => context,
    }
}

/// Bootstrap the CLI application.
pub async fn bootstrap(config: CliConfig) -> Result<CliContext> {
    let paths = match config.data_dir {
        Some(dir) => ResolvedPaths::under(dir),
        None => ResolvedPaths::resolve().map_err(CliError::from)?,
    };
    ensure_directory(&paths.root).map_err(CliError::from)?;

    let settings = Settings::load(&paths.settings_file).map_err(CliError::from)?;

    let repository: Arc<dyn ServerConfigRepository> = Arc::new(
        JsonFileServerRepository::open(&paths.servers_file)
            .await
            .map_err(CliError::from)?,
    );

    let layout = SandboxLayout::from_configured(settings.sandbox_root.as_deref());
    let resolver = Arc::new(EnvironmentResolver::new(layout));

    let sessions = Arc::new(McpSessionFactory::new(
        Arc::clone(&resolver),
        runtime_context(&paths, &settings),
        settings.effective_client_name(),
    ));

    // No frontend to broadcast events to
    let manager = ConnectionManager::new(
        Arc::clone(&repository),
        sessions,
        Arc::new(NoopEmitter::new()),
        settings.clone(),
    );

    tracing::debug!(root = %paths.root.display(), "CLI context ready");

    Ok(CliContext {
        paths,
        settings,
        repository,
        resolver,
        manager,
    })
}
