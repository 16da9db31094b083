//! The environment manager: orchestration of the install, update, and
//! remove pipelines.
//!
//! The manager owns the registry of known environments and sequences
//! every pipeline stage: conflict check, checksum-verified download,
//! unpack, repository sync. All per-environment mutation happens here, on
//! stage boundaries; the io and sync layers below stay stateless.
//!
//! Progress is a single 0-100 scale per operation. Download owns the
//! first half, unpack the second; the sync stage reports repository
//! labels instead of percentages. The scaled value is monotonic and
//! deduplicated before it reaches the registry or the reporter.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tracing::{info, warn};

use crate::core::discover::scan_install_root;
use crate::core::index::{download_url, fetch_index};
use crate::io::download::{download_and_verify, sha512_file};
use crate::io::unpack::{detect_kind, unpacker_for};
use crate::io::ProgressFn;
use crate::ops::cancel::{CancelRegistry, CancelToken};
use crate::ops::conflict::ensure_clean_target_dir;
use crate::ops::error::EnvError;
use crate::ops::remove::safe_remove;
use crate::ops::sync::{managed_uninstall, sync_repositories, SyncEvent, SyncMode};
use crate::types::{EnvRegistry, EnvVersion, Environment, OpKind, Stage, Toolchain};
use crate::ui::{LogReporter, Reporter};
use crate::{default_install_root, downloads_path, env_dir, filename_from_url, toolchain_dir, WEST_CONFIG};

/// Published environment index queried by default.
pub const DEFAULT_INDEX_URL: &str =
    "https://developer.nordicsemi.com/.pc-tools/toolchain/index.json";

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub install_root: PathBuf,
    pub index_url: String,
    /// Repository synchronizer program.
    pub west_program: String,
    /// Managed SDK tool used for compound uninstall.
    pub tool_program: String,
    /// Whether the managed tool emits newline-delimited JSON events.
    pub json_tool_events: bool,
}

impl EnvConfig {
    pub fn new(install_root: impl Into<PathBuf>, index_url: impl Into<String>) -> Self {
        Self {
            install_root: install_root.into(),
            index_url: index_url.into(),
            west_program: "west".into(),
            tool_program: "nrfutil-sdk-manager".into(),
            json_tool_events: true,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new(default_install_root(), DEFAULT_INDEX_URL)
    }
}

struct Shared {
    config: EnvConfig,
    client: Client,
    registry: Mutex<EnvRegistry>,
    cancels: CancelRegistry,
    reporter: Box<dyn Reporter>,
}

/// Handle to the manager. Cheap to clone; all clones share one registry
/// and one cancellation arena.
#[derive(Clone)]
pub struct EnvManager {
    inner: Arc<Shared>,
}

impl EnvManager {
    pub fn new(config: EnvConfig) -> Self {
        Self::with_reporter(config, Box::new(LogReporter))
    }

    pub fn with_reporter(config: EnvConfig, reporter: Box<dyn Reporter>) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                client: Client::new(),
                registry: Mutex::new(EnvRegistry::new()),
                cancels: CancelRegistry::new(),
                reporter,
            }),
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.inner.config
    }

    /// Fetch the remote index and merge it into the registry.
    pub async fn refresh_index(&self) -> Result<(), EnvError> {
        let entries = fetch_index(&self.inner.client, &self.inner.config.index_url).await?;
        let mut registry = self.lock_registry();
        for entry in entries {
            registry.observe_remote(entry.version, entry.toolchains, entry.managed);
        }
        Ok(())
    }

    /// Scan the install root and merge completed installs into the
    /// registry. Never touches environments with an operation in flight.
    pub fn discover_local(&self) -> Result<(), EnvError> {
        let found = scan_install_root(&self.inner.config.install_root)?;
        let mut registry = self.lock_registry();
        for install in found {
            registry.observe_local(install.version, install.toolchain_dir, install.west_present);
        }
        Ok(())
    }

    /// All known environments, newest first.
    pub fn environments(&self) -> Vec<Environment> {
        self.lock_registry().sorted()
    }

    pub fn environment(&self, version: &EnvVersion) -> Option<Environment> {
        self.lock_registry().get(version).cloned()
    }

    /// Request cancellation of the operation running on `version`.
    /// Returns false when nothing is in flight.
    pub fn cancel(&self, version: &EnvVersion) -> bool {
        let signalled = self.inner.cancels.cancel(version);
        if signalled {
            info!("cancellation requested for {}", version.as_str());
        }
        signalled
    }

    /// Install an environment end to end: conflict check, download,
    /// unpack, repository init.
    ///
    /// A second install request while one is running is a no-op.
    /// Cancellation is a success path: a fresh install is rolled back to
    /// "not installed", a re-install of an existing environment keeps it.
    pub async fn install(
        &self,
        version: &EnvVersion,
        accept_conflict_removal: &(dyn Fn(&Path) -> bool + Sync),
    ) -> Result<(), EnvError> {
        self.run_install(version, SyncMode::Init, accept_conflict_removal)
            .await
    }

    /// Same pipeline as [`install`](Self::install), but the repository
    /// tree is updated in place instead of re-initialized.
    pub async fn update_toolchain(
        &self,
        version: &EnvVersion,
        accept_conflict_removal: &(dyn Fn(&Path) -> bool + Sync),
    ) -> Result<(), EnvError> {
        self.run_install(version, SyncMode::Update, accept_conflict_removal)
            .await
    }

    async fn run_install(
        &self,
        version: &EnvVersion,
        mode: SyncMode,
        accept_conflict_removal: &(dyn Fn(&Path) -> bool + Sync),
    ) -> Result<(), EnvError> {
        let (toolchain, was_installed) = {
            let mut registry = self.lock_registry();
            let env = registry
                .get_mut(version)
                .ok_or_else(|| EnvError::NoPackage(version.to_string()))?;
            if env.is_busy() {
                return Ok(());
            }
            let toolchain = env
                .toolchains
                .first()
                .cloned()
                .ok_or_else(|| EnvError::NoPackage(version.to_string()))?;
            let was_installed = env.toolchain_dir.is_some();
            env.begin_op(OpKind::InstallingToolchain, Stage::Downloading);
            (toolchain, was_installed)
        };
        self.inner.reporter.stage(version, Stage::Downloading);

        let cancel = self.inner.cancels.begin(version);
        let result = self
            .install_pipeline(version, &toolchain, mode, &cancel, accept_conflict_removal)
            .await;
        self.inner.cancels.finish(version);

        match result {
            Ok(()) => {
                let root = &self.inner.config.install_root;
                let west = env_dir(root, version).join(WEST_CONFIG).is_file();
                let tc_dir = toolchain_dir(root, version);
                let mut registry = self.lock_registry();
                if let Some(env) = registry.get_mut(version) {
                    env.toolchain_dir = Some(tc_dir);
                    env.west_present = west;
                    env.end_op();
                }
                drop(registry);
                let detail = match mode {
                    SyncMode::Init => "installed",
                    SyncMode::Update => "updated",
                };
                self.inner.reporter.done(version, detail);
                Ok(())
            }
            Err(e) if e.is_aborted() => {
                self.rollback_cancelled_install(version, was_installed).await;
                self.end_op(version);
                self.inner.reporter.info(&format!(
                    "installation of {} cancelled",
                    version.as_str()
                ));
                Ok(())
            }
            Err(e) => {
                self.end_op(version);
                self.inner.reporter.failed(version, &e.to_string());
                Err(e)
            }
        }
    }

    async fn install_pipeline(
        &self,
        version: &EnvVersion,
        toolchain: &Toolchain,
        mode: SyncMode,
        cancel: &CancelToken,
        accept_conflict_removal: &(dyn Fn(&Path) -> bool + Sync),
    ) -> Result<(), EnvError> {
        let root = &self.inner.config.install_root;
        let env_path = env_dir(root, version);
        let tc_dir = toolchain_dir(root, version);

        // An in-place update relies on the environment's own repository
        // metadata; only markers above the environment are stray then.
        let conflict_scope = match mode {
            SyncMode::Init => env_path.as_path(),
            SyncMode::Update => root.as_path(),
        };
        ensure_clean_target_dir(conflict_scope, accept_conflict_removal)?;
        if cancel.is_cancelled() {
            return Err(EnvError::Aborted);
        }

        // Download half: 0-50.
        let url = download_url(&self.inner.config.index_url, toolchain);
        let archive = downloads_path(root).join(filename_from_url(&url));
        let mut sink = self.progress_sink(version, 0, 50);
        if self.cached_archive_valid(&archive, toolchain).await? {
            info!("reusing cached archive {}", archive.display());
            sink(100);
        } else {
            let expected = (!toolchain.sha512.is_empty()).then_some(&toolchain.sha512);
            download_and_verify(&self.inner.client, &url, &archive, expected, cancel, sink)
                .await?;
        }
        if cancel.is_cancelled() {
            return Err(EnvError::Aborted);
        }

        // Unpack half: 50-100.
        self.set_stage(version, Stage::Installing);
        let kind = detect_kind(&archive)
            .ok_or_else(|| EnvError::Unpack(format!("unrecognized archive: {}", archive.display())))?;
        let sink = self.progress_sink(version, 50, 50);
        unpacker_for(kind)
            .unpack(&archive, &tc_dir, cancel.clone(), sink)
            .await?;

        // Repository sync reports labels, not percentages. The toolchain
        // is in place at this point; the operation flag flips to the
        // sync phase.
        self.set_op(version, OpKind::CloningSdk);
        let mut on_event = self.sync_event_sink(version);
        sync_repositories(
            &self.inner.config.west_program,
            &env_path,
            mode,
            cancel,
            &mut on_event,
        )
        .await
    }

    /// Remove an installed environment.
    ///
    /// Managed environments first run the external SDK tool's own
    /// uninstall, then the directory tree is taken down by the safe
    /// remover. On success the environment either reverts to
    /// "available" (remote toolchains remain) or disappears from the
    /// registry entirely. On failure it stays installed.
    pub async fn remove(&self, version: &EnvVersion) -> Result<(), EnvError> {
        let managed = {
            let mut registry = self.lock_registry();
            let env = match registry.get_mut(version) {
                Some(env) => env,
                None => return Ok(()),
            };
            if env.is_busy() {
                return Ok(());
            }
            if env.toolchain_dir.is_none() {
                return Ok(());
            }
            env.begin_op(OpKind::Removing, Stage::Removing);
            env.managed
        };
        self.inner.reporter.stage(version, Stage::Removing);

        let result = self.remove_pipeline(version, managed).await;

        match result {
            Ok(()) => {
                let mut registry = self.lock_registry();
                let drop_entity = registry
                    .get(version)
                    .map(|env| env.toolchains.is_empty())
                    .unwrap_or(false);
                if drop_entity {
                    registry.drop_entity(version);
                } else if let Some(env) = registry.get_mut(version) {
                    env.toolchain_dir = None;
                    env.west_present = false;
                    env.end_op();
                }
                drop(registry);
                self.inner.reporter.done(version, "removed");
                Ok(())
            }
            Err(e) => {
                // Failed removal leaves the install in place and usable.
                self.end_op(version);
                self.inner.reporter.failed(version, &e.to_string());
                Err(e)
            }
        }
    }

    async fn remove_pipeline(&self, version: &EnvVersion, managed: bool) -> Result<(), EnvError> {
        let config = &self.inner.config;
        if managed {
            // Removal is deliberate; it runs to completion uncancelled.
            let cancel = CancelToken::new();
            let mut on_event = self.sync_event_sink(version);
            managed_uninstall(
                &config.tool_program,
                &config.install_root,
                version,
                config.json_tool_events,
                &cancel,
                &mut on_event,
            )
            .await?;
        }

        let target = env_dir(&config.install_root, version);
        tokio::task::spawn_blocking(move || safe_remove(&target))
            .await
            .map_err(|e| EnvError::Io(io::Error::other(e)))?
    }

    async fn rollback_cancelled_install(&self, version: &EnvVersion, was_installed: bool) {
        if was_installed {
            return;
        }
        let target = env_dir(&self.inner.config.install_root, version);
        let result = tokio::task::spawn_blocking(move || safe_remove(&target)).await;
        if let Ok(Err(e)) = result {
            warn!(
                "could not roll back cancelled install of {}: {e}",
                version.as_str()
            );
        }
    }

    /// A progress callback mapping a stage-local 0-100 onto
    /// `base..base+span` of the overall scale, monotonic and deduplicated.
    fn progress_sink(&self, version: &EnvVersion, base: u8, span: u8) -> ProgressFn {
        let shared = Arc::clone(&self.inner);
        let version = version.clone();
        let mut last: Option<u8> = None;
        Box::new(move |percent: u8| {
            let scaled = base + ((percent.min(100) as u16 * span as u16) / 100) as u8;
            if last.is_some_and(|prev| scaled <= prev) {
                return;
            }
            last = Some(scaled);
            if let Ok(mut registry) = shared.registry.lock() {
                if let Some(env) = registry.get_mut(&version) {
                    env.progress = Some(scaled);
                }
            }
            shared.reporter.progress(&version, scaled);
        })
    }

    fn sync_event_sink(&self, version: &EnvVersion) -> Box<dyn FnMut(SyncEvent) + Send> {
        let shared = Arc::clone(&self.inner);
        let version = version.clone();
        Box::new(move |event| match event {
            SyncEvent::Updating(name) | SyncEvent::TaskBegin(name) => {
                shared.reporter.sync_update(&version, &name);
            }
            SyncEvent::TaskProgress { .. } | SyncEvent::TaskEnd(_) => {}
        })
    }

    /// True when `archive` exists and matches the toolchain's digest.
    async fn cached_archive_valid(
        &self,
        archive: &Path,
        toolchain: &Toolchain,
    ) -> Result<bool, EnvError> {
        if toolchain.sha512.is_empty() || !archive.is_file() {
            return Ok(false);
        }
        let path = archive.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || sha512_file(&path))
            .await
            .map_err(|e| EnvError::Io(io::Error::other(e)))??;
        Ok(toolchain.sha512.matches(&actual))
    }

    fn set_op(&self, version: &EnvVersion, op: OpKind) {
        if let Ok(mut registry) = self.inner.registry.lock() {
            if let Some(env) = registry.get_mut(version) {
                env.op = Some(op);
            }
        }
    }

    fn set_stage(&self, version: &EnvVersion, stage: Stage) {
        if let Ok(mut registry) = self.inner.registry.lock() {
            if let Some(env) = registry.get_mut(version) {
                env.stage = Some(stage);
            }
        }
        self.inner.reporter.stage(version, stage);
    }

    fn end_op(&self, version: &EnvVersion) {
        if let Ok(mut registry) = self.inner.registry.lock() {
            if let Some(env) = registry.get_mut(version) {
                env.end_op();
            }
        }
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, EnvRegistry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
