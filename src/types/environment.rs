//! Environment data model and registry.
//!
//! An [`Environment`] is a versioned, independently installable
//! SDK+toolchain bundle. It is created when first observed (from the
//! remote index or a local filesystem scan), mutated exclusively by
//! orchestrator stage completions, and destroyed only when it has no
//! remaining remote toolchains and has been removed locally.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::hash::Sha512Digest;
use super::version::EnvVersion;

/// A downloadable archive (with checksum) providing the compiler/build
/// tools for an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    /// Archive filename, appended to the index base URL.
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub sha512: Sha512Digest,
    /// Override download location, used for locally-supplied packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// UI-facing label for the currently running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Downloading,
    Installing,
    Removing,
}

/// The single in-flight operation of an environment.
///
/// Replaces a trio of mutually exclusive booleans: at most one operation
/// may run per environment, so one optional enum field is the invariant
/// made structural. The boolean views remain as accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    InstallingToolchain,
    CloningSdk,
    Removing,
}

/// A versioned SDK+toolchain bundle and its lifecycle state.
#[derive(Debug, Clone)]
pub struct Environment {
    pub version: EnvVersion,
    /// Present iff a completed install exists.
    pub toolchain_dir: Option<PathBuf>,
    /// Ordered remote toolchain descriptors; empty once only locally known.
    pub toolchains: Vec<Toolchain>,
    /// Set while an operation is running.
    pub stage: Option<Stage>,
    /// 0-100, defined only while `stage` is set.
    pub progress: Option<u8>,
    pub op: Option<OpKind>,
    /// True once repository sync has completed at least once.
    pub west_present: bool,
    /// Managed environments are removed through the external SDK tool's
    /// own uninstall in addition to the safe remover.
    pub managed: bool,
}

impl Environment {
    /// An environment first observed in the remote index.
    pub fn from_index(version: EnvVersion, toolchains: Vec<Toolchain>, managed: bool) -> Self {
        Self {
            version,
            toolchain_dir: None,
            toolchains,
            stage: None,
            progress: None,
            op: None,
            west_present: false,
            managed,
        }
    }

    /// An environment first observed as a local install.
    pub fn from_local(version: EnvVersion, toolchain_dir: PathBuf, west_present: bool) -> Self {
        Self {
            version,
            toolchain_dir: Some(toolchain_dir),
            toolchains: Vec::new(),
            stage: None,
            progress: None,
            op: None,
            west_present,
            managed: false,
        }
    }

    /// Derived: a completed install exists and nothing is running.
    pub fn is_installed(&self) -> bool {
        self.toolchain_dir.is_some() && self.op.is_none()
    }

    pub fn is_busy(&self) -> bool {
        self.op.is_some()
    }

    pub fn is_installing_toolchain(&self) -> bool {
        self.op == Some(OpKind::InstallingToolchain)
    }

    pub fn is_cloning_sdk(&self) -> bool {
        self.op == Some(OpKind::CloningSdk)
    }

    pub fn is_removing(&self) -> bool {
        self.op == Some(OpKind::Removing)
    }

    /// Enter an operation, setting its UI stage and zeroing progress.
    pub(crate) fn begin_op(&mut self, op: OpKind, stage: Stage) {
        self.op = Some(op);
        self.stage = Some(stage);
        self.progress = Some(0);
    }

    /// Leave whatever operation was running, clearing stage and progress.
    pub(crate) fn end_op(&mut self) {
        self.op = None;
        self.stage = None;
        self.progress = None;
    }
}

/// In-memory registry of all known environments.
///
/// Observation is a merge: remote data refreshes `toolchains` without
/// touching local install state, and local data refreshes install state
/// without touching remote descriptors.
#[derive(Debug, Default)]
pub struct EnvRegistry {
    envs: HashMap<EnvVersion, Environment>,
}

impl EnvRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, version: &EnvVersion) -> Option<&Environment> {
        self.envs.get(version)
    }

    pub fn get_mut(&mut self, version: &EnvVersion) -> Option<&mut Environment> {
        self.envs.get_mut(version)
    }

    pub fn contains(&self, version: &EnvVersion) -> bool {
        self.envs.contains_key(version)
    }

    /// Merge a remote index observation.
    pub fn observe_remote(&mut self, version: EnvVersion, toolchains: Vec<Toolchain>, managed: bool) {
        match self.envs.get_mut(&version) {
            Some(env) => {
                env.toolchains = toolchains;
                env.managed = managed;
            }
            None => {
                let env = Environment::from_index(version.clone(), toolchains, managed);
                self.envs.insert(version, env);
            }
        }
    }

    /// Merge a local filesystem observation.
    pub fn observe_local(&mut self, version: EnvVersion, toolchain_dir: PathBuf, west: bool) {
        match self.envs.get_mut(&version) {
            Some(env) => {
                // Never clobber the state of an in-flight operation from a
                // concurrent read-only scan.
                if env.op.is_none() {
                    env.toolchain_dir = Some(toolchain_dir);
                    env.west_present = west;
                }
            }
            None => {
                let env = Environment::from_local(version.clone(), toolchain_dir, west);
                self.envs.insert(version, env);
            }
        }
    }

    /// Drop an environment from the registry entirely.
    pub fn drop_entity(&mut self, version: &EnvVersion) {
        self.envs.remove(version);
    }

    /// All environments, newest version first.
    pub fn sorted(&self) -> Vec<Environment> {
        let mut all: Vec<Environment> = self.envs.values().cloned().collect();
        all.sort_by(|a, b| b.version.cmp(&a.version));
        all
    }

    /// The newest known version, if any.
    pub fn latest(&self) -> Option<&Environment> {
        self.envs.values().max_by(|a, b| a.version.cmp(&b.version))
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }
}
