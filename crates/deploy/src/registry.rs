//! Persisted address registry.
//!
//! The registry maps `(network, module)` to the address the module was
//! deployed at. It is the only state shared between steps and between runs:
//! a re-invoked run discovers what already landed on-chain by reading it.
//!
//! Two stores implement [`AddressRegistry`]:
//! - [`InMemoryRegistry`] for tests and dry runs.
//! - [`FileRegistry`], a JSON file that is rewritten atomically on every
//!   mutation and locked for the lifetime of the handle.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{
    ModuleName, Network,
    error::{DeployError, DeployResult},
};

/// How a module is deployed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProxyKind {
    /// Plain contract, its address is its code.
    None,
    /// Behind an upgradeable proxy, the address survives implementation swaps.
    Upgradeable,
}

/// Whether a write creates a module or upgrades an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    FreshDeploy,
    Upgrade,
}

/// What a deploy or upgrade step hands to the registry after the on-chain
/// action is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub address: Address,
    pub proxy_kind: ProxyKind,
    pub implementation: Option<Address>,
    pub code_hash: Option<String>,
}

/// A registry entry as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub address: Address,
    pub proxy_kind: ProxyKind,
    /// Current implementation behind the proxy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Address>,
    /// SHA-256 of the deployed bytecode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
    /// Starts at 1, bumped by each upgrade.
    pub version: u32,
    pub deployed_at: i64,
    pub updated_at: i64,
}

/// Read/write contract of the registry.
///
/// Reads never mutate. Every successful write is durable before it returns.
pub trait AddressRegistry {
    /// Look up a module entry.
    fn get(&self, network: &Network, module: &ModuleName) -> Option<&RegistryEntry>;

    /// Record a module.
    ///
    /// In [`WriteMode::FreshDeploy`] the module must not be registered yet.
    /// In [`WriteMode::Upgrade`] it must be registered as upgradeable at the
    /// same address; the implementation is replaced and the version bumped.
    fn put(
        &mut self,
        network: &Network,
        module: &ModuleName,
        record: ModuleRecord,
        mode: WriteMode,
    ) -> DeployResult<RegistryEntry>;

    /// All entries of a network.
    fn entries(&self, network: &Network) -> BTreeMap<ModuleName, RegistryEntry>;

    /// Whether a once-only wiring action was already applied.
    fn is_wired(&self, network: &Network, key: &str) -> bool;

    /// Journal a once-only wiring action after it was confirmed on-chain.
    fn mark_wired(&mut self, network: &Network, key: &str) -> DeployResult<()>;

    /// Module name to address for a network.
    fn get_all(&self, network: &Network) -> BTreeMap<ModuleName, Address> {
        self.entries(network)
            .into_iter()
            .map(|(name, entry)| (name, entry.address))
            .collect()
    }

    fn contains(&self, network: &Network, module: &ModuleName) -> bool {
        self.get(network, module).is_some()
    }
}

/// Records of a single network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBook {
    #[serde(default)]
    pub modules: BTreeMap<ModuleName, RegistryEntry>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub wirings: BTreeSet<String>,
}

/// The whole registry content, keyed by network.
///
/// Holds the write rules shared by every store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryBook {
    networks: BTreeMap<Network, NetworkBook>,
}

impl RegistryBook {
    pub fn network(&self, network: &Network) -> Option<&NetworkBook> {
        self.networks.get(network)
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.keys()
    }

    fn get(&self, network: &Network, module: &ModuleName) -> Option<&RegistryEntry> {
        self.networks.get(network)?.modules.get(module)
    }

    fn put(
        &mut self,
        network: &Network,
        module: &ModuleName,
        record: ModuleRecord,
        mode: WriteMode,
    ) -> DeployResult<RegistryEntry> {
        let now = chrono::Utc::now().timestamp();
        let book = self.networks.entry(network.clone()).or_default();

        let entry = match (mode, book.modules.get_mut(module)) {
            (WriteMode::FreshDeploy, Some(_)) => {
                return Err(DeployError::DuplicateModule {
                    network: network.clone(),
                    module: module.clone(),
                });
            }
            (WriteMode::FreshDeploy, None) => {
                let entry = RegistryEntry {
                    address: record.address,
                    proxy_kind: record.proxy_kind,
                    implementation: record.implementation,
                    code_hash: record.code_hash,
                    version: 1,
                    deployed_at: now,
                    updated_at: now,
                };
                book.modules.insert(module.clone(), entry.clone());
                entry
            }
            (WriteMode::Upgrade, None) => {
                return Err(DeployError::UnknownModule {
                    network: network.clone(),
                    module: module.clone(),
                });
            }
            (WriteMode::Upgrade, Some(entry)) => {
                if entry.proxy_kind != ProxyKind::Upgradeable {
                    return Err(DeployError::NotUpgradeable {
                        module: module.clone(),
                    });
                }
                if entry.address != record.address {
                    return Err(DeployError::ProxyAddressChanged {
                        module: module.clone(),
                        recorded: entry.address,
                        proposed: record.address,
                    });
                }
                entry.implementation = record.implementation;
                entry.code_hash = record.code_hash;
                entry.version += 1;
                entry.updated_at = now;
                entry.clone()
            }
        };

        Ok(entry)
    }

    fn entries(&self, network: &Network) -> BTreeMap<ModuleName, RegistryEntry> {
        self.networks
            .get(network)
            .map(|book| book.modules.clone())
            .unwrap_or_default()
    }

    fn is_wired(&self, network: &Network, key: &str) -> bool {
        self.networks
            .get(network)
            .is_some_and(|book| book.wirings.contains(key))
    }

    fn mark_wired(&mut self, network: &Network, key: &str) {
        self.networks
            .entry(network.clone())
            .or_default()
            .wirings
            .insert(key.to_string());
    }
}

/// Registry kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    book: RegistryBook,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(&self) -> &RegistryBook {
        &self.book
    }
}

impl AddressRegistry for InMemoryRegistry {
    fn get(&self, network: &Network, module: &ModuleName) -> Option<&RegistryEntry> {
        self.book.get(network, module)
    }

    fn put(
        &mut self,
        network: &Network,
        module: &ModuleName,
        record: ModuleRecord,
        mode: WriteMode,
    ) -> DeployResult<RegistryEntry> {
        self.book.put(network, module, record, mode)
    }

    fn entries(&self, network: &Network) -> BTreeMap<ModuleName, RegistryEntry> {
        self.book.entries(network)
    }

    fn is_wired(&self, network: &Network, key: &str) -> bool {
        self.book.is_wired(network, key)
    }

    fn mark_wired(&mut self, network: &Network, key: &str) -> DeployResult<()> {
        self.book.mark_wired(network, key);
        Ok(())
    }
}

/// Registry persisted as a JSON file.
///
/// An exclusive lock on `<file>.lock` is held while the handle is alive, so
/// two runs never write the same registry. Every mutation is applied to a
/// copy, written to a temporary file, synced and renamed over the registry
/// file; the in-memory view only changes once that succeeded.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    book: RegistryBook,
    _lock: File,
}

impl FileRegistry {
    /// Open (or create) the registry file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create registry directory {}",
                parent.display()
            ))?;
        }

        let lock_path = sibling(&path, "lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context(format!("Failed to open lock file {}", lock_path.display()))?;
        lock.try_lock_exclusive().context(format!(
            "Registry {} is locked by another run",
            path.display()
        ))?;

        let book = read_book(&path)?;

        tracing::debug!(path = %path.display(), "Registry opened");

        Ok(Self {
            path,
            book,
            _lock: lock,
        })
    }

    /// Read the registry at `path` without taking it over.
    ///
    /// Creates nothing: a missing file reads as an empty registry. A shared
    /// lock is held while reading; if a run holds the registry, the last
    /// committed content is read anyway since every commit is a rename.
    pub fn snapshot(path: impl AsRef<Path>) -> anyhow::Result<InMemoryRegistry> {
        let path = path.as_ref();
        let lock_path = sibling(path, "lock");

        let _lock = match File::open(&lock_path) {
            Ok(lock) => match lock.try_lock_shared() {
                Ok(()) => Some(lock),
                Err(_) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Registry is held by a running migration, reading its last commit"
                    );
                    None
                }
            },
            Err(_) => None,
        };

        Ok(InMemoryRegistry {
            book: read_book(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn book(&self) -> &RegistryBook {
        &self.book
    }

    fn persist(&self, book: &RegistryBook) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(book).context("Failed to serialize registry")?;
        let tmp_path = sibling(&self.path, "tmp");

        let mut tmp = File::create(&tmp_path)
            .context(format!("Failed to create {}", tmp_path.display()))?;
        tmp.write_all(&json)
            .context(format!("Failed to write {}", tmp_path.display()))?;
        tmp.sync_all()
            .context(format!("Failed to sync {}", tmp_path.display()))?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path).context(format!(
            "Failed to move registry into place at {}",
            self.path.display()
        ))?;

        // The rename itself must reach the disk too.
        #[cfg(unix)]
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .context(format!("Failed to sync directory {}", parent.display()))?;
        }

        Ok(())
    }

    fn commit(&mut self, next: RegistryBook) -> DeployResult<()> {
        self.persist(&next)
            .map_err(|e| DeployError::registry(format!("{e:#}")))?;
        self.book = next;
        Ok(())
    }
}

impl AddressRegistry for FileRegistry {
    fn get(&self, network: &Network, module: &ModuleName) -> Option<&RegistryEntry> {
        self.book.get(network, module)
    }

    fn put(
        &mut self,
        network: &Network,
        module: &ModuleName,
        record: ModuleRecord,
        mode: WriteMode,
    ) -> DeployResult<RegistryEntry> {
        let mut next = self.book.clone();
        let entry = next.put(network, module, record, mode)?;
        self.commit(next)?;

        tracing::debug!(
            network = %network,
            module = %module,
            address = %entry.address,
            version = entry.version,
            path = %self.path.display(),
            "Registry entry persisted"
        );

        Ok(entry)
    }

    fn entries(&self, network: &Network) -> BTreeMap<ModuleName, RegistryEntry> {
        self.book.entries(network)
    }

    fn is_wired(&self, network: &Network, key: &str) -> bool {
        self.book.is_wired(network, key)
    }

    fn mark_wired(&mut self, network: &Network, key: &str) -> DeployResult<()> {
        let mut next = self.book.clone();
        next.mark_wired(network, key);
        self.commit(next)
    }
}

fn read_book(path: &Path) -> anyhow::Result<RegistryBook> {
    if !path.exists() {
        return Ok(RegistryBook::default());
    }

    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read registry from {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(RegistryBook::default());
    }

    serde_json::from_str(&content).context(format!(
        "Failed to parse registry file {}",
        path.display()
    ))
}

/// `deployments.json` -> `deployments.json.<ext>`
fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}
