//! Compiled contract artifacts.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use anyhow::Context;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::ArtifactRef;

/// Bytecode of a compiled contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: ArtifactRef,
    pub bytecode: Bytes,
}

impl Artifact {
    /// Hex-encoded SHA-256 of the creation bytecode.
    pub fn code_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytecode);
        hex::encode(hasher.finalize())
    }
}

/// Truffle writes `"bytecode": "0x.."`, Foundry writes
/// `"bytecode": { "object": "0x.." }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Plain(String),
    Object { object: String },
}

#[derive(Deserialize)]
struct ArtifactFile {
    bytecode: BytecodeField,
}

/// Directory of `<Name>.json` artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, artifact: &ArtifactRef) -> PathBuf {
        self.dir.join(format!("{artifact}.json"))
    }

    pub fn load(&self, artifact: &ArtifactRef) -> anyhow::Result<Artifact> {
        let path = self.path_of(artifact);
        let content = std::fs::read_to_string(&path)
            .context(format!("Failed to read artifact {}", path.display()))?;
        let file: ArtifactFile = serde_json::from_str(&content)
            .context(format!("Failed to parse artifact {}", path.display()))?;

        let hex_code = match file.bytecode {
            BytecodeField::Plain(code) => code,
            BytecodeField::Object { object } => object,
        };
        let bytecode = hex::decode(hex_code.trim_start_matches("0x"))
            .context(format!("Artifact {} has malformed bytecode", path.display()))?;

        if bytecode.is_empty() {
            anyhow::bail!(
                "Artifact {} has no bytecode (abstract contract or interface?)",
                path.display()
            );
        }

        Ok(Artifact {
            name: artifact.clone(),
            bytecode: Bytes::from(bytecode),
        })
    }
}
