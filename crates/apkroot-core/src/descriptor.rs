use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use apkroot_security::normalize_fingerprint;
use serde::{Deserialize, Serialize};

/// Candidate package as reported by the APK metadata reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageDescriptor {
    pub package_name: String,
    pub version_code: i64,
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub signature_fingerprints: BTreeSet<String>,
    #[serde(default)]
    pub is_system_package: bool,
    pub source_path: PathBuf,
    #[serde(default)]
    pub app_label: Option<String>,
    #[serde(default)]
    pub min_sdk: Option<u32>,
    #[serde(default)]
    pub native_abis: Vec<String>,
}

/// Installed copy of the same package, captured when the descriptor was read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExistingInstallState {
    pub version_code: i64,
    #[serde(default)]
    pub version_name: Option<String>,
    pub signature_fingerprints: BTreeSet<String>,
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PackageSnapshot {
    pub candidate: PackageDescriptor,
    pub existing: Option<ExistingInstallState>,
}

/// On-disk layout of a descriptor file: candidate keys at the top level, the installed
/// copy under `[existing]`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorDocument {
    package_name: String,
    version_code: i64,
    #[serde(default)]
    version_name: String,
    #[serde(default)]
    signature_fingerprints: BTreeSet<String>,
    #[serde(default)]
    is_system_package: bool,
    source_path: PathBuf,
    #[serde(default)]
    app_label: Option<String>,
    #[serde(default)]
    min_sdk: Option<u32>,
    #[serde(default)]
    native_abis: Vec<String>,
    #[serde(default)]
    existing: Option<ExistingInstallState>,
}

impl From<DescriptorDocument> for PackageSnapshot {
    fn from(document: DescriptorDocument) -> Self {
        Self {
            candidate: PackageDescriptor {
                package_name: document.package_name,
                version_code: document.version_code,
                version_name: document.version_name,
                signature_fingerprints: document.signature_fingerprints,
                is_system_package: document.is_system_package,
                source_path: document.source_path,
                app_label: document.app_label,
                min_sdk: document.min_sdk,
                native_abis: document.native_abis,
            },
            existing: document.existing,
        }
    }
}

impl PackageDescriptor {
    pub fn file_name(&self) -> Option<&str> {
        self.source_path.file_name().and_then(|name| name.to_str())
    }

    pub fn display_name(&self) -> &str {
        self.app_label.as_deref().unwrap_or(&self.package_name)
    }

    fn validate(&mut self) -> Result<()> {
        validate_package_name(&self.package_name)?;
        if self.version_code < 0 {
            return Err(anyhow!(
                "version_code must not be negative for '{}'",
                self.package_name
            ));
        }
        if self.source_path.as_os_str().is_empty() {
            return Err(anyhow!(
                "source_path must not be empty for '{}'",
                self.package_name
            ));
        }
        if self.file_name().is_none() {
            return Err(anyhow!(
                "source_path has no usable file name: {}",
                self.source_path.display()
            ));
        }
        self.signature_fingerprints = normalize_fingerprint_set(&self.signature_fingerprints)
            .with_context(|| format!("invalid signatures for '{}'", self.package_name))?;
        Ok(())
    }
}

impl PackageSnapshot {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let document: DescriptorDocument =
            toml::from_str(input).context("failed to parse package descriptor")?;
        let mut snapshot = Self::from(document);
        snapshot.candidate.validate()?;

        let package_name = &snapshot.candidate.package_name;
        if let Some(existing) = snapshot.existing.as_mut() {
            // Signature comparison needs both sides; an empty set would read as a change.
            if snapshot.candidate.signature_fingerprints.is_empty() {
                return Err(anyhow!(
                    "signature_fingerprints must not be empty for '{package_name}' when [existing] is present"
                ));
            }
            if existing.signature_fingerprints.is_empty() {
                return Err(anyhow!(
                    "[existing].signature_fingerprints must not be empty for '{package_name}'"
                ));
            }
            existing.signature_fingerprints =
                normalize_fingerprint_set(&existing.signature_fingerprints).with_context(|| {
                    format!("invalid installed signatures for '{package_name}'")
                })?;
        }
        Ok(snapshot)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read descriptor: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to load descriptor: {}", path.display()))
    }

    pub fn new(candidate: PackageDescriptor, existing: Option<ExistingInstallState>) -> Self {
        Self {
            candidate,
            existing,
        }
    }

    pub fn is_update(&self) -> bool {
        self.existing.is_some()
    }
}

fn normalize_fingerprint_set(raw: &BTreeSet<String>) -> Result<BTreeSet<String>> {
    raw.iter().map(|value| normalize_fingerprint(value)).collect()
}

/// Android application ids: at least two dot separated segments, each starting with a
/// letter and containing only ASCII letters, digits and underscores.
pub fn validate_package_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("package name must not be empty"));
    }

    let segments = name.split('.').collect::<Vec<_>>();
    if segments.len() < 2 {
        return Err(anyhow!(
            "package name must contain at least one '.': {name}"
        ));
    }
    for segment in segments {
        let mut chars = segment.chars();
        let Some(first) = chars.next() else {
            return Err(anyhow!("package name has an empty segment: {name}"));
        };
        if !first.is_ascii_alphabetic() {
            return Err(anyhow!(
                "package name segment must start with an ASCII letter: {name}"
            ));
        }
        if chars.any(|ch| !(ch.is_ascii_alphanumeric() || ch == '_')) {
            return Err(anyhow!(
                "package name contains invalid character(s): {name}"
            ));
        }
    }

    Ok(())
}
