use serde::Serialize;

use crate::descriptor::{ExistingInstallState, PackageDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    Fresh,
    Upgrade,
    Reinstall,
    Downgrade,
}

/// Risky conditions other than a signature change or a downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskCondition {
    SystemPackageUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskClassification {
    pub update_kind: UpdateKind,
    pub is_signature_changed: bool,
    pub is_downgrade: bool,
    pub other_conditions: Vec<RiskCondition>,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Upgrade => "upgrade",
            Self::Reinstall => "reinstall",
            Self::Downgrade => "downgrade",
        }
    }
}

impl RiskCondition {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::SystemPackageUpdate => "System package update",
        }
    }
}

impl RiskClassification {
    pub fn classify(
        candidate: &PackageDescriptor,
        existing: Option<&ExistingInstallState>,
    ) -> Self {
        let Some(existing) = existing else {
            return Self {
                update_kind: UpdateKind::Fresh,
                is_signature_changed: false,
                is_downgrade: false,
                other_conditions: Vec::new(),
            };
        };

        let update_kind = match candidate.version_code.cmp(&existing.version_code) {
            std::cmp::Ordering::Greater => UpdateKind::Upgrade,
            std::cmp::Ordering::Equal => UpdateKind::Reinstall,
            std::cmp::Ordering::Less => UpdateKind::Downgrade,
        };

        let mut other_conditions = Vec::new();
        if candidate.is_system_package {
            other_conditions.push(RiskCondition::SystemPackageUpdate);
        }

        Self {
            update_kind,
            is_signature_changed: candidate.signature_fingerprints
                != existing.signature_fingerprints,
            is_downgrade: update_kind == UpdateKind::Downgrade,
            other_conditions,
        }
    }

    pub fn has_risky_conditions(&self) -> bool {
        self.requires_fallback_chain() || !self.other_conditions.is_empty()
    }

    /// Signature changes and downgrades need the package removed before the
    /// package manager will accept the candidate.
    pub fn requires_fallback_chain(&self) -> bool {
        self.is_signature_changed || self.is_downgrade
    }

    pub fn issues(&self) -> Vec<&'static str> {
        let mut issues = Vec::new();
        if self.is_downgrade {
            issues.push("Version downgrade detected");
        }
        if self.is_signature_changed {
            issues.push("Signature mismatch - may require uninstall first");
        }
        issues.extend(self.other_conditions.iter().map(RiskCondition::describe));
        issues
    }
}
