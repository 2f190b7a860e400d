mod compat;
mod config;
mod descriptor;
mod risk;

pub use compat::{assess_compatibility, CompatibilityIssue, DeviceProfile};
pub use config::{InstallerConfig, DEFAULT_LOG_RETENTION, DEFAULT_STAGING_DIR};
pub use descriptor::{
    validate_package_name, ExistingInstallState, PackageDescriptor, PackageSnapshot,
};
pub use risk::{RiskClassification, RiskCondition, UpdateKind};

#[cfg(test)]
mod tests;
