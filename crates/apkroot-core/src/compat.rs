use std::fmt;

use anyhow::{anyhow, Context, Result};

use crate::descriptor::PackageDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub sdk_int: u32,
    pub abis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityIssue {
    SdkTooLow { required: u32, device: u32 },
    IncompatibleAbi { package: Vec<String>, device: Vec<String> },
}

impl DeviceProfile {
    /// Builds a profile from raw `getprop ro.build.version.sdk` and
    /// `getprop ro.product.cpu.abilist` output.
    pub fn from_getprop(sdk_raw: &str, abilist_raw: &str) -> Result<Self> {
        let sdk_trimmed = sdk_raw.trim();
        if sdk_trimmed.is_empty() {
            return Err(anyhow!("device did not report ro.build.version.sdk"));
        }
        let sdk_int = sdk_trimmed
            .parse::<u32>()
            .with_context(|| format!("invalid ro.build.version.sdk value: {sdk_trimmed}"))?;
        let abis = abilist_raw
            .trim()
            .split(',')
            .map(str::trim)
            .filter(|abi| !abi.is_empty())
            .map(ToString::to_string)
            .collect();
        Ok(Self { sdk_int, abis })
    }
}

impl fmt::Display for CompatibilityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SdkTooLow { required, .. } => {
                write!(f, "Requires Android API {required} or higher")
            }
            Self::IncompatibleAbi { package, device } => write!(
                f,
                "Incompatible CPU architecture (package: {}; device: {})",
                package.join(","),
                device.join(",")
            ),
        }
    }
}

pub fn assess_compatibility(
    candidate: &PackageDescriptor,
    device: &DeviceProfile,
) -> Vec<CompatibilityIssue> {
    let mut issues = Vec::new();

    if let Some(required) = candidate.min_sdk {
        if required > device.sdk_int {
            issues.push(CompatibilityIssue::SdkTooLow {
                required,
                device: device.sdk_int,
            });
        }
    }

    // No declared native code means the package runs on any ABI.
    let universal = candidate.native_abis.is_empty()
        || candidate
            .native_abis
            .iter()
            .any(|abi| abi.eq_ignore_ascii_case("universal"));
    if !universal
        && !candidate
            .native_abis
            .iter()
            .any(|abi| device.abis.contains(abi))
    {
        issues.push(CompatibilityIssue::IncompatibleAbi {
            package: candidate.native_abis.clone(),
            device: device.abis.clone(),
        });
    }

    issues
}
