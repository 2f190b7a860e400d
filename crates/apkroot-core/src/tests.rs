use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use super::*;

const SIG_A: &str = "9b3f6e1c0d2a4b5c6d7e8f9012345678abcdef0123456789abcdef0123456789";
const SIG_B: &str = "0000000000000000000000000000000000000000000000000000000000000001";

fn descriptor(version_code: i64, signatures: &[&str]) -> PackageDescriptor {
    PackageDescriptor {
        package_name: "com.example.app".to_string(),
        version_code,
        version_name: format!("1.0.{version_code}"),
        signature_fingerprints: signatures.iter().map(ToString::to_string).collect(),
        is_system_package: false,
        source_path: PathBuf::from("/sdcard/Download/app.apk"),
        app_label: None,
        min_sdk: None,
        native_abis: Vec::new(),
    }
}

fn existing(version_code: i64, signatures: &[&str]) -> ExistingInstallState {
    ExistingInstallState {
        version_code,
        version_name: None,
        signature_fingerprints: signatures.iter().map(ToString::to_string).collect(),
        data_path: Some(PathBuf::from("/data/user/0/com.example.app")),
    }
}

#[test]
fn parse_descriptor_with_existing_install() {
    let content = format!(
        r#"
package_name = "com.example.app"
version_code = 5
version_name = "1.0.4"
signature_fingerprints = ["{}"]
source_path = "/sdcard/Download/app.apk"
app_label = "Example"
min_sdk = 24
native_abis = ["arm64-v8a"]

[existing]
version_code = 3
version_name = "1.0.2"
signature_fingerprints = ["{}"]
data_path = "/data/user/0/com.example.app"
"#,
        SIG_A.to_ascii_uppercase(),
        SIG_A
    );

    let snapshot = PackageSnapshot::from_toml_str(&content).expect("descriptor should parse");
    assert_eq!(snapshot.candidate.package_name, "com.example.app");
    assert_eq!(snapshot.candidate.version_code, 5);
    assert_eq!(snapshot.candidate.display_name(), "Example");
    assert_eq!(snapshot.candidate.file_name(), Some("app.apk"));
    assert_eq!(snapshot.candidate.min_sdk, Some(24));
    assert!(snapshot.is_update());

    let expected = BTreeSet::from([SIG_A.to_string()]);
    assert_eq!(snapshot.candidate.signature_fingerprints, expected);
    let existing = snapshot.existing.expect("existing install should parse");
    assert_eq!(existing.version_code, 3);
    assert_eq!(existing.signature_fingerprints, expected);
}

#[test]
fn parse_minimal_descriptor_defaults_optional_fields() {
    let content = r#"
package_name = "org.fdroid.fdroid"
version_code = 1
source_path = "/sdcard/fdroid.apk"
"#;

    let snapshot = PackageSnapshot::from_toml_str(content).expect("descriptor should parse");
    assert!(snapshot.existing.is_none());
    assert!(!snapshot.is_update());
    assert!(snapshot.candidate.signature_fingerprints.is_empty());
    assert!(!snapshot.candidate.is_system_package);
    assert!(snapshot.candidate.native_abis.is_empty());
    assert_eq!(snapshot.candidate.display_name(), "org.fdroid.fdroid");
}

#[test]
fn parse_descriptor_rejects_invalid_fingerprint() {
    let content = r#"
package_name = "com.example.app"
version_code = 1
signature_fingerprints = ["not-hex"]
source_path = "/sdcard/app.apk"
"#;

    let err = PackageSnapshot::from_toml_str(content).expect_err("bad fingerprint must fail");
    assert!(err.to_string().contains("invalid signatures"));
}

#[test]
fn parse_descriptor_requires_installed_signatures() {
    let content = format!(
        r#"
package_name = "com.example.app"
version_code = 6
signature_fingerprints = ["{SIG_A}"]
source_path = "/sdcard/app.apk"

[existing]
version_code = 5
"#
    );

    let err = PackageSnapshot::from_toml_str(&content).expect_err("missing list must fail");
    assert!(format!("{err:#}").contains("signature_fingerprints"));
}

#[test]
fn parse_descriptor_rejects_empty_signature_lists_for_updates() {
    let empty_existing = format!(
        r#"
package_name = "com.example.app"
version_code = 6
signature_fingerprints = ["{SIG_A}"]
source_path = "/sdcard/app.apk"

[existing]
version_code = 5
signature_fingerprints = []
"#
    );
    let err = PackageSnapshot::from_toml_str(&empty_existing).expect_err("empty list must fail");
    assert!(err.to_string().contains("[existing].signature_fingerprints"));

    let missing_candidate = format!(
        r#"
package_name = "com.example.app"
version_code = 6
source_path = "/sdcard/app.apk"

[existing]
version_code = 5
signature_fingerprints = ["{SIG_A}"]
"#
    );
    let err =
        PackageSnapshot::from_toml_str(&missing_candidate).expect_err("missing list must fail");
    assert!(err.to_string().contains("when [existing] is present"));
}

#[test]
fn parse_descriptor_rejects_unknown_keys() {
    let top_level = r#"
package_name = "com.example.app"
version_code = 1
source_path = "/sdcard/app.apk"
is_system_app = true
"#;
    let err = PackageSnapshot::from_toml_str(top_level).expect_err("typo must fail");
    assert!(format!("{err:#}").contains("is_system_app"));

    let nested = format!(
        r#"
package_name = "com.example.app"
version_code = 2
signature_fingerprints = ["{SIG_A}"]
source_path = "/sdcard/app.apk"

[existing]
version_code = 1
signature_fingerprints = ["{SIG_A}"]
data_dir = "/data/user/0/com.example.app"
"#
    );
    assert!(PackageSnapshot::from_toml_str(&nested).is_err());
}

#[test]
fn parse_descriptor_rejects_source_without_file_name() {
    let content = r#"
package_name = "com.example.app"
version_code = 1
source_path = "/"
"#;

    let err = PackageSnapshot::from_toml_str(content).expect_err("root path must fail");
    assert!(err.to_string().contains("no usable file name"));
}

#[test]
fn parse_descriptor_rejects_negative_version_code() {
    let content = r#"
package_name = "com.example.app"
version_code = -1
source_path = "/sdcard/app.apk"
"#;

    assert!(PackageSnapshot::from_toml_str(content).is_err());
}

#[test]
fn package_name_validation() {
    validate_package_name("com.example.app").expect("dotted name is valid");
    validate_package_name("org.mozilla.firefox_beta").expect("underscore is valid");
    assert!(validate_package_name("").is_err());
    assert!(validate_package_name("example").is_err());
    assert!(validate_package_name("com..example").is_err());
    assert!(validate_package_name("com.1example").is_err());
    assert!(validate_package_name("com.example'; reboot; '").is_err());
}

#[test]
fn classify_fresh_install_has_no_risk() {
    let risk = RiskClassification::classify(&descriptor(5, &[SIG_A]), None);
    assert_eq!(risk.update_kind, UpdateKind::Fresh);
    assert!(!risk.is_signature_changed);
    assert!(!risk.is_downgrade);
    assert!(!risk.has_risky_conditions());
    assert!(risk.issues().is_empty());
}

#[test]
fn classify_same_signature_upgrade_is_not_risky() {
    let installed = existing(4, &[SIG_A]);
    let risk = RiskClassification::classify(&descriptor(5, &[SIG_A]), Some(&installed));
    assert_eq!(risk.update_kind, UpdateKind::Upgrade);
    assert!(!risk.has_risky_conditions());

    let reinstall = RiskClassification::classify(&descriptor(4, &[SIG_A]), Some(&installed));
    assert_eq!(reinstall.update_kind, UpdateKind::Reinstall);
    assert!(!reinstall.has_risky_conditions());
}

#[test]
fn classify_signature_change() {
    let installed = existing(4, &[SIG_B]);
    let risk = RiskClassification::classify(&descriptor(5, &[SIG_A]), Some(&installed));
    assert!(risk.is_signature_changed);
    assert!(!risk.is_downgrade);
    assert!(risk.requires_fallback_chain());
    assert_eq!(
        risk.issues(),
        vec!["Signature mismatch - may require uninstall first"]
    );
}

#[test]
fn classify_signer_set_difference_counts_as_change() {
    let installed = existing(4, &[SIG_A, SIG_B]);
    let risk = RiskClassification::classify(&descriptor(5, &[SIG_A]), Some(&installed));
    assert!(risk.is_signature_changed);
}

#[test]
fn classify_downgrade_regardless_of_signature() {
    let installed = existing(5, &[SIG_A]);
    let risk = RiskClassification::classify(&descriptor(3, &[SIG_A]), Some(&installed));
    assert_eq!(risk.update_kind, UpdateKind::Downgrade);
    assert!(risk.is_downgrade);
    assert!(!risk.is_signature_changed);
    assert!(risk.requires_fallback_chain());
    assert_eq!(risk.issues(), vec!["Version downgrade detected"]);
}

#[test]
fn classify_system_package_update_as_other_condition() {
    let mut candidate = descriptor(6, &[SIG_A]);
    candidate.is_system_package = true;
    let risk = RiskClassification::classify(&candidate, Some(&existing(5, &[SIG_A])));
    assert!(risk.has_risky_conditions());
    assert!(!risk.requires_fallback_chain());
    assert_eq!(risk.other_conditions, vec![RiskCondition::SystemPackageUpdate]);

    let fresh = RiskClassification::classify(&candidate, None);
    assert!(fresh.other_conditions.is_empty());
}

#[test]
fn device_profile_from_getprop_output() {
    let profile = DeviceProfile::from_getprop("34\n", "arm64-v8a,armeabi-v7a,armeabi\n")
        .expect("profile should parse");
    assert_eq!(profile.sdk_int, 34);
    assert_eq!(profile.abis, vec!["arm64-v8a", "armeabi-v7a", "armeabi"]);

    assert!(DeviceProfile::from_getprop("", "arm64-v8a").is_err());
    assert!(DeviceProfile::from_getprop("thirty", "arm64-v8a").is_err());
}

#[test]
fn compatibility_reports_sdk_and_abi_issues() {
    let device = DeviceProfile {
        sdk_int: 28,
        abis: vec!["armeabi-v7a".to_string()],
    };
    let mut candidate = descriptor(1, &[]);
    assert!(assess_compatibility(&candidate, &device).is_empty());

    candidate.min_sdk = Some(30);
    candidate.native_abis = vec!["arm64-v8a".to_string()];
    let issues = assess_compatibility(&candidate, &device);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].to_string(), "Requires Android API 30 or higher");
    assert!(matches!(
        issues[1],
        CompatibilityIssue::IncompatibleAbi { .. }
    ));

    candidate.native_abis = vec!["Universal".to_string()];
    candidate.min_sdk = Some(28);
    assert!(assess_compatibility(&candidate, &device).is_empty());
}

#[test]
fn config_defaults_and_overrides() {
    let defaults = InstallerConfig::default();
    assert_eq!(defaults.su_binary, "su");
    assert_eq!(defaults.staging_dir, DEFAULT_STAGING_DIR);
    assert_eq!(defaults.log_retention, DEFAULT_LOG_RETENTION);
    assert_eq!(defaults.command_timeout(), Some(Duration::from_secs(300)));

    let config = InstallerConfig::from_toml_str(
        r#"
su_binary = "/system/xbin/su"
command_timeout_secs = 0
log_dir = "/sdcard/Download/apkroot-logs"
preflight_probes = true
"#,
    )
    .expect("config should parse");
    assert_eq!(config.su_binary, "/system/xbin/su");
    assert_eq!(config.command_timeout(), None);
    assert!(config.preflight_probes);
    assert_eq!(config.staging_dir, DEFAULT_STAGING_DIR);
    assert_eq!(
        config.log_dir_or(PathBuf::from("/fallback")),
        PathBuf::from("/sdcard/Download/apkroot-logs")
    );
}

#[test]
fn config_rejects_invalid_values() {
    assert!(InstallerConfig::from_toml_str("log_retention = 0").is_err());
    assert!(InstallerConfig::from_toml_str("staging_dir = \"tmp\"").is_err());
    assert!(InstallerConfig::from_toml_str("su_binary = \"\"").is_err());
    assert!(InstallerConfig::from_toml_str("unknown_key = true").is_err());
}

#[test]
fn config_load_missing_file_uses_defaults() {
    let path = std::env::temp_dir().join(format!(
        "apkroot-missing-config-{}.toml",
        std::process::id()
    ));
    let config = InstallerConfig::load(&path).expect("missing config should not fail");
    assert_eq!(config, InstallerConfig::default());
}
