use anyhow::{anyhow, Context, Result};
use apkroot_core::DeviceProfile;
use tracing::debug;

use crate::shell::PrivilegedShell;

const SDK_PROPERTY: &str = "getprop ro.build.version.sdk";
const ABI_PROPERTY: &str = "getprop ro.product.cpu.abilist";

/// Reads the API level and supported ABIs of the connected device.
pub fn probe_device_profile<S>(shell: &S) -> Result<DeviceProfile>
where
    S: PrivilegedShell + ?Sized,
{
    let session = shell.acquire()?;
    let read = |command: &str| -> Result<String> {
        let output = shell
            .run(&session, command)
            .with_context(|| format!("failed to run '{command}'"))?;
        if !output.exited_cleanly() {
            return Err(anyhow!(
                "'{command}' failed: {}",
                output.failure_detail()
            ));
        }
        Ok(output.stdout)
    };

    let sdk = read(SDK_PROPERTY)?;
    let abis = read(ABI_PROPERTY)?;
    let profile = DeviceProfile::from_getprop(&sdk, &abis)?;
    debug!(sdk = profile.sdk_int, abis = ?profile.abis, "probed device profile");
    Ok(profile)
}
