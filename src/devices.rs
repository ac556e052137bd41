use std::fmt::Display;
use std::path::Path;

use crate::common::{self, WrappedIoError};

const CGROUP_DEVICES_ALLOW: &str = "devices.allow";
const CGROUP_DEVICES_DENY: &str = "devices.deny";

// A confined domain gets read, write and mknod on every whitelisted device.
const DEVICE_ACCESS_ALL: &str = "rwm";

/// Kind of a device node. The device controller only distinguishes
/// character and block devices; anything else is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Char,
    Block,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Char => "c",
            DeviceType::Block => "b",
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<char> for DeviceType {
    type Error = char;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            'c' => Ok(DeviceType::Char),
            'b' => Ok(DeviceType::Block),
            other => Err(other),
        }
    }
}

/// One whitelist entry in the form the devices controller accepts,
/// e.g. `c 1:3 rwm` for an exact device or `b 8:* rwm` for a whole major.
#[derive(Debug, Clone, Copy)]
pub struct DeviceRule {
    pub typ: DeviceType,
    pub major: i64,
    pub minor: Option<i64>,
}

impl Display for DeviceRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{} {}:{} {}", self.typ, self.major, minor, DEVICE_ACCESS_ALL),
            None => write!(f, "{} {}:* {}", self.typ, self.major, DEVICE_ACCESS_ALL),
        }
    }
}

pub struct Devices {}

impl Devices {
    /// Writes the wildcard deny rule, revoking every device the cgroup
    /// inherited. Expected to run before any allow rule.
    pub fn deny_all(cgroup_path: &Path) -> Result<(), WrappedIoError> {
        tracing::debug!("deny all devices");
        common::write_cgroup_file_str(cgroup_path.join(CGROUP_DEVICES_DENY), "a")
    }

    /// Appends one allow rule on top of the deny-all baseline. Rules are
    /// written verbatim; a duplicate rule is redundant to the kernel and
    /// not deduplicated here.
    ///
    /// The allow file is a command interface: the kernel consumes every
    /// write as one rule, so successive calls accumulate even though a
    /// plain file would only keep the last write.
    pub fn allow(cgroup_path: &Path, rule: &DeviceRule) -> Result<(), WrappedIoError> {
        tracing::debug!("allow device {rule}");
        common::write_cgroup_file_str(cgroup_path.join(CGROUP_DEVICES_ALLOW), &rule.to_string())
    }
}
