use std::path::Path;

use crate::common::{self, WrappedIoError};

const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";

pub struct Memory {}

impl Memory {
    /// Writes the memory ceiling in bytes. The kernel's own lower-bound
    /// rejection is surfaced verbatim as a write failure.
    pub fn set_limit(cgroup_path: &Path, bytes: u64) -> Result<(), WrappedIoError> {
        tracing::debug!("set memory limit to {bytes} bytes");
        common::write_cgroup_file(cgroup_path.join(CGROUP_MEMORY_LIMIT), bytes)
    }
}
