use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use crate::common::{self, WrappedIoError};

const CGROUP_CPU_SHARES: &str = "cpu.shares";

#[derive(thiserror::Error, Debug)]
pub enum CpuControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("read malformed cpu shares {shares} from {path}: {err}")]
    MalformedShares {
        shares: String,
        path: PathBuf,
        err: ParseIntError,
    },
}

pub struct Cpu {}

impl Cpu {
    /// Writes the relative scheduling weight in the kernel's native units.
    /// Normalization against sibling cgroups is left to the scheduler.
    pub fn set_shares(cgroup_path: &Path, shares: u64) -> Result<(), WrappedIoError> {
        tracing::debug!("set cpu shares to {shares}");
        common::write_cgroup_file(cgroup_path.join(CGROUP_CPU_SHARES), shares)
    }

    /// Reads the current scheduling weight. Pure read, no side effect.
    pub fn shares(cgroup_path: &Path) -> Result<u64, CpuControllerError> {
        let path = cgroup_path.join(CGROUP_CPU_SHARES);
        let content = common::read_cgroup_file(&path)?;
        let trimmed = content.trim();

        trimmed
            .parse()
            .map_err(|err| CpuControllerError::MalformedShares {
                shares: trimmed.into(),
                path,
                err,
            })
    }
}
