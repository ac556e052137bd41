use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use crate::common::{self, WrappedIoError};

// Cumulative cpu time consumed by all tasks ever placed in the cgroup, in
// nanoseconds. Monotonically non-decreasing for the life of the cgroup.
const CGROUP_CPUACCT_USAGE: &str = "cpuacct.usage";

#[derive(thiserror::Error, Debug)]
pub enum CpuAcctControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("read malformed cpu usage {usage} from {path}: {err}")]
    MalformedUsage {
        usage: String,
        path: PathBuf,
        err: ParseIntError,
    },
}

pub struct CpuAcct {}

impl CpuAcct {
    pub fn usage(cgroup_path: &Path) -> Result<u64, CpuAcctControllerError> {
        let path = cgroup_path.join(CGROUP_CPUACCT_USAGE);
        let content = common::read_cgroup_file(&path)?;
        let trimmed = content.trim();

        trimmed
            .parse()
            .map_err(|err| CpuAcctControllerError::MalformedUsage {
                usage: trimmed.into(),
                path,
                err,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{create_temp_dir, set_fixture};

    #[test]
    fn test_usage() {
        let tmp = create_temp_dir("test_cpuacct_usage").expect("create temp directory");
        set_fixture(tmp.path(), CGROUP_CPUACCT_USAGE, "18198092369681\n")
            .expect("set usage fixture");

        let usage = CpuAcct::usage(tmp.path()).expect("read cpu usage");

        assert_eq!(usage, 18198092369681);
    }

    #[test]
    fn test_usage_malformed() {
        let tmp = create_temp_dir("test_cpuacct_usage_malformed").expect("create temp directory");
        set_fixture(tmp.path(), CGROUP_CPUACCT_USAGE, "").expect("set usage fixture");

        let result = CpuAcct::usage(tmp.path());

        assert!(matches!(
            result,
            Err(CpuAcctControllerError::MalformedUsage { .. })
        ));
    }
}
