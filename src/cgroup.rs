use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::Pid;

use crate::common::{self, WrapIoResult, WrappedIoError, CGROUP_TASKS};
use crate::controller_type::{ControllerType, CONTROLLERS};
use crate::cpu::{Cpu, CpuControllerError};
use crate::cpuacct::{CpuAcct, CpuAcctControllerError};
use crate::devices::{DeviceRule, DeviceType, Devices};
use crate::memory::Memory;
use crate::mounts::Mounts;

#[derive(thiserror::Error, Debug)]
pub enum CgroupError {
    #[error("controller {controller} is not mounted on this host")]
    Unsupported { controller: ControllerType },
    #[error("no cgroup controllers are mounted on this host")]
    NoControllers,
    #[error("per-driver cgroups require a privileged daemon")]
    Unprivileged,
    #[error("cgroup {path} does not exist")]
    NotFound { path: PathBuf },
    #[error("permission denied: {0}")]
    Permission(WrappedIoError),
    #[error("cgroup busy: {0}")]
    Busy(WrappedIoError),
    #[error("invalid {what}: {value:?}")]
    InvalidArgument { what: &'static str, value: String },
    #[error(transparent)]
    Cpu(CpuControllerError),
    #[error(transparent)]
    CpuAcct(CpuAcctControllerError),
    #[error("io error: {0}")]
    WrappedIo(WrappedIoError),
}

impl From<WrappedIoError> for CgroupError {
    fn from(err: WrappedIoError) -> Self {
        match err.inner().kind() {
            std::io::ErrorKind::PermissionDenied => CgroupError::Permission(err),
            std::io::ErrorKind::NotFound => CgroupError::NotFound {
                path: err.path().to_path_buf(),
            },
            _ if is_busy(err.inner()) => CgroupError::Busy(err),
            _ => CgroupError::WrappedIo(err),
        }
    }
}

fn is_busy(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code)
        if code == Errno::EBUSY as i32 || code == Errno::ENOTEMPTY as i32)
}

/// A resolved cgroup for one hypervisor driver or one domain.
///
/// The handle pairs the shared, read-only controller mount table with a
/// placement path relative to every mount root. Placement is deterministic
/// for a given driver and domain name, so a restarted daemon re-opens an
/// existing cgroup (`create = false`) instead of erroring.
///
/// A handle is owned by exactly one caller for its whole lifetime and is
/// not internally synchronized; the owning lifecycle manager serializes
/// operations per domain. Operations on handles with distinct placements
/// occupy disjoint subtrees and never interfere.
///
/// Dropping a handle releases only in-memory state; the on-disk cgroup
/// survives until [`CgroupHandle::remove`], which consumes the handle so
/// no further operation can be issued against a removed cgroup.
pub struct CgroupHandle {
    mounts: Arc<Mounts>,
    placement: PathBuf,
    created: bool,
}

impl CgroupHandle {
    /// Resolves the top-level cgroup for a driver, creating the directory
    /// under every writable controller mount when `create` is set.
    /// Controllers that are not mounted are skipped, so a driver cgroup
    /// survives on hosts where e.g. the devices controller is absent.
    pub fn for_driver(
        mounts: Arc<Mounts>,
        driver: &str,
        privileged: bool,
        create: bool,
    ) -> Result<Self, CgroupError> {
        if !privileged {
            return Err(CgroupError::Unprivileged);
        }

        let placement = PathBuf::from(validate_name(driver, "driver name")?);
        Self::resolve(mounts, placement, create)
    }

    /// Resolves a domain cgroup nested directly beneath this driver
    /// handle. Safe to call concurrently for distinct domain names;
    /// concurrent calls for the same name are the caller's responsibility
    /// to avoid.
    pub fn for_domain(&self, domain: &str, create: bool) -> Result<Self, CgroupError> {
        let placement = self.placement.join(validate_name(domain, "domain name")?);
        Self::resolve(self.mounts.clone(), placement, create)
    }

    fn resolve(
        mounts: Arc<Mounts>,
        placement: PathBuf,
        create: bool,
    ) -> Result<Self, CgroupError> {
        if mounts.is_empty() {
            return Err(CgroupError::NoControllers);
        }

        if create {
            for controller in CONTROLLERS {
                let Some(point) = mounts.point(*controller) else {
                    continue;
                };
                if !point.writable {
                    tracing::warn!(%controller, "mount not writable, skipping creation");
                    continue;
                }

                let path = point.path.join(&placement);
                fs::create_dir_all(&path).wrap_create_dir(&path)?;
            }
        } else {
            let exists = CONTROLLERS.iter().any(|controller| {
                mounts
                    .point(*controller)
                    .map(|point| point.path.join(&placement).is_dir())
                    .unwrap_or(false)
            });
            if !exists {
                return Err(CgroupError::NotFound { path: placement });
            }
        }

        tracing::debug!(placement = %placement.display(), create, "resolved cgroup");
        Ok(CgroupHandle {
            mounts,
            placement,
            created: create,
        })
    }

    /// The relative placement of this cgroup beneath every controller root.
    pub fn placement(&self) -> &Path {
        &self.placement
    }

    /// Whether this handle created the on-disk hierarchy.
    pub fn created(&self) -> bool {
        self.created
    }

    fn controller_path(&self, controller: ControllerType) -> Result<PathBuf, CgroupError> {
        self.mounts
            .point(controller)
            .map(|point| point.path.join(&self.placement))
            .ok_or(CgroupError::Unsupported { controller })
    }

    /// Moves `pid` into this cgroup under every mounted controller.
    ///
    /// The membership change is a single write per controller but is not
    /// atomic across controllers. A failure on one controller does not
    /// stop the remaining ones: every controller is attempted, and the
    /// first failure is reported once the list is exhausted. Adding a pid
    /// that is already a member is idempotent.
    pub fn add_task(&self, pid: Pid) -> Result<(), CgroupError> {
        let mut first_err: Option<CgroupError> = None;

        for controller in CONTROLLERS {
            let Some(point) = self.mounts.point(*controller) else {
                continue;
            };

            let tasks = point.path.join(&self.placement).join(CGROUP_TASKS);
            if let Err(err) = common::write_cgroup_file(&tasks, pid) {
                tracing::warn!(%controller, "failed to add task {} to {}", pid, tasks.display());
                first_err.get_or_insert(err.into());
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Lists the pids currently placed in this cgroup, read from the first
    /// mounted controller that has a membership file.
    pub fn tasks(&self) -> Result<Vec<Pid>, CgroupError> {
        let mut last_err: Option<CgroupError> = None;

        for controller in CONTROLLERS {
            let Some(point) = self.mounts.point(*controller) else {
                continue;
            };

            let tasks = point.path.join(&self.placement).join(CGROUP_TASKS);
            let content = match common::read_cgroup_file(&tasks) {
                Ok(content) => content,
                // A controller whose directory was skipped at creation time
                // has nothing to read here; membership may still be
                // recorded under another controller.
                Err(err) if err.inner().kind() == std::io::ErrorKind::NotFound => {
                    last_err = Some(err.into());
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            return content
                .split_ascii_whitespace()
                .map(|pid| {
                    pid.parse::<i32>()
                        .map(Pid::from_raw)
                        .map_err(|_| CgroupError::InvalidArgument {
                            what: "pid",
                            value: pid.into(),
                        })
                })
                .collect();
        }

        Err(last_err.unwrap_or(CgroupError::NoControllers))
    }

    /// Sets the memory ceiling. The caller-facing unit is kilobytes;
    /// the value is converted to the byte representation the memory
    /// controller expects. No lower bound is enforced here, the kernel's
    /// own rejection is surfaced as a write failure.
    pub fn set_memory_limit_kb(&self, kb: u64) -> Result<(), CgroupError> {
        let path = self.controller_path(ControllerType::Memory)?;
        let bytes = kb
            .checked_mul(1024)
            .ok_or(CgroupError::InvalidArgument {
                what: "memory limit",
                value: kb.to_string(),
            })?;

        Memory::set_limit(&path, bytes)?;
        Ok(())
    }

    /// Revokes access to every device the cgroup inherited. Callers are
    /// expected to run this before any allow rule; the device set after an
    /// allow without a preceding deny-all is whatever the cgroup
    /// inherited, which this layer does not define.
    pub fn deny_all_devices(&self) -> Result<(), CgroupError> {
        let path = self.controller_path(ControllerType::Devices)?;
        Devices::deny_all(&path)?;
        Ok(())
    }

    /// Whitelists one exact `major:minor` device on top of the deny-all
    /// baseline. Allow rules accumulate in call order.
    pub fn allow_device(
        &self,
        typ: DeviceType,
        major: i64,
        minor: i64,
    ) -> Result<(), CgroupError> {
        let rule = DeviceRule {
            typ,
            major: validate_device_number(major)?,
            minor: Some(validate_device_number(minor)?),
        };

        let path = self.controller_path(ControllerType::Devices)?;
        Devices::allow(&path, &rule)?;
        Ok(())
    }

    /// Whitelists every minor under a device major.
    pub fn allow_device_major(&self, typ: DeviceType, major: i64) -> Result<(), CgroupError> {
        let rule = DeviceRule {
            typ,
            major: validate_device_number(major)?,
            minor: None,
        };

        let path = self.controller_path(ControllerType::Devices)?;
        Devices::allow(&path, &rule)?;
        Ok(())
    }

    /// Sets the relative cpu scheduling weight in kernel-native units.
    pub fn set_cpu_shares(&self, shares: u64) -> Result<(), CgroupError> {
        let path = self.controller_path(ControllerType::Cpu)?;
        Cpu::set_shares(&path, shares)?;
        Ok(())
    }

    /// Reads the relative cpu scheduling weight.
    pub fn get_cpu_shares(&self) -> Result<u64, CgroupError> {
        let path = self.controller_path(ControllerType::Cpu)?;
        Cpu::shares(&path).map_err(|err| match err {
            CpuControllerError::WrappedIo(err) => err.into(),
            other => CgroupError::Cpu(other),
        })
    }

    /// Reads the cumulative cpu time consumed by all tasks ever placed in
    /// this cgroup, in nanoseconds since the cgroup's creation.
    pub fn get_cpuacct_usage(&self) -> Result<u64, CgroupError> {
        let path = self.controller_path(ControllerType::CpuAcct)?;
        CpuAcct::usage(&path).map_err(|err| match err {
            CpuAcctControllerError::WrappedIo(err) => err.into(),
            other => CgroupError::CpuAcct(other),
        })
    }

    /// Removes the on-disk directory under every mounted controller,
    /// consuming the handle.
    ///
    /// The kernel refuses to remove a cgroup that still holds tasks; that
    /// failure is surfaced as [`CgroupError::Busy`] rather than skipped,
    /// since a leaked cgroup is a host resource leak. Like
    /// [`CgroupHandle::add_task`], removal attempts every controller and
    /// reports the first failure at the end.
    pub fn remove(self) -> Result<(), CgroupError> {
        let mut first_err: Option<CgroupError> = None;

        for controller in CONTROLLERS {
            let Some(point) = self.mounts.point(*controller) else {
                continue;
            };

            let path = point.path.join(&self.placement);
            if !path.exists() {
                continue;
            }

            tracing::debug!(%controller, "removing cgroup {}", path.display());
            if let Err(err) = common::delete_with_retry(&path, 4, Duration::from_millis(100)) {
                first_err.get_or_insert(err.into());
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn validate_name<'a>(name: &'a str, what: &'static str) -> Result<&'a str, CgroupError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0')
    {
        return Err(CgroupError::InvalidArgument {
            what,
            value: name.to_string(),
        });
    }

    Ok(name)
}

fn validate_device_number(number: i64) -> Result<i64, CgroupError> {
    if number < 0 {
        return Err(CgroupError::InvalidArgument {
            what: "device number",
            value: number.to_string(),
        });
    }

    Ok(number)
}
