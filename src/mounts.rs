use std::collections::HashMap;
use std::path::PathBuf;

use nix::unistd::{access, AccessFlags};
use procfs::process::{MountInfo, Process};
use procfs::ProcError;

use crate::controller_type::{ControllerType, CONTROLLERS};

#[derive(thiserror::Error, Debug)]
pub enum MountDiscoveryError {
    #[error("failed to read process info from /proc/self: {0}")]
    ReadSelf(ProcError),
    #[error("failed to get mountinfo: {0}")]
    MountInfo(ProcError),
}

/// The mount root of a single controller hierarchy.
///
/// Writability is probed once at discovery time; a mount that is visible
/// but not writable at the current privilege level is still recorded, and
/// writes against it fail with a permission error when attempted.
#[derive(Debug, Clone)]
pub struct MountPoint {
    pub path: PathBuf,
    pub writable: bool,
}

impl MountPoint {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let writable = access(&path, AccessFlags::W_OK).is_ok();
        MountPoint { path, writable }
    }
}

/// The controller mounts discovered on the host.
///
/// Discovery runs once and the result is shared read-only between every
/// handle resolved from it; a host reconfiguration only becomes visible by
/// running [`Mounts::discover`] again. Co-mounted controllers (commonly
/// `cpu,cpuacct`) map to the same root.
#[derive(Debug, Default)]
pub struct Mounts {
    points: HashMap<ControllerType, MountPoint>,
}

impl Mounts {
    /// Scans the mounted filesystems for legacy-hierarchy controller roots.
    /// Controllers without a mount are left out of the table rather than
    /// treated as an error.
    pub fn discover() -> Result<Self, MountDiscoveryError> {
        let mounts: Vec<MountInfo> = Process::myself()
            .map_err(MountDiscoveryError::ReadSelf)?
            .mountinfo()
            .map_err(MountDiscoveryError::MountInfo)?
            .into_iter()
            .collect();

        let mut points = HashMap::with_capacity(CONTROLLERS.len());
        for controller in CONTROLLERS {
            match mounts.iter().find(|m| matches_controller(m, *controller)) {
                Some(m) => {
                    points.insert(*controller, MountPoint::new(m.mount_point.clone()));
                }
                None => tracing::warn!(%controller, "controller not mounted on this host"),
            }
        }

        Ok(Mounts { points })
    }

    /// Builds a mount table from explicit roots, bypassing discovery. This
    /// is the injection point for running the subsystem against a
    /// simulated hierarchy.
    pub fn with_points(points: HashMap<ControllerType, MountPoint>) -> Self {
        Mounts { points }
    }

    pub fn point(&self, controller: ControllerType) -> Option<&MountPoint> {
        self.points.get(&controller)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn matches_controller(mount: &MountInfo, controller: ControllerType) -> bool {
    if mount.fs_type != "cgroup" {
        return false;
    }

    // cpu and cpuacct are frequently co-mounted under a combined
    // directory. This handles both the combined and the standalone layout.
    match controller {
        ControllerType::Cpu => {
            mount.mount_point.ends_with("cpu,cpuacct") || mount.mount_point.ends_with("cpu")
        }
        ControllerType::CpuAcct => {
            mount.mount_point.ends_with("cpu,cpuacct") || mount.mount_point.ends_with("cpuacct")
        }
        _ => mount.mount_point.ends_with(controller.as_ref()),
    }
}
