use std::fmt::Display;

/// The resource controllers exercised for domain confinement.
#[derive(Hash, PartialEq, Eq, Debug, Clone, Copy)]
pub enum ControllerType {
    Cpu,
    CpuAcct,
    Memory,
    Devices,
}

impl Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Cpu => "cpu",
            Self::CpuAcct => "cpuacct",
            Self::Memory => "memory",
            Self::Devices => "devices",
        };

        write!(f, "{print}")
    }
}

impl AsRef<str> for ControllerType {
    fn as_ref(&self) -> &str {
        match *self {
            Self::Cpu => "cpu",
            Self::CpuAcct => "cpuacct",
            Self::Memory => "memory",
            Self::Devices => "devices",
        }
    }
}

pub const CONTROLLERS: &[ControllerType] = &[
    ControllerType::Cpu,
    ControllerType::CpuAcct,
    ControllerType::Memory,
    ControllerType::Devices,
];
