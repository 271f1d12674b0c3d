use std::fmt;

/// A VM as selected for one run: API identifier plus the placement
/// names that end up in every exported row.
#[derive(Debug, Clone)]
pub struct VmHandle {
    pub id: String,
    pub name: String,
    pub host_id: String,
    pub esxi_host: String,
    pub cluster: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerType {
    Scsi,
    Nvme,
    Sata,
    Other,
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerType::Scsi => write!(f, "SCSI"),
            ControllerType::Nvme => write!(f, "NVMe"),
            ControllerType::Sata => write!(f, "SATA"),
            ControllerType::Other => write!(f, "Other"),
        }
    }
}

/// Outcome of a best-effort metadata lookup. `Failed` keeps the error
/// text so the export stays best-effort while the log stays loud.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Resolved(T),
    NotApplicable,
    Failed(String),
}

impl<T> Resolution<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Resolution::Resolved(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Raw-device-mapping LUN metadata, resolved through the owning host's
/// storage listing.
#[derive(Debug, Clone, PartialEq)]
pub struct LunDetail {
    pub canonical_name: String,
    pub display_name: Option<String>,
    pub capacity_gb: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiskBacking {
    /// File-backed virtual disk on a datastore.
    Vmdk { datastore: Resolution<String> },
    /// Raw-device-mapping disk backed directly by a LUN.
    Rdm { lun: Resolution<LunDetail> },
}

impl DiskBacking {
    pub fn type_name(&self) -> &'static str {
        match self {
            DiskBacking::Vmdk { .. } => "VMDK",
            DiskBacking::Rdm { .. } => "RDM",
        }
    }
}

/// One virtual disk as the hypervisor sees it. Built fresh per VM per
/// run, never persisted.
#[derive(Debug, Clone)]
pub struct VirtualDiskRecord {
    pub label: String,
    pub controller: ControllerType,
    pub bus_number: Option<i32>,
    pub unit_number: Option<i32>,
    /// `SCSI(<bus>:<unit>)`, present only for SCSI-attached disks.
    pub join_key: Option<String>,
    pub backing: DiskBacking,
}

/// One mounted volume as the guest OS sees it. Only fixed, lettered,
/// local volumes are collected.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestVolumeRecord {
    pub drive_letter: char,
    pub volume_label: String,
    pub filesystem: String,
    pub size_gb: f64,
}

/// Guest-side association of a drive letter with its SCSI bus/target,
/// derived from the disk -> partition -> logical-disk walk.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveBusMapping {
    pub drive_letter: char,
    pub bus: i32,
    pub target: i32,
}

/// Hardware side of a successful join, copied out of the matched
/// VirtualDiskRecord.
#[derive(Debug, Clone)]
pub struct HardwareMatch {
    pub disk_label: String,
    pub controller: ControllerType,
    pub scsi_id: String,
    pub backing: DiskBacking,
}

/// The unit of output: one guest volume, with hardware fields when the
/// join found the backing disk.
#[derive(Debug, Clone)]
pub struct MergedRow {
    pub vm_name: String,
    pub esxi_host: String,
    pub cluster_name: String,
    pub drive_letter: char,
    pub volume_label: String,
    pub filesystem: String,
    pub volume_size_gb: f64,
    pub hardware: Option<HardwareMatch>,
}

/// Why a VM was skipped. One variant per edge of the per-VM state
/// machine; fetch and parse failures stay distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ToolsUnavailable(String),
    GuestPortUnreachable { host: String },
    VolumeFetch(String),
    VolumeParse(String),
    BusMapFetch(String),
    BusMapParse(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ToolsUnavailable(detail) => {
                write!(f, "VMware Tools unavailable: {}", detail)
            }
            SkipReason::GuestPortUnreachable { host } => {
                write!(f, "guest operations port unreachable on host {}", host)
            }
            SkipReason::VolumeFetch(detail) => {
                write!(f, "guest volume listing failed: {}", detail)
            }
            SkipReason::VolumeParse(detail) => {
                write!(f, "guest volume output could not be decoded: {}", detail)
            }
            SkipReason::BusMapFetch(detail) => {
                write!(f, "guest drive-to-bus mapping failed: {}", detail)
            }
            SkipReason::BusMapParse(detail) => {
                write!(f, "guest drive-to-bus output could not be decoded: {}", detail)
            }
        }
    }
}

/// A skipped VM and the reason, accumulated across the run.
#[derive(Debug, Clone)]
pub struct VmFailure {
    pub vm: String,
    pub reason: SkipReason,
}

/// Round to exactly two decimal places, clamping negatives to zero.
/// All exported capacities pass through here.
pub fn round2(value: f64) -> f64 {
    (value.max(0.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_two_decimals() {
        assert_eq!(round2(79.98431), 79.98);
        assert_eq!(round2(0.005), 0.01);
        assert_eq!(round2(100.0), 100.0);
    }

    #[test]
    fn round2_clamps_negative() {
        assert_eq!(round2(-3.7), 0.0);
    }

    #[test]
    fn skip_reason_mentions_tools() {
        let reason = SkipReason::ToolsUnavailable("reported state NOT_RUNNING".into());
        assert!(reason.to_string().contains("Tools"));
    }

    #[test]
    fn backing_type_names() {
        let vmdk = DiskBacking::Vmdk {
            datastore: Resolution::Resolved("DS01".into()),
        };
        let rdm = DiskBacking::Rdm {
            lun: Resolution::NotApplicable,
        };
        assert_eq!(vmdk.type_name(), "VMDK");
        assert_eq!(rdm.type_name(), "RDM");
    }
}
