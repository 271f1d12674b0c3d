//! Response shapes for the vCenter REST endpoints this tool touches.
//! Fields the tool does not consume are left out; serde ignores them.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VmSummary {
    pub vm: String,
    pub name: String,
    #[serde(default)]
    pub power_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmPlacement {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostSummary {
    pub host: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSummary {
    pub cluster: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatastoreInfo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsInfo {
    #[serde(default)]
    pub run_state: Option<ToolsRunState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolsRunState {
    Running,
    NotRunning,
    ExecutingScripts,
    #[serde(other)]
    Unknown,
}

/// One SCSI LUN from the host storage listing. Capacity arrives as
/// block count and block size.
#[derive(Debug, Clone, Deserialize)]
pub struct ScsiLun {
    pub uuid: String,
    pub canonical_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub block_count: Option<u64>,
    #[serde(default)]
    pub block_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmHardware {
    pub devices: Vec<VirtualDevice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceKind {
    ScsiController,
    NvmeController,
    SataController,
    Disk,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackingKind {
    VmdkFile,
    RawDeviceMapping,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceBacking {
    #[serde(rename = "type")]
    pub kind: BackingKind,
    #[serde(default)]
    pub datastore: Option<String>,
    #[serde(default)]
    pub lun_uuid: Option<String>,
}

/// One entry of a VM's hardware device list. Controllers carry a bus
/// number; disks carry a controller-key reference, a unit number and a
/// backing descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualDevice {
    pub key: i32,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub label: String,
    #[serde(default)]
    pub controller_key: Option<i32>,
    #[serde(default)]
    pub bus_number: Option<i32>,
    #[serde(default)]
    pub unit_number: Option<i32>,
    #[serde(default)]
    pub backing: Option<DeviceBacking>,
}

/// Captured result of a script run through the guest operations
/// channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptResult {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}
