use anyhow::{anyhow, bail, Result};
use std::time::Duration;

use crate::vsphere::client::VsphereClient;
use crate::vsphere::guest::{port_open, GuestCredential};
use crate::vsphere::model::ToolsRunState;

use super::types::{round2, DriveBusMapping, GuestVolumeRecord, SkipReason, VmHandle};

/// Marker prefixed to every line the in-guest scripts emit, so the
/// parsers can pick records out of whatever else PowerShell prints.
pub const SENTINEL: &str = "##VMDISKMAP##";

/// Lists fixed, lettered volumes: letter, label, filesystem, size in
/// GB. The trailing OK line proves the script ran to completion.
pub const VOLUME_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
Get-CimInstance Win32_Volume -Filter 'DriveType=3' |
  Where-Object { $_.DriveLetter } |
  ForEach-Object {
    $gb = [math]::Round($_.Capacity / 1GB, 2)
    '##VMDISKMAP##|{0}|{1}|{2}|{3}' -f $_.DriveLetter.Substring(0,1), $_.Label, $_.FileSystem, $gb
  }
'##VMDISKMAP##|OK'
"#;

/// Maps drive letters to SCSI bus/target by walking physical disk ->
/// partition -> logical disk, restricted to disks that look like
/// VMware-attached SCSI devices.
pub const BUS_MAP_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
Get-CimInstance Win32_DiskDrive |
  Where-Object { $_.Model -match 'VMware' -or $_.PNPDeviceID -match 'VEN_VMWARE' } |
  ForEach-Object {
    $disk = $_
    $parts = Get-CimInstance -Query ("ASSOCIATORS OF {Win32_DiskDrive.DeviceID='" + $disk.DeviceID + "'} WHERE AssocClass=Win32_DiskDriveToDiskPartition")
    foreach ($part in $parts) {
      $logical = Get-CimInstance -Query ("ASSOCIATORS OF {Win32_DiskPartition.DeviceID='" + $part.DeviceID + "'} WHERE AssocClass=Win32_LogicalDiskToPartition")
      foreach ($ld in $logical) {
        '##VMDISKMAP##|{0}|{1}|{2}' -f $ld.DeviceID.Substring(0,1), $disk.SCSIBus, $disk.SCSITargetId
      }
    }
  }
'##VMDISKMAP##|OK'
"#;

/// Guest-side inventory behind a trait so the pipeline and join can be
/// exercised with fakes.
pub trait GuestInventory {
    fn preflight(&self, vm: &VmHandle) -> Result<(), SkipReason>;
    fn volumes(&self, vm: &VmHandle) -> Result<Vec<GuestVolumeRecord>, SkipReason>;
    fn drive_map(&self, vm: &VmHandle) -> Result<Vec<DriveBusMapping>, SkipReason>;
}

/// Live implementation over the vCenter guest operations channel. One
/// guest credential serves every VM in the run.
pub struct GuestChannel<'a> {
    pub client: &'a VsphereClient,
    pub credential: &'a GuestCredential,
    pub probe_timeout: Duration,
}

impl GuestInventory for GuestChannel<'_> {
    fn preflight(&self, vm: &VmHandle) -> Result<(), SkipReason> {
        match self.client.tools_state(&vm.id) {
            Ok(ToolsRunState::Running) => {}
            Ok(state) => {
                return Err(SkipReason::ToolsUnavailable(format!(
                    "reported state {:?}",
                    state
                )));
            }
            Err(e) => return Err(SkipReason::ToolsUnavailable(e.to_string())),
        }
        if !port_open(&vm.esxi_host, self.probe_timeout) {
            return Err(SkipReason::GuestPortUnreachable {
                host: vm.esxi_host.clone(),
            });
        }
        Ok(())
    }

    fn volumes(&self, vm: &VmHandle) -> Result<Vec<GuestVolumeRecord>, SkipReason> {
        let output = self
            .run(vm, VOLUME_SCRIPT)
            .map_err(|e| SkipReason::VolumeFetch(e.to_string()))?;
        parse_volumes(&output).map_err(|e| SkipReason::VolumeParse(e.to_string()))
    }

    fn drive_map(&self, vm: &VmHandle) -> Result<Vec<DriveBusMapping>, SkipReason> {
        let output = self
            .run(vm, BUS_MAP_SCRIPT)
            .map_err(|e| SkipReason::BusMapFetch(e.to_string()))?;
        parse_bus_map(&output).map_err(|e| SkipReason::BusMapParse(e.to_string()))
    }
}

impl GuestChannel<'_> {
    fn run(&self, vm: &VmHandle, script: &str) -> Result<String> {
        let result = self.client.run_guest_script(&vm.id, self.credential, script)?;
        if result.exit_code != 0 {
            bail!(
                "script exited with code {}: {}",
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(result.stdout)
    }
}

/// Decode the volume listing transported back from the guest.
pub fn parse_volumes(output: &str) -> Result<Vec<GuestVolumeRecord>> {
    let mut records = Vec::new();
    for fields in records_in(output)? {
        let [letter, label, filesystem, size] = fields.as_slice() else {
            bail!("volume row has {} fields, expected 4", fields.len());
        };
        let size_gb: f64 = size
            .parse()
            .map_err(|_| anyhow!("bad volume size: {}", size))?;
        if size_gb < 0.0 {
            bail!("negative volume size: {}", size);
        }
        records.push(GuestVolumeRecord {
            drive_letter: parse_letter(letter)?,
            volume_label: label.to_string(),
            filesystem: filesystem.to_string(),
            size_gb: round2(size_gb),
        });
    }
    Ok(records)
}

/// Decode the drive-to-bus mapping transported back from the guest.
/// An empty mapping is valid: a guest with no recognizably
/// VMware-attached SCSI disks simply yields unmatched rows.
pub fn parse_bus_map(output: &str) -> Result<Vec<DriveBusMapping>> {
    let mut records = Vec::new();
    for fields in records_in(output)? {
        let [letter, bus, target] = fields.as_slice() else {
            bail!("bus mapping row has {} fields, expected 3", fields.len());
        };
        records.push(DriveBusMapping {
            drive_letter: parse_letter(letter)?,
            bus: bus.parse().map_err(|_| anyhow!("bad SCSI bus: {}", bus))?,
            target: target
                .parse()
                .map_err(|_| anyhow!("bad SCSI target: {}", target))?,
        });
    }
    Ok(records)
}

/// Extract sentinel-tagged rows and verify the completion marker. The
/// marker is what separates "script produced nothing" from "transport
/// handed back garbage".
fn records_in(output: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut completed = false;
    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        let Some(rest) = line.strip_prefix(SENTINEL).and_then(|r| r.strip_prefix('|')) else {
            continue;
        };
        if rest == "OK" {
            completed = true;
            continue;
        }
        rows.push(rest.split('|').map(str::to_string).collect());
    }
    if !completed {
        bail!("completion marker missing from guest output");
    }
    Ok(rows)
}

fn parse_letter(field: &str) -> Result<char> {
    let letter = field
        .trim()
        .trim_end_matches(':')
        .chars()
        .next()
        .ok_or_else(|| anyhow!("empty drive letter"))?
        .to_ascii_uppercase();
    if !letter.is_ascii_alphabetic() {
        bail!("bad drive letter: {}", field);
    }
    Ok(letter)
}
