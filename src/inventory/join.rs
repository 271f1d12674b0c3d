use log::warn;

use super::types::{
    ControllerType, DriveBusMapping, GuestVolumeRecord, HardwareMatch, MergedRow, VirtualDiskRecord,
    VmHandle,
};

/// Synthesize the key both inventories are correlated on. Only
/// SCSI-attached disks with a known bus and unit get one; NVMe and SATA
/// disks cannot be correlated to guest volumes this way.
pub fn join_key(controller: ControllerType, bus: Option<i32>, unit: Option<i32>) -> Option<String> {
    match (controller, bus, unit) {
        (ControllerType::Scsi, Some(bus), Some(unit)) => Some(format!("SCSI({}:{})", bus, unit)),
        _ => None,
    }
}

/// Join one VM's guest volumes against its drive-to-bus map and its
/// virtual disk set. Emits exactly one row per guest volume: unmatched
/// rows keep their hardware fields empty and flag volumes the tool
/// could not resolve.
pub fn reconcile(
    vm: &VmHandle,
    volumes: &[GuestVolumeRecord],
    bus_map: &[DriveBusMapping],
    disks: &[VirtualDiskRecord],
) -> Vec<MergedRow> {
    volumes
        .iter()
        .map(|volume| {
            let hardware = find_mapping(vm, bus_map, volume.drive_letter)
                .and_then(|mapping| find_disk(vm, disks, mapping))
                .map(|disk| HardwareMatch {
                    disk_label: disk.label.clone(),
                    controller: disk.controller,
                    // join_key is Some by construction of the match
                    scsi_id: disk.join_key.clone().unwrap_or_default(),
                    backing: disk.backing.clone(),
                });

            MergedRow {
                vm_name: vm.name.clone(),
                esxi_host: vm.esxi_host.clone(),
                cluster_name: vm.cluster.clone(),
                drive_letter: volume.drive_letter,
                volume_label: volume.volume_label.clone(),
                filesystem: volume.filesystem.clone(),
                volume_size_gb: volume.size_gb,
                hardware,
            }
        })
        .collect()
}

/// First mapping for the letter wins; more than one means the guest
/// reported an ambiguous association chain.
fn find_mapping<'a>(
    vm: &VmHandle,
    bus_map: &'a [DriveBusMapping],
    letter: char,
) -> Option<&'a DriveBusMapping> {
    let mut matches = bus_map.iter().filter(|m| m.drive_letter == letter);
    let first = matches.next()?;
    if matches.next().is_some() {
        warn!(
            "{}: drive {}: has multiple bus mappings, taking SCSI({}:{})",
            vm.name, letter, first.bus, first.target
        );
    }
    Some(first)
}

fn find_disk<'a>(
    vm: &VmHandle,
    disks: &'a [VirtualDiskRecord],
    mapping: &DriveBusMapping,
) -> Option<&'a VirtualDiskRecord> {
    let key = join_key(ControllerType::Scsi, Some(mapping.bus), Some(mapping.target))?;
    let mut matches = disks.iter().filter(|d| d.join_key.as_deref() == Some(key.as_str()));
    let first = matches.next()?;
    if matches.next().is_some() {
        warn!(
            "{}: multiple virtual disks share {}, taking \"{}\"",
            vm.name, key, first.label
        );
    }
    Some(first)
}
