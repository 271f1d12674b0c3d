use anyhow::Result;
use log::warn;
use std::collections::HashMap;

use crate::vsphere::model::{BackingKind, DeviceKind, VirtualDevice};

use super::join::join_key;
use super::types::{ControllerType, DiskBacking, LunDetail, Resolution, VirtualDiskRecord};

/// Backing metadata lookups against the management endpoint, behind a
/// trait so the reader can run against fakes.
pub trait BackingResolver {
    fn datastore_name(&self, datastore_id: &str) -> Result<String>;
    fn lun_by_uuid(&self, host_id: &str, uuid: &str) -> Result<LunDetail>;
}

/// Build the VirtualDiskRecord set for one VM from its hardware device
/// list. Controller ownership is matched by controller-key reference;
/// a disk without a matching controller keeps a null bus and gets no
/// join key.
pub fn read_virtual_disks(
    vm_name: &str,
    host_id: &str,
    devices: &[VirtualDevice],
    resolver: &dyn BackingResolver,
) -> Vec<VirtualDiskRecord> {
    let controllers: HashMap<i32, &VirtualDevice> = devices
        .iter()
        .filter(|d| controller_type(d.kind).is_some())
        .map(|d| (d.key, d))
        .collect();

    devices
        .iter()
        .filter(|d| d.kind == DeviceKind::Disk)
        .map(|disk| {
            let owner = disk.controller_key.and_then(|key| controllers.get(&key));
            let controller = owner
                .and_then(|c| controller_type(c.kind))
                .unwrap_or(ControllerType::Other);
            let bus_number = owner.and_then(|c| c.bus_number);

            VirtualDiskRecord {
                label: disk.label.clone(),
                controller,
                bus_number,
                unit_number: disk.unit_number,
                join_key: join_key(controller, bus_number, disk.unit_number),
                backing: classify_backing(vm_name, host_id, disk, resolver),
            }
        })
        .collect()
}

fn controller_type(kind: DeviceKind) -> Option<ControllerType> {
    match kind {
        DeviceKind::ScsiController => Some(ControllerType::Scsi),
        DeviceKind::NvmeController => Some(ControllerType::Nvme),
        DeviceKind::SataController => Some(ControllerType::Sata),
        _ => None,
    }
}

/// Classify the backing and resolve its metadata. Lookup failures stay
/// inside the record as `Resolution::Failed` and are logged here; they
/// never abort the VM.
fn classify_backing(
    vm_name: &str,
    host_id: &str,
    disk: &VirtualDevice,
    resolver: &dyn BackingResolver,
) -> DiskBacking {
    let Some(backing) = disk.backing.as_ref() else {
        warn!("{}: {}: no backing descriptor", vm_name, disk.label);
        return DiskBacking::Vmdk {
            datastore: Resolution::Failed("no backing descriptor".into()),
        };
    };

    if backing.kind == BackingKind::RawDeviceMapping {
        let lun = match backing.lun_uuid.as_deref() {
            Some(uuid) => match resolver.lun_by_uuid(host_id, uuid) {
                Ok(detail) => Resolution::Resolved(detail),
                Err(e) => {
                    warn!("{}: {}: LUN {} not resolved: {}", vm_name, disk.label, uuid, e);
                    Resolution::Failed(e.to_string())
                }
            },
            None => {
                warn!("{}: {}: RDM backing without a LUN uuid", vm_name, disk.label);
                Resolution::Failed("RDM backing without a LUN uuid".into())
            }
        };
        return DiskBacking::Rdm { lun };
    }

    let datastore = match backing.datastore.as_deref() {
        Some(id) => match resolver.datastore_name(id) {
            Ok(name) => Resolution::Resolved(name),
            Err(e) => {
                warn!("{}: {}: datastore {} not resolved: {}", vm_name, disk.label, id, e);
                Resolution::Failed(e.to_string())
            }
        },
        None => Resolution::NotApplicable,
    };
    DiskBacking::Vmdk { datastore }
}
