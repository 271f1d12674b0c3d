use std::collections::HashMap;
use std::fs;

use anyhow::Result;
use tempfile::TempDir;

use vmdiskmap::inventory::guest::GuestInventory;
use vmdiskmap::inventory::types::{
    ControllerType, DiskBacking, DriveBusMapping, GuestVolumeRecord, LunDetail, Resolution,
    SkipReason, VirtualDiskRecord, VmHandle,
};
use vmdiskmap::inventory::{export, join, run_inventory, HardwareSource};

struct FakeHardware {
    disks: HashMap<String, Vec<VirtualDiskRecord>>,
}

impl HardwareSource for FakeHardware {
    fn virtual_disks(&self, vm: &VmHandle) -> Result<Vec<VirtualDiskRecord>> {
        Ok(self.disks.get(&vm.name).cloned().unwrap_or_default())
    }
}

struct FakeGuest {
    tools_down: Vec<String>,
    volumes: HashMap<String, Vec<GuestVolumeRecord>>,
    bus_maps: HashMap<String, Vec<DriveBusMapping>>,
}

impl GuestInventory for FakeGuest {
    fn preflight(&self, vm: &VmHandle) -> Result<(), SkipReason> {
        if self.tools_down.contains(&vm.name) {
            return Err(SkipReason::ToolsUnavailable(
                "reported state NotRunning".into(),
            ));
        }
        Ok(())
    }

    fn volumes(&self, vm: &VmHandle) -> Result<Vec<GuestVolumeRecord>, SkipReason> {
        Ok(self.volumes.get(&vm.name).cloned().unwrap_or_default())
    }

    fn drive_map(&self, vm: &VmHandle) -> Result<Vec<DriveBusMapping>, SkipReason> {
        Ok(self.bus_maps.get(&vm.name).cloned().unwrap_or_default())
    }
}

fn handle(name: &str) -> VmHandle {
    VmHandle {
        id: format!("vm-{}", name.to_lowercase()),
        name: name.into(),
        host_id: "host-1".into(),
        esxi_host: "esx01.lab.local".into(),
        cluster: "Prod".into(),
    }
}

fn volume(letter: char, label: &str, size_gb: f64) -> GuestVolumeRecord {
    GuestVolumeRecord {
        drive_letter: letter,
        volume_label: label.into(),
        filesystem: "NTFS".into(),
        size_gb,
    }
}

fn scsi_vmdk(bus: i32, unit: i32, datastore: &str) -> VirtualDiskRecord {
    VirtualDiskRecord {
        label: format!("Hard disk {}", unit + 1),
        controller: ControllerType::Scsi,
        bus_number: Some(bus),
        unit_number: Some(unit),
        join_key: join::join_key(ControllerType::Scsi, Some(bus), Some(unit)),
        backing: DiskBacking::Vmdk {
            datastore: Resolution::Resolved(datastore.into()),
        },
    }
}

fn scsi_rdm(bus: i32, unit: i32, canonical: &str) -> VirtualDiskRecord {
    VirtualDiskRecord {
        label: format!("Hard disk {}", unit + 1),
        controller: ControllerType::Scsi,
        bus_number: Some(bus),
        unit_number: Some(unit),
        join_key: join::join_key(ControllerType::Scsi, Some(bus), Some(unit)),
        backing: DiskBacking::Rdm {
            lun: Resolution::Resolved(LunDetail {
                canonical_name: canonical.into(),
                display_name: Some("Array LUN 7".into()),
                capacity_gb: Some(512.0),
            }),
        },
    }
}

#[test]
fn web01_volume_maps_to_datastore_disk() {
    let hardware = FakeHardware {
        disks: HashMap::from([("WEB01".to_string(), vec![scsi_vmdk(0, 0, "DS01")])]),
    };
    let guest = FakeGuest {
        tools_down: vec![],
        volumes: HashMap::from([("WEB01".to_string(), vec![volume('C', "System", 80.0)])]),
        bus_maps: HashMap::from([(
            "WEB01".to_string(),
            vec![DriveBusMapping {
                drive_letter: 'C',
                bus: 0,
                target: 0,
            }],
        )]),
    };

    let outcome = run_inventory(&[handle("WEB01")], &hardware, &guest, false);
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.rows.len(), 1);

    let hw = outcome.rows[0].hardware.as_ref().expect("hardware match");
    assert_eq!(hw.scsi_id, "SCSI(0:0)");
    assert_eq!(hw.backing.type_name(), "VMDK");

    let temp = TempDir::new().expect("temp dir");
    let csv = temp.path().join("map.csv");
    export::write_csv(&csv, outcome.rows).expect("write");
    let content = fs::read_to_string(&csv).expect("read");
    assert!(content.contains("\"WEB01\""));
    assert!(content.contains("\"SCSI(0:0)\""));
    assert!(content.contains("\"VMDK\""));
    assert!(content.contains("\"DS01\""));
}

#[test]
fn rdm_disk_exports_lun_and_no_datastore() {
    let hardware = FakeHardware {
        disks: HashMap::from([(
            "DB02".to_string(),
            vec![scsi_rdm(0, 1, "naa.60003ff44dc75adc")],
        )]),
    };
    let guest = FakeGuest {
        tools_down: vec![],
        volumes: HashMap::from([("DB02".to_string(), vec![volume('F', "Logs", 512.0)])]),
        bus_maps: HashMap::from([(
            "DB02".to_string(),
            vec![DriveBusMapping {
                drive_letter: 'F',
                bus: 0,
                target: 1,
            }],
        )]),
    };

    let outcome = run_inventory(&[handle("DB02")], &hardware, &guest, false);
    assert_eq!(outcome.rows.len(), 1);

    let temp = TempDir::new().expect("temp dir");
    let csv = temp.path().join("map.csv");
    export::write_csv(&csv, outcome.rows).expect("write");
    let content = fs::read_to_string(&csv).expect("read");
    let data_line = content.lines().nth(1).expect("data row");
    assert!(data_line.contains("\"RDM\""));
    assert!(data_line.contains("\"naa.60003ff44dc75adc\""));
    // Datastore column stays empty for RDM disks
    let fields: Vec<&str> = data_line.split("\",\"").collect();
    assert_eq!(fields[11], "");
}

#[test]
fn tools_down_vm_is_skipped_and_run_continues() {
    let hardware = FakeHardware {
        disks: HashMap::from([("WEB01".to_string(), vec![scsi_vmdk(0, 0, "DS01")])]),
    };
    let guest = FakeGuest {
        tools_down: vec!["DB01".to_string()],
        volumes: HashMap::from([("WEB01".to_string(), vec![volume('C', "System", 80.0)])]),
        bus_maps: HashMap::new(),
    };

    let outcome = run_inventory(&[handle("DB01"), handle("WEB01")], &hardware, &guest, false);

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].vm, "DB01");
    assert!(outcome.failures[0].reason.to_string().contains("Tools"));

    // DB01 contributes no rows, WEB01 still processed
    assert_eq!(outcome.rows.len(), 1);
    assert_eq!(outcome.rows[0].vm_name, "WEB01");
}

#[test]
fn row_count_matches_guest_volume_count() {
    let hardware = FakeHardware {
        disks: HashMap::from([("APP01".to_string(), vec![scsi_vmdk(0, 0, "DS01")])]),
    };
    // three volumes, only one of them bus-mapped
    let guest = FakeGuest {
        tools_down: vec![],
        volumes: HashMap::from([(
            "APP01".to_string(),
            vec![
                volume('C', "System", 60.0),
                volume('D', "Data", 200.0),
                volume('T', "TempDB", 50.0),
            ],
        )]),
        bus_maps: HashMap::from([(
            "APP01".to_string(),
            vec![DriveBusMapping {
                drive_letter: 'C',
                bus: 0,
                target: 0,
            }],
        )]),
    };

    let outcome = run_inventory(&[handle("APP01")], &hardware, &guest, false);
    assert_eq!(outcome.rows.len(), 3);

    let matched: Vec<char> = outcome
        .rows
        .iter()
        .filter(|r| r.hardware.is_some())
        .map(|r| r.drive_letter)
        .collect();
    assert_eq!(matched, ['C']);
}

#[test]
fn empty_run_still_writes_header() {
    let hardware = FakeHardware {
        disks: HashMap::new(),
    };
    let guest = FakeGuest {
        tools_down: vec!["DB01".to_string()],
        volumes: HashMap::new(),
        bus_maps: HashMap::new(),
    };

    let outcome = run_inventory(&[handle("DB01")], &hardware, &guest, false);
    assert!(outcome.rows.is_empty());

    let temp = TempDir::new().expect("temp dir");
    let csv = temp.path().join("map.csv");
    let log = temp.path().join("failures.log");
    export::write_csv(&csv, outcome.rows).expect("write");
    export::write_failure_log(&log, &outcome.failures).expect("write log");

    let content = fs::read_to_string(&csv).expect("read");
    assert_eq!(content.lines().count(), 1);
    assert!(log.exists());
}
