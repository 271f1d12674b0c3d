use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use super::types::{DiskBacking, MergedRow, VmFailure};

pub const CSV_COLUMNS: [&str; 15] = [
    "VMName",
    "ESXiHost",
    "ClusterName",
    "GuestDriveLetter",
    "VolumeLabel",
    "FileSystem",
    "VolumeSizeGB",
    "VMwareDisk",
    "ControllerType",
    "SCSI_ID",
    "BackingType",
    "Datastore",
    "LunCanonicalName",
    "LunDisplayName",
    "LunCapacityGB",
];

/// Collapse duplicates by (VM name, drive letter). A row with a
/// hardware match displaces an unmatched one; otherwise the first
/// encountered stays. Selection only, rows are never mutated.
pub fn dedup_rows(rows: Vec<MergedRow>) -> Vec<MergedRow> {
    let mut kept: Vec<MergedRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match kept
            .iter()
            .position(|k| k.vm_name == row.vm_name && k.drive_letter == row.drive_letter)
        {
            Some(i) => {
                if kept[i].hardware.is_none() && row.hardware.is_some() {
                    kept[i] = row;
                }
            }
            None => kept.push(row),
        }
    }
    kept
}

/// Deduplicate, sort by (VM name, drive letter), and write the CSV,
/// overwriting any prior file. An empty run still writes the header.
pub fn write_csv(path: &Path, rows: Vec<MergedRow>) -> Result<()> {
    let mut rows = dedup_rows(rows);
    rows.sort_by(|a, b| {
        (a.vm_name.as_str(), a.drive_letter).cmp(&(b.vm_name.as_str(), b.drive_letter))
    });

    let mut out = String::new();
    out.push_str(&csv_line(&CSV_COLUMNS.map(String::from)));
    for row in &rows {
        out.push_str(&csv_line(&row_fields(row)));
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Write the (VM, reason) failure table, sorted, but only when there
/// is something to report. A stale log from an earlier run is removed
/// so it cannot misreport a clean run.
pub fn write_failure_log(path: &Path, failures: &[VmFailure]) -> Result<()> {
    if failures.is_empty() {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale {}", path.display()))?;
        }
        return Ok(());
    }

    let mut entries: Vec<(String, String)> = failures
        .iter()
        .map(|f| (f.vm.clone(), f.reason.to_string()))
        .collect();
    entries.sort();

    let vm_width = entries
        .iter()
        .map(|(vm, _)| vm.len())
        .chain(["VM Name".len()].into_iter())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str(&format!("{:<width$}  Reason\n", "VM Name", width = vm_width));
    out.push_str(&format!("{:<width$}  ------\n", "-------", width = vm_width));
    for (vm, reason) in &entries {
        out.push_str(&format!("{:<width$}  {}\n", vm, reason, width = vm_width));
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} failures to {}", entries.len(), path.display());
    Ok(())
}

fn row_fields(row: &MergedRow) -> [String; 15] {
    let mut fields = [const { String::new() }; 15];
    fields[0] = row.vm_name.clone();
    fields[1] = row.esxi_host.clone();
    fields[2] = row.cluster_name.clone();
    fields[3] = format!("{}:", row.drive_letter);
    fields[4] = row.volume_label.clone();
    fields[5] = row.filesystem.clone();
    fields[6] = format!("{:.2}", row.volume_size_gb);

    if let Some(hw) = &row.hardware {
        fields[7] = hw.disk_label.clone();
        fields[8] = hw.controller.to_string();
        fields[9] = hw.scsi_id.clone();
        fields[10] = hw.backing.type_name().to_string();
        match &hw.backing {
            DiskBacking::Vmdk { datastore } => {
                if let Some(name) = datastore.value() {
                    fields[11] = name.clone();
                }
            }
            DiskBacking::Rdm { lun } => {
                if let Some(detail) = lun.value() {
                    fields[12] = detail.canonical_name.clone();
                    fields[13] = detail.display_name.clone().unwrap_or_default();
                    if let Some(gb) = detail.capacity_gb {
                        fields[14] = format!("{:.2}", gb);
                    }
                }
            }
        }
    }
    fields
}

/// Every field quoted, embedded quotes doubled.
fn csv_line(fields: &[String]) -> String {
    let quoted: Vec<String> = fields
        .iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect();
    let mut line = quoted.join(",");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::types::{ControllerType, HardwareMatch, Resolution};
    use tempfile::TempDir;

    fn row(vm: &str, letter: char, matched: bool) -> MergedRow {
        MergedRow {
            vm_name: vm.into(),
            esxi_host: "esx01".into(),
            cluster_name: "Prod".into(),
            drive_letter: letter,
            volume_label: "Data".into(),
            filesystem: "NTFS".into(),
            volume_size_gb: 100.0,
            hardware: matched.then(|| HardwareMatch {
                disk_label: "Hard disk 1".into(),
                controller: ControllerType::Scsi,
                scsi_id: "SCSI(0:0)".into(),
                backing: DiskBacking::Vmdk {
                    datastore: Resolution::Resolved("DS01".into()),
                },
            }),
        }
    }

    #[test]
    fn dedup_prefers_hardware_match() {
        let kept = dedup_rows(vec![row("WEB01", 'C', false), row("WEB01", 'C', true)]);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].hardware.is_some());

        // order reversed: the matched row still wins
        let kept = dedup_rows(vec![row("WEB01", 'C', true), row("WEB01", 'C', false)]);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].hardware.is_some());
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            row("WEB01", 'C', false),
            row("WEB01", 'C', true),
            row("WEB01", 'D', false),
            row("DB01", 'C', true),
        ];
        let once = dedup_rows(input);
        let twice = dedup_rows(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.vm_name, b.vm_name);
            assert_eq!(a.drive_letter, b.drive_letter);
            assert_eq!(a.hardware.is_some(), b.hardware.is_some());
        }
    }

    #[test]
    fn csv_has_header_and_quoted_fields() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("map.csv");
        write_csv(&path, vec![row("WEB01", 'C', true)]).expect("write");

        let content = fs::read_to_string(&path).expect("read");
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("\"VMName\",\"ESXiHost\""));
        let data = lines.next().unwrap();
        assert!(data.contains("\"C:\""));
        assert!(data.contains("\"SCSI(0:0)\""));
        assert!(data.contains("\"VMDK\""));
        assert!(data.contains("\"DS01\""));
        assert!(data.contains("\"100.00\""));
        assert!(lines.next().is_none());
    }

    #[test]
    fn csv_sorted_by_vm_then_letter() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("map.csv");
        write_csv(
            &path,
            vec![row("WEB01", 'D', false), row("DB01", 'C', false), row("WEB01", 'C', false)],
        )
        .expect("write");

        let content = fs::read_to_string(&path).expect("read");
        let vms: Vec<&str> = content
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(vms, ["\"DB01\"", "\"WEB01\"", "\"WEB01\""]);
    }

    #[test]
    fn embedded_quote_doubled() {
        let mut r = row("WEB01", 'C', false);
        r.volume_label = "the \"big\" one".into();
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("map.csv");
        write_csv(&path, vec![r]).expect("write");
        let content = fs::read_to_string(&path).expect("read");
        assert!(content.contains("\"the \"\"big\"\" one\""));
    }

    #[test]
    fn failure_log_only_when_failures() {
        use crate::inventory::types::SkipReason;

        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("failures.log");

        write_failure_log(&path, &[]).expect("write empty");
        assert!(!path.exists());

        let failures = vec![VmFailure {
            vm: "DB01".into(),
            reason: SkipReason::ToolsUnavailable("reported state NotRunning".into()),
        }];
        write_failure_log(&path, &failures).expect("write");
        let content = fs::read_to_string(&path).expect("read");
        assert!(content.contains("DB01"));
        assert!(content.contains("Tools"));

        // a later clean run clears the stale log
        write_failure_log(&path, &[]).expect("clear");
        assert!(!path.exists());
    }
}
