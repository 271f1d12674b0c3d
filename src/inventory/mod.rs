pub mod export;
pub mod guest;
pub mod hardware;
pub mod join;
pub mod types;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::{self, AuthMethod};
use crate::vsphere::client::{self, VsphereClient, MANAGEMENT_PORT};

use guest::{GuestChannel, GuestInventory};
use types::{MergedRow, SkipReason, VirtualDiskRecord, VmFailure, VmHandle};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hypervisor-side inventory behind a trait, mirroring
/// `GuestInventory`, so the pipeline runs against fakes in tests.
pub trait HardwareSource {
    fn virtual_disks(&self, vm: &VmHandle) -> Result<Vec<VirtualDiskRecord>>;
}

impl HardwareSource for VsphereClient {
    fn virtual_disks(&self, vm: &VmHandle) -> Result<Vec<VirtualDiskRecord>> {
        let devices = self.hardware_devices(&vm.id)?;
        Ok(hardware::read_virtual_disks(
            &vm.name,
            &vm.host_id,
            &devices,
            self,
        ))
    }
}

/// Everything a run accumulates. The exporter consumes this whole,
/// even when every VM failed.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub rows: Vec<MergedRow>,
    pub failures: Vec<VmFailure>,
}

/// One VM through the pipeline: preflight, hardware read, guest read,
/// join. A skip is terminal for the VM; a hardware read failure only
/// degrades the rows to unmatched.
pub fn process_vm(
    vm: &VmHandle,
    hardware: &impl HardwareSource,
    guest: &impl GuestInventory,
) -> Result<Vec<MergedRow>, SkipReason> {
    guest.preflight(vm)?;

    let disks = hardware.virtual_disks(vm).unwrap_or_else(|e| {
        warn!("{}: hardware inventory failed, rows will be unmatched: {}", vm.name, e);
        Vec::new()
    });

    let volumes = guest.volumes(vm)?;
    let bus_map = guest.drive_map(vm)?;
    Ok(join::reconcile(vm, &volumes, &bus_map, &disks))
}

/// Sequential sweep over the VM list. Failures are recorded and the
/// sweep continues; nothing escapes a VM boundary.
pub fn run_inventory(
    vms: &[VmHandle],
    hardware: &impl HardwareSource,
    guest: &impl GuestInventory,
    show_progress: bool,
) -> RunOutcome {
    let bar = if show_progress {
        let bar = ProgressBar::new(vms.len() as u64);
        let style = ProgressStyle::with_template(
            "[{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .expect("static template")
        .progress_chars("=>-");
        bar.set_style(style);
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut outcome = RunOutcome::default();
    for vm in vms {
        bar.set_message(vm.name.clone());
        match process_vm(vm, hardware, guest) {
            Ok(rows) => {
                info!("{}: {} volumes reconciled", vm.name, rows.len());
                outcome.rows.extend(rows);
            }
            Err(reason) => {
                warn!("{}: skipped: {}", vm.name, reason);
                outcome.failures.push(VmFailure {
                    vm: vm.name.clone(),
                    reason,
                });
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    outcome
}

pub struct ReportOptions {
    pub server: Option<String>,
    pub insecure: bool,
    pub vm_filter: Option<String>,
    pub output: PathBuf,
    pub failure_log: PathBuf,
    pub auth: Option<AuthMethod>,
    pub credential_cache: PathBuf,
}

/// The `report` command: connect, prompt once for the guest
/// credential, sweep the matching VMs, export.
pub fn run_report(opts: ReportOptions) -> Result<()> {
    let server = credentials::resolve_server(opts.server)?;
    client::probe(&server, MANAGEMENT_PORT, PROBE_TIMEOUT)
        .context("Management endpoint unreachable")?;

    let method = credentials::resolve_auth_method(opts.auth)?;
    let server_cred = credentials::server_credential(method, &opts.credential_cache)?;
    let client = VsphereClient::connect(
        &server,
        &server_cred.username,
        &server_cred.password,
        opts.insecure,
    )?;
    if method == AuthMethod::Prompt {
        credentials::offer_to_cache(&server_cred, &opts.credential_cache)?;
    }

    let guest_cred = credentials::prompt_guest_credential()?;

    let vms = client.list_vms(opts.vm_filter.as_deref())?;
    if vms.is_empty() {
        match opts.vm_filter.as_deref() {
            Some(pattern) => bail!("No VMs matched filter \"{}\"", pattern),
            None => bail!("No VMs found on {}", server),
        }
    }
    info!("Processing {} VMs", vms.len());

    let mut handles = Vec::with_capacity(vms.len());
    for vm in &vms {
        match client.vm_handle(vm) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!("{}: placement lookup failed: {}", vm.name, e);
                handles.push(VmHandle {
                    id: vm.vm.clone(),
                    name: vm.name.clone(),
                    host_id: String::new(),
                    esxi_host: String::new(),
                    cluster: String::new(),
                });
            }
        }
    }

    let channel = GuestChannel {
        client: &client,
        credential: &guest_cred,
        probe_timeout: PROBE_TIMEOUT,
    };
    let outcome = run_inventory(&handles, &client, &channel, true);

    export::write_csv(&opts.output, outcome.rows)?;
    export::write_failure_log(&opts.failure_log, &outcome.failures)?;
    if !outcome.failures.is_empty() {
        warn!(
            "{} of {} VMs skipped, see {}",
            outcome.failures.len(),
            handles.len(),
            opts.failure_log.display()
        );
    }
    Ok(())
}

/// The `check` command: probe and authenticate, nothing else.
pub fn run_check(
    server: Option<String>,
    insecure: bool,
    auth: Option<AuthMethod>,
    credential_cache: PathBuf,
) -> Result<()> {
    let server = credentials::resolve_server(server)?;
    client::probe(&server, MANAGEMENT_PORT, PROBE_TIMEOUT)
        .context("Management endpoint unreachable")?;
    info!("{}:{} reachable", server, MANAGEMENT_PORT);

    let method = credentials::resolve_auth_method(auth)?;
    let cred = credentials::server_credential(method, &credential_cache)?;
    VsphereClient::connect(&server, &cred.username, &cred.password, insecure)?;
    info!("Authentication OK");
    Ok(())
}
