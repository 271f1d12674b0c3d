use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use serde::de::DeserializeOwned;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::inventory::hardware::BackingResolver;
use crate::inventory::types::{round2, LunDetail, VmHandle};

use super::model::{
    ClusterSummary, DatastoreInfo, HostSummary, ScsiLun, ToolsInfo, ToolsRunState, VirtualDevice,
    VmHardware, VmPlacement, VmSummary,
};

pub const MANAGEMENT_PORT: u16 = 443;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP reachability check, done before any authentication attempt so
/// an unreachable endpoint fails fast with a clear message.
pub fn probe(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", host))?
        .collect();
    if addrs.is_empty() {
        bail!("{} resolved to no addresses", host);
    }
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(anyhow!(
        "{}:{} unreachable: {}",
        host,
        port,
        last_err.expect("at least one address attempted")
    ))
}

/// Authenticated session against one vCenter. All queries carry the
/// session token; the client is handed out immutably and shared for
/// the whole run.
pub struct VsphereClient {
    http: reqwest::blocking::Client,
    base: String,
    token: String,
}

impl VsphereClient {
    pub fn connect(server: &str, username: &str, password: &str, insecure: bool) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let base = format!("https://{}", server.trim_end_matches('/'));

        let response = http
            .post(format!("{}/api/session", base))
            .basic_auth(username, Some(password))
            .send()
            .with_context(|| format!("Failed to reach {}", server))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            bail!("Authentication failed for user {}", username);
        }
        if !response.status().is_success() {
            bail!("Session request failed: {}", response.status());
        }
        let token: String = response.json().context("Failed to parse session token")?;
        info!("Authenticated against {}", server);
        Ok(Self { http, base, token })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!("GET {}", path);
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .header("vmware-api-session-id", &self.token)
            .send()
            .with_context(|| format!("Request failed: {}", path))?;
        if !response.status().is_success() {
            bail!("{} returned {}", path, response.status());
        }
        response
            .json()
            .with_context(|| format!("Failed to parse response from {}", path))
    }

    pub(crate) fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        debug!("POST {}", path);
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .header("vmware-api-session-id", &self.token)
            .json(body)
            .send()
            .with_context(|| format!("Request failed: {}", path))?;
        if !response.status().is_success() {
            bail!("{} returned {}", path, response.status());
        }
        response
            .json()
            .with_context(|| format!("Failed to parse response from {}", path))
    }

    /// All VMs, optionally narrowed by a case-insensitive substring
    /// match on the name.
    pub fn list_vms(&self, filter: Option<&str>) -> Result<Vec<VmSummary>> {
        let vms: Vec<VmSummary> = self.get("/api/vcenter/vm")?;
        Ok(match filter {
            Some(pattern) => {
                let needle = pattern.to_lowercase();
                vms.into_iter()
                    .filter(|v| v.name.to_lowercase().contains(&needle))
                    .collect()
            }
            None => vms,
        })
    }

    /// Resolve a VM summary into a handle carrying the placement names
    /// that end up in every exported row. Placement lookups degrade to
    /// empty names rather than failing the VM.
    pub fn vm_handle(&self, vm: &VmSummary) -> Result<VmHandle> {
        let placement: VmPlacement = self.get(&format!("/api/vcenter/vm/{}/placement", vm.vm))?;

        let (host_id, esxi_host) = match placement.host {
            Some(id) => {
                let hosts: Vec<HostSummary> = self.get(&format!("/api/vcenter/host?hosts={}", id))?;
                let name = hosts
                    .into_iter()
                    .next()
                    .map(|h| h.name)
                    .unwrap_or_else(|| id.clone());
                (id, name)
            }
            None => (String::new(), String::new()),
        };
        let cluster = match placement.cluster {
            Some(id) => {
                let clusters: Vec<ClusterSummary> =
                    self.get(&format!("/api/vcenter/cluster?clusters={}", id))?;
                clusters.into_iter().next().map(|c| c.name).unwrap_or(id)
            }
            None => String::new(),
        };

        Ok(VmHandle {
            id: vm.vm.clone(),
            name: vm.name.clone(),
            host_id,
            esxi_host,
            cluster,
        })
    }

    pub fn hardware_devices(&self, vm_id: &str) -> Result<Vec<VirtualDevice>> {
        let hw: VmHardware = self.get(&format!("/api/vcenter/vm/{}/hardware", vm_id))?;
        Ok(hw.devices)
    }

    pub fn tools_state(&self, vm_id: &str) -> Result<ToolsRunState> {
        let info: ToolsInfo = self.get(&format!("/api/vcenter/vm/{}/tools", vm_id))?;
        Ok(info.run_state.unwrap_or(ToolsRunState::Unknown))
    }
}

impl BackingResolver for VsphereClient {
    fn datastore_name(&self, datastore_id: &str) -> Result<String> {
        let info: DatastoreInfo = self.get(&format!("/api/vcenter/datastore/{}", datastore_id))?;
        Ok(info.name)
    }

    fn lun_by_uuid(&self, host_id: &str, uuid: &str) -> Result<LunDetail> {
        if host_id.is_empty() {
            bail!("owning host unknown");
        }
        let luns: Vec<ScsiLun> = self.get(&format!("/api/vcenter/host/{}/storage/lun", host_id))?;
        let lun = luns
            .into_iter()
            .find(|l| l.uuid == uuid)
            .ok_or_else(|| anyhow!("LUN {} not present on host {}", uuid, host_id))?;
        let capacity_gb = match (lun.block_count, lun.block_size) {
            (Some(blocks), Some(size)) => Some(round2(
                blocks as f64 * size as f64 / (1024.0 * 1024.0 * 1024.0),
            )),
            _ => None,
        };
        Ok(LunDetail {
            canonical_name: lun.canonical_name,
            display_name: lun.display_name,
            capacity_gb,
        })
    }
}
