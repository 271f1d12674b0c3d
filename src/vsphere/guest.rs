//! Guest operations channel: run script text inside a powered-on VM
//! and capture its output. Requires VMware Tools in the guest and the
//! owning ESXi host reachable on port 902.

use anyhow::Result;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::client::VsphereClient;
use super::model::ScriptResult;

pub const GUEST_OPS_PORT: u16 = 902;

/// The one guest credential for the run, prompted once and reused for
/// every VM.
#[derive(Debug, Clone)]
pub struct GuestCredential {
    pub username: String,
    pub password: String,
}

/// Best-effort check that the host answers on the guest operations
/// port. Resolution or connect failure both count as closed.
pub fn port_open(host: &str, timeout: Duration) -> bool {
    let Ok(addrs) = (host, GUEST_OPS_PORT).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
}

impl VsphereClient {
    pub fn run_guest_script(
        &self,
        vm_id: &str,
        credential: &GuestCredential,
        script: &str,
    ) -> Result<ScriptResult> {
        let body = serde_json::json!({
            "credentials": {
                "type": "USERNAME_PASSWORD",
                "username": credential.username,
                "password": credential.password,
            },
            "interpreter": "powershell",
            "text": script,
        });
        self.post(&format!("/api/vcenter/vm/{}/guest/scripts", vm_id), &body)
    }
}
