//! Credential acquisition for the management endpoint and the guest,
//! plus an encrypted on-disk cache so repeat runs can skip the prompt.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use dialoguer::{Confirm, Input, Password, Select};
use log::info;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs;
use std::path::Path;

use crate::vsphere::guest::GuestCredential;

const CACHE_MAGIC: &[u8] = b"VMDMCRED1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERS: u32 = 100_000;

pub const ENV_USER: &str = "VMDISKMAP_USER";
pub const ENV_PASSWORD: &str = "VMDISKMAP_PASSWORD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AuthMethod {
    /// Prompt for username and password
    Prompt,
    /// Read VMDISKMAP_USER / VMDISKMAP_PASSWORD
    Env,
    /// Decrypt the cached credential file
    Cached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCredential {
    pub username: String,
    pub password: String,
}

/// Endpoint address from argument/config, or prompted. An empty
/// answer aborts the run.
pub fn resolve_server(server: Option<String>) -> Result<String> {
    let value = match server {
        Some(s) => s,
        None => Input::<String>::new()
            .with_prompt("vCenter address")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| anyhow!("prompt failed: {e}"))?,
    };
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        bail!("management endpoint address is required");
    }
    Ok(trimmed)
}

pub fn resolve_auth_method(method: Option<AuthMethod>) -> Result<AuthMethod> {
    if let Some(method) = method {
        return Ok(method);
    }
    let items = [
        "prompt for credentials",
        "environment variables",
        "cached credential file",
    ];
    let pick = Select::new()
        .with_prompt("Authentication method")
        .items(&items)
        .default(0)
        .interact()
        .map_err(|e| anyhow!("prompt failed: {e}"))?;
    Ok(match pick {
        0 => AuthMethod::Prompt,
        1 => AuthMethod::Env,
        _ => AuthMethod::Cached,
    })
}

pub fn server_credential(method: AuthMethod, cache_path: &Path) -> Result<ServerCredential> {
    match method {
        AuthMethod::Prompt => {
            let username: String = Input::new()
                .with_prompt("vCenter username")
                .allow_empty(true)
                .interact_text()
                .map_err(|e| anyhow!("prompt failed: {e}"))?;
            let password = Password::new()
                .with_prompt("vCenter password")
                .allow_empty_password(true)
                .interact()
                .map_err(|e| anyhow!("prompt failed: {e}"))?;
            if username.trim().is_empty() || password.is_empty() {
                bail!("no credential supplied");
            }
            Ok(ServerCredential {
                username: username.trim().to_string(),
                password,
            })
        }
        AuthMethod::Env => {
            let username = std::env::var(ENV_USER);
            let password = std::env::var(ENV_PASSWORD);
            match (username, password) {
                (Ok(username), Ok(password)) if !username.is_empty() && !password.is_empty() => {
                    Ok(ServerCredential { username, password })
                }
                _ => bail!("no credential supplied: set {} and {}", ENV_USER, ENV_PASSWORD),
            }
        }
        AuthMethod::Cached => {
            let passphrase = Password::new()
                .with_prompt("Credential cache passphrase")
                .interact()
                .map_err(|e| anyhow!("prompt failed: {e}"))?;
            load_cached(cache_path, &passphrase)
        }
    }
}

/// The single guest credential for the run, reused for every VM.
pub fn prompt_guest_credential() -> Result<GuestCredential> {
    let username: String = Input::new()
        .with_prompt("Guest username")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| anyhow!("prompt failed: {e}"))?;
    let password = Password::new()
        .with_prompt("Guest password")
        .allow_empty_password(true)
        .interact()
        .map_err(|e| anyhow!("prompt failed: {e}"))?;
    if username.trim().is_empty() || password.is_empty() {
        bail!("no guest credential supplied");
    }
    Ok(GuestCredential {
        username: username.trim().to_string(),
        password,
    })
}

/// After a successful prompted login, offer to cache the credential.
pub fn offer_to_cache(credential: &ServerCredential, path: &Path) -> Result<()> {
    let confirmed = Confirm::new()
        .with_prompt(format!("Save credential to {}?", path.display()))
        .default(false)
        .interact()
        .map_err(|e| anyhow!("prompt failed: {e}"))?;
    if !confirmed {
        return Ok(());
    }
    let passphrase = Password::new()
        .with_prompt("Cache passphrase")
        .with_confirmation("Confirm passphrase", "Passphrases do not match")
        .interact()
        .map_err(|e| anyhow!("prompt failed: {e}"))?;
    save_cached(credential, path, &passphrase)?;
    info!("Credential cached at {}", path.display());
    Ok(())
}

pub fn save_cached(credential: &ServerCredential, path: &Path, passphrase: &str) -> Result<()> {
    let plain = serde_json::to_vec(credential).context("Failed to serialize credential")?;
    let sealed = encrypt_bytes(&plain, passphrase)?;
    fs::write(path, sealed).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_cached(path: &Path, passphrase: &str) -> Result<ServerCredential> {
    let bytes =
        fs::read(path).with_context(|| format!("No cached credential at {}", path.display()))?;
    let plain = decrypt_bytes(&bytes, passphrase)?;
    serde_json::from_slice(&plain).context("Cached credential is malformed")
}

fn encrypt_bytes(plain: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut rng = rand::rng();
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let mut key_bytes = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, PBKDF2_ITERS, &mut key_bytes);
    let cipher = Aes256Gcm::new_from_slice(&key_bytes).context("Failed to initialize cipher")?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plain)
        .map_err(|_| anyhow!("Encrypt failed"))?;

    let mut out = Vec::with_capacity(CACHE_MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(CACHE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_bytes(bytes: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if bytes.len() <= CACHE_MAGIC.len() + SALT_LEN + NONCE_LEN || !bytes.starts_with(CACHE_MAGIC) {
        bail!("Not a credential cache file");
    }
    let salt_start = CACHE_MAGIC.len();
    let nonce_start = salt_start + SALT_LEN;
    let cipher_start = nonce_start + NONCE_LEN;

    let salt = &bytes[salt_start..nonce_start];
    let nonce = &bytes[nonce_start..cipher_start];
    let ciphertext = &bytes[cipher_start..];

    let mut key_bytes = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERS, &mut key_bytes);
    let cipher = Aes256Gcm::new_from_slice(&key_bytes).context("Failed to initialize cipher")?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("Decrypt failed (bad passphrase or corrupted cache)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn credential() -> ServerCredential {
        ServerCredential {
            username: "svc-inventory".into(),
            password: "s3cret!".into(),
        }
    }

    #[test]
    fn cache_round_trip() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("cred");
        save_cached(&credential(), &path, "hunter2").expect("save");

        let loaded = load_cached(&path, "hunter2").expect("load");
        assert_eq!(loaded.username, "svc-inventory");
        assert_eq!(loaded.password, "s3cret!");
    }

    #[test]
    fn wrong_passphrase_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("cred");
        save_cached(&credential(), &path, "hunter2").expect("save");
        assert!(load_cached(&path, "hunter3").is_err());
    }

    #[test]
    fn garbage_file_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("cred");
        fs::write(&path, b"not a cache").expect("write");
        assert!(load_cached(&path, "hunter2").is_err());
    }

    #[test]
    fn cache_file_is_not_plaintext() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("cred");
        save_cached(&credential(), &path, "hunter2").expect("save");
        let bytes = fs::read(&path).expect("read");
        assert!(bytes.starts_with(CACHE_MAGIC));
        let haystack = String::from_utf8_lossy(&bytes);
        assert!(!haystack.contains("s3cret"));
    }

    #[test]
    #[serial_test::serial]
    fn env_method_requires_both_variables() {
        unsafe {
            std::env::remove_var(ENV_USER);
            std::env::remove_var(ENV_PASSWORD);
        }
        let temp = TempDir::new().expect("temp dir");
        assert!(server_credential(AuthMethod::Env, &temp.path().join("cred")).is_err());

        unsafe {
            std::env::set_var(ENV_USER, "admin");
            std::env::set_var(ENV_PASSWORD, "pw");
        }
        let cred =
            server_credential(AuthMethod::Env, &temp.path().join("cred")).expect("env credential");
        assert_eq!(cred.username, "admin");
        unsafe {
            std::env::remove_var(ENV_USER);
            std::env::remove_var(ENV_PASSWORD);
        }
    }
}
