use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const CONFIG_FILE: &str = ".vmdiskmap.toml";
pub const DEFAULT_OUTPUT: &str = "vm_drive_map.csv";
pub const DEFAULT_FAILURE_LOG: &str = "vm_drive_map_failures.log";
pub const DEFAULT_CREDENTIAL_CACHE: &str = ".vmdiskmap-credentials";

/// Optional config file in the working directory. Command line
/// arguments override every field.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_cache: Option<PathBuf>,
}

impl AppConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn generate_config_file(force: bool) -> Result<()> {
        if std::path::Path::new(CONFIG_FILE).exists() && !force {
            anyhow::bail!(
                "Configuration file {} already exists. Use --force to overwrite.",
                CONFIG_FILE
            );
        }

        fs::write(CONFIG_FILE, Self::generate_full_config())?;

        info!("Configuration file generated: {}", CONFIG_FILE);
        info!("Please edit this file to customize configuration");
        Ok(())
    }

    pub fn generate_full_config() -> String {
        let config = AppConfig {
            server: Some("vcenter.example.com".to_string()),
            insecure: Some(false),
            vm_filter: Some(String::new()),
            output: Some(PathBuf::from(DEFAULT_OUTPUT)),
            failure_log: Some(PathBuf::from(DEFAULT_FAILURE_LOG)),
            credential_cache: Some(PathBuf::from(DEFAULT_CREDENTIAL_CACHE)),
        };
        let toml_content = toml::to_string_pretty(&config).unwrap();
        format!(
            "# vmdiskmap configuration file\n# All fields are optional, command line arguments override config file values\n\n{}",
            toml_content
        )
    }
}
