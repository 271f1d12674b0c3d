use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;

use vmdiskmap::config::{
    AppConfig, CONFIG_FILE, DEFAULT_CREDENTIAL_CACHE, DEFAULT_FAILURE_LOG, DEFAULT_OUTPUT,
};
use vmdiskmap::credentials::AuthMethod;
use vmdiskmap::inventory::{self, ReportOptions};

#[derive(Parser)]
#[command(name = "vmdiskmap")]
#[command(about = "Map Windows guest volumes to their backing VMware virtual disks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inventory VMs and export the drive-to-disk map
    Report {
        /// vCenter address (host or host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Accept self-signed TLS certificates
        #[arg(long)]
        insecure: bool,

        /// Case-insensitive substring filter on VM names
        #[arg(long, value_name = "PATTERN")]
        vm_filter: Option<String>,

        /// Output CSV path (overwritten each run)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Failure log path (written only when VMs were skipped)
        #[arg(long, value_name = "PATH")]
        failure_log: Option<PathBuf>,

        /// Authentication method for the management endpoint
        #[arg(long, value_enum)]
        auth: Option<AuthMethod>,
    },

    /// Probe the management endpoint and verify authentication
    Check {
        /// vCenter address (host or host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Accept self-signed TLS certificates
        #[arg(long)]
        insecure: bool,

        /// Authentication method for the management endpoint
        #[arg(long, value_enum)]
        auth: Option<AuthMethod>,
    },

    /// Generate configuration file (.vmdiskmap.toml) in current directory
    Genconfig {
        /// Force overwrite existing configuration file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logger, default info level, display file line number and time
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}:{}] {level_style}{}{level_style:#}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();

    // Try to load configuration file
    let app_config = if std::path::Path::new(CONFIG_FILE).exists() {
        match AppConfig::load_from_file(CONFIG_FILE) {
            Ok(cfg) => {
                let abs_path = std::fs::canonicalize(CONFIG_FILE)
                    .unwrap_or_else(|_| std::path::PathBuf::from(CONFIG_FILE));
                info!("Using configuration file: {}", abs_path.display());
                cfg
            }
            Err(e) => {
                error!("Failed to load configuration file: {}, using defaults", e);
                AppConfig::default()
            }
        }
    } else {
        AppConfig::default()
    };

    match cli.command {
        Commands::Report {
            server,
            insecure,
            vm_filter,
            output,
            failure_log,
            auth,
        } => {
            inventory::run_report(ReportOptions {
                server: server.or(app_config.server.clone()),
                insecure: insecure || app_config.insecure.unwrap_or(false),
                vm_filter: vm_filter.or(non_empty(app_config.vm_filter.clone())),
                output: output
                    .or(app_config.output.clone())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
                failure_log: failure_log
                    .or(app_config.failure_log.clone())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FAILURE_LOG)),
                auth,
                credential_cache: app_config
                    .credential_cache
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIAL_CACHE)),
            })?;
        }

        Commands::Check {
            server,
            insecure,
            auth,
        } => {
            inventory::run_check(
                server.or(app_config.server.clone()),
                insecure || app_config.insecure.unwrap_or(false),
                auth,
                app_config
                    .credential_cache
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIAL_CACHE)),
            )?;
        }

        Commands::Genconfig { force } => {
            if let Err(e) = AppConfig::generate_config_file(force) {
                error!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
