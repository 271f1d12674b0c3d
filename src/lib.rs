pub mod config;
pub mod credentials;
pub mod inventory;
pub mod vsphere;
