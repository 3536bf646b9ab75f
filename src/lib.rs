//! Unattended backup/restore controller for telephony-platform
//! configuration and its MySQL database.
//!
//! A master instance produces full point-in-time snapshots (configuration
//! tree + database dump) and stores them under a canonical name in a local
//! directory or a remote SFTP drop. A disaster-recovery instance restores a
//! chosen snapshot while preserving its own network identity and database
//! encryption key.

pub mod archive;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod exec;
pub mod fields;
pub mod fsops;
pub mod lock;
pub mod restore;
pub mod staging;
pub mod storage;
pub mod utils;
