//! Command implementations

pub mod diff;
pub mod init;
pub mod log;
pub mod record;
pub mod show;
pub mod trace;
pub mod verify;
