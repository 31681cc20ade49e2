//! Command implementations for the bootlink CLI.

pub(crate) mod flash;
pub(crate) mod info;
pub(crate) mod monitor;
pub(crate) mod restart;
