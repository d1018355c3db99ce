#![forbid(unsafe_code)]

//! Watches an archive list page for new recordings and republishes them.
//!
//! Detection ([`reconcile`]) compares the top of the list against a stored
//! watermark; transfer ([`transfer`]) downloads, splits and uploads whatever
//! was found.

pub mod config;
pub mod downloader;
pub mod item;
pub mod logging;
pub mod naming;
pub mod process;
pub mod reconcile;
pub mod scanner;
pub mod splitter;
pub mod transfer;
pub mod upload;
pub mod watch;
pub mod watermark;
