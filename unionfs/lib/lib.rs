//! `unionfs` is the metadata and identity core of an overlay filesystem.
//!
//! An overlay presents a stack of real filesystems (an optional writable upper layer over one or
//! more read-only lower layers) as a single tree. This crate owns the part that decides what that
//! tree looks like to a caller:
//!
//! - which device and inode number a unified file reports ([`IdentityResolver`])
//! - how many links it has, including across copy-up of hard links ([`NlinkLedger`])
//! - one overlay inode per logical file, created atomically ([`InodeCache`])
//! - attribute, permission and extended attribute operations with copy-up ([`OverlayFs`])
//!
//! Storage is behind [`RealFileSystem`], and materializing a lower entry on the upper layer is
//! behind [`CopyUp`]. [`MemoryRealFs`] and [`MemoryCopyUp`] implement both in memory.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod cache;
mod config;
mod copyup;
mod creds;
mod entry;
mod error;
mod identity;
mod implementations;
mod inode;
mod layer;
mod ledger;
mod metadata;
mod overlay;
mod ratelimit;
mod real;
mod write;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod defaults;

pub use cache::*;
pub use config::*;
pub use copyup::*;
pub use creds::*;
pub use entry::*;
pub use error::*;
pub use identity::*;
pub use implementations::*;
pub use inode::*;
pub use layer::*;
pub use ledger::*;
pub use metadata::*;
pub use overlay::*;
pub use ratelimit::*;
pub use real::*;
pub use write::*;
