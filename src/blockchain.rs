// Thin re-export module: implementation is in `blockchain/core.rs`, split
// into block/ledger state, the pending buffer, and validation.

pub mod core;
pub use core::*;
