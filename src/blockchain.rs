// Thin re-export module: the chain types, ledger state and block checks
// live in `blockchain/core/`.

pub mod core;
pub use core::*;
