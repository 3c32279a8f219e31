//! tbb - a minimal single-chain ledger node
//!
//! Account balances are derived by replaying an append-only log of
//! proof-of-work blocks. Nodes mine pending transactions into blocks and
//! pull missing blocks from their peers over HTTP.
//!
//! # Architecture
//!
//! ## Core Ledger
//! - [`blockchain`] - Hashes, blocks, the difficulty predicate and [`blockchain::LedgerState`]
//! - [`transaction`] - Accounts, transactions and the balance rule
//! - [`genesis`] - Genesis file with the initial balances
//! - [`persistence`] - Append-only block log
//!
//! ## Mining
//! - [`miner`] - Cancellable proof-of-work search
//! - [`mempool`] - Pending transaction pool
//!
//! ## Networking
//! - [`network`] - Peers, wire messages and the peer HTTP client
//! - [`sync`] - Periodic block and peer synchronization
//! - [`api`] - HTTP endpoints served to clients and peers
//!
//! ## Coordination
//! - [`node`] - Commit gate and mining state machine
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod genesis;
pub mod persistence;
pub mod transaction;

// ============================================================================
// Mining
// ============================================================================
pub mod mempool;
pub mod miner;

// ============================================================================
// Networking
// ============================================================================
pub mod api;
pub mod network;
pub mod sync;

// ============================================================================
// Coordination
// ============================================================================
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
