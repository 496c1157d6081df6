//! Chorus - multi-agent conversation server with bounded autonomous continuation.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod build_info;
pub mod config;

// ============================================================================
// Domain
// ============================================================================

pub mod agent;
pub mod continuation;
pub mod llm;
pub mod notify;
pub mod session;

// ============================================================================
// Server & Transports
// ============================================================================

pub mod rpc;
pub mod server;
