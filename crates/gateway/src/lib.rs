//! `wb-gateway`: HTTP façade, CLI and process bootstrap for the wabridge
//! session manager.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod sent_log;
pub mod state;
