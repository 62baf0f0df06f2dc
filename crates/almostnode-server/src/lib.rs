//! `DevServer` orchestration (spec §4.7) and HMR wiring, in the role
//! the teacher assigns `next-build`/`napi`: the crate that wires every
//! other crate together into something a host (a Service Worker bridge,
//! a CLI, a test harness) links against. See `bin/almostnode-dev.rs`
//! for the CLI entrypoint.

pub mod dev_server;
pub mod hmr;
pub mod packages;

pub use dev_server::{DevRequest, DevServer};
pub use hmr::{HmrHub, HmrTarget};
