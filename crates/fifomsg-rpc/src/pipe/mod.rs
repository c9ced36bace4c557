//! Named-pipe backend: completion-driven, single control thread.
//!
//! Every session's reads and writes are issued with completion routines and
//! serviced by the server thread's alertable wait, so any number of sessions
//! share one thread. A fresh listening instance is created as soon as a
//! client is handed off.

pub mod client;
pub mod server;

pub use client::PipeClient;
pub use server::PipeServer;

use crate::transport::Transport;

/// Message-mode named pipes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedPipe;

impl Transport for NamedPipe {
    const NAME: &'static str = "named-pipe";
    const DEFAULT_NAME: &'static str = r"\\.\pipe\namedpipe-default";

    type Server = PipeServer;
    type Client = PipeClient;
}
