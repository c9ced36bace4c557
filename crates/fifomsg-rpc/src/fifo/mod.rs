//! FIFO backend: thread-per-connection over FIFO files.
//!
//! A FIFO is one-way and carries no peer identity, so each client announces
//! itself on the server's well-known FIFO with a suffix, and both sides then
//! open a private pair derived from it:
//! - `<base>.<suffix>`: requests, client to server
//! - `<base>.<suffix>-read`: replies, server to client

pub mod client;
pub mod handshake;
pub mod server;

pub use client::FifoClient;
pub use handshake::{RendezvousPaths, MAX_BASE_LEN, SUFFIX_MAX_LEN};
pub use server::FifoServer;

use crate::transport::Transport;

/// FIFO files with a rendezvous handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl Transport for Fifo {
    const NAME: &'static str = "fifo";
    const DEFAULT_NAME: &'static str = "/tmp/namedpipe-default";

    type Server = FifoServer;
    type Client = FifoClient;
}
