use clap::{Args, Subcommand};
use fifomsg_rpc::WaitTimeout;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server until Ctrl-C.
    Serve(ServeArgs),
    /// Connect, send requests and print each reply.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Pipe name to listen on. Default: the platform default.
    #[arg(env = "FIFOMSG_NAME")]
    pub name: Option<String>,
    /// Close a session idle for this long (-1 or "infinite" to never).
    #[arg(
        long,
        default_value = "6000",
        env = "FIFOMSG_CLIENT_TIMEOUT",
        allow_hyphen_values = true
    )]
    pub client_timeout: WaitTimeout,
    /// Bound on each wait for a new connection.
    #[arg(
        long,
        default_value = "6000",
        env = "FIFOMSG_CONNECT_TIMEOUT",
        allow_hyphen_values = true
    )]
    pub connect_timeout: WaitTimeout,
    /// Reply text for every request (sent with a trailing NUL).
    #[arg(long, conflicts_with = "echo", default_value = "Answer from server")]
    pub reply: String,
    /// Reply with each request's body instead.
    #[arg(long)]
    pub echo: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Pipe name to connect to. Default: the platform default.
    #[arg(env = "FIFOMSG_NAME")]
    pub name: Option<String>,
    /// Number of requests to send.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u64,
    /// Bound on connecting and on each reply.
    #[arg(
        long,
        default_value = "6000",
        env = "FIFOMSG_WAIT_TIMEOUT",
        allow_hyphen_values = true
    )]
    pub wait_timeout: WaitTimeout,
    /// Request body, sent verbatim. Default: "[i] hello from client" plus NUL.
    #[arg(long)]
    pub data: Option<String>,
    /// Rendezvous suffix for FIFO clients. Default: derived from the pid.
    #[arg(long)]
    pub suffix: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
