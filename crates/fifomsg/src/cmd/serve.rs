use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fifomsg_rpc::{Dispatch, MessageFrame, Platform, Server, ServerConfig, Transport};
use tracing::info;

use crate::cmd::ServeArgs;
use crate::exit::{rpc_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::payload_preview;

/// What the CLI server answers with.
#[derive(Debug, Clone)]
enum Responder {
    Echo,
    Fixed(MessageFrame),
}

impl Responder {
    fn from_args(args: &ServeArgs) -> Self {
        if args.echo {
            return Self::Echo;
        }
        let mut body = args.reply.clone().into_bytes();
        body.push(0);
        Self::Fixed(MessageFrame::new(body))
    }
}

impl Dispatch for Responder {
    fn dispatch(&self, request: &MessageFrame) -> MessageFrame {
        info!(
            size = request.size(),
            request = %payload_preview(request.body()),
            "request received"
        );
        match self {
            Self::Echo => request.clone(),
            Self::Fixed(reply) => reply.clone(),
        }
    }
}

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let responder = Responder::from_args(&args);
    let mut config = ServerConfig::default()
        .with_client_timeout(args.client_timeout)
        .with_connect_timeout(args.connect_timeout);
    if let Some(name) = args.name {
        config = config.with_name(name);
    }

    let mut server = Server::create(config).map_err(|err| rpc_error("server setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(name = server.name(), backend = Platform::NAME, "serving until Ctrl-C");
    server
        .run_forever(responder, || running.load(Ordering::SeqCst))
        .map_err(|err| rpc_error("server failed", err))?;
    info!("server stopped");

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
