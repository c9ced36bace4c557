use std::time::Instant;

use fifomsg_rpc::{Client, ClientConfig, MessageFrame};
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{rpc_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_exchange, Exchange, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }

    let mut config = ClientConfig::default().with_wait_timeout(args.wait_timeout);
    if let Some(name) = args.name {
        config = config.with_name(name);
    }
    if let Some(suffix) = args.suffix {
        config = config.with_suffix(suffix);
    }

    let mut client = Client::connect(config).map_err(|err| rpc_error("connect failed", err))?;
    debug!(name = client.name(), count = args.count, "connected");

    for sequence in 1..=args.count {
        let request = build_request(args.data.as_deref(), sequence);
        let start = Instant::now();
        client
            .write(&request)
            .map_err(|err| rpc_error("send failed", err))?;
        let reply = client
            .read()
            .map_err(|err| rpc_error("receive failed", err))?;

        print_exchange(
            &Exchange {
                sequence,
                server: client.name(),
                request: &request,
                reply: &reply,
                elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            },
            format,
        );
    }

    client
        .close()
        .map_err(|err| rpc_error("close failed", err))?;
    Ok(SUCCESS)
}

fn build_request(data: Option<&str>, sequence: u64) -> MessageFrame {
    match data {
        Some(data) => MessageFrame::new(data.as_bytes().to_vec()),
        None => {
            let mut body = format!("[{sequence}] hello from client").into_bytes();
            body.push(0);
            MessageFrame::new(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_matches_c_client() {
        let request = build_request(None, 1);
        assert_eq!(request.body(), b"[1] hello from client\0");
        assert_eq!(request.size(), 22);
    }

    #[test]
    fn explicit_data_is_sent_verbatim() {
        let request = build_request(Some("ping"), 7);
        assert_eq!(request.body(), b"ping");
    }
}
