//! Minimal echo server: replies to every request with its own body.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send /tmp/fifomsg-echo-example --data hello

use std::time::{Duration, Instant};

use fifomsg::{Echo, Server, ServerConfig, WaitTimeout};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    let name = "/tmp/fifomsg-echo-example";
    #[cfg(windows)]
    let name = r"\\.\pipe\fifomsg-echo-example";

    let config = ServerConfig::default()
        .with_name(name)
        .with_connect_timeout(WaitTimeout::from_millis(500));
    let mut server = Server::create(config)?;
    eprintln!("Listening on {}", server.name());

    // Serve for one minute, then shut down.
    let deadline = Instant::now() + Duration::from_secs(60);
    server.run_forever(Echo, || Instant::now() < deadline)?;

    eprintln!("Done");
    Ok(())
}
