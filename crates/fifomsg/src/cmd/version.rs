use fifomsg_rpc::{Platform, Transport, DEFAULT_NAME, MAX_BODY};
use fifomsg_transport::ATOMIC_WRITE_LIMIT;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("fifomsg {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: fifomsg");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("FIFOMSG_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("backend: {}", Platform::NAME);
    println!("default_name: {DEFAULT_NAME}");
    println!("atomic_write_limit: {ATOMIC_WRITE_LIMIT}");
    println!("max_body: {MAX_BODY}");

    Ok(SUCCESS)
}
