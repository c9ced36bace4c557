mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "fifomsg", version, about = "Request/reply over FIFOs and named pipes")]
struct Cli {
    /// Reply output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). Without it, `FIFOMSG_LOG` or `info` applies.
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use fifomsg_rpc::WaitTimeout;

    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "fifomsg",
            "send",
            "/tmp/test-fifo",
            "--count",
            "3",
            "--wait-timeout",
            "-1",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.name.as_deref(), Some("/tmp/test-fifo"));
        assert_eq!(args.count, 3);
        assert_eq!(args.wait_timeout, WaitTimeout::Infinite);
    }

    #[test]
    fn parses_serve_timeouts() {
        let cli = Cli::try_parse_from([
            "fifomsg",
            "serve",
            "--client-timeout",
            "500ms",
            "--connect-timeout",
            "2s",
            "--echo",
        ])
        .expect("serve args should parse");

        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.client_timeout, WaitTimeout::from_millis(500));
        assert_eq!(args.connect_timeout, WaitTimeout::from_millis(2000));
        assert!(args.echo);
    }

    #[test]
    fn log_level_is_optional() {
        let cli = Cli::try_parse_from(["fifomsg", "version"]).unwrap();
        assert_eq!(cli.log_level, None);

        let cli = Cli::try_parse_from(["fifomsg", "--log-level", "debug", "version"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn rejects_bad_timeout() {
        let err = Cli::try_parse_from(["fifomsg", "send", "--wait-timeout", "soon"])
            .expect_err("bad timeout should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_reply_with_echo() {
        let err = Cli::try_parse_from(["fifomsg", "serve", "--reply", "x", "--echo"])
            .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
