use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fifomsg_rpc::MessageFrame;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    sequence: u64,
    server: &'a str,
    request_size: usize,
    reply_size: usize,
    reply: String,
    elapsed_ms: u64,
    timestamp: String,
}

/// One request/reply exchange as printed by `send`.
pub struct Exchange<'a> {
    pub sequence: u64,
    pub server: &'a str,
    pub request: &'a MessageFrame,
    pub reply: &'a MessageFrame,
    pub elapsed_ms: u64,
}

pub fn print_exchange(exchange: &Exchange<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                sequence: exchange.sequence,
                server: exchange.server,
                request_size: exchange.request.size(),
                reply_size: exchange.reply.size(),
                reply: payload_preview(exchange.reply.body()),
                elapsed_ms: exchange.elapsed_ms,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "SENT", "RECEIVED", "MS", "REPLY"])
                .add_row(vec![
                    exchange.sequence.to_string(),
                    exchange.request.size().to_string(),
                    exchange.reply.size().to_string(),
                    exchange.elapsed_ms.to_string(),
                    payload_preview(exchange.reply.body()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "[{}] reply size={} ms={} body={}",
                exchange.sequence,
                exchange.reply.size(),
                exchange.elapsed_ms,
                payload_preview(exchange.reply.body())
            );
        }
        OutputFormat::Raw => {
            print_raw(exchange.reply.body());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Text bodies print as text with trailing NULs dropped.
pub fn payload_preview(payload: &[u8]) -> String {
    let trimmed = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(&payload[..0], |last| &payload[..=last]);
    match std::str::from_utf8(trimmed) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_trims_c_terminators() {
        assert_eq!(payload_preview(b"Answer from server\0"), "Answer from server");
        assert_eq!(payload_preview(b"plain"), "plain");
        assert_eq!(payload_preview(b"\0\0"), "");
    }

    #[test]
    fn preview_marks_binary() {
        assert_eq!(payload_preview(&[0xFF, 0x00, 0x01]), "<binary 3 bytes>");
    }
}
