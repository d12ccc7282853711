//! Operator console.
//!
//! Lines typed on stdin are parsed into [`Command`]s. Anything that does
//! not start with `/` is sent as a text message. [`template`] builds the
//! canned test payloads offered by `/template`.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::{json, Value};

use crate::engine::{ChannelOptions, Payload};

/// Console help text.
pub const HELP: &str = "\
Commands:
  <text>                         send text on the active channel
  /help                          show this help
  /stats                         connection and channel statistics
  /connect                       connect to the relay and start negotiating
  /disconnect                    tear the session down
  /reconnect                     disconnect, then connect again
  /create-channel <name> [ordered=true] [maxRetransmits]
  /close-channel <name>
  /file <path>                   send a file on the active channel
  /template <ping|echo|large|stress|binary>
  /debug [on|off]                toggle verbose logging
  /quit                          exit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a text message.
    Send(String),
    /// Send a prepared payload.
    Template(Payload),
    /// Send a file.
    SendFile(PathBuf),
    /// Print help.
    Help,
    /// Print statistics.
    Stats,
    /// Connect.
    Connect,
    /// Disconnect.
    Disconnect,
    /// Disconnect and connect again.
    Reconnect,
    /// Create a channel.
    CreateChannel {
        /// Label.
        label: String,
        /// Options.
        options: ChannelOptions,
    },
    /// Close a channel.
    CloseChannel(String),
    /// Set or toggle debug mode.
    Debug(Option<bool>),
    /// Exit.
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match name {
        "help" => Command::Help,
        "stats" => Command::Stats,
        "connect" => Command::Connect,
        "disconnect" => Command::Disconnect,
        "reconnect" => Command::Reconnect,
        "quit" | "exit" => Command::Quit,
        "create-channel" => parse_create_channel(&args)?,
        "close-channel" => match args.as_slice() {
            [label] => Command::CloseChannel((*label).to_string()),
            _ => return Err("usage: /close-channel <name>".to_string()),
        },
        "debug" => match args.as_slice() {
            [] => Command::Debug(None),
            ["on"] => Command::Debug(Some(true)),
            ["off"] => Command::Debug(Some(false)),
            _ => return Err("usage: /debug [on|off]".to_string()),
        },
        "file" => {
            let path = rest.trim_start()["file".len()..].trim();
            if path.is_empty() {
                return Err("usage: /file <path>".to_string());
            }
            Command::SendFile(PathBuf::from(path))
        }
        "template" => match args.as_slice() {
            [which] => Command::Template(
                template(which).ok_or_else(|| format!("unknown template '{which}'"))?,
            ),
            _ => return Err("usage: /template <ping|echo|large|stress|binary>".to_string()),
        },
        other => return Err(format!("unknown command '/{other}', try /help")),
    };
    Ok(Some(command))
}

fn parse_create_channel(args: &[&str]) -> Result<Command, String> {
    const USAGE: &str = "usage: /create-channel <name> [ordered=true] [maxRetransmits]";
    let Some(label) = args.first() else {
        return Err(USAGE.to_string());
    };
    let ordered = match args.get(1) {
        None => true,
        Some(value) => value
            .parse::<bool>()
            .map_err(|_| format!("ordered must be true or false, got '{value}'"))?,
    };
    let max_retransmits = match args.get(2) {
        None => None,
        Some(value) => Some(
            value
                .parse::<u16>()
                .map_err(|_| format!("maxRetransmits must be a number, got '{value}'"))?,
        ),
    };
    if args.len() > 3 {
        return Err(USAGE.to_string());
    }
    Ok(Command::CreateChannel {
        label: (*label).to_string(),
        options: ChannelOptions {
            ordered,
            max_retransmits,
        },
    })
}

/// Build a canned test payload.
pub fn template(name: &str) -> Option<Payload> {
    let now = Utc::now().timestamp_millis();
    let value: Value = match name {
        "ping" => json!({"type": "ping", "timestamp": now}),
        "echo" => json!({
            "type": "echo",
            "message": "Echo test message",
            "timestamp": now,
        }),
        "large" => json!({
            "type": "large",
            "data": (0..100)
                .map(|i| json!({"id": i, "value": format!("Item {i}"), "timestamp": now}))
                .collect::<Vec<_>>(),
        }),
        "stress" => json!({
            "type": "stress",
            "iterations": 1000,
            "payload": "x".repeat(1024),
            "timestamp": now,
        }),
        "binary" => {
            return Some(Payload::Binary((0..=255u8).collect()));
        }
        _ => return None,
    };
    Some(Payload::Text(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_send() {
        assert_eq!(parse("hello there\n"), Ok(Some(Command::Send("hello there".into()))));
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("/stats"), Ok(Some(Command::Stats)));
        assert_eq!(parse("/reconnect"), Ok(Some(Command::Reconnect)));
        assert_eq!(parse("/debug"), Ok(Some(Command::Debug(None))));
        assert_eq!(parse("/debug off"), Ok(Some(Command::Debug(Some(false)))));
        assert_eq!(parse("/exit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn test_create_channel_defaults_and_options() {
        assert_eq!(
            parse("/create-channel logs"),
            Ok(Some(Command::CreateChannel {
                label: "logs".into(),
                options: ChannelOptions::default(),
            }))
        );
        assert_eq!(
            parse("/create-channel lossy false 0"),
            Ok(Some(Command::CreateChannel {
                label: "lossy".into(),
                options: ChannelOptions {
                    ordered: false,
                    max_retransmits: Some(0),
                },
            }))
        );
        assert!(parse("/create-channel").is_err());
        assert!(parse("/create-channel x maybe").is_err());
    }

    #[test]
    fn test_file_path_keeps_spaces() {
        assert_eq!(
            parse("/file /tmp/my file.bin"),
            Ok(Some(Command::SendFile(PathBuf::from("/tmp/my file.bin"))))
        );
        assert!(parse("/file").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = parse("/bogus").unwrap_err();
        assert!(err.contains("/bogus"));
    }

    #[test]
    fn test_templates() {
        let Some(Payload::Text(ping)) = template("ping") else {
            panic!("ping should be text");
        };
        let value: Value = serde_json::from_str(&ping).unwrap();
        assert_eq!(value["type"], "ping");

        let Some(Payload::Text(large)) = template("large") else {
            panic!("large should be text");
        };
        let value: Value = serde_json::from_str(&large).unwrap();
        assert_eq!(value["data"].as_array().unwrap().len(), 100);

        assert_eq!(template("binary").map(|p| p.len()), Some(256));
        assert!(template("nope").is_none());
    }
}
