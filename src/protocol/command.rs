//! Client command parsing
//!
//! Turns a RESP array into a typed command. Parse failures produce the
//! error message sent back to the client verbatim.

use super::RespValue;

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Health check; echoes its optional message
    Ping { message: Option<Vec<u8>> },

    /// Fetch one key
    Get { key: Vec<u8> },

    /// Store one key-value pair
    Set { key: Vec<u8>, value: Vec<u8> },

    /// Delete keys; replies with the count actually removed
    Del { keys: Vec<Vec<u8>> },

    /// Count how many of the given keys exist
    Exists { keys: Vec<Vec<u8>> },

    /// Live key count
    DbSize,

    /// Compatibility stub used by redis clients at connect time
    CommandInfo,

    /// Compatibility stub used by redis clients at connect time
    ConfigGet,
}

impl Command {
    /// Parse a command from the RESP value a client sent.
    ///
    /// Returns the client-facing error line on failure.
    pub fn parse(value: RespValue) -> Result<Command, String> {
        let items = match value {
            RespValue::Array(items) => items,
            _ => return Err("ERR protocol error: expected command array".into()),
        };

        let mut args: Vec<Vec<u8>> = Vec::with_capacity(items.len());
        for item in items {
            match item {
                RespValue::BulkString(data) => args.push(data),
                RespValue::SimpleString(s) => args.push(s.into_bytes()),
                _ => return Err("ERR protocol error: expected bulk string argument".into()),
            }
        }

        if args.is_empty() {
            return Err("ERR empty command".into());
        }

        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match name.as_str() {
            "PING" => match args.len() {
                1 => Ok(Command::Ping { message: None }),
                2 => Ok(Command::Ping {
                    message: Some(args.swap_remove(1)),
                }),
                _ => Err(wrong_arity("ping")),
            },
            "GET" => {
                if args.len() != 2 {
                    return Err(wrong_arity("get"));
                }
                Ok(Command::Get {
                    key: args.swap_remove(1),
                })
            }
            "SET" => {
                if args.len() != 3 {
                    return Err(wrong_arity("set"));
                }
                let value = args.swap_remove(2);
                let key = args.swap_remove(1);
                Ok(Command::Set { key, value })
            }
            "DEL" => {
                if args.len() < 2 {
                    return Err(wrong_arity("del"));
                }
                Ok(Command::Del {
                    keys: args.split_off(1),
                })
            }
            "EXISTS" => {
                if args.len() < 2 {
                    return Err(wrong_arity("exists"));
                }
                Ok(Command::Exists {
                    keys: args.split_off(1),
                })
            }
            "DBSIZE" => Ok(Command::DbSize),
            "COMMAND" => Ok(Command::CommandInfo),
            "CONFIG" => Ok(Command::ConfigGet),
            other => Err(format!("ERR unknown command '{other}'")),
        }
    }
}

fn wrong_arity(cmd: &str) -> String {
    format!("ERR wrong number of arguments for '{cmd}' command")
}
