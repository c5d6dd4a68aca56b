//! Connection Handler
//!
//! Runs the RESP read-dispatch-reply loop for one client.

use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::{EmberError, Result};
use crate::protocol::{read_value, Command, RespValue};

/// Handles a single client connection
pub struct Connection {
    stream: TcpStream,
    engine: Arc<Engine>,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Self {
        Self { stream, engine }
    }

    /// Apply read/write timeouts to the underlying socket
    pub fn set_timeouts(&self, read_ms: u64, write_ms: u64) -> Result<()> {
        self.stream
            .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        self.stream
            .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        Ok(())
    }

    /// Peer address for logging
    pub fn peer_addr(&self) -> String {
        self.stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string())
    }

    /// Serve the connection until the client disconnects.
    pub fn handle(&mut self) -> Result<()> {
        let mut reader = BufReader::new(self.stream.try_clone()?);
        let mut writer = BufWriter::new(self.stream.try_clone()?);

        loop {
            let value = match read_value(&mut reader) {
                Ok(value) => value,
                // Clean disconnect between commands
                Err(EmberError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            };

            let reply = match Command::parse(value) {
                Ok(command) => self.execute(command),
                Err(message) => RespValue::Error(message),
            };
            reply.write_to(&mut writer)?;
            writer.flush()?;
        }
    }

    /// Run one command against the engine and build its reply.
    fn execute(&self, command: Command) -> RespValue {
        match command {
            Command::Ping { message: None } => RespValue::SimpleString("PONG".to_string()),
            Command::Ping {
                message: Some(message),
            } => RespValue::BulkString(message),

            Command::Get { key } => match self.engine.get(&key) {
                Ok(record) => RespValue::BulkString(record.value),
                Err(EmberError::KeyNotFound) => RespValue::NullBulkString,
                Err(e) => RespValue::Error(format!("ERR {e}")),
            },

            Command::Set { key, value } => match self.engine.set(&key, &value) {
                Ok(()) => RespValue::SimpleString("OK".to_string()),
                Err(e) => RespValue::Error(format!("ERR {e}")),
            },

            Command::Del { keys } => {
                let deleted = keys
                    .iter()
                    .filter(|key| self.engine.delete(key).is_ok())
                    .count();
                RespValue::Integer(deleted as i64)
            }

            Command::Exists { keys } => {
                let present = keys.iter().filter(|key| self.engine.has(key)).count();
                RespValue::Integer(present as i64)
            }

            Command::DbSize => RespValue::Integer(self.engine.len() as i64),

            Command::CommandInfo | Command::ConfigGet => {
                RespValue::SimpleString("OK".to_string())
            }
        }
    }
}
