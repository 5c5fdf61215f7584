//! Sending half of the event channel

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::common::{Error, Result};
use crate::events::codec;
use crate::events::record::{Ack, EventRecord};

/// Connection from the test process to the debugger's event listener
pub struct EventSender {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl EventSender {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one record and wait until the debugger has processed it
    pub async fn send(&mut self, command: &str, args: Vec<Value>) -> Result<Ack> {
        let record = EventRecord {
            command: command.to_string(),
            args,
        };
        let json = serde_json::to_vec(&record)?;
        codec::send_frame(&mut self.writer, &json).await?;

        let data = codec::recv_frame(&mut self.reader).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::EventProtocol(format!("listener closed the connection after '{}'", command))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Log a message the way the test framework's listener does
    pub async fn log(&mut self, level: &str, message: &str) -> Result<Ack> {
        let payload = serde_json::json!({ "level": level, "message": message });
        self.send("log_message", vec![payload]).await
    }
}
