//! Control client for the remote test process
//!
//! Every command opens a fresh connection to the current endpoint, sends one
//! request and waits for its reply. Nothing is queued or retried.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::common::{Error, Result};

use super::codec;
use super::protocol::{stringify, ControlCommand, ControlRequest, ControlResponse, Endpoint};

/// Client issuing blocking commands to a control endpoint
#[derive(Debug)]
pub struct ControlClient {
    /// Bound on connect + request + reply
    timeout: Duration,
    /// Sequence number for requests
    seq: AtomicU64,
}

impl ControlClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            seq: AtomicU64::new(1),
        }
    }

    /// Get the next sequence number
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a command and wait for the reply, using the client's timeout
    pub async fn call(&self, endpoint: &Endpoint, command: &ControlCommand) -> Result<Value> {
        self.call_with_timeout(endpoint, command, self.timeout).await
    }

    /// Send a command with an explicit timeout
    #[tracing::instrument(skip_all, fields(endpoint = %endpoint, command = %command))]
    pub async fn call_with_timeout(
        &self,
        endpoint: &Endpoint,
        command: &ControlCommand,
        timeout: Duration,
    ) -> Result<Value> {
        match tokio::time::timeout(timeout, self.exchange(endpoint, command)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Control command timed out");
                Err(Error::ControlTimeout {
                    command: command.method().to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    async fn exchange(&self, endpoint: &Endpoint, command: &ControlCommand) -> Result<Value> {
        let stream = TcpStream::connect(endpoint.addr())
            .await
            .map_err(|e| Error::control_unreachable(endpoint, e))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let seq = self.next_seq();
        let request = ControlRequest::new(seq, command);
        let json = serde_json::to_string(&request)?;
        tracing::debug!("Control request: {}", json);
        codec::write_message(&mut writer, &json).await?;

        let reply = codec::read_message(&mut reader)
            .await?
            .ok_or(Error::ControlClosed)?;
        tracing::debug!("Control reply: {}", reply);

        let response: ControlResponse = serde_json::from_str(&reply)
            .map_err(|e| Error::ControlProtocol(format!("Invalid reply: {}", e)))?;

        if response.request_seq != seq {
            return Err(Error::ControlProtocol(format!(
                "Reply sequence mismatch: expected {}, got {}",
                seq, response.request_seq
            )));
        }

        if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(Error::remote_fault(
                command.method(),
                response.message.as_deref().unwrap_or("Unknown error"),
            ))
        }
    }

    pub async fn resume(&self, endpoint: &Endpoint) -> Result<()> {
        self.call(endpoint, &ControlCommand::Resume).await.map(drop)
    }

    pub async fn stop(&self, endpoint: &Endpoint) -> Result<()> {
        self.call(endpoint, &ControlCommand::Stop).await.map(drop)
    }

    pub async fn fail_test(&self, endpoint: &Endpoint) -> Result<()> {
        self.call(endpoint, &ControlCommand::FailTest).await.map(drop)
    }

    pub async fn ping(&self, endpoint: &Endpoint) -> Result<()> {
        self.call(endpoint, &ControlCommand::Ping).await.map(drop)
    }

    pub async fn ready(&self, endpoint: &Endpoint) -> Result<()> {
        self.call(endpoint, &ControlCommand::Ready).await.map(drop)
    }

    /// Fetch the remote variable scope, values stringified
    pub async fn get_variables(&self, endpoint: &Endpoint) -> Result<BTreeMap<String, String>> {
        match self.call(endpoint, &ControlCommand::GetVariables).await? {
            Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), stringify(v))).collect()),
            Value::Null => Ok(BTreeMap::new()),
            other => Err(Error::ControlProtocol(format!(
                "get_variables returned {} instead of a mapping",
                other
            ))),
        }
    }

    pub async fn run_keyword(&self, endpoint: &Endpoint, name: &str, args: &[String]) -> Result<Value> {
        let command = ControlCommand::RunKeyword {
            name: name.to_string(),
            args: args.to_vec(),
        };
        self.call(endpoint, &command).await
    }
}
