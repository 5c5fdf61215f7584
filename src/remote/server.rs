//! Serving half of the control channel

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::common::Result;
use crate::control::codec;
use crate::control::protocol::{ControlCommand, ControlRequest, ControlResponse};

/// What the paused test process does for each command
#[async_trait]
pub trait ControlHandler: Send + Sync {
    /// `Err` carries the fault text sent back to the debugger
    async fn handle(&self, command: ControlCommand) -> std::result::Result<Value, String>;
}

/// TCP server exposing a `ControlHandler`
pub struct ControlServer {
    listener: TcpListener,
    handler: Arc<dyn ControlHandler>,
}

impl ControlServer {
    pub async fn bind(addr: &str, handler: Arc<dyn ControlHandler>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` flips or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accept_result = self.listener.accept() => match accept_result {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler.as_ref()).await {
                                tracing::warn!("Control connection failed: {}", e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                }
            }
        }
        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, handler: &dyn ControlHandler) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(body) = codec::read_message(&mut reader).await? {
        let request: ControlRequest = serde_json::from_str(&body)?;
        let response = match ControlCommand::from_call(&request.method, &request.params) {
            Ok(command) => match handler.handle(command).await {
                Ok(result) => ControlResponse::success(request.seq, result),
                Err(message) => ControlResponse::fault(request.seq, message),
            },
            Err(e) => ControlResponse::fault(request.seq, e.to_string()),
        };
        codec::write_message(&mut writer, &serde_json::to_string(&response)?).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::control::{ControlClient, Endpoint};
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl ControlHandler for Echo {
        async fn handle(&self, command: ControlCommand) -> std::result::Result<Value, String> {
            match command {
                ControlCommand::RunKeyword { name, args } if name == "Fail" => {
                    Err(args.first().cloned().unwrap_or_default())
                }
                ControlCommand::RunKeyword { name, args } => Ok(json!(format!("{} {}", name, args.join(" ")))),
                ControlCommand::GetVariables => Ok(json!({"${x}": 1})),
                _ => Ok(Value::Null),
            }
        }
    }

    #[tokio::test]
    async fn test_client_against_server() {
        let server = ControlServer::bind("127.0.0.1:0", Arc::new(Echo)).await.unwrap();
        let endpoint = Endpoint::new("127.0.0.1", server.local_addr().unwrap().port());
        let (_tx, rx) = watch::channel(false);
        tokio::spawn(server.run(rx));

        let client = ControlClient::new(Duration::from_secs(5));
        client.ready(&endpoint).await.unwrap();
        assert_eq!(client.get_variables(&endpoint).await.unwrap()["${x}"], "1");

        let value = client
            .run_keyword(&endpoint, "Catenate", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(value, json!("Catenate a b"));

        let err = client
            .run_keyword(&endpoint, "Fail", &["expected failure".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteFault { ref message, .. } if message == "expected failure"));
    }
}
