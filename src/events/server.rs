//! Event ingestion server
//!
//! Accepts one sender at a time, stamps each record with the next local id
//! and hands it to the sink. The acknowledgment is written only after the
//! sink returns, so a slow sink slows the sender down instead of buffering.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::common::Result;

use super::codec;
use super::record::{Ack, Event, EventRecord};

/// Receiver of ingested events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Process one event. A fatal error drops the sender's connection.
    async fn deliver(&self, event: Event) -> Result<()>;
}

/// Shared count of open sender connections
#[derive(Debug, Clone, Default)]
pub struct ClientGauge(Arc<AtomicUsize>);

impl ClientGauge {
    pub fn has_clients(&self) -> bool {
        self.count() > 0
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Claim the single sender slot
    fn try_acquire(&self) -> Option<ClientGuard> {
        self.0
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ClientGuard(self.clone()))
    }
}

/// Releases the sender slot when the connection task ends
struct ClientGuard(ClientGauge);

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// TCP server receiving event records from the remote process
pub struct EventServer {
    listener: TcpListener,
    gauge: ClientGauge,
    next_id: Arc<AtomicU64>,
    sink: Arc<dyn EventSink>,
}

impl EventServer {
    /// Bind the listener; use port 0 for an ephemeral port
    pub async fn bind(addr: &str, sink: Arc<dyn EventSink>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Event listener bound");

        Ok(Self {
            listener,
            gauge: ClientGauge::default(),
            next_id: Arc::new(AtomicU64::new(1)),
            sink,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for the liveness monitor
    pub fn clients(&self) -> ClientGauge {
        self.gauge.clone()
    }

    pub fn has_clients(&self) -> bool {
        self.gauge.has_clients()
    }

    /// Accept connections until `shutdown` flips or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::debug!("Event listener shutting down");
                    break;
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.admit(stream, peer, shutdown.clone()),
                        Err(e) => tracing::error!("Accept error: {}", e),
                    }
                }
            }
        }
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, shutdown: watch::Receiver<bool>) {
        let Some(guard) = self.gauge.try_acquire() else {
            tracing::warn!(%peer, "Rejecting sender: another run is already connected");
            return;
        };

        tracing::info!(%peer, "Sender connected");
        let next_id = Arc::clone(&self.next_id);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &next_id, sink.as_ref(), shutdown).await {
                tracing::warn!(%peer, "Sender connection ended with error: {}", e);
            }
            drop(guard);
            tracing::info!(%peer, "Sender disconnected");
        });
    }
}

/// Read records from one sender until it disconnects
async fn handle_connection(
    stream: TcpStream,
    next_id: &AtomicU64,
    sink: &dyn EventSink,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let data = tokio::select! {
            _ = shutdown.changed() => break,
            result = codec::recv_frame(&mut reader) => match result {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        };

        let record: EventRecord = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, bytes = data.len(), "Discarding malformed event record");
                let ack = serde_json::to_vec(&Ack::rejected(e.to_string()))?;
                codec::send_frame(&mut writer, &ack).await?;
                continue;
            }
        };

        let id = next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event::new(id, record);
        tracing::trace!(id, command = %event.command, "Event received");

        match sink.deliver(event).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                tracing::error!(id, "Aborting sender connection: {}", e);
                return Err(e);
            }
            Err(e) => tracing::warn!(id, "Event handling failed: {}", e),
        }

        let ack = serde_json::to_vec(&Ack::delivered(id))?;
        codec::send_frame(&mut writer, &ack).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event: Event) -> Result<()> {
            let command = event.command.clone();
            self.events.lock().unwrap().push(event);
            if command == "end_keyword" {
                return Err(Error::StackUnderflow { command });
            }
            Ok(())
        }
    }

    async fn start(sink: Arc<RecordingSink>) -> (SocketAddr, ClientGauge, watch::Sender<bool>) {
        let server = EventServer::bind("127.0.0.1:0", sink).await.unwrap();
        let addr = server.local_addr().unwrap();
        let gauge = server.clients();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(server.run(rx));
        (addr, gauge, tx)
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn send(stream: &mut TcpStream, body: &str) -> Option<Ack> {
        codec::send_frame(stream, body.as_bytes()).await.unwrap();
        let data = codec::recv_frame(stream).await.ok()?;
        Some(serde_json::from_slice(&data).unwrap())
    }

    #[tokio::test]
    async fn test_has_clients_tracks_connection() {
        let sink = Arc::new(RecordingSink::default());
        let (addr, gauge, _shutdown) = start(sink).await;
        assert!(!gauge.has_clients());

        let stream = TcpStream::connect(addr).await.unwrap();
        wait_until(|| gauge.has_clients()).await;

        drop(stream);
        wait_until(|| !gauge.has_clients()).await;
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let sink = Arc::new(RecordingSink::default());
        let (addr, _gauge, _shutdown) = start(sink.clone()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let commands = ["pid", "start_suite", "log_message", "output_file", "close"];
        for (i, command) in commands.iter().enumerate() {
            let ack = send(&mut stream, &format!(r#"{{"command":"{command}","args":["x"]}}"#))
                .await
                .unwrap();
            assert_eq!(ack, Ack::delivered(i as u64 + 1));
        }

        let ids: Vec<u64> = sink.events.lock().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_malformed_record_is_rejected_without_id() {
        let sink = Arc::new(RecordingSink::default());
        let (addr, _gauge, _shutdown) = start(sink.clone()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let ack = send(&mut stream, "{not json").await.unwrap();
        assert!(!ack.ok);
        assert!(ack.id.is_none());

        let ack = send(&mut stream, r#"{"command":"pid","args":[4242]}"#).await.unwrap();
        assert_eq!(ack, Ack::delivered(1));
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_sender_is_turned_away() {
        let sink = Arc::new(RecordingSink::default());
        let (addr, gauge, _shutdown) = start(sink).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        wait_until(|| gauge.has_clients()).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(send(&mut second, r#"{"command":"pid"}"#).await.is_none());
        assert_eq!(gauge.count(), 1);

        assert!(send(&mut first, r#"{"command":"pid"}"#).await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_fatal_error_drops_connection_without_ack() {
        let sink = Arc::new(RecordingSink::default());
        let (addr, gauge, _shutdown) = start(sink).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        assert!(send(&mut stream, r#"{"command":"end_keyword"}"#).await.is_none());
        wait_until(|| !gauge.has_clients()).await;
    }
}
