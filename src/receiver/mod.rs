use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use url::Url;

use crate::cloudwatch::{MAX_BATCH_EVENTS, MAX_EVENT_SIZE};

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("invalid network scheme {0:?}")]
    InvalidScheme(String),
    #[error("missing host or port in source {0:?}")]
    MissingAddress(String),
    #[error("receiver is not listening")]
    NotListening,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A datagram source for one flow. `close` stops the reader and waits for
/// it to drain, which terminates the raw channel on the consumer side.
#[async_trait]
pub trait Receiver: Send {
    /// Bind the socket.
    async fn listen(&mut self) -> Result<(), ReceiverError>;

    /// Start the reader task and hand back the raw payload channel.
    fn receive(&mut self) -> Result<mpsc::Receiver<String>, ReceiverError>;

    /// Close the socket and wait for the reader task to terminate.
    async fn close(&mut self);
}

/// Build a receiver for the source URL's scheme.
pub fn new_receiver(source: &Url) -> Result<Box<dyn Receiver>, ReceiverError> {
    match source.scheme() {
        "udp" => Ok(Box::new(UdpReceiver::new(source.clone()))),
        other => Err(ReceiverError::InvalidScheme(other.to_string())),
    }
}

pub struct UdpReceiver {
    url: Url,
    socket: Option<Arc<UdpSocket>>,
    shutdown: Arc<Notify>,
    reader: Option<JoinHandle<()>>,
}

impl UdpReceiver {
    pub fn new(url: Url) -> Self {
        UdpReceiver {
            url,
            socket: None,
            shutdown: Arc::new(Notify::new()),
            reader: None,
        }
    }

    /// Bound address, once listening. Lets tests bind port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[async_trait]
impl Receiver for UdpReceiver {
    async fn listen(&mut self) -> Result<(), ReceiverError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| ReceiverError::MissingAddress(self.url.to_string()))?;
        let port = self
            .url
            .port()
            .ok_or_else(|| ReceiverError::MissingAddress(self.url.to_string()))?;
        let socket = UdpSocket::bind((host, port)).await?;
        debug!("listening on {}", self.url);
        self.socket = Some(Arc::new(socket));
        Ok(())
    }

    fn receive(&mut self) -> Result<mpsc::Receiver<String>, ReceiverError> {
        let socket = self.socket.clone().ok_or(ReceiverError::NotListening)?;
        let shutdown = self.shutdown.clone();
        let (tx, rx) = mpsc::channel(MAX_BATCH_EVENTS);

        self.reader = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_EVENT_SIZE];
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, _)) => {
                            let raw = String::from_utf8_lossy(&buf[..len]).into_owned();
                            if tx.send(raw).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            // Shutdown arrives via the notify, never as a
                            // read error.
                            error!("datagram read failed: {}", err);
                            std::process::exit(1);
                        }
                    },
                }
            }
        }));
        Ok(rx)
    }

    async fn close(&mut self) {
        self.shutdown.notify_one();
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        self.socket = None;
    }
}
