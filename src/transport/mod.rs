//! Transport seam between the session and the device.
//!
//! The session only needs a duplex byte stream: a way to push framed
//! commands out and a channel of reassembled inbound frame payloads.
//! [`StreamTransport`] binds any tokio `AsyncRead + AsyncWrite` stream
//! (a serial port, a TCP socket, or `tokio::io::duplex` in tests).

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::frame::{self, FrameDecoder};

/// Capacity of the inbound frame channel.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Establishes the connection.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Tears the connection down.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Frames and sends one command payload.
    fn send(&mut self, payload: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Takes the inbound frame channel.
    ///
    /// Yields each reassembled frame payload in arrival order; the
    /// channel closes when the underlying stream does. Can be taken
    /// once per connection.
    fn take_frames(&mut self) -> Option<mpsc::Receiver<Bytes>>;
}

/// Transport over any tokio duplex byte stream.
pub struct StreamTransport<S> {
    stream: Option<S>,
    writer: Option<Arc<Mutex<WriteHalf<S>>>>,
    frames: Option<mpsc::Receiver<Bytes>>,
    read_task: Option<JoinHandle<()>>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a transport that will use `stream` once connected.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            writer: None,
            frames: None,
            read_task: None,
        }
    }

    /// Reads the stream and pushes complete frame payloads into `tx`
    /// until the stream ends or the receiver is dropped.
    async fn read_loop(mut reader: ReadHalf<S>, tx: mpsc::Sender<Bytes>) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("transport stream closed");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("transport read error: {e}");
                    return;
                }
            };

            tracing::trace!(bytes = n, "received");
            decoder.feed(&buf[..n]);

            while let Some(payload) = decoder.next_frame() {
                tracing::trace!(bytes = payload.len(), "decoded frame");
                if tx.send(payload).await.is_err() {
                    tracing::debug!("frame receiver dropped");
                    return;
                }
            }
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }
            let stream = self.stream.take().ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "stream already consumed",
                ))
            })?;

            let (reader, writer) = tokio::io::split(stream);
            let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

            self.read_task = Some(tokio::spawn(Self::read_loop(reader, tx)));
            self.writer = Some(Arc::new(Mutex::new(writer)));
            self.frames = Some(rx);
            tracing::debug!("transport connected");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(task) = self.read_task.take() {
                task.abort();
            }
            self.writer = None;
            self.frames = None;
            tracing::debug!("transport disconnected");
            Ok(())
        })
    }

    fn send(&mut self, payload: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let writer = self.writer.clone();
        Box::pin(async move {
            let writer = writer.ok_or(Error::NotConnected)?;
            let frame = frame::encode(&payload)?;
            tracing::trace!(bytes = frame.len(), "sending frame");

            let mut writer = writer.lock().await;
            writer.write_all(&frame).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn take_frames(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.frames.take()
    }
}

impl<S> Drop for StreamTransport<S> {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
