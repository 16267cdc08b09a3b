//! Framed RPC client for the GameManager.
//!
//! One connection carries everything: seq-matched request/response
//! pairs plus the unsolicited push stream once `Message` is
//! subscribed. A background read task routes responses to their
//! waiting callers and pushes into the provided channel; when the
//! connection dies it fails every pending call and reports
//! [`HostError::Disconnected`] on the error bus.

use crate::error::HostError;
use mcpd_proto::{
    read_frame, write_frame, Call, Client, Frame, MessageResponse, ProtoError, Reply,
    StartRequest, StatusResponse, WriteRequest,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Reply, HostError>>>>;

/// RPC client over one loopback connection.
pub struct ManagerClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl ManagerClient {
    /// Connects and spawns the read task. Pushes flow into `push_tx`;
    /// a connection loss is reported once on `err_tx`.
    pub async fn connect(
        address: &str,
        push_tx: mpsc::Sender<MessageResponse>,
        err_tx: mpsc::Sender<HostError>,
    ) -> Result<Arc<Self>, HostError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|err| HostError::Proto(ProtoError::Io(err)))?;
        let (reader, writer) = stream.into_split();
        let client = Arc::new(Self {
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(Arc::clone(&client).read_loop(reader, push_tx, err_tx));
        Ok(client)
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        push_tx: mpsc::Sender<MessageResponse>,
        err_tx: mpsc::Sender<HostError>,
    ) {
        loop {
            match read_frame::<_, Frame>(&mut reader).await {
                Ok(Frame::Response { seq, result }) => {
                    let waiter = self.pending.lock().remove(&seq);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(result.into_result().map_err(HostError::Remote));
                        }
                        None => debug!(seq, "response without a waiting call"),
                    }
                }
                Ok(Frame::Push { message }) => {
                    // The bus consumer drains fast (its own fan-out is
                    // non-blocking); a send here only waits under burst.
                    if push_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(Frame::Request { .. }) => {
                    warn!("server sent a request frame, dropping");
                }
                Err(ProtoError::Closed) => break,
                Err(err) => {
                    warn!(error = %err, "manager connection read failed");
                    break;
                }
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = {
            let mut map = self.pending.lock();
            map.drain().collect()
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(HostError::Disconnected));
        }
        let _ = err_tx.send(HostError::Disconnected).await;
    }

    /// True once the connection is known dead.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call(&self, call: Call) -> Result<Reply, HostError> {
        if self.is_closed() {
            return Err(HostError::Disconnected);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        let frame = Frame::Request { seq, call };
        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = write_frame(&mut *writer, &frame).await {
                self.pending.lock().remove(&seq);
                return Err(err.into());
            }
        }
        rx.await.map_err(|_| HostError::Disconnected)?
    }

    pub async fn login(&self) -> Result<Client, HostError> {
        match self.call(Call::Login).await? {
            Reply::Client(client) => Ok(client),
            _ => Err(HostError::UnexpectedReply("Login")),
        }
    }

    pub async fn status(&self, client: Client) -> Result<StatusResponse, HostError> {
        match self.call(Call::Status(client)).await? {
            Reply::Status(status) => Ok(status),
            _ => Err(HostError::UnexpectedReply("Status")),
        }
    }

    pub async fn start(&self, request: StartRequest) -> Result<StatusResponse, HostError> {
        match self.call(Call::Start(request)).await? {
            Reply::Status(status) => Ok(status),
            _ => Err(HostError::UnexpectedReply("Start")),
        }
    }

    pub async fn stop(&self, client: Client) -> Result<(), HostError> {
        self.call(Call::Stop(client)).await.map(|_| ())
    }

    pub async fn lock(&self, client: Client) -> Result<(), HostError> {
        self.call(Call::Lock(client)).await.map(|_| ())
    }

    pub async fn unlock(&self, client: Client) -> Result<(), HostError> {
        self.call(Call::Unlock(client)).await.map(|_| ())
    }

    pub async fn write(&self, request: WriteRequest) -> Result<(), HostError> {
        self.call(Call::Write(request)).await.map(|_| ())
    }

    /// Subscribes this connection to the log stream. After the ack,
    /// pushes flow into the channel passed to
    /// [`connect`](Self::connect).
    pub async fn subscribe_messages(&self, client: Client) -> Result<(), HostError> {
        self.call(Call::Message(client)).await.map(|_| ())
    }
}
