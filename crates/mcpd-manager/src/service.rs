//! The framed-RPC surface.
//!
//! One task per connection reads request frames; each request is
//! served on its own task so a blocked `Lock` never stalls the
//! connection's other calls (and so aborting the connection abandons a
//! queued acquisition). Responses and pushes share the write half
//! behind a mutex.
//!
//! Connection lifecycle: every accepted connection is tagged with a
//! monotonic client id (returned by `Login`); when the connection
//! closes, in-flight calls are aborted and a held write lock is
//! released.

use crate::error::ManagerError;
use crate::fanout::{LogFanout, StreamEvent};
use crate::supervisor::Supervisor;
use crate::write_lock::WriteLock;
use mcpd_proto::{
    read_frame, write_frame, Call, CallResult, Client, ErrorCode, Frame, GameState,
    MessageResponse, ProtoError, RemoteError, Reply, StatusResponse,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// Shared GameManager state: supervisor, fan-out, write lock, and the
/// client id counter.
pub struct Manager {
    pub supervisor: Arc<Supervisor>,
    pub fanout: Arc<LogFanout>,
    pub lock: WriteLock,
    next_client_id: AtomicU64,
}

impl Manager {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let fanout = LogFanout::new();
        let lock = WriteLock::new();
        let supervisor = Supervisor::new(Arc::clone(&fanout), lock.clone());
        let manager = Arc::new(Self {
            supervisor,
            fanout,
            lock,
            next_client_id: AtomicU64::new(1),
        });
        manager.spawn_log_worker();
        manager
    }

    /// The manager's own subscriber: traces console lines emitted
    /// while a client holds the write lock.
    fn spawn_log_worker(self: &Arc<Self>) {
        let mut sub = self.fanout.subscribe("manager-log");
        let lock = self.lock.clone();
        tokio::spawn(async move {
            while let Some(event) = sub.rx.recv().await {
                if let StreamEvent::Stdout {
                    content,
                    locked: true,
                } = event
                {
                    if let Some(client) = lock.holder() {
                        debug!(client, line = %content, "console output under lock");
                    }
                }
            }
        });
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            info!(client = client_id, %peer, "client connected");
            let manager = Arc::clone(&self);
            tokio::spawn(async move {
                manager.handle_connection(stream, client_id).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, client_id: u64) {
        let (mut reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
        let mut calls = JoinSet::new();

        loop {
            match read_frame::<_, Frame>(&mut reader).await {
                Ok(Frame::Request { seq, call }) => {
                    let manager = Arc::clone(&self);
                    let writer = Arc::clone(&writer);
                    calls.spawn(async move {
                        manager.handle_call(writer, client_id, seq, call).await;
                    });
                }
                Ok(_) => {
                    warn!(client = client_id, "unexpected frame from client, dropping");
                }
                Err(ProtoError::Closed) => break,
                Err(err) => {
                    warn!(client = client_id, error = %err, "connection read failed");
                    break;
                }
            }
        }

        // Abandon in-flight calls (including a queued Lock and any
        // Message stream), then release a lock this client still holds.
        calls.shutdown().await;
        self.lock.unlock(client_id);
        info!(client = client_id, "client disconnected");
    }

    async fn handle_call(
        self: Arc<Self>,
        writer: SharedWriter,
        client_id: u64,
        seq: u64,
        call: Call,
    ) {
        // Message upgrades the call into a long-lived push stream. The
        // subscription is registered before the ack so nothing
        // published after the ack can be missed.
        if let Call::Message(client) = &call {
            info!(client = client.id, "message stream subscribed");
            let sub = self.fanout.subscribe(format!("client-{client_id}"));
            if send_response(&writer, seq, CallResult::Ok(Reply::Empty))
                .await
                .is_err()
            {
                return;
            }
            run_message_stream(sub, writer).await;
            info!(client = client_id, "message stream ended");
            return;
        }

        let method = call.method();
        let result = match self.dispatch(client_id, call).await {
            Ok(reply) => CallResult::Ok(reply),
            Err(err) => {
                warn!(
                    client = client_id,
                    method,
                    code = err.code(),
                    error = %err,
                    "call failed"
                );
                CallResult::Err(RemoteError::from(&err))
            }
        };
        if let Err(err) = send_response(&writer, seq, result).await {
            debug!(client = client_id, method, error = %err, "response write failed");
        }
    }

    async fn dispatch(&self, client_id: u64, call: Call) -> Result<Reply, ManagerError> {
        match call {
            Call::Login => {
                info!(client = client_id, "login, assigned id");
                Ok(Reply::Client(Client { id: client_id }))
            }
            Call::Status(_) => Ok(Reply::Status(self.supervisor.status())),
            Call::Start(req) => {
                info!(client = req.client.id, path = %req.path, "start requested");
                let state = self.supervisor.start(&req.path)?;
                Ok(Reply::Status(StatusResponse {
                    state,
                    usedmemory: 0,
                }))
            }
            Call::Stop(client) => {
                info!(client = client.id, "stop requested");
                self.supervisor.stop().await?;
                Ok(Reply::Empty)
            }
            Call::Lock(client) => {
                self.lock.lock(client.id).await;
                Ok(Reply::Empty)
            }
            Call::Unlock(client) => {
                self.lock.unlock(client.id);
                Ok(Reply::Empty)
            }
            Call::Write(req) => {
                if self.lock.holder() != Some(req.client.id) {
                    return Err(ManagerError::NoLockAcquired);
                }
                if self.supervisor.state() != GameState::Running {
                    return Err(ManagerError::NotRunning);
                }
                debug!(
                    client = req.client.id,
                    seq = req.id,
                    content = %req.content,
                    "console write"
                );
                self.supervisor.write_line(&req.content).await?;
                // Only a successful write renews the lease; a broken
                // pipe must not keep the lock alive.
                self.lock.renew_if_holder(req.client.id);
                Ok(Reply::Empty)
            }
            Call::Message(_) => unreachable!("Message is handled in handle_call"),
        }
    }
}

/// Drains a subscriber FIFO into push frames. Each subscriber has its
/// own monotonic message id.
async fn run_message_stream(mut sub: crate::fanout::Subscription, writer: SharedWriter) {
    let mut next_id: u64 = 0;
    while let Some(event) = sub.rx.recv().await {
        let message = match event {
            StreamEvent::Stdout { content, locked } => {
                MessageResponse::stdout(next_id, content, locked)
            }
            StreamEvent::StateChange { content } => {
                MessageResponse::state_change(next_id, content)
            }
        };
        let mut w = writer.lock().await;
        if write_frame(&mut *w, &Frame::Push { message }).await.is_err() {
            break;
        }
        next_id += 1;
    }
}

async fn send_response(
    writer: &SharedWriter,
    seq: u64,
    result: CallResult,
) -> Result<(), ProtoError> {
    let mut w = writer.lock().await;
    write_frame(&mut *w, &Frame::Response { seq, result }).await
}
