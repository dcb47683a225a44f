//! # Client Session
//!
//! One [`Session`] per accepted TCP connection.
//!
//! ## Lifecycle
//! ```text
//! Pending ──accept()──► Accepted ──(reader EOF/error | close())──► Closed
//!    │                                                               ▲
//!    └──reject(reason)──► (fatal error packet sent) ─────────────────┘
//! ```
//!
//! `accept` and `reject` are one-shot: the application must call exactly one
//! of them after `on_connection`, or the server's watchdog rejects the
//! session with the identification-timeout error.
//!
//! ## Concurrency
//! A writer task runs from session creation, draining an unbounded queue to
//! the socket; `accept` spawns the reader task. Decoded packets flow to the
//! server's dispatch stream, where either a registered per-id handler or the
//! application's `on_client_packet` callback runs. The write queue is
//! unbounded: a peer that stops reading lets queued frames accumulate, with
//! only the OS socket buffer pushing back on the wire itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::core::wire::WireRead;
use crate::error::{NetError, Result};
use crate::service::lock;

/// Packet id of the non-fatal error reply `1102(packet_id, error_id, code)`.
pub const ERROR_PACKET_ID: u16 = 1102;

/// Packet id of the fatal error `3102(error_id)`; the client disconnects on
/// receipt.
pub const FATAL_ERROR_PACKET_ID: u16 = 3102;

/// Error id reported to the peer when a packet handler fails.
pub const ERROR_HANDLER_FAILED: u32 = 2547627153;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Pending,
    Accepted,
    Rejected,
}

type HandlerFn = dyn Fn(&Arc<Session>, &Packet) -> Result<()> + Send + Sync;

struct PacketHandler {
    handle: Arc<HandlerFn>,
    once: bool,
}

/// Per-connection session object.
pub struct Session {
    id: u16,
    ip: String,
    lifecycle: Mutex<Lifecycle>,
    closed: AtomicBool,
    cancel: CancellationToken,
    writer_tx: mpsc::UnboundedSender<Packet>,
    packet_tx: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    reader: Mutex<Option<FramedRead<OwnedReadHalf, PacketCodec>>>,
    handlers: Mutex<HashMap<u16, PacketHandler>>,
    accept_packet: Arc<Packet>,
    // handed to the reader task and to handlers, which expect &Arc<Session>
    self_ref: Weak<Session>,
}

impl Session {
    /// Build a session over an accepted stream and start its writer task.
    ///
    /// Returns the session plus the receiving end of its packet channel; the
    /// server pumps that channel into the dispatch stream and treats its
    /// closing as the disconnect signal.
    pub(crate) fn spawn(
        id: u16,
        stream: TcpStream,
        ip: String,
        accept_packet: Arc<Packet>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Packet>) {
        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();

        let session = Arc::new_cyclic(|weak| Self {
            id,
            ip,
            lifecycle: Mutex::new(Lifecycle::Pending),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            writer_tx,
            packet_tx: Mutex::new(Some(packet_tx)),
            reader: Mutex::new(Some(FramedRead::new(read_half, PacketCodec))),
            handlers: Mutex::new(HashMap::new()),
            accept_packet,
            self_ref: weak.clone(),
        });

        tokio::spawn(Self::write_loop(
            session.clone(),
            FramedWrite::new(write_half, PacketCodec),
            writer_rx,
        ));

        (session, packet_rx)
    }

    /// Client id assigned by the server.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Peer IP address.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Accept the connection: start reading packets and send the canned
    /// accept-connection frame.
    ///
    /// Fails with [`NetError::InvalidState`] unless the session is pending.
    pub fn accept(&self) -> Result<()> {
        {
            let mut state = lock(&self.lifecycle);
            match *state {
                Lifecycle::Rejected => {
                    return Err(NetError::InvalidState(format!(
                        "cannot accept a connection that was already rejected [id={} ip={}]",
                        self.id, self.ip
                    )))
                }
                Lifecycle::Accepted => {
                    return Err(NetError::InvalidState(format!(
                        "connection already accepted [id={} ip={}]",
                        self.id, self.ip
                    )))
                }
                Lifecycle::Pending => *state = Lifecycle::Accepted,
            }
        }

        let reader = lock(&self.reader).take();
        let packet_tx = lock(&self.packet_tx).clone();
        if let (Some(framed), Some(packet_tx), Some(session)) =
            (reader, packet_tx, self.self_ref.upgrade())
        {
            tokio::spawn(Self::read_loop(session, framed, packet_tx));
        }

        self.send_packet((*self.accept_packet).clone());
        Ok(())
    }

    /// Reject the connection: send the fatal error `reason` and close.
    ///
    /// Fails with [`NetError::InvalidState`] unless the session is pending.
    pub fn reject(&self, reason: u32) -> Result<()> {
        {
            let mut state = lock(&self.lifecycle);
            match *state {
                Lifecycle::Accepted => {
                    return Err(NetError::InvalidState(format!(
                        "cannot reject a connection that was already accepted [id={} ip={}]",
                        self.id, self.ip
                    )))
                }
                Lifecycle::Rejected => {
                    return Err(NetError::InvalidState(format!(
                        "connection already rejected [id={} ip={}]",
                        self.id, self.ip
                    )))
                }
                Lifecycle::Pending => *state = Lifecycle::Rejected,
            }
        }

        self.fatal_error(reason);
        self.close();
        Ok(())
    }

    /// True while neither `accept` nor `reject` has run.
    pub fn is_pending(&self) -> bool {
        matches!(*lock(&self.lifecycle), Lifecycle::Pending)
    }

    /// Enqueue a packet for the writer task. Writes after close are silently
    /// dropped.
    pub fn send_packet(&self, packet: Packet) {
        if self.closed.load(Ordering::Acquire) {
            trace!(client = self.id, packet_id = packet.id, "write after close dropped");
            return;
        }

        trace!(client = self.id, ip = %self.ip, "outgoing packet\n{packet}");

        if self.writer_tx.send(packet).is_err() {
            debug!(client = self.id, "writer task gone, packet dropped");
        }
    }

    /// Send the non-fatal error reply `1102(packet_id, error_id, code)`.
    ///
    /// `packet_id` names the packet the error answers; `error_id` indexes the
    /// client-side message catalogue; `code` is shown next to the message.
    pub fn error(&self, packet_id: u16, error_id: u32, code: u32) {
        match Packet::create(ERROR_PACKET_ID, (packet_id, error_id, code)) {
            Ok(packet) => self.send_packet(packet),
            Err(e) => error!(client = self.id, error = %e, "failed to build error packet"),
        }
    }

    /// Send the fatal error `3102(error_id)`. The client disconnects on
    /// receipt; this call itself does not close the session.
    pub fn fatal_error(&self, error_id: u32) {
        match Packet::create(FATAL_ERROR_PACKET_ID, error_id) {
            Ok(packet) => self.send_packet(packet),
            Err(e) => error!(client = self.id, error = %e, "failed to build fatal error packet"),
        }
    }

    /// Register a handler for packets with `packet_id`; replaces any previous
    /// one. A `once` handler is removed around its first invocation.
    pub fn set_packet_handler<F>(&self, packet_id: u16, once: bool, handler: F)
    where
        F: Fn(&Arc<Session>, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        lock(&self.handlers).insert(
            packet_id,
            PacketHandler {
                handle: Arc::new(handler),
                once,
            },
        );
    }

    /// Register a handler whose payload is parsed into `T` before it runs; a
    /// parse failure counts as a handler failure and is answered with the
    /// internal-error reply.
    pub fn set_typed_handler<T, F>(&self, packet_id: u16, once: bool, handler: F)
    where
        T: WireRead + 'static,
        F: Fn(&Arc<Session>, &Packet, T) -> Result<()> + Send + Sync + 'static,
    {
        self.set_packet_handler(packet_id, once, move |session, packet| {
            let fields = packet.read::<T>()?;
            handler(session, packet, fields)
        });
    }

    /// Remove the handler for `packet_id`, if any.
    pub fn remove_packet_handler(&self, packet_id: u16) {
        lock(&self.handlers).remove(&packet_id);
    }

    /// Run the registered handler for `packet`, if any. Returns whether the
    /// packet was handled.
    ///
    /// Runs on the server's dispatch stream. The table lock is released
    /// before the handler runs, so handlers may re-register freely. A failed
    /// handler is logged and answered with `1102(id, ERROR_HANDLER_FAILED, 0)`;
    /// the session survives.
    pub(crate) fn dispatch_packet(&self, packet: &Packet) -> bool {
        let handle = {
            let mut handlers = lock(&self.handlers);
            match handlers.get(&packet.id) {
                Some(entry) if entry.once => handlers.remove(&packet.id).map(|e| e.handle),
                Some(entry) => Some(entry.handle.clone()),
                None => None,
            }
        };

        let (Some(handle), Some(session)) = (handle, self.self_ref.upgrade()) else {
            return false;
        };

        let packet_id = packet.id;
        if let Err(e) = handle(&session, packet) {
            warn!(client = self.id, packet_id, error = %e, "packet handler failed");
            self.error(packet_id, ERROR_HANDLER_FAILED, 0);
        }
        true
    }

    /// Close the session: stop both tasks, shut the socket down, and signal
    /// the disconnect. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        lock(&self.packet_tx).take();
        self.cancel.cancel();
        info!(client = self.id, ip = %self.ip, "client disconnected");
    }

    /// True once [`Session::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Completes when the session has closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    async fn read_loop(
        session: Arc<Self>,
        mut framed: FramedRead<OwnedReadHalf, PacketCodec>,
        packet_tx: mpsc::UnboundedSender<Packet>,
    ) {
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break,
                frame = framed.next() => match frame {
                    // peer closed between frames
                    None => break,
                    Some(Ok(mut packet)) => {
                        if packet.is_encrypted() {
                            if let Err(e) = packet.decrypt() {
                                error!(client = session.id, error = %e, "cannot deobfuscate packet");
                                break;
                            }
                        }
                        trace!(client = session.id, ip = %session.ip, "incoming packet\n{packet}");
                        if packet_tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(client = session.id, ip = %session.ip, error = %e, "packet read failed");
                        break;
                    }
                }
            }
        }

        drop(packet_tx);
        session.close();
    }

    async fn write_loop(
        session: Arc<Self>,
        mut sink: FramedWrite<OwnedWriteHalf, PacketCodec>,
        mut rx: mpsc::UnboundedReceiver<Packet>,
    ) {
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(packet) => {
                        if let Err(e) = sink.send(packet).await {
                            warn!(client = session.id, error = %e, "packet write failed");
                            session.close();
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        // frames queued before the shutdown still go out; the reject path
        // relies on its fatal error packet reaching the peer
        while let Ok(packet) = rx.try_recv() {
            if sink.send(packet).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn session_pair() -> (Arc<Session>, mpsc::UnboundedReceiver<Packet>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (accepted, client) =
            tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (stream, peer) = accepted.unwrap();

        let accept_packet = Arc::new(Packet::create(101, ()).unwrap());
        let (session, packet_rx) =
            Session::spawn(7, stream, peer.ip().to_string(), accept_packet);
        (session, packet_rx, client.unwrap())
    }

    async fn read_frame(stream: &mut TcpStream) -> Packet {
        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await.unwrap();
        let total = u16::from_le_bytes(len_buf) as usize;
        let mut rest = vec![0u8; total - 2];
        stream.read_exact(&mut rest).await.unwrap();

        let mut frame = len_buf.to_vec();
        frame.extend(rest);
        Packet::from_bytes(&frame).unwrap()
    }

    #[tokio::test]
    async fn accept_is_one_shot() {
        let (session, _rx, _client) = session_pair().await;

        session.accept().expect("first accept");
        let err = session.accept().unwrap_err();
        assert!(matches!(err, NetError::InvalidState(_)));

        let err = session.reject(1).unwrap_err();
        assert!(matches!(err, NetError::InvalidState(_)));
    }

    #[tokio::test]
    async fn reject_is_one_shot() {
        let (session, _rx, _client) = session_pair().await;

        session.reject(42).expect("first reject");
        assert!(matches!(session.reject(42), Err(NetError::InvalidState(_))));
        assert!(matches!(session.accept(), Err(NetError::InvalidState(_))));
    }

    #[tokio::test]
    async fn accept_sends_the_canned_packet_first() {
        let (session, _rx, mut client) = session_pair().await;

        session.accept().expect("accept");
        let first = timeout(Duration::from_secs(2), read_frame(&mut client))
            .await
            .expect("frame before timeout");
        assert_eq!(first.id, 101);
    }

    #[tokio::test]
    async fn reject_sends_fatal_error_then_closes() {
        let (session, _rx, mut client) = session_pair().await;

        session.reject(1855293908).expect("reject");

        let frame = timeout(Duration::from_secs(2), read_frame(&mut client))
            .await
            .expect("frame before timeout");
        assert_eq!(frame.id, FATAL_ERROR_PACKET_ID);
        assert_eq!(frame.read::<u32>().unwrap(), 1855293908);

        // socket must be closed afterwards
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("eof before timeout")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_signals_once() {
        let (session, mut rx, _client) = session_pair().await;

        session.close();
        session.close();
        assert!(session.is_closed());

        timeout(Duration::from_secs(1), session.closed())
            .await
            .expect("closed() resolves");

        // the packet channel closes exactly once, which is the disconnect signal
        assert!(timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("channel closed")
            .is_none());
    }

    #[tokio::test]
    async fn writes_after_close_are_dropped() {
        let (session, _rx, mut client) = session_pair().await;

        session.close();
        session.send_packet(Packet::create(9, 1u32).unwrap());

        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("eof before timeout")
            .unwrap();
        assert_eq!(n, 0, "no frame may arrive after close");
    }

    #[tokio::test]
    async fn handler_failure_sends_internal_error_reply() {
        let (session, _rx, mut client) = session_pair().await;
        session.accept().expect("accept");

        session.set_packet_handler(500, false, |_, _| {
            Err(NetError::InvalidState("boom".into()))
        });
        let handled = session.dispatch_packet(&Packet::create(500, ()).unwrap());
        assert!(handled);

        // accept packet first, then the 1102 reply
        let first = read_frame(&mut client).await;
        assert_eq!(first.id, 101);
        let reply = timeout(Duration::from_secs(2), read_frame(&mut client))
            .await
            .expect("frame before timeout");
        assert_eq!(reply.id, ERROR_PACKET_ID);
        let (packet_id, error_id, code) = reply.read::<(u16, u32, u32)>().unwrap();
        assert_eq!(packet_id, 500);
        assert_eq!(error_id, ERROR_HANDLER_FAILED);
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn once_handler_runs_a_single_time() {
        let (session, _rx, _client) = session_pair().await;
        let hits = Arc::new(AtomicBool::new(false));

        let hits_in = hits.clone();
        session.set_packet_handler(600, true, move |_, _| {
            hits_in.store(true, Ordering::SeqCst);
            Ok(())
        });

        let packet = Packet::create(600, ()).unwrap();
        assert!(session.dispatch_packet(&packet));
        assert!(hits.load(Ordering::SeqCst));
        assert!(!session.dispatch_packet(&packet), "handler must be gone");
    }

    #[tokio::test]
    async fn typed_handler_parses_the_body() {
        let (session, _rx, _client) = session_pair().await;
        let seen = Arc::new(Mutex::new(None));

        let seen_in = seen.clone();
        session.set_typed_handler::<(u32, u16), _>(700, false, move |_, _, fields| {
            *lock(&seen_in) = Some(fields);
            Ok(())
        });

        let packet = Packet::create(700, (1855293908u32, 1500u16)).unwrap();
        assert!(session.dispatch_packet(&packet));
        assert_eq!(*lock(&seen), Some((1855293908, 1500)));
    }
}
