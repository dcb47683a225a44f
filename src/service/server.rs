//! # Server
//!
//! TCP listener, client registry, and the serial dispatch stream.
//!
//! The accept loop registers each connection under a fresh 16-bit client id
//! (or rejects it when the registry is full), then hands every observable
//! event (connection, packet, disconnect, accept-timeout) to one dispatch
//! task. Application callbacks therefore run strictly one at a time in a
//! total order, and application state shared between them needs no locking.
//!
//! Binary resources, the obfuscation key blob and the pre-serialized
//! accept-connection frame, are injected as opaque byte vectors through
//! [`Resources`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::core::crypt;
use crate::core::packet::Packet;
use crate::error::{NetError, Result};
use crate::service::lock;
use crate::service::session::Session;

/// Fatal error id sent when the registry is at capacity.
pub const ERROR_SERVER_IS_FULL: u32 = 1855293908;

/// Fatal error id sent when a session stays pending past the accept timeout.
pub const ERROR_IDENTIFICATION_TIMEOUT: u32 = 801713924;

/// Opaque binary resources extracted from the game client, injected at
/// startup.
pub struct Resources {
    /// Obfuscation key blob: first 6 bytes cover headers, the rest bodies.
    pub crypt_key: Vec<u8>,
    /// Pre-serialized accept-connection frame, sent verbatim to every
    /// accepted client.
    pub accept_packet: Vec<u8>,
}

/// Application callbacks, all invoked sequentially on the dispatch stream.
pub trait ServerHandler: Send {
    /// A client connected and was registered; call
    /// [`Session::accept`] or [`Session::reject`] before the accept timeout.
    fn on_connection(&mut self, client: &Arc<Session>);

    /// A packet arrived for which the session has no registered handler.
    fn on_client_packet(&mut self, client: &Arc<Session>, packet: &Packet);

    /// The session ended and was removed from the registry.
    fn on_disconnect(&mut self, client: &Arc<Session>);
}

enum DispatchEvent {
    Connection(Arc<Session>),
    ClientPacket(Arc<Session>, Packet),
    Disconnect(Arc<Session>),
    AcceptTimeout(Arc<Session>),
}

struct Registry {
    clients: HashMap<u16, Arc<Session>>,
    count: u16,
}

impl Registry {
    /// Probe for a free id starting at `count + 1`.
    ///
    /// Not minimal after churn and id 0 is reachable past a wrap; the only
    /// guarantee is uniqueness among live sessions, same as the original
    /// server.
    fn gen_id(&self) -> u16 {
        let mut id = self.count.wrapping_add(1);
        while self.clients.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        id
    }
}

/// The server: listener, registry, and dispatch stream.
pub struct Server {
    config: ServerConfig,
    accept_packet: Arc<Packet>,
    registry: Mutex<Registry>,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    cancel: CancellationToken,
}

impl Server {
    /// Build a server. Installs the obfuscation keys and validates the
    /// canned accept frame.
    pub fn new(config: ServerConfig, resources: Resources) -> Result<Self> {
        crypt::init(&resources.crypt_key)?;
        let accept_packet = Packet::from_bytes(&resources.accept_packet)?;

        Ok(Self {
            config,
            accept_packet: Arc::new(accept_packet),
            registry: Mutex::new(Registry {
                clients: HashMap::with_capacity(1024),
                count: 0,
            }),
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Bind the listener and run until [`Server::shutdown`].
    ///
    /// The calling task becomes the dispatch stream: every `handler` callback
    /// runs here, one at a time. Fails with [`NetError::AlreadyStarted`] on
    /// re-entry and [`NetError::BindFailed`] when the address is unavailable.
    pub async fn start<H: ServerHandler>(self: Arc<Self>, mut handler: H) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(NetError::AlreadyStarted);
        }

        let address = self.config.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| NetError::BindFailed {
                addr: address,
                source,
            })?;

        let local = listener.local_addr()?;
        *lock(&self.local_addr) = Some(local);
        info!(address = %local, max_clients = self.config.max_clients, "server started");

        let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel();

        let accept_task = {
            let server = self.clone();
            let dispatch = dispatch_tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = server.cancel.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => server.register(stream, peer, &dispatch),
                            Err(e) => error!(error = %e, "failed to accept connection"),
                        }
                    }
                }
            })
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = dispatch_rx.recv() => {
                    let Some(event) = event else { break };
                    self.run_event(event, &mut handler);
                }
            }
        }

        accept_task.abort();
        info!("server stopped");
        Ok(())
    }

    fn run_event<H: ServerHandler>(&self, event: DispatchEvent, handler: &mut H) {
        match event {
            DispatchEvent::Connection(session) => handler.on_connection(&session),
            DispatchEvent::ClientPacket(session, packet) => {
                if !session.dispatch_packet(&packet) {
                    handler.on_client_packet(&session, &packet);
                }
            }
            DispatchEvent::Disconnect(session) => {
                {
                    let mut registry = lock(&self.registry);
                    registry.clients.remove(&session.id());
                    registry.count -= 1;
                }
                handler.on_disconnect(&session);
            }
            DispatchEvent::AcceptTimeout(session) => {
                if session.is_pending() {
                    warn!(
                        client = session.id(),
                        ip = %session.ip(),
                        "accept confirmation timed out, rejecting"
                    );
                    if let Err(e) = session.reject(ERROR_IDENTIFICATION_TIMEOUT) {
                        error!(client = session.id(), error = %e, "timeout rejection failed");
                    }
                }
            }
        }
    }

    /// Register one accepted connection, or reject it when the registry is
    /// full. Id allocation, the capacity check, and insertion happen under
    /// one lock so concurrent accepts cannot interleave them.
    fn register(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        dispatch: &mpsc::UnboundedSender<DispatchEvent>,
    ) {
        let mut registry = lock(&self.registry);
        let id = registry.gen_id();
        let (session, mut packet_rx) =
            Session::spawn(id, stream, peer.ip().to_string(), self.accept_packet.clone());

        if registry.count >= self.config.max_clients {
            drop(registry);
            warn!(ip = %peer.ip(), "server is full, rejecting connection");
            if let Err(e) = session.reject(ERROR_SERVER_IS_FULL) {
                error!(error = %e, "capacity rejection failed");
            }
            return;
        }

        registry.clients.insert(id, session.clone());
        registry.count += 1;
        drop(registry);

        info!(client = id, ip = %peer.ip(), "new client connected");

        let _ = dispatch.send(DispatchEvent::Connection(session.clone()));

        // pump packets into the dispatch stream; the channel closing is the
        // session's end, reported exactly once
        {
            let dispatch = dispatch.clone();
            let session = session.clone();
            tokio::spawn(async move {
                while let Some(packet) = packet_rx.recv().await {
                    if dispatch
                        .send(DispatchEvent::ClientPacket(session.clone(), packet))
                        .is_err()
                    {
                        break;
                    }
                }
                let _ = dispatch.send(DispatchEvent::Disconnect(session));
            });
        }

        // accept-timeout watchdog: always posts, the pending check happens on
        // the dispatch stream so it cannot race an in-flight accept()
        {
            let dispatch = dispatch.clone();
            let deadline = Duration::from_secs(u64::from(self.config.accept_timeout_secs));
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                let _ = dispatch.send(DispatchEvent::AcceptTimeout(session));
            });
        }
    }

    /// Number of currently registered clients.
    pub fn clients_count(&self) -> u16 {
        lock(&self.registry).count
    }

    /// Whether `start` has run.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// The bound listener address, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Stop accepting and wind down the dispatch stream; in-flight sessions
    /// run to their own EOF.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
