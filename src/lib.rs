//! EtherNet/IP server simulator.
//!
//! A stateful TCP endpoint on port 44818 speaking the EtherNet/IP
//! encapsulation protocol, dispatching embedded CIP requests against a
//! small object model (Identity, Message Router, Connection Manager) and a
//! symbolic tag table of volatile DINT values. A UDP socket on port 2222
//! holds the implicit-messaging port reservation but parses nothing.
//!
//! ```rust,no_run
//! use eip_sim::{EipServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> eip_sim::Result<()> {
//!     let server = EipServer::new(ServerConfig::default())?;
//!     server.bind().await?.run().await
//! }
//! ```
//!
//! Wire behavior worth knowing before pointing a scanner at it:
//!
//! - Headers are decoded big- or little-endian per frame, via a
//!   conservative probe over the command field; responses mirror the order
//!   of the request they answer.
//! - Unconnected Send responses are returned unwrapped (the embedded
//!   response verbatim) unless [`ServerConfig::wrap_unconnected_send`] is
//!   set.
//! - Tags are read-only; every read returns a fresh pseudo-random DINT.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::interval;
use tracing::{debug, info, trace};

pub mod cip_dispatch;
pub mod cip_message;
pub mod cip_path;
pub mod config;
pub mod cpf;
pub mod encap;
pub mod error;
pub mod objects;
pub mod session;
pub mod tag_store;

// Re-export commonly used items
pub use cip_dispatch::ServerState;
pub use config::ServerConfig;
pub use encap::{ByteOrder, EncapPacket};
pub use error::{Result, ServerError};
pub use objects::DeviceIdentity;
pub use session::SessionRegistry;
pub use tag_store::TagStore;

use encap::{FrameBuffer, FrameStep};

/// The simulator, configured but not yet bound.
///
/// Shared state (session registry, tag store, device identity) is built
/// here and handed by reference to every connection task; nothing lives in
/// module-level statics.
#[derive(Debug)]
pub struct EipServer {
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl EipServer {
    /// Validates the configuration and builds the shared state.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(ServerState {
            identity: DeviceIdentity::from_config(&config),
            sessions: Arc::new(SessionRegistry::new()),
            tags: Arc::new(TagStore::generate(config.tag_count)),
            wrap_unconnected_send: config.wrap_unconnected_send,
        });
        Ok(Self { config, state })
    }

    /// Binds the TCP listener and the UDP stub socket.
    ///
    /// Split from [`BoundServer::run`] so callers (and tests) can bind
    /// port 0 and learn the real address before serving.
    pub async fn bind(self) -> Result<BoundServer> {
        let listener = TcpListener::bind(self.config.tcp_addr()).await?;
        let udp = UdpSocket::bind(self.config.udp_addr()).await?;
        info!(
            tcp = %listener.local_addr()?,
            udp = %udp.local_addr()?,
            tags = self.state.tags.len(),
            "simulator listening"
        );
        Ok(BoundServer {
            listener,
            udp,
            config: self.config,
            state: self.state,
        })
    }

    /// Shared state, for embedders that drive [`cip_dispatch::dispatch`]
    /// directly.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }
}

/// A simulator with its sockets bound, ready to serve.
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    udp: UdpSocket,
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl BoundServer {
    /// Address the TCP listener actually bound (relevant when the
    /// configured port was 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the accept loop fails. Spawns the session sweeper, the
    /// UDP stub, and one task per TCP connection.
    pub async fn run(self) -> Result<()> {
        let sessions = Arc::clone(&self.state.sessions);
        let sweep_interval = self.config.sweep_interval;
        let idle_timeout = self.config.idle_timeout;
        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            loop {
                ticker.tick().await;
                let removed = sessions.sweep(idle_timeout);
                if removed > 0 {
                    info!(removed, "swept idle sessions");
                }
            }
        });

        tokio::spawn(discard_datagrams(self.udp));

        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!(%peer, "client connected");
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, &state).await {
                    debug!(%peer, error = %e, "connection error");
                }
                info!(%peer, "client disconnected");
            });
        }
    }
}

/// The UDP implicit-messaging stub: receive and discard.
async fn discard_datagrams(socket: UdpSocket) {
    let mut buf = [0u8; 1500];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => trace!(%peer, len, "discarding implicit-messaging datagram"),
            Err(e) => {
                debug!(error = %e, "udp receive error");
            }
        }
    }
}

/// Per-connection driver: reads bytes, reassembles frames, dispatches, and
/// writes each response before touching the next frame. Within one
/// connection, responses leave in request order. A byte stream that cannot
/// be framed closes the connection with [`ServerError::Frame`].
async fn serve_connection(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    let local_ip = match stream.local_addr()?.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    };

    let mut conn = ConnectionState::new(local_ip);
    let mut chunk = [0u8; 4096];

    let outcome = 'conn: loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(ServerError::Io(e)),
        };
        conn.frames.extend(&chunk[..n]);

        loop {
            match conn.frames.next_frame() {
                FrameStep::Incomplete => break,
                FrameStep::Desync { dropped } => {
                    // Without delimiters there is nothing to resync on, so
                    // the connection ends here.
                    break 'conn Err(ServerError::Frame(format!(
                        "unframeable encapsulation header, dropped {} buffered bytes",
                        dropped
                    )));
                }
                FrameStep::Frame { bytes, order } => {
                    conn.order = order;
                    let Some(request) = EncapPacket::decode(&bytes, order) else {
                        break 'conn Err(ServerError::Frame(format!(
                            "frame of {} bytes disagrees with its header length field",
                            bytes.len()
                        )));
                    };
                    let response = conn.handle_packet(&request, state);
                    if let Err(e) = stream.write_all(&response.encode(order)).await {
                        break 'conn Err(ServerError::Io(e));
                    }
                }
            }
        }
    };

    // Sessions registered on this connection die with it.
    for handle in conn.registered.drain(..) {
        if state.sessions.remove(handle) {
            debug!(handle, "removed session on disconnect");
        }
    }
    outcome
}

/// State bound to one TCP connection: the reassembly buffer, the byte
/// order most recently detected, and the session handles this connection
/// registered.
struct ConnectionState {
    frames: FrameBuffer,
    order: ByteOrder,
    registered: Vec<u32>,
    local_ip: Ipv4Addr,
}

impl ConnectionState {
    fn new(local_ip: Ipv4Addr) -> Self {
        Self {
            frames: FrameBuffer::new(),
            order: ByteOrder::Big,
            registered: Vec::new(),
            local_ip,
        }
    }

    /// The encapsulation dispatcher: command code to handler, session
    /// enforcement where the command demands it.
    fn handle_packet(&mut self, request: &EncapPacket, state: &ServerState) -> EncapPacket {
        // Any live handle on any command refreshes the session.
        if request.session_handle != 0 && state.sessions.has(request.session_handle) {
            state.sessions.touch(request.session_handle);
        }

        match request.command {
            encap::REGISTER_SESSION => self.register_session(request, state),
            encap::UNREGISTER_SESSION => self.unregister_session(request, state),
            encap::LIST_SERVICES => request.reply(
                encap::STATUS_SUCCESS,
                encap::list_services_payload(self.order),
            ),
            encap::LIST_IDENTITY => request.reply(
                encap::STATUS_SUCCESS,
                state.identity.list_identity_payload(self.local_ip),
            ),
            encap::SEND_RR_DATA => self.send_rr_data(request, state),
            other => {
                debug!(command = other, "invalid command");
                request.reply(encap::STATUS_INVALID_COMMAND, Vec::new())
            }
        }
    }

    fn register_session(&mut self, request: &EncapPacket, state: &ServerState) -> EncapPacket {
        if request.payload.len() < 4 {
            return request.reply(encap::STATUS_INVALID_LENGTH, Vec::new());
        }
        let version = self.order.read_u16(&request.payload, 0);

        // Either way the body advertises the version this server speaks.
        let mut payload = Vec::with_capacity(4);
        self.order.put_u16(&mut payload, encap::PROTOCOL_VERSION);
        self.order.put_u16(&mut payload, 0);

        if version != encap::PROTOCOL_VERSION {
            debug!(version, "rejecting unsupported protocol version");
            return request.reply(encap::STATUS_UNSUPPORTED_PROTOCOL, payload);
        }

        let handle = state.sessions.create();
        self.registered.push(handle);
        info!(handle, "session registered");

        let mut response = request.reply(encap::STATUS_SUCCESS, payload);
        response.session_handle = handle;
        response
    }

    fn unregister_session(&mut self, request: &EncapPacket, state: &ServerState) -> EncapPacket {
        if !state.sessions.remove(request.session_handle) {
            return request.reply(encap::STATUS_INVALID_SESSION_HANDLE, Vec::new());
        }
        self.registered.retain(|&h| h != request.session_handle);
        info!(handle = request.session_handle, "session unregistered");
        request.reply(encap::STATUS_SUCCESS, Vec::new())
    }

    fn send_rr_data(&mut self, request: &EncapPacket, state: &ServerState) -> EncapPacket {
        if !state.sessions.has(request.session_handle) {
            debug!(
                handle = request.session_handle,
                "SendRRData with unknown session handle"
            );
            return request.reply(encap::STATUS_INVALID_SESSION_HANDLE, Vec::new());
        }

        let Some(cpf) = cpf::CpfPacket::decode(&request.payload, self.order) else {
            return request.reply(encap::STATUS_INVALID_LENGTH, Vec::new());
        };
        let Some(cip_request) = cpf.unconnected_data() else {
            return request.reply(encap::STATUS_INVALID_LENGTH, Vec::new());
        };

        // CIP-level failures stay inside the CIP response; the
        // encapsulation status is success either way.
        let cip_response = cip_dispatch::dispatch(cip_request, state);
        let payload = cpf.encode_response(&cip_response, self.order);
        if payload.len() > u16::MAX as usize {
            return request.reply(encap::STATUS_INSUFFICIENT_MEMORY, Vec::new());
        }
        request.reply(encap::STATUS_SUCCESS, payload)
    }
}
