//! In-process loopback network.
//!
//! A [`LoopbackHub`] connects any number of endpoints, each with its own
//! identity and its own [`LoopbackTransport`]. Dialing two endpoints offers
//! each side an inbound request claiming the other's key; once both have
//! accepted, the link is reported online to both. Packets are delivered
//! synchronously to the peer's handler. Lossy traffic is not carried.

use selfsync_core::SlotKey;
use selfsync_manager::{
    ConnectionHandler, CryptoTransport, InboundHandler, InboundRequest, PendingToken,
    TransportError,
};
use selfsync_types::{ConnectionId, PublicKey, SyncError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Registration = Option<(Weak<dyn ConnectionHandler>, SlotKey)>;

/// Index of an endpoint on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(usize);

struct Link {
    peer: Option<(EndpointId, ConnectionId)>,
    open: bool,
    status: Registration,
    data: Registration,
}

#[derive(Clone, Copy)]
enum Channel {
    Status,
    Data,
}

struct Endpoint {
    public_key: PublicKey,
    next_connection: u32,
    pending: HashSet<PendingToken>,
    accepted: HashMap<PendingToken, ConnectionId>,
    links: HashMap<ConnectionId, Link>,
    inbound: Option<Weak<dyn InboundHandler>>,
    silenced: bool,
}

#[derive(Default)]
struct HubInner {
    endpoints: Vec<Endpoint>,
    next_token: u64,
}

impl HubInner {
    fn endpoint(&self, id: EndpointId) -> Result<&Endpoint, TransportError> {
        self.endpoints
            .get(id.0)
            .ok_or_else(|| TransportError::AcceptFailed(format!("no endpoint {}", id.0)))
    }

    fn endpoint_mut(&mut self, id: EndpointId) -> Result<&mut Endpoint, TransportError> {
        self.endpoints
            .get_mut(id.0)
            .ok_or_else(|| TransportError::AcceptFailed(format!("no endpoint {}", id.0)))
    }

    fn link_mut(
        &mut self,
        id: EndpointId,
        connection: ConnectionId,
    ) -> Result<&mut Link, TransportError> {
        self.endpoint_mut(id)?
            .links
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))
    }

    fn issue_token(&mut self, id: EndpointId) -> Result<PendingToken, TransportError> {
        let token = PendingToken::new(self.next_token);
        self.next_token += 1;
        self.endpoint_mut(id)?.pending.insert(token);
        Ok(token)
    }

    /// Mark a link closed and hand back its status handler.
    fn shut(&mut self, id: EndpointId, connection: ConnectionId) -> Registration {
        match self.link_mut(id, connection) {
            Ok(link) if link.open => {
                link.open = false;
                link.status.clone()
            }
            _ => None,
        }
    }
}

/// The loopback network.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackHub {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an endpoint with the given identity.
    pub fn add_endpoint(&self, public_key: PublicKey) -> LoopbackTransport {
        let mut inner = self.lock();
        let id = EndpointId(inner.endpoints.len());
        inner.endpoints.push(Endpoint {
            public_key,
            next_connection: 0,
            pending: HashSet::new(),
            accepted: HashMap::new(),
            links: HashMap::new(),
            inbound: None,
            silenced: false,
        });
        LoopbackTransport {
            hub: self.clone(),
            id,
        }
    }

    /// Connect two endpoints and bring the link up.
    ///
    /// Returns each side's connection handle. If either side refuses, the
    /// other side's half is torn down and the first refusal is returned.
    pub fn dial(
        &self,
        a: EndpointId,
        b: EndpointId,
    ) -> Result<(ConnectionId, ConnectionId), SyncError> {
        let (request_a, handler_a, request_b, handler_b) = {
            let mut inner = self.lock();
            let key_a = inner.endpoint(a).map_err(accept_failed)?.public_key;
            let key_b = inner.endpoint(b).map_err(accept_failed)?.public_key;
            let token_a = inner.issue_token(a).map_err(accept_failed)?;
            let token_b = inner.issue_token(b).map_err(accept_failed)?;
            (
                InboundRequest {
                    public_key: key_b,
                    token: token_a,
                },
                inner.endpoints[a.0].inbound.clone(),
                InboundRequest {
                    public_key: key_a,
                    token: token_b,
                },
                inner.endpoints[b.0].inbound.clone(),
            )
        };

        let result_a = offer(handler_a, request_a);
        let result_b = offer(handler_b, request_b);

        let (conn_a, conn_b) = {
            let mut inner = self.lock();
            let conn_a = take_accepted(&mut inner.endpoints[a.0], request_a.token);
            let conn_b = take_accepted(&mut inner.endpoints[b.0], request_b.token);
            if let (Ok(()), Ok(()), Some(ca), Some(cb)) = (&result_a, &result_b, conn_a, conn_b) {
                if let Ok(link) = inner.link_mut(a, ca) {
                    link.peer = Some((b, cb));
                }
                if let Ok(link) = inner.link_mut(b, cb) {
                    link.peer = Some((a, ca));
                }
            }
            (conn_a, conn_b)
        };

        match (result_a, result_b, conn_a, conn_b) {
            (Ok(()), Ok(()), Some(ca), Some(cb)) => {
                self.notify_status(a, ca, true);
                self.notify_status(b, cb, true);
                tracing::debug!("Linked endpoint {} ({}) <-> {} ({})", a.0, ca, b.0, cb);
                Ok((ca, cb))
            }
            (result_a, result_b, conn_a, conn_b) => {
                for (id, conn) in [(a, conn_a), (b, conn_b)] {
                    if let Some(conn) = conn {
                        let handler = self.lock().shut(id, conn);
                        notify(handler, false);
                    }
                }
                let refusal = result_a.err().or(result_b.err()).unwrap_or_else(|| {
                    SyncError::AcceptFailed("connection vanished during dial".into())
                });
                tracing::debug!("Dial {} -> {} refused: {}", a.0, b.0, refusal);
                Err(refusal)
            }
        }
    }

    /// Drop everything an endpoint sends, as if its uplink died.
    pub fn set_silenced(&self, id: EndpointId, silenced: bool) {
        if let Ok(endpoint) = self.lock().endpoint_mut(id) {
            endpoint.silenced = silenced;
        }
    }

    /// Number of open links on an endpoint.
    pub fn open_links(&self, id: EndpointId) -> usize {
        self.lock()
            .endpoint(id)
            .map(|e| e.links.values().filter(|l| l.open).count())
            .unwrap_or(0)
    }

    fn notify_status(&self, id: EndpointId, connection: ConnectionId, online: bool) {
        let handler = self
            .lock()
            .link_mut(id, connection)
            .ok()
            .and_then(|link| link.status.clone());
        notify(handler, online);
    }
}

fn accept_failed(e: TransportError) -> SyncError {
    SyncError::AcceptFailed(e.to_string())
}

fn offer(
    handler: Option<Weak<dyn InboundHandler>>,
    request: InboundRequest,
) -> Result<(), SyncError> {
    match handler.and_then(|h| h.upgrade()) {
        Some(handler) => handler.handle_inbound(request),
        None => Err(SyncError::AcceptFailed("endpoint is not listening".into())),
    }
}

fn take_accepted(endpoint: &mut Endpoint, token: PendingToken) -> Option<ConnectionId> {
    endpoint.pending.remove(&token);
    endpoint.accepted.remove(&token)
}

fn notify(handler: Registration, online: bool) {
    if let Some((handler, key)) = handler {
        if let Some(handler) = handler.upgrade() {
            if let Err(e) = handler.handle_status(key, online) {
                tracing::debug!("Status callback for {} failed: {}", key, e);
            }
        }
    }
}

/// One endpoint's view of the hub.
#[derive(Clone)]
pub struct LoopbackTransport {
    hub: LoopbackHub,
    id: EndpointId,
}

impl LoopbackTransport {
    /// This endpoint's id on the hub.
    pub fn endpoint(&self) -> EndpointId {
        self.id
    }

    fn register(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
        channel: Channel,
    ) -> Result<(), TransportError> {
        let mut inner = self.hub.lock();
        let link = inner.link_mut(self.id, connection)?;
        let registration = Some((handler, key));
        match channel {
            Channel::Status => link.status = registration,
            Channel::Data => link.data = registration,
        }
        Ok(())
    }
}

impl CryptoTransport for LoopbackTransport {
    fn self_public_key(&self) -> PublicKey {
        let inner = self.hub.lock();
        inner.endpoints[self.id.0].public_key
    }

    fn accept_pending(&self, token: PendingToken) -> Result<ConnectionId, TransportError> {
        let mut inner = self.hub.lock();
        let endpoint = inner.endpoint_mut(self.id)?;
        if !endpoint.pending.remove(&token) {
            return Err(TransportError::AcceptFailed(format!(
                "unknown token {}",
                token.value()
            )));
        }

        let id = ConnectionId::new(endpoint.next_connection);
        endpoint.next_connection += 1;
        endpoint.links.insert(
            id,
            Link {
                peer: None,
                open: true,
                status: None,
                data: None,
            },
        );
        endpoint.accepted.insert(token, id);
        Ok(id)
    }

    fn send_packet(&self, connection: ConnectionId, data: &[u8]) -> Result<usize, TransportError> {
        let target = {
            let mut inner = self.hub.lock();
            let silenced = inner.endpoint(self.id)?.silenced;
            let link = inner.link_mut(self.id, connection)?;
            if !link.open {
                return Err(TransportError::NotConnected);
            }
            let (peer, peer_connection) = link.peer.ok_or(TransportError::NotConnected)?;
            if silenced {
                return Ok(data.len());
            }
            inner
                .link_mut(peer, peer_connection)
                .ok()
                .filter(|l| l.open)
                .and_then(|l| l.data.clone())
        };

        if let Some((handler, key)) = target {
            if let Some(handler) = handler.upgrade() {
                if let Err(e) = handler.handle_packet(key, data) {
                    tracing::debug!("Peer rejected packet on {}: {}", key, e);
                }
            }
        }
        Ok(data.len())
    }

    fn close_connection(&self, connection: ConnectionId) -> Result<(), TransportError> {
        let peer_handler = {
            let mut inner = self.hub.lock();
            let link = inner.link_mut(self.id, connection)?;
            if !link.open {
                return Err(TransportError::ConnectionClosed);
            }
            link.open = false;
            let peer = link.peer;
            match peer {
                Some((peer, peer_connection)) => inner.shut(peer, peer_connection),
                None => None,
            }
        };

        notify(peer_handler, false);
        Ok(())
    }

    fn on_status_change(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError> {
        self.register(connection, handler, key, Channel::Status)
    }

    fn on_data_packet(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError> {
        self.register(connection, handler, key, Channel::Data)
    }

    fn on_lossy_packet(
        &self,
        connection: ConnectionId,
        _handler: Weak<dyn ConnectionHandler>,
        _key: SlotKey,
    ) -> Result<(), TransportError> {
        self.hub.lock().link_mut(self.id, connection).map(|_| ())
    }

    fn on_inbound_request(&self, handler: Weak<dyn InboundHandler>) {
        let mut inner = self.hub.lock();
        if let Ok(endpoint) = inner.endpoint_mut(self.id) {
            endpoint.inbound = Some(handler);
        }
    }
}
