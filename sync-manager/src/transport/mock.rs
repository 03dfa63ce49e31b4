//! Mock transport for testing.
//!
//! Records every send, close and handler registration, allows injecting
//! failures, and lets tests play the transport's side of the callbacks.

use super::{
    ConnectionHandler, CryptoTransport, InboundHandler, InboundRequest, PendingToken,
    TransportError,
};
use selfsync_core::SlotKey;
use selfsync_types::{encode_keepalive, ConnectionId, PublicKey, SyncError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

type Registration = Option<(Weak<dyn ConnectionHandler>, SlotKey)>;

#[derive(Debug)]
struct MockConnection {
    open: bool,
    status: Registration,
    data: Registration,
    lossy: Registration,
}

impl MockConnection {
    fn new() -> Self {
        Self {
            open: true,
            status: None,
            data: None,
            lossy: None,
        }
    }

    fn channel(&mut self, channel: Channel) -> &mut Registration {
        match channel {
            Channel::Status => &mut self.status,
            Channel::Data => &mut self.data,
            Channel::Lossy => &mut self.lossy,
        }
    }
}

/// Mock transport for testing.
///
/// Cloning shares state, so a test can keep one handle while the manager
/// owns another.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug)]
struct MockTransportInner {
    public_key: PublicKey,
    next_connection: u32,
    next_token: u64,
    pending: HashSet<PendingToken>,
    connections: HashMap<ConnectionId, MockConnection>,
    inbound: Option<Weak<dyn InboundHandler>>,
    accepted: Vec<ConnectionId>,
    sent: Vec<(ConnectionId, Vec<u8>)>,
    closed: Vec<ConnectionId>,
    fail_next_accept: Option<String>,
    fail_next_send: Option<String>,
    fail_next_register: Option<String>,
    failing_connections: HashSet<ConnectionId>,
    inbound_during_accept: Option<PublicKey>,
    echo_keepalives: bool,
}

#[derive(Clone, Copy)]
enum Channel {
    Status,
    Data,
    Lossy,
}

impl MockTransport {
    /// Create a mock transport for the given local identity.
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner {
                public_key,
                next_connection: 0,
                next_token: 0,
                pending: HashSet::new(),
                connections: HashMap::new(),
                inbound: None,
                accepted: Vec::new(),
                sent: Vec::new(),
                closed: Vec::new(),
                fail_next_accept: None,
                fail_next_send: None,
                fail_next_register: None,
                failing_connections: HashSet::new(),
                inbound_during_accept: None,
                echo_keepalives: false,
            })),
        }
    }

    /// Create a mock transport with a random local identity.
    pub fn random() -> Self {
        Self::new(PublicKey::random())
    }

    /// Play an inbound connection request claiming `public_key`.
    ///
    /// Returns the inbound handler's verdict.
    pub fn request_inbound(&self, public_key: PublicKey) -> Result<(), SyncError> {
        let (handler, token) = {
            let mut inner = self.inner.lock().unwrap();
            let token = PendingToken::new(inner.next_token);
            inner.next_token += 1;
            inner.pending.insert(token);
            (inner.inbound.clone(), token)
        };

        let handler = handler
            .and_then(|h| h.upgrade())
            .ok_or_else(|| SyncError::AcceptFailed("no inbound handler registered".into()))?;
        handler.handle_inbound(InboundRequest { public_key, token })
    }

    /// Report the link of `connection` going up or down.
    ///
    /// Going down also marks the connection closed, as a real transport
    /// would have torn it down before reporting.
    pub fn set_link_status(&self, connection: ConnectionId, online: bool) -> Result<(), SyncError> {
        let (handler, key) = self.registration(connection, Channel::Status)?;
        if !online {
            let mut inner = self.inner.lock().unwrap();
            if let Some(conn) = inner.connections.get_mut(&connection) {
                conn.open = false;
            }
        }
        handler.handle_status(key, online)
    }

    /// Deliver a reliable packet on `connection`.
    pub fn deliver_packet(&self, connection: ConnectionId, data: &[u8]) -> Result<(), SyncError> {
        let (handler, key) = self.registration(connection, Channel::Data)?;
        handler.handle_packet(key, data)
    }

    /// Deliver a lossy packet on `connection`.
    pub fn deliver_lossy_packet(
        &self,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<(), SyncError> {
        let (handler, key) = self.registration(connection, Channel::Lossy)?;
        handler.handle_lossy_packet(key, data)
    }

    fn registration(
        &self,
        connection: ConnectionId,
        channel: Channel,
    ) -> Result<(Arc<dyn ConnectionHandler>, SlotKey), SyncError> {
        let registration = {
            let mut inner = self.inner.lock().unwrap();
            match inner.connections.get_mut(&connection) {
                Some(conn) => conn.channel(channel).clone(),
                None => None,
            }
        };
        let (handler, key) = registration.ok_or_else(|| {
            SyncError::AcceptFailed(format!("{} was never admitted", connection))
        })?;
        let handler = handler
            .upgrade()
            .ok_or(SyncError::StaleSlotReference { slot: key.index() })?;
        Ok((handler, key))
    }

    /// Cause the next accept_pending() to fail with the given error.
    pub fn fail_next_accept(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_accept = Some(error.to_string());
    }

    /// Cause the next send_packet() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Cause the next handler registration to fail with the given error.
    pub fn fail_next_register(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_register = Some(error.to_string());
    }

    /// Play an inbound request claiming `public_key` while the next
    /// accept_pending() is still in progress.
    pub fn inbound_during_next_accept(&self, public_key: PublicKey) {
        let mut inner = self.inner.lock().unwrap();
        inner.inbound_during_accept = Some(public_key);
    }

    /// Answer every keepalive sent with one on the same connection.
    ///
    /// The answer is delivered from another thread before send_packet()
    /// returns, the way a peer replying on the receive path would race the
    /// sender.
    pub fn echo_keepalives(&self, enabled: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.echo_keepalives = enabled;
    }

    /// Make every send on `connection` fail until turned off again.
    pub fn set_send_failing(&self, connection: ConnectionId, failing: bool) {
        let mut inner = self.inner.lock().unwrap();
        if failing {
            inner.failing_connections.insert(connection);
        } else {
            inner.failing_connections.remove(&connection);
        }
    }

    /// Connections accepted so far, in order.
    pub fn accepted_connections(&self) -> Vec<ConnectionId> {
        self.inner.lock().unwrap().accepted.clone()
    }

    /// The most recently accepted connection.
    pub fn last_accepted(&self) -> Option<ConnectionId> {
        self.inner.lock().unwrap().accepted.last().copied()
    }

    /// Every successfully sent packet, in order.
    pub fn sent_packets(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Packets sent on one connection.
    pub fn sent_to(&self, connection: ConnectionId) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .sent
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Every close_connection() call, in order.
    pub fn closed_connections(&self) -> Vec<ConnectionId> {
        self.inner.lock().unwrap().closed.clone()
    }

    /// How often close_connection() was called for `connection`.
    pub fn close_count(&self, connection: ConnectionId) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.closed.iter().filter(|c| **c == connection).count()
    }

    /// Check if all three per-connection handlers are registered.
    pub fn is_fully_registered(&self, connection: ConnectionId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .get(&connection)
            .map(|c| c.status.is_some() && c.data.is_some() && c.lossy.is_some())
            .unwrap_or(false)
    }

    /// Total number of per-connection handler registrations.
    pub fn registration_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .values()
            .map(|c| {
                usize::from(c.status.is_some())
                    + usize::from(c.data.is_some())
                    + usize::from(c.lossy.is_some())
            })
            .sum()
    }

    /// Check if an inbound handler is registered and still alive.
    pub fn has_inbound_handler(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .inbound
            .as_ref()
            .map(|h| h.strong_count() > 0)
            .unwrap_or(false)
    }

    /// Check if `connection` is still open.
    pub fn is_open(&self, connection: ConnectionId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .get(&connection)
            .map(|c| c.open)
            .unwrap_or(false)
    }

    fn register(
        &self,
        connection: ConnectionId,
        channel: Channel,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_register.take() {
            return Err(TransportError::RegistrationFailed(error));
        }

        let conn = inner
            .connections
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        *conn.channel(channel) = Some((handler, key));
        Ok(())
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CryptoTransport for MockTransport {
    fn self_public_key(&self) -> PublicKey {
        self.inner.lock().unwrap().public_key
    }

    fn accept_pending(&self, token: PendingToken) -> Result<ConnectionId, TransportError> {
        let (id, interleaved) = {
            let mut inner = self.inner.lock().unwrap();

            // Check for forced failure
            if let Some(error) = inner.fail_next_accept.take() {
                inner.pending.remove(&token);
                return Err(TransportError::AcceptFailed(error));
            }

            if !inner.pending.remove(&token) {
                let reason = format!("unknown token {}", token.value());
                return Err(TransportError::AcceptFailed(reason));
            }

            let id = ConnectionId::new(inner.next_connection);
            inner.next_connection += 1;
            inner.connections.insert(id, MockConnection::new());
            inner.accepted.push(id);
            (id, inner.inbound_during_accept.take())
        };

        if let Some(public_key) = interleaved {
            let _ = self.request_inbound(public_key);
        }
        Ok(id)
    }

    fn send_packet(&self, connection: ConnectionId, data: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        let open = inner
            .connections
            .get(&connection)
            .map(|c| c.open)
            .ok_or(TransportError::UnknownConnection(connection))?;
        if !open {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        if inner.failing_connections.contains(&connection) {
            return Err(TransportError::SendFailed("send buffer full".into()));
        }

        inner.sent.push((connection, data.to_vec()));
        let echo = inner.echo_keepalives && data == encode_keepalive().as_slice();
        drop(inner);

        if echo {
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let _ = self.deliver_packet(connection, data);
                });
            });
        }
        Ok(data.len())
    }

    fn close_connection(&self, connection: ConnectionId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closed.push(connection);
        match inner.connections.get_mut(&connection) {
            Some(conn) if conn.open => {
                conn.open = false;
                Ok(())
            }
            Some(_) => Err(TransportError::ConnectionClosed),
            None => Err(TransportError::UnknownConnection(connection)),
        }
    }

    fn on_status_change(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError> {
        self.register(connection, Channel::Status, handler, key)
    }

    fn on_data_packet(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError> {
        self.register(connection, Channel::Data, handler, key)
    }

    fn on_lossy_packet(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError> {
        self.register(connection, Channel::Lossy, handler, key)
    }

    fn on_inbound_request(&self, handler: Weak<dyn InboundHandler>) {
        let mut inner = self.inner.lock().unwrap();
        inner.inbound = Some(handler);
    }
}
