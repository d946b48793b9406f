//! In-memory [`Transport`] that records everything the core sends.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::handle::{CallId, ClientId, Handle, SessionId};
use crate::session::{Event, Reply, ReplyValue, Transport};

/// One message sent by the core, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Reply(SessionId, CallId, Reply),
    Event(SessionId, Event),
}

/// Transport double with explicit session-to-client bindings.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    bindings: RefCell<BTreeMap<SessionId, ClientId>>,
    sent: RefCell<Vec<Outbound>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `session` to the named client.
    pub fn bind(&self, session: SessionId, client: &str) {
        self.bindings
            .borrow_mut()
            .insert(session, ClientId::new(client));
    }

    /// Everything sent so far.
    pub fn outbound(&self) -> Vec<Outbound> {
        self.sent.borrow().clone()
    }

    /// Replies in emission order as `(session, call, reply)`.
    pub fn replies(&self) -> Vec<(SessionId, CallId, Reply)> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|message| match message {
                Outbound::Reply(session, call, reply) => Some((*session, *call, reply.clone())),
                Outbound::Event(..) => None,
            })
            .collect()
    }

    /// Events sent to `session`.
    pub fn events_for(&self, session: SessionId) -> Vec<Event> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|message| match message {
                Outbound::Event(target, event) if *target == session => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// The reply to `(session, call)`, if one was sent.
    pub fn reply_for(&self, session: SessionId, call: CallId) -> Option<Reply> {
        self.replies()
            .into_iter()
            .find(|(target, id, _)| *target == session && *id == call)
            .map(|(_, _, reply)| reply)
    }

    /// Number of replies sent for `(session, call)`.
    pub fn reply_count(&self, session: SessionId, call: CallId) -> usize {
        self.replies()
            .iter()
            .filter(|(target, id, _)| *target == session && *id == call)
            .count()
    }

    /// The handle returned to an `open` call; panics otherwise.
    pub fn handle_for(&self, session: SessionId, call: CallId) -> Handle {
        match self.reply_for(session, call) {
            Some(Reply::Ok(ReplyValue::Handle(handle))) => handle,
            other => panic!("expected a handle for {session} {call}, got {other:?}"),
        }
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.sent.borrow_mut().clear();
    }
}

impl Transport for RecordingTransport {
    fn resolve_client_id(&self, session: SessionId) -> ClientId {
        self.bindings
            .borrow()
            .get(&session)
            .cloned()
            .unwrap_or_else(|| ClientId::new(session.to_string()))
    }

    fn reply(&self, session: SessionId, call: CallId, reply: Reply) {
        self.sent
            .borrow_mut()
            .push(Outbound::Reply(session, call, reply));
    }

    fn send_event(&self, session: SessionId, event: Event) {
        self.sent.borrow_mut().push(Outbound::Event(session, event));
    }

    fn sessions_of(&self, client: &ClientId) -> Vec<SessionId> {
        self.bindings
            .borrow()
            .iter()
            .filter(|(_, bound)| *bound == client)
            .map(|(session, _)| *session)
            .collect()
    }
}
