//! Per-conversation session state.
//!
//! A [`Session`] is the single point of contact between the conversation
//! loop, the voice connection and the web chat surface: an append-only turn
//! history, a bounded response queue, and three latching flags. Each field
//! has exactly one writer; the store lock only guards create/lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, OwnedMutexGuard, mpsc};
use tracing::{debug, info};

/// Capacity of the per-session response queue.
const RESPONSE_QUEUE_SIZE: usize = 64;

/// Exclusive claim on a session's response queue consumer end.
///
/// Dereferences to the underlying receiver; dropping the guard releases
/// the queue so the next turn (or the next chat request on the same
/// session) can claim it.
pub type ResponseReceiver = OwnedMutexGuard<mpsc::Receiver<ResponseChunk>>;

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// End-user input (typed or transcribed).
    User,
    /// Model output.
    Assistant,
    /// Wrapped tool result reinjected into the conversation.
    Tool,
}

impl Role {
    /// Name used when rendering the turn into a prompt.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One immutable entry in the conversation history.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Who produced the content.
    pub role: Role,
    /// The turn text (for tool turns, the wrapped result envelope).
    pub content: String,
}

/// A chunk leaving the conversation loop toward TTS or the chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseChunk {
    /// Prose text in emission order.
    Text(String),
    /// Terminal sentinel: the turn is complete. Sent exactly once per input.
    Done,
}

/// A latching, resettable event.
///
/// `set` latches until `clear`; waiters are woken on set. Used for the
/// per-session `finished` flag where a waiter may arrive before or after
/// the set.
#[derive(Debug, Default)]
pub struct Latch {
    set: AtomicBool,
    notify: Notify,
}

impl Latch {
    /// Latch the event and wake all waiters.
    pub fn set(&self) {
        self.set.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Reset the event.
    pub fn clear(&self) {
        self.set.store(false, Ordering::Release);
    }

    /// Whether the event is currently latched.
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Wait until the event is latched.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// State shared across one conversation.
pub struct Session {
    /// Opaque session identifier.
    pub id: String,
    history: Mutex<Vec<Turn>>,
    response_tx: mpsc::Sender<ResponseChunk>,
    response_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ResponseChunk>>>,
    /// Latched when `process_input` returns.
    pub finished: Latch,
    close_voice: AtomicBool,
    cancel: AtomicBool,
}

impl Session {
    fn new(id: String) -> Self {
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_QUEUE_SIZE);
        Self {
            id,
            history: Mutex::new(Vec::new()),
            response_tx,
            response_rx: Arc::new(tokio::sync::Mutex::new(response_rx)),
            finished: Latch::default(),
            close_voice: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    /// Append a turn to the history. Turns are never reordered or edited.
    pub fn push_turn(&self, role: Role, content: impl Into<String>) {
        let mut history = self.history.lock().expect("history lock");
        history.push(Turn {
            role,
            content: content.into(),
        });
    }

    /// Snapshot of the history in insertion order.
    pub fn history(&self) -> Vec<Turn> {
        self.history.lock().expect("history lock").clone()
    }

    /// Enqueue a prose chunk for the consumer, blocking if the queue is full.
    ///
    /// Send failures mean the consumer is gone; the chunk is dropped.
    pub async fn send_chunk(&self, text: String) {
        if text.is_empty() {
            return;
        }
        if self.response_tx.send(ResponseChunk::Text(text)).await.is_err() {
            debug!(session = %self.id, "response queue consumer gone; dropping chunk");
        }
    }

    /// Enqueue the terminal sentinel.
    pub async fn send_done(&self) {
        let _ = self.response_tx.send(ResponseChunk::Done).await;
    }

    /// Claim the single consumer end of the response queue.
    ///
    /// Returns `None` while another consumer holds the claim, which also
    /// flags a second conversation loop racing onto the session.
    pub fn claim_response_receiver(&self) -> Option<ResponseReceiver> {
        Arc::clone(&self.response_rx).try_lock_owned().ok()
    }

    /// Request that the voice channel close after the current turn.
    pub fn request_close_voice(&self) {
        self.close_voice.store(true, Ordering::Release);
    }

    /// Clear the close request (start of a voice input).
    pub fn clear_close_voice(&self) {
        self.close_voice.store(false, Ordering::Release);
    }

    /// Whether a tool requested channel close.
    pub fn close_voice_requested(&self) -> bool {
        self.close_voice.load(Ordering::Acquire)
    }

    /// Latch the barge-in flag. Observed between TTS chunks and between
    /// streamed prose chunks.
    pub fn cancel_response(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Clear the barge-in flag (first speech of the next utterance).
    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::Release);
    }

    /// Whether the in-flight response has been cancelled.
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Thread-safe map from session id to session.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with the given id, replacing any existing one.
    pub fn create(&self, id: &str) -> Arc<Session> {
        info!(session = id, "creating session");
        let session = Arc::new(Session::new(id.to_owned()));
        self.sessions
            .lock()
            .expect("session map lock")
            .insert(id.to_owned(), Arc::clone(&session));
        session
    }

    /// Look up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().expect("session map lock").get(id).cloned()
    }

    /// Look up or create a session.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.get(id) {
            return session;
        }
        self.create(id)
    }

    /// Drop a session. Outstanding `Arc`s keep it alive until released.
    pub fn remove(&self, id: &str) {
        if self.sessions.lock().expect("session map lock").remove(id).is_some() {
            info!(session = id, "destroyed session");
        }
    }

    /// Set the cancel flag on a session's active response, if it exists.
    pub fn cancel_active_response(&self, id: &str) {
        if let Some(session) = self.get(id) {
            session.cancel_response();
        }
    }
}
