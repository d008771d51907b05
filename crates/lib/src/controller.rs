//! Chat session: state, persistence and the single outstanding completion request.
//!
//! `send_message` appends the user message and persists synchronously, then runs
//! the completion on a spawned Tokio task. Only the request that is still
//! "current" when it resolves may touch the state; superseded, cleared and
//! torn-down requests are discarded. Must be used from within a Tokio runtime.

use crate::completion::{
    CompletionClient, CompletionError, CompletionMessage, DEFAULT_FALLBACK_ERROR,
};
use crate::message::MessageId;
use crate::persistence::HistoryStore;
use crate::session::{SessionState, SessionView};
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a send does while another request is outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BusyPolicy {
    /// Ignore the new send.
    #[default]
    Reject,
    /// Cancel the outstanding request, withdraw its unanswered message, and send the new one.
    Supersede,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub busy_policy: BusyPolicy,
    /// Error text used when the service does not provide one.
    pub fallback_error: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::default(),
            fallback_error: DEFAULT_FALLBACK_ERROR.to_string(),
        }
    }
}

/// Identity of one completion request within a session.
pub type RequestId = u64;

/// How a request ended, from the session's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Reply appended.
    Answered,
    /// User message rolled back; carries the error shown to the user.
    Failed(String),
    /// Superseded, cleared, or torn down; state was not touched by this request.
    Discarded,
}

/// Handle to a spawned completion. Dropping it does not cancel the request.
pub struct PendingReply {
    request: RequestId,
    handle: JoinHandle<ReplyOutcome>,
    /// Set when the task ended without returning (panic or abort).
    abandoned: Arc<OnceLock<ReplyOutcome>>,
}

impl PendingReply {
    pub fn request_id(&self) -> RequestId {
        self.request
    }

    /// Wait for the request to resolve and be applied (or discarded).
    pub async fn outcome(self) -> ReplyOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("chat: completion task {} ended abnormally: {}", self.request, e);
                self.abandoned
                    .get()
                    .cloned()
                    .unwrap_or(ReplyOutcome::Discarded)
            }
        }
    }
}

struct InFlight {
    id: RequestId,
    user_message: MessageId,
    cancel: CancellationToken,
}

struct Shared<S> {
    state: SessionState,
    history: HistoryStore<S>,
    current: Option<InFlight>,
    next_request: RequestId,
    torn_down: bool,
    updates: watch::Sender<SessionView>,
}

impl<S: KeyValueStore> Shared<S> {
    fn persist(&self) {
        self.history.save(self.state.messages());
    }

    fn publish(&self) {
        self.updates.send_replace(self.state.view());
    }
}

/// Rolls the request back if the completion task unwinds or is aborted
/// before it can apply its own result.
struct FinishGuard<S: KeyValueStore> {
    shared: Arc<Mutex<Shared<S>>>,
    id: RequestId,
    fallback: String,
    abandoned: Arc<OnceLock<ReplyOutcome>>,
    done: bool,
}

impl<S: KeyValueStore> Drop for FinishGuard<S> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let outcome = finish(
            &self.shared,
            self.id,
            Err(CompletionError::Transport(
                "completion task ended abnormally".to_string(),
            )),
            &self.fallback,
        );
        let _ = self.abandoned.set(outcome);
    }
}

fn lock<S>(shared: &Mutex<Shared<S>>) -> MutexGuard<'_, Shared<S>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One widget's conversation. Tearing down (or dropping) it cancels any request in flight.
///
/// History writes run synchronously under the session lock, on whichever
/// thread applies the mutation (a Tokio worker for replies). A slow
/// `KeyValueStore` such as `FileStore`, which fsyncs, blocks that worker
/// for the duration of the write.
pub struct ChatSession<C, S>
where
    C: CompletionClient + 'static,
    S: KeyValueStore + 'static,
{
    shared: Arc<Mutex<Shared<S>>>,
    client: Arc<C>,
    options: SessionOptions,
}

impl<C, S> ChatSession<C, S>
where
    C: CompletionClient + 'static,
    S: KeyValueStore + 'static,
{
    /// Create the session and rehydrate the log from `history` before any send.
    pub fn mount(client: C, history: HistoryStore<S>, options: SessionOptions) -> Self {
        let messages = history.load();
        log::info!(
            "chat: mounted session with {} persisted message(s) from {}",
            messages.len(),
            history.key()
        );
        let state = SessionState::with_messages(messages);
        let (updates, _) = watch::channel(state.view());
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state,
                history,
                current: None,
                next_request: 1,
                torn_down: false,
                updates,
            })),
            client: Arc::new(client),
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Current snapshot of messages, loading, visibility and error.
    pub fn view(&self) -> SessionView {
        lock(&self.shared).state.view()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        lock(&self.shared).updates.subscribe()
    }

    pub fn is_torn_down(&self) -> bool {
        lock(&self.shared).torn_down
    }

    /// Send `text` to the assistant. Returns None when the send is rejected
    /// (blank text, busy under `BusyPolicy::Reject`, or torn down); the state is
    /// then unchanged. On acceptance the user message is already in the log.
    pub fn send_message(&self, text: &str) -> Option<PendingReply> {
        let mut g = lock(&self.shared);
        if g.torn_down || text.trim().is_empty() {
            return None;
        }
        if g.current.is_some() && self.options.busy_policy == BusyPolicy::Reject {
            return None;
        }
        if let Some(prev) = g.current.take() {
            prev.cancel.cancel();
            g.state.withdraw_pending(&prev.user_message);
            log::debug!("chat: request {} superseded", prev.id);
        }

        let user_message = g.state.append_user_message(text)?;
        let id = g.next_request;
        g.next_request += 1;
        let cancel = CancellationToken::new();
        g.current = Some(InFlight {
            id,
            user_message,
            cancel: cancel.clone(),
        });
        let payload: Vec<CompletionMessage> =
            g.state.messages().iter().map(CompletionMessage::from).collect();
        g.persist();
        g.publish();
        drop(g);

        log::debug!("chat: request {} started with {} message(s)", id, payload.len());
        let shared = Arc::clone(&self.shared);
        let client = Arc::clone(&self.client);
        let abandoned = Arc::new(OnceLock::new());
        let mut guard = FinishGuard {
            shared,
            id,
            fallback: self.options.fallback_error.clone(),
            abandoned: Arc::clone(&abandoned),
            done: false,
        };
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CompletionError::Cancelled),
                r = client.complete(&payload) => r,
            };
            let result = result.and_then(|reply| {
                if reply.trim().is_empty() {
                    Err(CompletionError::EmptyReply)
                } else {
                    Ok(reply)
                }
            });
            guard.done = true;
            finish(&guard.shared, guard.id, result, &guard.fallback)
        });

        Some(PendingReply {
            request: id,
            handle,
            abandoned,
        })
    }

    /// Empty the log and erase the persisted record. Cancels a request in flight.
    pub fn clear_chat(&self) {
        let mut g = lock(&self.shared);
        if g.torn_down {
            return;
        }
        if let Some(prev) = g.current.take() {
            prev.cancel.cancel();
            log::debug!("chat: request {} cancelled by clear", prev.id);
        }
        g.state.clear();
        g.history.erase();
        g.publish();
    }

    pub fn toggle_chat(&self) {
        self.update(SessionState::toggle_open);
    }

    pub fn close_chat(&self) {
        self.update(SessionState::close);
    }

    pub fn clear_error(&self) {
        self.update(SessionState::clear_error);
    }

    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        let mut g = lock(&self.shared);
        if g.torn_down {
            return;
        }
        f(&mut g.state);
        g.publish();
    }

    /// End the session: cancel the request in flight and refuse further mutation.
    /// An unanswered user message is withdrawn from the persisted log.
    pub fn teardown(&self) {
        let mut g = lock(&self.shared);
        if g.torn_down {
            return;
        }
        if let Some(prev) = g.current.take() {
            prev.cancel.cancel();
            if g.state.withdraw_pending(&prev.user_message) {
                g.persist();
            }
            log::debug!("chat: request {} cancelled by teardown", prev.id);
        }
        g.torn_down = true;
        log::info!("chat: session torn down");
    }
}

impl<C, S> Drop for ChatSession<C, S>
where
    C: CompletionClient + 'static,
    S: KeyValueStore + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Apply a resolved request if it is still current.
fn finish<S: KeyValueStore>(
    shared: &Mutex<Shared<S>>,
    id: RequestId,
    result: Result<String, CompletionError>,
    fallback: &str,
) -> ReplyOutcome {
    let mut g = lock(shared);
    if g.torn_down {
        return ReplyOutcome::Discarded;
    }
    let inflight = match g.current.take() {
        Some(c) if c.id == id => c,
        other => {
            g.current = other;
            log::debug!("chat: ignoring stale result for request {}", id);
            return ReplyOutcome::Discarded;
        }
    };

    let outcome = match result {
        Ok(reply) => {
            g.state.append_assistant_message(reply);
            ReplyOutcome::Answered
        }
        Err(CompletionError::Cancelled) => {
            g.state.withdraw_pending(&inflight.user_message);
            ReplyOutcome::Discarded
        }
        Err(e) => {
            let text = e.user_message(fallback);
            log::warn!("chat: request {} failed: {}", id, e);
            g.state.rollback_last_message(text.clone());
            ReplyOutcome::Failed(text)
        }
    };
    g.persist();
    g.publish();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::DEFAULT_STORAGE_KEY;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    struct NeverClient;

    #[async_trait]
    impl CompletionClient for NeverClient {
        async fn complete(&self, _m: &[CompletionMessage]) -> Result<String, CompletionError> {
            std::future::pending().await
        }
    }

    fn session() -> ChatSession<NeverClient, Arc<MemoryStore>> {
        let history = HistoryStore::new(Arc::new(MemoryStore::new()), DEFAULT_STORAGE_KEY);
        ChatSession::mount(NeverClient, history, SessionOptions::default())
    }

    #[tokio::test]
    async fn stale_result_is_ignored_by_identity() {
        let s = session();
        let first = s.send_message("first").unwrap();
        let before = s.view();

        let out = finish(&s.shared, first.request_id() + 1, Ok("stray".into()), "fb");
        assert_eq!(out, ReplyOutcome::Discarded);
        assert_eq!(s.view(), before);

        let out = finish(&s.shared, first.request_id(), Ok("reply".into()), "fb");
        assert_eq!(out, ReplyOutcome::Answered);
        let out = finish(&s.shared, first.request_id(), Ok("again".into()), "fb");
        assert_eq!(out, ReplyOutcome::Discarded);
        assert_eq!(s.view().messages.len(), 2);
    }

    #[tokio::test]
    async fn late_result_after_teardown_does_not_mutate() {
        let s = session();
        let pending = s.send_message("halo").unwrap();
        s.teardown();
        let after = s.view();
        let out = finish(&s.shared, pending.request_id(), Ok("late".into()), "fb");
        assert_eq!(out, ReplyOutcome::Discarded);
        assert_eq!(s.view(), after);
        assert!(after.messages.is_empty());
    }

    #[tokio::test]
    async fn actions_after_teardown_are_ignored() {
        let s = session();
        s.teardown();
        assert!(s.is_torn_down());
        assert!(s.send_message("halo").is_none());
        s.toggle_chat();
        assert!(!s.view().is_open);
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let history = HistoryStore::new(Arc::new(MemoryStore::new()), DEFAULT_STORAGE_KEY);
        let s = ChatSession::mount(
            NeverClient,
            history,
            SessionOptions {
                busy_policy: BusyPolicy::Supersede,
                ..SessionOptions::default()
            },
        );
        let a = s.send_message("a").unwrap();
        let b = s.send_message("b").unwrap();
        assert!(b.request_id() > a.request_id());
        assert_eq!(a.outcome().await, ReplyOutcome::Discarded);
    }
}
