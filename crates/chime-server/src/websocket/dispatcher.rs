//! Inbound envelope routing.
//!
//! Control frames (`stop`, `heartbeat`) are answered before the inbound
//! loop reads the next frame. Domain frames (`get_welcome`, `get_history`,
//! `user_message`) run on a per-connection [`SerialLane`] so they execute one
//! at a time in arrival order without blocking the reader.

use std::future::Future;
use std::sync::Arc;

use chime_core::{
    ConversationId, Envelope, ErrorCode, HistoryStore, MessageKind, NewHistoryEntry, Role,
    Synthesizer,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use crate::relay::{TurnRelay, UserTurn, send_error};

/// How an inbound kind is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Cancel the in-flight turn and acknowledge.
    Stop,
    /// Acknowledge a keepalive.
    Heartbeat,
    /// Greet the client.
    Welcome,
    /// Answer a user utterance.
    UserMessage,
    /// Send the conversation history.
    History,
    /// Log and ignore.
    Unknown,
}

impl Route {
    /// Whether the frame is answered inline by the inbound loop.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Stop | Self::Heartbeat)
    }
}

/// Classify an envelope kind. Outbound-only kinds sent by a client are
/// [`Route::Unknown`].
pub fn classify(kind: &MessageKind) -> Route {
    match kind {
        MessageKind::Stop => Route::Stop,
        MessageKind::Heartbeat => Route::Heartbeat,
        MessageKind::GetWelcome => Route::Welcome,
        MessageKind::UserMessage => Route::UserMessage,
        MessageKind::GetHistory => Route::History,
        _ => Route::Unknown,
    }
}

/// Chains spawned tasks so each starts only after the previous one ends.
#[derive(Default)]
pub struct SerialLane {
    tail: Option<oneshot::Receiver<()>>,
}

impl SerialLane {
    /// An empty lane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` behind everything already on the lane.
    pub fn spawn<F>(&mut self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let previous = self.tail.take();
        let (done_tx, done_rx) = oneshot::channel();
        self.tail = Some(done_rx);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err means the previous task panicked; the lane moves on.
                let _ = previous.await;
            }
            task.await;
            let _ = done_tx.send(());
        })
    }

    /// Wait until every task spawned so far has finished.
    pub async fn idle(&mut self) {
        if let Some(tail) = self.tail.take() {
            let _ = tail.await;
        }
    }
}

/// Routes decoded envelopes for a connection.
#[derive(Clone)]
pub struct Dispatcher {
    relay: Arc<TurnRelay>,
    welcome_message: Arc<str>,
}

impl Dispatcher {
    /// Dispatcher answering `get_welcome` with `welcome_message`.
    pub fn new(relay: Arc<TurnRelay>, welcome_message: impl Into<Arc<str>>) -> Self {
        Self {
            relay,
            welcome_message: welcome_message.into(),
        }
    }

    /// Route one envelope.
    pub async fn dispatch(
        &self,
        conn: &Arc<ClientConnection>,
        lane: &mut SerialLane,
        envelope: Envelope,
    ) {
        match classify(&envelope.kind) {
            Route::Stop => {
                conn.request_stop();
                debug!(conn_id = %conn.id, "stop requested");
                reply(conn, Envelope::stop_ack(envelope.session_id)).await;
            }
            Route::Heartbeat => {
                reply(conn, Envelope::heartbeat_ack(envelope.session_id)).await;
            }
            Route::UserMessage => {
                // Taken now so a later stop cancels this turn even while it waits on the lane.
                let cancel = conn.begin_turn();
                let conversation_id = envelope
                    .conversation_id()
                    .unwrap_or_else(|| ConversationId::from_raw(""));
                if !conversation_id.is_empty() {
                    conn.bind_conversation(conversation_id.clone());
                }
                let turn = UserTurn {
                    conversation_id,
                    actor_id: conn.id.to_string(),
                    text: envelope.content,
                };
                let relay = self.relay.clone();
                let conn = conn.clone();
                let _ = lane.spawn(async move { relay.run_turn(&conn, cancel, turn).await });
            }
            Route::Welcome => {
                let conversation = envelope
                    .conversation_id()
                    .unwrap_or_else(ConversationId::new);
                conn.bind_conversation(conversation.clone());
                let this = self.clone();
                let conn = conn.clone();
                let _ = lane.spawn(async move { this.handle_welcome(&conn, conversation).await });
            }
            Route::History => {
                let this = self.clone();
                let conn = conn.clone();
                let _ = lane.spawn(async move { this.handle_history(&conn, envelope).await });
            }
            Route::Unknown => {
                warn!(conn_id = %conn.id, kind = %envelope.kind, "ignoring unsupported message type");
            }
        }
    }

    /// Greet `conversation`: record the session and greeting, then send
    /// the greeting text with its audio.
    #[instrument(skip_all, fields(conn_id = %conn.id, session_id = %conversation))]
    pub async fn handle_welcome(&self, conn: &ClientConnection, conversation: ConversationId) {
        let store = self.relay.store();
        if let Err(e) = store.create_session(&conversation).await {
            warn!(error = %e, "failed to create conversation session");
        }
        if let Err(e) = store.touch_session(&conversation).await {
            warn!(error = %e, "failed to touch conversation session");
        }
        let entry = NewHistoryEntry::new(conversation.clone(), Role::System, &*self.welcome_message);
        if let Err(e) = store.append_history(entry).await {
            warn!(error = %e, "failed to persist welcome message");
        }

        match self.relay.synthesizer().synthesize(&self.welcome_message).await {
            Ok(audio) => {
                reply(conn, Envelope::welcome(&conversation, &*self.welcome_message, &audio)).await;
            }
            Err(e) => {
                warn!(error = %e, "welcome synthesis failed");
                send_error(conn, conversation.as_str(), ErrorCode::WelcomeError).await;
            }
        }
    }

    /// Send the stored history of the envelope's conversation.
    #[instrument(skip_all, fields(conn_id = %conn.id, session_id = %envelope.session_id))]
    pub async fn handle_history(&self, conn: &ClientConnection, envelope: Envelope) {
        let Some(conversation) = envelope.conversation_id() else {
            send_error(conn, "", ErrorCode::InvalidInput).await;
            return;
        };

        let entries = match self.relay.store().fetch_history(&conversation).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to load history");
                send_error(conn, conversation.as_str(), ErrorCode::HistoryError).await;
                return;
            }
        };
        match serde_json::to_string(&entries) {
            Ok(json) => {
                debug!(entries = entries.len(), "sending history");
                reply(conn, Envelope::history(&conversation, json)).await;
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize history");
                send_error(conn, conversation.as_str(), ErrorCode::HistoryError).await;
            }
        }
    }
}

async fn reply(conn: &ClientConnection, envelope: Envelope) {
    let kind = envelope.kind.clone();
    if conn.enqueue(envelope).await.is_err() {
        debug!(conn_id = %conn.id, %kind, "reply dropped, connection closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chime_core::{ConnectionId, HistoryEntry};
    use chime_llm::{MockGenerator, MockResponse};
    use chime_speech::{MockSpeech, MockSynthesizer};
    use chime_store::{Database, SqliteHistoryStore};
    use parking_lot::Mutex;
    use tokio::sync::{Notify, mpsc};

    use super::*;
    use crate::test_support::FailingStore;

    const WELCOME: &str = "Hello from Chime";

    struct Harness {
        dispatcher: Dispatcher,
        generator: Arc<MockGenerator>,
        store: Arc<SqliteHistoryStore>,
        conn: Arc<ClientConnection>,
        rx: mpsc::Receiver<Envelope>,
        lane: SerialLane,
    }

    fn harness_with(responses: Vec<MockResponse>, speech: Vec<MockSpeech>) -> Harness {
        let generator = Arc::new(MockGenerator::new(responses));
        let store = Arc::new(SqliteHistoryStore::new(Database::in_memory().unwrap()));
        let relay = Arc::new(TurnRelay::new(
            generator.clone(),
            Arc::new(MockSynthesizer::new(speech)),
            store.clone(),
        ));
        let (tx, rx) = mpsc::channel(256);
        Harness {
            dispatcher: Dispatcher::new(relay, WELCOME),
            generator,
            store,
            conn: Arc::new(ClientConnection::new(ConnectionId::from_raw("conn_1"), tx)),
            rx,
            lane: SerialLane::new(),
        }
    }

    fn harness() -> Harness {
        harness_with(vec![], vec![])
    }

    impl Harness {
        async fn send(&mut self, envelope: Envelope) {
            self.dispatcher
                .dispatch(&self.conn, &mut self.lane, envelope)
                .await;
        }

        async fn settle(&mut self) -> Vec<Envelope> {
            self.lane.idle().await;
            let mut out = Vec::new();
            while let Ok(env) = self.rx.try_recv() {
                out.push(env);
            }
            out
        }
    }

    fn frame(kind: MessageKind, session: &str, content: &str) -> Envelope {
        Envelope::new(kind, session).with_content(content)
    }

    #[test]
    fn classify_inbound_kinds() {
        assert_eq!(classify(&MessageKind::Stop), Route::Stop);
        assert_eq!(classify(&MessageKind::Heartbeat), Route::Heartbeat);
        assert_eq!(classify(&MessageKind::GetWelcome), Route::Welcome);
        assert_eq!(classify(&MessageKind::UserMessage), Route::UserMessage);
        assert_eq!(classify(&MessageKind::GetHistory), Route::History);
        assert!(Route::Stop.is_control());
        assert!(!Route::UserMessage.is_control());
    }

    #[test]
    fn classify_outbound_and_unknown_kinds_as_unknown() {
        for kind in [
            MessageKind::Welcome,
            MessageKind::AiTextChunk,
            MessageKind::AudioData,
            MessageKind::StopAck,
            MessageKind::Unknown("dance".into()),
        ] {
            assert_eq!(classify(&kind), Route::Unknown, "{kind}");
        }
    }

    #[tokio::test]
    async fn lane_runs_tasks_in_arrival_order() {
        let mut lane = SerialLane::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (i, delay) in [30_u64, 0, 10, 0].into_iter().enumerate() {
            let order = order.clone();
            let _ = lane.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                order.lock().push(i);
            });
        }
        lane.idle().await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn lane_survives_panicking_task() {
        let mut lane = SerialLane::new();
        let ran = Arc::new(Mutex::new(false));
        let _ = lane.spawn(async { panic!("boom") });
        let flag = ran.clone();
        let _ = lane.spawn(async move { *flag.lock() = true });
        lane.idle().await;
        assert!(*ran.lock());
    }

    #[tokio::test]
    async fn heartbeat_is_acknowledged_inline() {
        let mut h = harness();
        h.send(frame(MessageKind::Heartbeat, "s1", "")).await;
        let ack = h.rx.try_recv().unwrap();
        assert_eq!(ack.kind, MessageKind::HeartbeatAck);
        assert_eq!(ack.session_id, "s1");
    }

    #[tokio::test]
    async fn stop_is_acknowledged_inline_and_cancels() {
        let mut h = harness();
        let turn = h.conn.begin_turn();
        h.send(frame(MessageKind::Stop, "s1", "")).await;
        assert!(turn.is_cancelled());
        let ack = h.rx.try_recv().unwrap();
        assert_eq!(ack.kind, MessageKind::StopAck);
        assert_eq!(ack.session_id, "s1");
    }

    #[tokio::test]
    async fn stop_before_first_chunk_yields_only_stop_ack() {
        let gate = Arc::new(Notify::new());
        let mut h = harness_with(vec![MockResponse::gated(&[], gate.clone(), &["He", "llo!"])], vec![]);

        h.send(frame(MessageKind::UserMessage, "s1", "Hi")).await;
        h.send(frame(MessageKind::Stop, "s1", "")).await;
        gate.notify_one();

        let frames = h.settle().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::StopAck);
    }

    #[tokio::test]
    async fn turn_after_stop_runs_normally() {
        let mut h = harness_with(vec![MockResponse::chunks(&["ok"])], vec![]);
        h.send(frame(MessageKind::Stop, "s1", "")).await;
        h.send(frame(MessageKind::UserMessage, "s1", "Hi")).await;

        let kinds: Vec<_> = h.settle().await.into_iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::StopAck,
                MessageKind::AiTextChunk,
                MessageKind::AiTextComplete,
                MessageKind::AudioData,
            ]
        );
    }

    #[tokio::test]
    async fn user_message_binds_conversation() {
        let mut h = harness_with(vec![MockResponse::chunks(&["ok"])], vec![]);
        h.send(frame(MessageKind::UserMessage, "s9", "Hi")).await;
        assert_eq!(h.conn.conversation_id().unwrap().as_str(), "s9");
        let _ = h.settle().await;
        assert_eq!(h.generator.requests()[0].actor_id, "conn_1");
    }

    #[tokio::test]
    async fn user_message_without_session_is_invalid_input() {
        let mut h = harness();
        h.send(frame(MessageKind::UserMessage, "", "Hi")).await;
        let frames = h.settle().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].error_code.as_deref(), Some("INVALID_INPUT"));
        assert!(h.conn.conversation_id().is_none());
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn turns_run_one_at_a_time_in_order() {
        let mut h = harness_with(
            vec![MockResponse::chunks(&["first"]), MockResponse::chunks(&["second"])],
            vec![],
        );
        h.send(frame(MessageKind::UserMessage, "s1", "one")).await;
        h.send(frame(MessageKind::UserMessage, "s1", "two")).await;

        let chunks: Vec<_> = h
            .settle()
            .await
            .into_iter()
            .filter(|f| f.kind == MessageKind::AiTextChunk)
            .map(|f| f.content)
            .collect();
        assert_eq!(chunks, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn welcome_with_session_id() {
        let mut h = harness();
        h.send(frame(MessageKind::GetWelcome, "s1", "")).await;
        let frames = h.settle().await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::Welcome);
        assert_eq!(frames[0].session_id, "s1");
        assert_eq!(frames[0].content, WELCOME);
        assert!(frames[0].audio_base64.is_some());
        assert!(frames[0].duration.is_some());
        assert_eq!(h.conn.conversation_id().unwrap().as_str(), "s1");

        let history = h.store.fetch_history(&ConversationId::from_raw("s1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, WELCOME);
    }

    #[tokio::test]
    async fn welcome_without_session_id_generates_one() {
        let mut h = harness();
        h.send(frame(MessageKind::GetWelcome, "", "")).await;
        let frames = h.settle().await;

        let bound = h.conn.conversation_id().unwrap();
        assert!(bound.as_str().starts_with("conv_"));
        assert_eq!(frames[0].session_id, bound.as_str());
    }

    #[tokio::test]
    async fn welcome_synthesis_failure() {
        let mut h = harness_with(vec![], vec![MockSpeech::Fail("down".into())]);
        h.send(frame(MessageKind::GetWelcome, "s1", "")).await;
        let frames = h.settle().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::Error);
        assert_eq!(frames[0].error_code.as_deref(), Some("WELCOME_ERROR"));
    }

    #[tokio::test]
    async fn history_returns_entries_in_order() {
        let mut h = harness();
        let id = ConversationId::from_raw("s1");
        for (role, text) in [(Role::User, "Hi"), (Role::Assistant, "Hello!")] {
            h.store
                .append_history(NewHistoryEntry::new(id.clone(), role, text))
                .await
                .unwrap();
        }

        h.send(frame(MessageKind::GetHistory, "s1", "")).await;
        let frames = h.settle().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::HistoryData);
        let entries: Vec<HistoryEntry> = serde_json::from_str(&frames[0].content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "Hi");
        assert_eq!(entries[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn history_of_unknown_conversation_is_empty_array() {
        let mut h = harness();
        h.send(frame(MessageKind::GetHistory, "nobody", "")).await;
        let frames = h.settle().await;
        assert_eq!(frames[0].kind, MessageKind::HistoryData);
        assert_eq!(frames[0].content, "[]");
    }

    #[tokio::test]
    async fn history_without_session_is_invalid_input() {
        let mut h = harness();
        h.send(frame(MessageKind::GetHistory, "  ", "")).await;
        let frames = h.settle().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].error_code.as_deref(), Some("INVALID_INPUT"));
    }

    #[tokio::test]
    async fn history_storage_failure() {
        let relay = Arc::new(TurnRelay::new(
            Arc::new(MockGenerator::new(vec![])),
            Arc::new(MockSynthesizer::speaking()),
            Arc::new(FailingStore),
        ));
        let dispatcher = Dispatcher::new(relay, WELCOME);
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(ConnectionId::from_raw("conn_1"), tx));
        let mut lane = SerialLane::new();

        dispatcher
            .dispatch(&conn, &mut lane, frame(MessageKind::GetHistory, "s1", ""))
            .await;
        lane.idle().await;

        let err = rx.try_recv().unwrap();
        assert_eq!(err.kind, MessageKind::Error);
        assert_eq!(err.error_code.as_deref(), Some("HISTORY_ERROR"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn welcome_survives_storage_failure() {
        let relay = Arc::new(TurnRelay::new(
            Arc::new(MockGenerator::new(vec![])),
            Arc::new(MockSynthesizer::speaking()),
            Arc::new(FailingStore),
        ));
        let dispatcher = Dispatcher::new(relay, WELCOME);
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(ConnectionId::from_raw("conn_1"), tx));
        let mut lane = SerialLane::new();

        dispatcher
            .dispatch(&conn, &mut lane, frame(MessageKind::GetWelcome, "s1", ""))
            .await;
        lane.idle().await;
        assert_eq!(rx.try_recv().unwrap().kind, MessageKind::Welcome);
    }

    #[tokio::test]
    async fn unknown_kinds_are_ignored() {
        let mut h = harness();
        h.send(frame(MessageKind::Unknown("dance".into()), "s1", "")).await;
        h.send(frame(MessageKind::AudioData, "s1", "")).await;
        assert!(h.settle().await.is_empty());
        assert_eq!(h.generator.call_count(), 0);
    }
}
