//! Chat turn orchestration.
//!
//! A turn runs Router → Retrieval → Context Assembler → Generation
//! Streamer in that order, inside a spawned task so the answer is persisted
//! even when the client goes away mid-stream. Turns for the same session
//! are serialized by a per-session lock; different sessions run in
//! parallel.
//!
//! The client sees a [`ChatTurn`]: a stream of [`ChatEvent`]s over a
//! bounded channel, opened by the evidence the answer is grounded on.
//! Dropping it cancels the turn. After a cancellation the turn yields
//! nothing more, and exactly the fragments the client received are stored
//! as the assistant turn. After a mid-stream failure everything generated
//! so far is stored.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

use rca_harness_core::context::{assemble, AssemblyOptions};
use rca_harness_core::conversation::ConversationStore;
use rca_harness_core::intent::{IntentDecision, IntentLabel};
use rca_harness_core::models::{ConversationTurn, EvidenceRef};
use rca_harness_core::summary::ReportSummary;

use crate::config::ContextConfig;
use crate::generation::GenerationStreamer;
use crate::prompts::{instructions_for, INCOMPLETE_NOTICE, NO_EVIDENCE_NOTICE};
use crate::retrieval::RetrievalEngine;
use crate::router::IntentRouter;

const EVENT_BUFFER: usize = 32;

/// What the client receives during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Reports the answer is grounded on. Always the first event of a
    /// turn that reaches generation.
    Evidence(Vec<EvidenceRef>),
    /// A generated fragment, in order.
    Fragment(String),
    /// The answer could not be completed. Always the last event.
    Incomplete { notice: &'static str },
}

impl ChatEvent {
    /// Text to write to a plain-text response body. Evidence has none.
    pub fn into_text(self) -> String {
        match self {
            ChatEvent::Evidence(_) => String::new(),
            ChatEvent::Fragment(text) => text,
            ChatEvent::Incomplete { notice } => format!("\n\n{}", notice),
        }
    }
}

/// Non-streamed result of a turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub complete: bool,
    pub evidence: Vec<EvidenceRef>,
}

/// Bytes of fragment text handed to the client so far. Locked while a
/// fragment is received so a cancellation never lands between receiving
/// and counting it.
type Delivered = Arc<StdMutex<usize>>;

/// Live events of one turn. Dropping it cancels the turn.
pub struct ChatTurn {
    rx: mpsc::Receiver<ChatEvent>,
    cancel: CancellationToken,
    delivered: Delivered,
    _cancel_on_drop: DropGuard,
}

impl ChatTurn {
    /// Drain the turn into a single reply.
    pub async fn collect_reply(mut self) -> ChatReply {
        let mut response = String::new();
        let mut complete = true;
        let mut evidence = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                ChatEvent::Evidence(refs) => evidence = refs,
                ChatEvent::Fragment(text) => response.push_str(&text),
                ChatEvent::Incomplete { .. } => complete = false,
            }
        }
        ChatReply {
            response,
            complete,
            evidence,
        }
    }
}

impl Stream for ChatTurn {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatEvent>> {
        let this = &mut *self;
        let mut delivered = this
            .delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        let polled = this.rx.poll_recv(cx);
        if let Poll::Ready(Some(ChatEvent::Fragment(text))) = &polled {
            *delivered += text.len();
        }
        polled
    }
}

pub struct ChatService {
    conversations: Arc<dyn ConversationStore>,
    router: IntentRouter,
    retrieval: Arc<RetrievalEngine>,
    streamer: GenerationStreamer,
    context: ContextConfig,
    session_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        router: IntentRouter,
        retrieval: Arc<RetrievalEngine>,
        streamer: GenerationStreamer,
        context: ContextConfig,
    ) -> Self {
        Self {
            conversations,
            router,
            retrieval,
            streamer,
            context,
            session_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Start a turn. `cancel` is also set when the returned [`ChatTurn`]
    /// is dropped.
    pub fn start_turn(
        self: &Arc<Self>,
        session_id: &str,
        message: &str,
        cancel: CancellationToken,
    ) -> ChatTurn {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = Arc::clone(self);
        let session_id = session_id.to_string();
        let message = message.to_string();
        let delivered = Delivered::default();
        let turn = ChatTurn {
            rx,
            cancel: cancel.clone(),
            delivered: delivered.clone(),
            _cancel_on_drop: cancel.clone().drop_guard(),
        };
        tokio::spawn(async move {
            service
                .run_turn(&session_id, &message, cancel, tx, delivered)
                .await;
            service.release_lock(&session_id);
        });
        turn
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Drop the session's lock entry once no turn holds or awaits it.
    fn release_lock(&self, session_id: &str) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(lock) = locks.get(session_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(session_id);
            }
        }
    }

    #[tracing::instrument(skip_all, fields(session_id = %session_id))]
    async fn run_turn(
        &self,
        session_id: &str,
        message: &str,
        cancel: CancellationToken,
        tx: mpsc::Sender<ChatEvent>,
        delivered: Delivered,
    ) {
        let lock = self.session_lock(session_id);
        let _held = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            held = lock.lock_owned() => held,
        };

        let history = match self.conversations.get_history(session_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "loading history failed");
                let _ = tx.send(incomplete()).await;
                return;
            }
        };
        if let Err(e) = self
            .conversations
            .append_turn(session_id, &ConversationTurn::user(message))
            .await
        {
            tracing::error!(error = %format!("{:#}", e), "storing user turn failed");
            let _ = tx.send(incomplete()).await;
            return;
        }

        let decision = self.router.classify(message, &history).await;
        let evidence = self.retrieval.for_intent(decision.label, message).await;
        tracing::info!(
            intent = decision.label.as_str(),
            confidence = decision.confidence,
            hits = evidence.len(),
            "turn routed"
        );
        let summaries = match decision.label {
            IntentLabel::SpecialistIncident => self.retrieval.summaries_for(&evidence).await,
            IntentLabel::GeneralQa => BTreeMap::new(),
        };
        if cancel.is_cancelled() {
            return;
        }

        let prompt = assemble(
            &history,
            &evidence,
            message,
            self.context.max_tokens,
            &assembly_options(&decision, self.context.max_history_turns, &summaries),
        );
        let grounded_on: Vec<EvidenceRef> = prompt.evidence.clone();
        if tx.send(ChatEvent::Evidence(grounded_on.clone())).await.is_err() {
            return;
        }

        let mut tokens = self.streamer.generate(prompt, &cancel);
        let mut answer = String::new();
        let mut failed = false;
        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => {
                    let text = token.into_string();
                    // A cancelled client may hold the turn without polling it.
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        sent = tx.send(ChatEvent::Fragment(text.clone())) => sent.is_ok(),
                    };
                    if !sent {
                        cancel.cancel();
                        break;
                    }
                    answer.push_str(&text);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        produced = answer.len(),
                        "generation did not complete"
                    );
                    failed = true;
                    break;
                }
            }
        }
        drop(tokens);

        if cancel.is_cancelled() {
            let received = *delivered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tracing::info!(produced = answer.len(), received, "turn cancelled");
            answer.truncate(received.min(answer.len()));
        }
        if failed {
            let _ = tx.send(incomplete()).await;
        }
        if answer.is_empty() {
            return;
        }

        let mut turn = ConversationTurn::assistant(answer);
        turn.evidence = grounded_on;
        if let Err(e) = self.conversations.append_turn(session_id, &turn).await {
            tracing::error!(error = %format!("{:#}", e), "storing assistant turn failed");
        }
    }
}

fn incomplete() -> ChatEvent {
    ChatEvent::Incomplete {
        notice: INCOMPLETE_NOTICE,
    }
}

fn assembly_options<'a>(
    decision: &IntentDecision,
    max_history_turns: usize,
    summaries: &'a BTreeMap<String, ReportSummary>,
) -> AssemblyOptions<'a> {
    AssemblyOptions {
        system_instructions: instructions_for(decision.label),
        max_history_turns,
        no_evidence_notice: (decision.label == IntentLabel::SpecialistIncident)
            .then_some(NO_EVIDENCE_NOTICE),
        summaries: (!summaries.is_empty()).then_some(summaries),
    }
}
