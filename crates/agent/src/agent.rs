// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The per-room orchestrator: wires `Transcriber`s, `ActivationController`,
//! `ChatCompleter`, `Synthesizer` and `OutboundTrack` into one answer-turn
//! pipeline.
//!
//! Structured like `DynamicEngineHandle`'s actor pair
//! (`crates/engine/src/dynamic_handle.rs`): an [`AgentHandle`] (cloneable,
//! built around a `CancellationToken`) fronting a single `tokio::task`
//! that owns all mutable state, so callers never lock across an await
//! themselves. The shutdown contract is the same:
//! [`AgentHandle::shutdown_and_wait`] signals the task and joins it with
//! a timeout, distinguishing graceful exit, panic, and timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use kitt_core::{DataPacket, KittError, Language, MeetingEvent, RecognizeResult, Result, UiState};
use kitt_media::{OggPacketizer, OutboundTrack};
use kitt_providers::{ChatCompleter, SentenceChunk, SttClient, Synthesizer, Transcriber};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::activation::{ActivationController, Quorum, WatchdogArm};
use crate::memory::ConversationMemory;
use crate::room::{AgentEvent, RoomClient, TrackSource};

/// Identity the agent joins rooms with; participants carrying this
/// identity must be ignored by subscription logic.
pub const BOT_IDENTITY: &str = "KITT";

/// How long an empty-looking room is given before the agent decides no
/// one is coming back and disconnects itself.
const SELF_DESTRUCT_DELAY: Duration = Duration::from_secs(5);

/// Deadline `AgentHandle::shutdown_and_wait` gives the actor task to wind
/// down before reporting a timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything one `Agent` actor needs, shared read-only with its sibling
/// agents: global provider clients are process-scoped, agents
/// receive them by reference, never construct their own.
pub struct AgentConfig {
    pub token: String,
    pub language: Language,
    pub room: Arc<dyn RoomClient>,
    pub stt_client: Arc<dyn SttClient>,
    pub synthesizer: Arc<Synthesizer>,
    pub chat_completer: Arc<ChatCompleter>,
}

/// The mutable state the agent-level mutex guards: conversation
/// history, activation state, and a per-participant shutdown signal for
/// each live `Transcriber`. `is_busy` is deliberately not here — it's an
/// `AtomicBool`.
struct AgentInner {
    conversation: ConversationMemory,
    activation: ActivationController,
    transcribers: HashMap<String, oneshot::Sender<()>>,
}

impl AgentInner {
    fn new() -> Self {
        Self { conversation: ConversationMemory::new(), activation: ActivationController::new(), transcribers: HashMap::new() }
    }
}

/// A handle to a running per-room agent actor.
#[derive(Clone)]
pub struct AgentHandle {
    cancellation: CancellationToken,
    task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl AgentHandle {
    /// Spawns the actor task, which connects to the room itself. A slow
    /// or failing connect therefore never blocks the caller — this
    /// mirrors the Supervisor's "connecting" sentinel, which covers
    /// exactly this window (module 11).
    ///
    /// The returned receiver fires once the actor loop exits for any
    /// reason — self-destruct, a fatal room error, or an explicit
    /// [`AgentHandle::shutdown_and_wait`] — so a Supervisor can drop its
    /// slot for the room without polling.
    #[must_use]
    pub fn spawn(config: AgentConfig) -> (Self, oneshot::Receiver<()>) {
        let cancellation = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        let task = tokio::spawn(run(Arc::new(config), cancellation.clone(), exit_tx));
        (Self { cancellation, task: Arc::new(tokio::sync::Mutex::new(Some(task))) }, exit_rx)
    }

    /// Signals the actor to stop and waits for it to finish, with a
    /// timeout. Safe to call more than once; later calls are a no-op.
    pub async fn shutdown_and_wait(&self) -> Result<()> {
        self.cancellation.cancel();

        let join_handle = {
            let mut guard = self.task.lock().await;
            guard.take()
        };

        let Some(handle) = join_handle else {
            tracing::debug!("shutdown_and_wait called again; agent already shut down");
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(KittError::Runtime(format!("agent task panicked: {e}"))),
            Err(_) => Err(KittError::Runtime("agent did not shut down within the timeout".to_string())),
        }
    }
}

async fn run(config: Arc<AgentConfig>, cancellation: CancellationToken, exit_tx: oneshot::Sender<()>) {
    if let Err(e) = run_inner(&config, &cancellation).await {
        if !e.is_cancellation() {
            tracing::error!(error = %e, "agent terminated with an error");
        }
    }
    let _ = exit_tx.send(());
}

async fn run_inner(config: &Arc<AgentConfig>, cancellation: &CancellationToken) -> Result<()> {
    config.room.connect(&config.token).await?;

    let outbound = Arc::new(OutboundTrack::new());
    config.room.publish_local_track(outbound.clone()).await?;

    let mut events_rx = config.room.events();
    let (results_tx, mut results_rx) = mpsc::channel::<RecognizeResult>(128);

    let inner = Arc::new(Mutex::new(AgentInner::new()));
    let is_busy = Arc::new(AtomicBool::new(false));

    let self_destruct = tokio::time::sleep(SELF_DESTRUCT_DELAY);
    tokio::pin!(self_destruct);
    let mut self_destruct_armed = true;

    loop {
        tokio::select! {
            () = cancellation.cancelled() => break,
            () = &mut self_destruct, if self_destruct_armed => {
                self_destruct_armed = false;
                if config.room.human_count() == 0 {
                    tracing::info!("room empty at self-destruct guard, disconnecting");
                    config.room.disconnect().await;
                    break;
                }
            }
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                if handle_room_event(config, &inner, &results_tx, event).await {
                    break;
                }
            }
            result = results_rx.recv() => {
                let Some(result) = result else { continue };
                handle_result(config, &inner, &is_busy, &outbound, result, cancellation).await;
            }
        }
    }

    let transcribers = {
        let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut guard.transcribers)
    };
    for (_, stop_tx) in transcribers {
        let _ = stop_tx.send(());
    }

    Ok(())
}

/// Handles one room lifecycle notification. Returns `true` if the agent
/// should stop running.
async fn handle_room_event(
    config: &Arc<AgentConfig>,
    inner: &Arc<Mutex<AgentInner>>,
    results_tx: &mpsc::Sender<RecognizeResult>,
    event: AgentEvent,
) -> bool {
    match event {
        AgentEvent::ParticipantConnected { name, .. } => {
            inner.lock().unwrap_or_else(PoisonError::into_inner).conversation.push(MeetingEvent::presence(name, true));
            false
        }
        AgentEvent::TrackPublished { participant_id, track_id, source } => {
            if source == TrackSource::Microphone && participant_id != BOT_IDENTITY {
                if let Err(e) = config.room.subscribe(&participant_id, &track_id).await {
                    tracing::warn!(error = %e, %participant_id, "failed to subscribe to microphone track");
                }
            }
            false
        }
        AgentEvent::TrackSubscribed { participant_id, codec, rtp_rx, .. } => {
            spawn_transcriber(config, inner, results_tx, participant_id, codec, rtp_rx);
            false
        }
        AgentEvent::TrackUnsubscribed { participant_id, .. } => {
            stop_transcriber(inner, &participant_id);
            false
        }
        AgentEvent::ParticipantDisconnected { participant_id, name } => {
            stop_transcriber(inner, &participant_id);
            inner.lock().unwrap_or_else(PoisonError::into_inner).conversation.push(MeetingEvent::presence(name, false));
            if config.room.human_count() == 0 {
                tracing::info!("last human left the room, self-destructing");
                config.room.disconnect().await;
                true
            } else {
                false
            }
        }
        AgentEvent::Disconnected => true,
    }
}

fn stop_transcriber(inner: &Arc<Mutex<AgentInner>>, participant_id: &str) {
    let stop_tx = {
        let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.transcribers.remove(participant_id)
    };
    if let Some(stop_tx) = stop_tx {
        let _ = stop_tx.send(());
    }
}

/// Validates the codec, spawns a `Transcriber` for a newly subscribed
/// mic, and relays its results onto the shared results channel. A
/// non-Opus codec (S6) is logged and otherwise ignored: no transcriber,
/// no error packet, the agent stays functional for other mics.
fn spawn_transcriber(
    config: &Arc<AgentConfig>,
    inner: &Arc<Mutex<AgentInner>>,
    results_tx: &mpsc::Sender<RecognizeResult>,
    participant_id: String,
    codec: String,
    rtp_rx: mpsc::Receiver<Bytes>,
) {
    let transcriber = match Transcriber::spawn(config.stt_client.clone(), participant_id.clone(), config.language, &codec) {
        Ok(t) => t,
        Err(KittError::UnsupportedCodec(codec)) => {
            tracing::info!(%participant_id, %codec, "ignoring microphone track with unsupported codec");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, %participant_id, "failed to start transcriber");
            return;
        }
    };

    let (stop_tx, stop_rx) = oneshot::channel();
    {
        let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.transcribers.insert(participant_id, stop_tx);
    }

    tokio::spawn(run_transcriber(transcriber, rtp_rx, stop_rx, results_tx.clone()));
}

/// Owns one subscribed mic's `Transcriber` for its whole lifetime:
/// forwards captured RTP into it, relays its results onward, and stops
/// on either an external signal or the transcriber's own exit.
async fn run_transcriber(
    mut transcriber: Transcriber,
    mut rtp_rx: mpsc::Receiver<Bytes>,
    mut stop_rx: oneshot::Receiver<()>,
    results_tx: mpsc::Sender<RecognizeResult>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            packet = rtp_rx.recv() => {
                match packet {
                    Some(p) => transcriber.write_rtp(p),
                    None => break,
                }
            }
            result = transcriber.recv() => {
                match result {
                    Some(r) => if results_tx.send(r).await.is_err() { break },
                    None => break,
                }
            }
        }
    }
    transcriber.close();
}

/// Handles one `RecognizeResult`: always forwards it as a transcript
/// packet, runs it through the `ActivationController`, and
/// if it should trigger an answer, spawns a detached turn so other mics'
/// transcripts keep flowing while it runs.
async fn handle_result(
    config: &Arc<AgentConfig>,
    inner: &Arc<Mutex<AgentInner>>,
    is_busy: &Arc<AtomicBool>,
    outbound: &Arc<OutboundTrack>,
    result: RecognizeResult,
    cancellation: &CancellationToken,
) {
    let name = config.room.participant_name(&result.participant_id);

    if let Some(message) = result.error {
        let _ = config.room.publish_data(DataPacket::error(message)).await;
        return;
    }

    let _ = config
        .room
        .publish_data(DataPacket::transcript(&result.participant_id, &name, &result.text, result.is_final))
        .await;

    let quorum = Quorum::from_human_count(config.room.human_count());
    let evaluation = {
        let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.activation.on_result(&result.participant_id, &result.text, result.is_final, &config.language, quorum)
    };

    if let Some(state) = evaluation.ui_state {
        let _ = config.room.publish_data(DataPacket::state(state)).await;
    }

    if let Some(arm) = evaluation.watchdog {
        spawn_watchdog(config.clone(), inner.clone(), arm, cancellation.clone());
    }

    if !evaluation.should_answer {
        return;
    }

    if is_busy.swap(true, Ordering::AcqRel) {
        tracing::debug!(participant_id = %result.participant_id, "dropping activation: a turn is already running");
        return;
    }

    tokio::spawn(run_answer_turn(
        config.clone(),
        inner.clone(),
        is_busy.clone(),
        outbound.clone(),
        result,
        name,
        cancellation.clone(),
    ));
}

/// Arms one idle-timeout watchdog. A no-op if the epoch it guards has
/// since been superseded — checked inside `ActivationController::expire`.
fn spawn_watchdog(config: Arc<AgentConfig>, inner: Arc<Mutex<AgentInner>>, arm: WatchdogArm, cancellation: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = cancellation.cancelled() => {}
            () = tokio::time::sleep(arm.after) => {
                let ui_state = {
                    let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.activation.expire(arm.epoch)
                };
                if let Some(state) = ui_state {
                    let _ = config.room.publish_data(DataPacket::state(state)).await;
                }
            }
        }
    });
}

/// Runs one answer turn end to end: snapshots history,
/// streams the LLM response as sentence chunks, synthesizes and plays
/// each chunk in order despite out-of-order TTS completion, then appends
/// the bot's turn and settles the final UI state.
#[allow(clippy::too_many_arguments)]
async fn run_answer_turn(
    config: Arc<AgentConfig>,
    inner: Arc<Mutex<AgentInner>>,
    is_busy: Arc<AtomicBool>,
    outbound: Arc<OutboundTrack>,
    prompt: RecognizeResult,
    prompt_speaker: String,
    cancellation: CancellationToken,
) {
    let history = {
        let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = guard.conversation.snapshot();
        guard.conversation.push(MeetingEvent::human_speech(prompt_speaker.clone(), prompt.text.clone()));
        guard.activation.clear_for_turn();
        snapshot
    };

    let _ = config.room.publish_data(DataPacket::state(UiState::Loading)).await;

    let roster = config.room.roster();
    let messages =
        kitt_providers::chat_completer::build_messages(&roster, config.language, &history, &prompt_speaker, &prompt.text);

    let mut stream = match config.chat_completer.stream(messages) {
        Ok(s) => s,
        Err(e) => {
            let _ = config.room.publish_data(DataPacket::error(e.to_string())).await;
            is_busy.store(false, Ordering::Release);
            return;
        }
    };

    let mut predecessor: Option<oneshot::Receiver<()>> = None;
    let mut completions: Vec<oneshot::Receiver<()>> = Vec::new();
    let mut full_text = String::new();
    let mut current_language = config.language;

    loop {
        let chunk: Result<Option<SentenceChunk>> = tokio::select! {
            () = cancellation.cancelled() => break,
            chunk = stream.recv() => chunk,
        };

        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                if !e.is_cancellation() {
                    let _ = config.room.publish_data(DataPacket::error(e.to_string())).await;
                }
                break;
            }
        };

        full_text.push_str(&chunk.text);

        if let Some(language) = chunk.language_code.as_deref().and_then(Language::by_code) {
            current_language = language;
        }
        let chunk_language = current_language;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        completions.push(done_rx);
        let prior = predecessor.replace(ready_rx);

        tokio::spawn(synthesize_and_enqueue(
            config.clone(),
            outbound.clone(),
            cancellation.clone(),
            chunk.text,
            chunk_language,
            prior,
            ready_tx,
            done_tx,
        ));
    }

    for done in completions {
        let _ = done.await;
    }

    let ends_with_question = full_text.trim_end().ends_with('?');
    {
        let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.conversation.push(MeetingEvent::bot_speech(full_text));
        if ends_with_question {
            let arm = guard.activation.reactivate(prompt.participant_id.clone());
            drop(guard);
            spawn_watchdog(config.clone(), inner.clone(), arm, cancellation.clone());
        }
    }

    let final_state = if ends_with_question { UiState::Active } else { UiState::Idle };
    let _ = config.room.publish_data(DataPacket::state(final_state)).await;

    is_busy.store(false, Ordering::Release);
}

/// Synthesizes one sentence chunk, then waits for the previous chunk's
/// `ready` signal before enqueueing onto `OutboundTrack` — the per-chunk
/// predecessor channel that keeps playback order intact even though
/// synthesis itself runs fanned out and may finish out of order.
#[allow(clippy::too_many_arguments)]
async fn synthesize_and_enqueue(
    config: Arc<AgentConfig>,
    outbound: Arc<OutboundTrack>,
    cancellation: CancellationToken,
    text: String,
    language: Language,
    prior: Option<oneshot::Receiver<()>>,
    ready_tx: oneshot::Sender<()>,
    done_tx: oneshot::Sender<()>,
) {
    let synthesis = tokio::select! {
        () = cancellation.cancelled() => {
            let _ = ready_tx.send(());
            let _ = done_tx.send(());
            return;
        }
        result = config.synthesizer.synthesize(&text, language) => result,
    };

    let bytes = match synthesis {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "speech synthesis failed for one sentence chunk");
            let _ = ready_tx.send(());
            let _ = done_tx.send(());
            return;
        }
    };

    let packets: Vec<_> = match OggPacketizer::new(&bytes) {
        Ok(packetizer) => packetizer.collect(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to packetize synthesized audio");
            let _ = ready_tx.send(());
            let _ = done_tx.send(());
            return;
        }
    };

    if let Some(prior) = prior {
        let _ = prior.await;
    }

    let _ = config.room.publish_data(DataPacket::state(UiState::Speaking)).await;
    outbound.enqueue(packets, move || {
        let _ = done_tx.send(());
    });
    let _ = ready_tx.send(());
}
