// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! One streaming recognizer session per subscribed microphone track.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use kitt_core::{KittError, Language, RecognizeResult, Result};
use kitt_media::ogg::OggWriter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::stt_proto::{
    wake_phrase_contexts, AudioEncoding, RecognitionConfig, StreamingRecognitionConfig, StreamingRecognizeRequest,
    StreamingRecognizeResponse,
};

/// Provider-neutral streaming speech recognizer boundary.
///
/// Shaped like the room-transport boundary the agent also depends on: a
/// trait the core calls through, implemented by a concrete transport the
/// core never constructs for itself. Lets tests exercise `Transcriber`'s
/// rotation and result-mapping logic without a live gRPC channel.
#[async_trait]
pub trait SttClient: Send + Sync {
    /// Opens one streaming session and returns its response stream.
    /// Sessions are single-use: once exhausted (or rotated away from),
    /// the caller opens a new one via a fresh call to this method.
    async fn streaming_recognize(
        &self,
        requests: Pin<Box<dyn Stream<Item = StreamingRecognizeRequest> + Send>>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamingRecognizeResponse>> + Send>>>;
}

/// A `tonic`-backed implementation of [`SttClient`] talking to a streaming
/// speech recognition gRPC endpoint (credentials resolved from
/// `GOOGLE_APPLICATION_CREDENTIALS`/`_BODY` at the process level, per the
/// configuration surface `kittd` exposes).
pub struct GrpcSttClient {
    channel: tonic::transport::Channel,
    method_path: http::uri::PathAndQuery,
}

impl GrpcSttClient {
    #[must_use]
    pub fn new(channel: tonic::transport::Channel) -> Self {
        Self { channel, method_path: http::uri::PathAndQuery::from_static("/speech.Speech/StreamingRecognize") }
    }
}

#[async_trait]
impl SttClient for GrpcSttClient {
    async fn streaming_recognize(
        &self,
        requests: Pin<Box<dyn Stream<Item = StreamingRecognizeRequest> + Send>>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamingRecognizeResponse>> + Send>>> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| KittError::Provider(format!("STT channel not ready: {e}")))?;

        let codec = tonic::codec::ProstCodec::default();
        let response = grpc
            .streaming(tonic::Request::new(requests), self.method_path.clone(), codec)
            .await
            .map_err(|status| KittError::Provider(format!("STT stream failed: {status}")))?;

        let stream = response.into_inner();
        Ok(Box::pin(futures::StreamExt::map(stream, |item| {
            item.map_err(|status| map_status(&status))
        })))
    }
}

fn map_status(status: &tonic::Status) -> KittError {
    if status.code() == tonic::Code::Cancelled {
        KittError::Cancelled
    } else {
        KittError::Provider(format!("STT error: {status}"))
    }
}

/// Roughly how long a single streaming session is allowed to run before
/// the provider forcibly closes it; sessions are rotated a little ahead
/// of this so a new one is always ready to take over without a gap.
const SESSION_LIFETIME: Duration = Duration::from_secs(290);

/// How long a mic can go without producing an RTP packet before it's
/// treated as muted. `RoomClient` has no explicit mute callback, so
/// muting is inferred from silence rather than signaled.
const MUTE_IDLE_THRESHOLD: Duration = Duration::from_secs(2);

/// One subscribed microphone's streaming recognizer.
///
/// Owns exactly one open STT session at a time; rotates to a new session
/// before the provider's cap (or immediately on `OutOfRange`/cancellation
/// of the current one), resetting the OGG serializer on every rotation.
/// Forwards decoded results to the `Agent` over a bounded channel that
/// closes once the producer task exits.
pub struct Transcriber {
    results_rx: mpsc::Receiver<RecognizeResult>,
    rtp_tx: mpsc::Sender<Bytes>,
    cancellation: CancellationToken,
    last_audio_at: Arc<Mutex<Instant>>,
}

impl Transcriber {
    /// Spawns the forwarding/receiving tasks for a newly subscribed mic.
    ///
    /// Returns `UnsupportedCodec` without spawning anything if `codec`
    /// isn't Opus.
    pub fn spawn(
        client: Arc<dyn SttClient>,
        participant_id: impl Into<String>,
        language: Language,
        codec: &str,
    ) -> Result<Self> {
        if !codec.eq_ignore_ascii_case("opus") {
            return Err(KittError::UnsupportedCodec(codec.to_string()));
        }

        let participant_id = participant_id.into();
        let (results_tx, results_rx) = mpsc::channel(64);
        let (rtp_tx, rtp_rx) = mpsc::channel(128);
        let cancellation = CancellationToken::new();
        let last_audio_at = Arc::new(Mutex::new(Instant::now()));

        tokio::spawn(run_sessions(
            client,
            participant_id,
            language,
            results_tx,
            cancellation.clone(),
            last_audio_at.clone(),
            rtp_rx,
        ));

        Ok(Self { results_rx, rtp_tx, cancellation, last_audio_at })
    }

    /// Feeds one captured RTP packet's Opus payload into the current
    /// session's Ogg serializer. Never blocks: a full queue (the
    /// recognizer falling behind) drops the frame rather than stalling
    /// the RTP-read task, the same real-time tradeoff `OutboundTrack`
    /// makes with silence in the other direction.
    ///
    /// Also marks the mic as unmuted: this is the only signal of mic
    /// activity `RoomClient` offers, so "muted" is inferred from the
    /// absence of RTP rather than signaled.
    pub fn write_rtp(&self, opus_payload: impl Into<Bytes>) {
        *self.last_audio_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
        if self.rtp_tx.try_send(opus_payload.into()).is_err() {
            tracing::debug!("transcriber audio queue full or closed, dropping frame");
        }
    }

    /// Awaits the next recognizer result; `None` once the session
    /// producer has exited (cancellation or a fatal transport error).
    pub async fn recv(&mut self) -> Option<RecognizeResult> {
        self.results_rx.recv().await
    }

    /// Cancels the current and any future session, closing the results
    /// channel once the producer task observes it.
    pub fn close(&self) {
        self.cancellation.cancel();
    }
}

async fn run_sessions(
    client: Arc<dyn SttClient>,
    participant_id: String,
    language: Language,
    results_tx: mpsc::Sender<RecognizeResult>,
    cancellation: CancellationToken,
    last_audio_at: Arc<Mutex<Instant>>,
    mut rtp_rx: mpsc::Receiver<Bytes>,
) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }

        // Don't burn a session's quota while the mic is muted; wait for
        // audio to resume (or cancellation) before opening a new one.
        let idle = last_audio_at
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .elapsed();
        if idle > MUTE_IDLE_THRESHOLD {
            tokio::select! {
                () = cancellation.cancelled() => return,
                () = tokio::time::sleep(Duration::from_millis(200)) => continue,
            }
        }

        let (outcome, returned_rx) =
            run_one_session(client.as_ref(), &participant_id, language, &results_tx, &cancellation, rtp_rx).await;
        rtp_rx = returned_rx;

        match outcome {
            Ok(SessionEnd::Rotate) => continue,
            Ok(SessionEnd::Cancelled) | Err(KittError::Cancelled) => return,
            Err(e) => {
                let _ = results_tx.send(RecognizeResult::failed(&participant_id, e.to_string())).await;
                return;
            }
        }
    }
}

enum SessionEnd {
    Rotate,
    Cancelled,
}

/// Drives one streaming session: spawns an audio-forward task that owns
/// `rtp_rx` and a fresh [`OggWriter`] for the session's lifetime, running
/// concurrently with this function's own response consumption. The
/// forward task hands `rtp_rx` back on exit so the next session (or the
/// caller, on final shutdown) can reuse it without losing buffered audio.
async fn run_one_session(
    client: &dyn SttClient,
    participant_id: &str,
    language: Language,
    results_tx: &mpsc::Sender<RecognizeResult>,
    cancellation: &CancellationToken,
    rtp_rx: mpsc::Receiver<Bytes>,
) -> (Result<SessionEnd>, mpsc::Receiver<Bytes>) {
    let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(32);
    let ogg_writer = OggWriter::new(rand_serial(participant_id));
    let forward_cancel = CancellationToken::new();
    let forward_handle = tokio::spawn(forward_audio(rtp_rx, ogg_writer, audio_tx, forward_cancel.clone()));

    let requests = build_request_stream(language, audio_rx);
    let responses = client.streaming_recognize(Box::pin(requests)).await;
    let mut responses = match responses {
        Ok(r) => r,
        Err(e) => {
            forward_cancel.cancel();
            let rtp_rx = recover_rtp_rx(forward_handle).await;
            return (Err(e), rtp_rx);
        }
    };

    let deadline = tokio::time::sleep(SESSION_LIFETIME);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            () = cancellation.cancelled() => break Ok(SessionEnd::Cancelled),
            () = &mut deadline => break Ok(SessionEnd::Rotate),
            item = futures::StreamExt::next(&mut responses) => {
                match item {
                    None => break Ok(SessionEnd::Rotate),
                    Some(Err(KittError::Cancelled)) => break Ok(SessionEnd::Cancelled),
                    Some(Err(e)) if is_deadline_exceeded(&e) => break Ok(SessionEnd::Rotate),
                    Some(Err(e)) => break Err(e),
                    Some(Ok(response)) => {
                        if let Some(message) = response.error_message {
                            let _ = results_tx.send(RecognizeResult::failed(participant_id, message)).await;
                            continue;
                        }

                        if let Some(result) = translate(participant_id, &response) {
                            if results_tx.send(result).await.is_err() {
                                break Ok(SessionEnd::Cancelled);
                            }
                        }
                    }
                }
            }
        }
    };

    forward_cancel.cancel();
    let rtp_rx = recover_rtp_rx(forward_handle).await;
    (outcome, rtp_rx)
}

async fn recover_rtp_rx(handle: tokio::task::JoinHandle<mpsc::Receiver<Bytes>>) -> mpsc::Receiver<Bytes> {
    handle.await.unwrap_or_else(|_| mpsc::channel(1).1)
}

/// Encodes captured Opus RTP payloads into the session's Ogg bit-stream
/// and forwards the resulting bytes to the STT request stream. Runs until
/// cancelled (session rotation/shutdown) or `rtp_rx` closes (the
/// `Transcriber` was dropped), then returns `rtp_rx` for reuse.
async fn forward_audio(
    mut rtp_rx: mpsc::Receiver<Bytes>,
    mut ogg_writer: OggWriter,
    audio_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Bytes> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            packet = rtp_rx.recv() => {
                let Some(packet) = packet else { break };
                match ogg_writer.write_packet(&packet, 1, false) {
                    Ok(bytes) if !bytes.is_empty() => {
                        if audio_tx.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "failed to frame captured Opus packet as Ogg"),
                }
            }
        }
    }
    rtp_rx
}

fn is_deadline_exceeded(error: &KittError) -> bool {
    matches!(error, KittError::Provider(message) if message.contains("OutOfRange"))
}

fn translate(participant_id: &str, response: &StreamingRecognizeResponse) -> Option<RecognizeResult> {
    let mut interim = String::new();
    for result in &response.results {
        let Some(alt) = result.alternatives.first() else { continue };
        if result.is_final {
            return Some(RecognizeResult::finalized(participant_id, alt.transcript.clone()));
        }
        interim.push_str(&alt.transcript);
    }

    if interim.is_empty() {
        None
    } else {
        Some(RecognizeResult::interim(participant_id, interim))
    }
}

fn build_request_stream(
    language: Language,
    audio_rx: mpsc::Receiver<Vec<u8>>,
) -> impl Stream<Item = StreamingRecognizeRequest> {
    let config = StreamingRecognizeRequest::config(StreamingRecognitionConfig {
        config: Some(RecognitionConfig {
            encoding: AudioEncoding::OggOpus as i32,
            sample_rate_hertz: i32::try_from(kitt_media::opus::SAMPLE_RATE).unwrap_or(48_000),
            audio_channel_count: 1,
            language_code: language.stt_code.to_string(),
            model: "latest_long".to_string(),
            use_enhanced: true,
            speech_contexts: wake_phrase_contexts(),
        }),
        interim_results: true,
    });

    let audio_requests =
        tokio_stream::wrappers::ReceiverStream::new(audio_rx).map(StreamingRecognizeRequest::audio);

    futures::stream::once(async move { config }).chain(audio_requests)
}

fn rand_serial(participant_id: &str) -> u32 {
    participant_id.bytes().fold(0x811c_9dc5u32, |hash, b| (hash ^ u32::from(b)).wrapping_mul(0x0100_0193))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    struct EchoClient;

    #[async_trait]
    impl SttClient for EchoClient {
        async fn streaming_recognize(
            &self,
            requests: Pin<Box<dyn Stream<Item = StreamingRecognizeRequest> + Send>>,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamingRecognizeResponse>> + Send>>> {
            // Drain the request stream so senders don't block, then answer
            // with one final transcript.
            let _ = futures::StreamExt::collect::<Vec<_>>(requests).await;
            let response = StreamingRecognizeResponse {
                results: vec![crate::stt_proto::StreamingRecognitionResult {
                    alternatives: vec![crate::stt_proto::SpeechRecognitionAlternative {
                        transcript: "hello world".to_string(),
                    }],
                    is_final: true,
                }],
                error_message: None,
            };
            Ok(Box::pin(stream::once(async move { Ok(response) })))
        }
    }

    #[test]
    fn rejects_non_opus_codec() {
        let client: Arc<dyn SttClient> = Arc::new(EchoClient);
        let result = Transcriber::spawn(client, "p1", Language::default_language(), "vp8");
        assert!(matches!(result, Err(KittError::UnsupportedCodec(_))));
    }

    #[test]
    fn translate_prefers_final_result_over_interim() {
        let response = StreamingRecognizeResponse {
            results: vec![
                crate::stt_proto::StreamingRecognitionResult {
                    alternatives: vec![crate::stt_proto::SpeechRecognitionAlternative {
                        transcript: "partial".to_string(),
                    }],
                    is_final: false,
                },
                crate::stt_proto::StreamingRecognitionResult {
                    alternatives: vec![crate::stt_proto::SpeechRecognitionAlternative {
                        transcript: "final text".to_string(),
                    }],
                    is_final: true,
                },
            ],
            error_message: None,
        };

        let result = translate("p1", &response).expect("has a result");
        assert!(result.is_final);
        assert_eq!(result.text, "final text");
    }

    #[test]
    fn translate_concatenates_interim_alternatives() {
        let response = StreamingRecognizeResponse {
            results: vec![
                crate::stt_proto::StreamingRecognitionResult {
                    alternatives: vec![crate::stt_proto::SpeechRecognitionAlternative {
                        transcript: "hel".to_string(),
                    }],
                    is_final: false,
                },
                crate::stt_proto::StreamingRecognitionResult {
                    alternatives: vec![crate::stt_proto::SpeechRecognitionAlternative {
                        transcript: "lo".to_string(),
                    }],
                    is_final: false,
                },
            ],
            error_message: None,
        };

        let result = translate("p1", &response).expect("has a result");
        assert!(!result.is_final);
        assert_eq!(result.text, "hello");
    }
}
