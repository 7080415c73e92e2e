//! Per-connection voice protocol state machine.
//!
//! Two tasks per satellite: a frame reader that owns the RX gate, VAD
//! and utterance capture, and a driver that owns the conversation and
//! TTS egress. Barge-in (`INT0`) is applied in the reader the moment the
//! frame arrives — it latches the session cancel flag, drops the capture
//! buffer and reopens the RX gate — so the egress loop observes it at
//! the next chunk boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::asr::{Transcriber, utterance_text};
use crate::audio::egress::TtsEgress;
use crate::audio::i16_to_f32;
use crate::audio::ingest::AudioIngest;
use crate::audio::tone::{
    CLOSE_BEEP_HZ, CLOSE_BEEP_SECS, CLOSE_BEEP_VOLUME, ERROR_BEEP_HZ, sine_tone,
};
use crate::config::AssistantConfig;
use crate::core::Assistant;
use crate::error::{AssistantError, Result};
use crate::protocol::{FrameTag, i16_to_payload, payload_to_i16, read_frame, write_frame};
use crate::session::{ResponseChunk, ResponseReceiver, Session};
use crate::stream::sentence::SentenceSplitter;
use crate::synth::Synthesizer;
use crate::vad::EnergyVad;

/// Pause between the three close beeps.
const BEEP_GAP: Duration = Duration::from_millis(300);

/// Events the frame reader hands to the driver.
enum ClientEvent {
    /// `OPEN`/`WAKE` received.
    Open,
    /// A complete utterance (silence timeout or `STOP`).
    Utterance(Vec<f32>),
    /// Connection ended; carries the protocol error if not a clean close.
    Disconnected(Option<AssistantError>),
}

/// Driver-side connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Accepted, waiting for `OPEN`.
    Idle,
    /// Greeted and listening.
    Open,
    /// Running the conversation loop / speaking.
    Responding,
}

/// How a conversation turn ended.
enum TurnEnd {
    /// Keep the channel open. Carries an utterance the satellite spoke
    /// after a barge-in, while this turn was still winding down — it
    /// becomes the next turn's input instead of being dropped.
    Continue(Option<Vec<f32>>),
    /// The model requested channel close.
    Close,
    /// The satellite went away mid-response.
    Disconnected,
}

/// One satellite connection.
pub struct Connection {
    assistant: Arc<Assistant>,
    transcriber: Arc<dyn Transcriber>,
    egress: TtsEgress,
    config: AssistantConfig,
}

impl Connection {
    /// Build the per-connection pipeline.
    pub fn new(
        assistant: Arc<Assistant>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        config: AssistantConfig,
    ) -> Self {
        let egress = TtsEgress::new(synthesizer, config.voice.sample_rate, &config.egress);
        Self {
            assistant,
            transcriber,
            egress,
            config,
        }
    }

    /// Run the connection to completion.
    ///
    /// # Errors
    ///
    /// Returns the protocol error that tore the connection down, if any.
    pub async fn handle(self, socket: TcpStream) -> Result<()> {
        let session_id = Uuid::new_v4().to_string();
        let session = self.assistant.sessions().create(&session_id);
        let mut queue = session.claim_response_receiver().ok_or_else(|| {
            AssistantError::Channel("response queue already claimed".to_owned())
        })?;
        let rx_gate_open = Arc::new(AtomicBool::new(false));

        let (reader_half, mut writer) = socket.into_split();
        let (event_tx, event_rx) = mpsc::channel(64);

        let reader = tokio::spawn(read_loop(
            reader_half,
            event_tx,
            Arc::clone(&session),
            Arc::clone(&rx_gate_open),
            self.config.clone(),
        ));

        let result = self
            .drive(&mut writer, &session, &mut queue, &rx_gate_open, event_rx)
            .await;

        // An unrecoverable protocol error gets an audible ending before
        // the socket goes away.
        if matches!(result, Err(AssistantError::Protocol(_))) {
            self.error_beeps(&mut writer).await;
        }

        // Teardown: cancel anything in flight and drop the session.
        session.cancel_response();
        self.assistant.sessions().remove(&session.id);
        reader.abort();
        result
    }

    /// The driver: consumes reader events and runs the state machine.
    async fn drive(
        &self,
        writer: &mut OwnedWriteHalf,
        session: &Arc<Session>,
        queue: &mut ResponseReceiver,
        rx_gate_open: &AtomicBool,
        mut events: mpsc::Receiver<ClientEvent>,
    ) -> Result<()> {
        let mut state = ConnState::Idle;

        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Open => {
                    if state != ConnState::Idle {
                        debug!("duplicate OPEN ignored");
                        continue;
                    }
                    info!(session = %session.id, "channel open");
                    self.egress
                        .speak(writer, session, &self.config.voice.greeting)
                        .await?;
                    write_frame(writer, FrameTag::Rdy0, &[]).await?;
                    rx_gate_open.store(true, Ordering::Release);
                    state = ConnState::Open;
                }
                ClientEvent::Utterance(samples) => {
                    if state != ConnState::Open {
                        debug!("utterance while not listening; dropped");
                        continue;
                    }
                    state = ConnState::Responding;
                    debug!(session = %session.id, state = ?state, "utterance captured");

                    // A turn may hand back an utterance captured after a
                    // barge-in; it becomes the next turn's input.
                    let mut next = Some(samples);
                    while let Some(samples) = next.take() {
                        rx_gate_open.store(false, Ordering::Release);
                        match self.transcribe(&samples).await {
                            Some(text) if self.is_close_phrase(&text) => {
                                info!(session = %session.id, "close phrase heard");
                                self.close_channel(writer, session).await?;
                                return Ok(());
                            }
                            Some(text) => {
                                match self
                                    .run_turn(writer, session, queue, &mut events, text)
                                    .await?
                                {
                                    TurnEnd::Close => {
                                        self.close_channel(writer, session).await?;
                                        return Ok(());
                                    }
                                    TurnEnd::Disconnected => return Ok(()),
                                    TurnEnd::Continue(pending) => {
                                        write_frame(writer, FrameTag::Rdy0, &[]).await?;
                                        rx_gate_open.store(true, Ordering::Release);
                                        next = pending;
                                    }
                                }
                            }
                            None => {
                                // ASR failure or empty transcript: keep listening.
                                rx_gate_open.store(true, Ordering::Release);
                            }
                        }
                    }
                    state = ConnState::Open;
                }
                ClientEvent::Disconnected(None) => {
                    info!(session = %session.id, "satellite closed the connection");
                    return Ok(());
                }
                ClientEvent::Disconnected(Some(e)) => {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Transcribe an utterance; failures discard it.
    async fn transcribe(&self, samples: &[f32]) -> Option<String> {
        match self
            .transcriber
            .transcribe(samples, self.config.voice.sample_rate)
            .await
        {
            Ok(segments) => {
                let text = utterance_text(&segments);
                if text.trim().is_empty() {
                    debug!("empty transcript; ignoring utterance");
                    None
                } else {
                    Some(text)
                }
            }
            Err(e) => {
                warn!("discarding utterance, transcription failed: {e}");
                None
            }
        }
    }

    fn is_close_phrase(&self, text: &str) -> bool {
        text.to_lowercase()
            .contains(&self.config.voice.close_phrase.to_lowercase())
    }

    /// Run one conversation turn and speak the streamed response.
    async fn run_turn(
        &self,
        writer: &mut OwnedWriteHalf,
        session: &Arc<Session>,
        queue: &mut ResponseReceiver,
        events: &mut mpsc::Receiver<ClientEvent>,
        text: String,
    ) -> Result<TurnEnd> {
        info!(session = %session.id, "user said: \"{text}\"");

        let assistant = Arc::clone(&self.assistant);
        let session_id = session.id.clone();
        let worker = tokio::spawn(async move {
            assistant.process_input(&text, &session_id, true).await;
        });

        let mut splitter = SentenceSplitter::new();
        let mut disconnect: Option<Option<AssistantError>> = None;
        let mut pending_utterance: Option<Vec<f32>> = None;

        loop {
            tokio::select! {
                chunk = queue.recv() => {
                    match chunk {
                        Some(ResponseChunk::Text(text)) => {
                            if session.cancelled() {
                                // Discard the rest of the turn, but keep
                                // draining so the producer can finish.
                                continue;
                            }
                            for sentence in splitter.push(&text) {
                                self.egress.speak(writer, session, &sentence).await?;
                            }
                        }
                        Some(ResponseChunk::Done) | None => break,
                    }
                }
                event = events.recv() => {
                    match event {
                        // INT0 side effects happen in the reader. An
                        // utterance landing here was spoken after the
                        // barge-in reopened the gate — keep it for the
                        // next turn rather than dropping the user's words.
                        Some(ClientEvent::Utterance(samples)) => {
                            pending_utterance = Some(samples);
                        }
                        Some(ClientEvent::Open) => {}
                        Some(ClientEvent::Disconnected(e)) => disconnect = Some(e),
                        None => disconnect = Some(None),
                    }
                }
            }
            if disconnect.is_some() {
                // Cancel the turn and drain to the sentinel so the
                // worker is never blocked on a full queue.
                session.cancel_response();
                while let Some(chunk) = queue.recv().await {
                    if matches!(chunk, ResponseChunk::Done) {
                        break;
                    }
                }
                break;
            }
        }

        if disconnect.is_none() && !session.cancelled() {
            if let Some(rest) = splitter.flush() {
                self.egress.speak(writer, session, &rest).await?;
            }
        }

        session.finished.wait().await;
        if let Err(e) = worker.await {
            warn!("conversation worker panicked: {e}");
        }

        match disconnect {
            Some(Some(e)) => Err(e),
            Some(None) => Ok(TurnEnd::Disconnected),
            None if session.close_voice_requested() => Ok(TurnEnd::Close),
            None => Ok(TurnEnd::Continue(pending_utterance)),
        }
    }

    /// Close sequence: three descending beeps, `CLOS`, done.
    async fn close_channel(&self, writer: &mut OwnedWriteHalf, session: &Arc<Session>) -> Result<()> {
        info!(session = %session.id, "closing voice channel");
        let tone = sine_tone(
            CLOSE_BEEP_HZ,
            CLOSE_BEEP_SECS,
            CLOSE_BEEP_VOLUME,
            self.config.voice.sample_rate,
        );
        let payload = i16_to_payload(&tone);
        for _ in 0..3 {
            write_frame(writer, FrameTag::Beep, &payload).await?;
            tokio::time::sleep(BEEP_GAP).await;
        }
        write_frame(writer, FrameTag::Clos, &[]).await?;
        Ok(())
    }

    /// Forced-close sequence after an unrecoverable protocol error:
    /// three descending beeps and `CLOS`, written back-to-back and
    /// best-effort — the connection is going away regardless, and no
    /// further frames are read.
    async fn error_beeps(&self, writer: &mut OwnedWriteHalf) {
        for frequency in ERROR_BEEP_HZ {
            let tone = sine_tone(
                frequency,
                CLOSE_BEEP_SECS,
                CLOSE_BEEP_VOLUME,
                self.config.voice.sample_rate,
            );
            if write_frame(writer, FrameTag::Beep, &i16_to_payload(&tone))
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = write_frame(writer, FrameTag::Clos, &[]).await;
    }
}

/// The frame reader: protocol decode, RX gating, VAD capture, barge-in.
async fn read_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    events: mpsc::Sender<ClientEvent>,
    session: Arc<Session>,
    rx_gate_open: Arc<AtomicBool>,
    config: AssistantConfig,
) {
    let mut ingest = AudioIngest::new(Box::new(EnergyVad::new(&config.vad)), &config.vad);

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => match frame.tag {
                FrameTag::Open | FrameTag::Wake => {
                    if events.send(ClientEvent::Open).await.is_err() {
                        return;
                    }
                }
                FrameTag::Aud0 => {
                    if !rx_gate_open.load(Ordering::Acquire) {
                        continue;
                    }
                    let pcm = i16_to_f32(&payload_to_i16(&frame.payload));
                    let output = ingest.push_frame(&pcm, Instant::now());
                    if output.speech_started {
                        // First speech after a barge-in re-enables TTS.
                        session.clear_cancel();
                    }
                    if let Some(utterance) = output.utterance {
                        if events.send(ClientEvent::Utterance(utterance)).await.is_err() {
                            return;
                        }
                    }
                }
                FrameTag::Int0 => {
                    info!(session = %session.id, "barge-in");
                    session.cancel_response();
                    ingest.reset();
                    // Let the next utterance in immediately.
                    rx_gate_open.store(true, Ordering::Release);
                }
                FrameTag::Stop => {
                    if let Some(utterance) = ingest.flush() {
                        if events.send(ClientEvent::Utterance(utterance)).await.is_err() {
                            return;
                        }
                    }
                }
                other => debug!(tag = ?other, "ignoring unexpected frame"),
            },
            Ok(None) => {
                let _ = events.send(ClientEvent::Disconnected(None)).await;
                return;
            }
            Err(e) => {
                let _ = events.send(ClientEvent::Disconnected(Some(e))).await;
                return;
            }
        }
    }
}
