//! End-to-end tests for the satellite voice protocol.
//!
//! Runs the real server (frame codec, ingest, state machine, egress,
//! conversation loop, tool dispatch) against scripted speech and model
//! backends over a loopback TCP connection.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use vesper::asr::{Segment, Transcriber};
use vesper::config::AssistantConfig;
use vesper::core::Assistant;
use vesper::error::Result;
use vesper::llm::{ModelClient, TokenStream};
use vesper::prompt::PromptAssembler;
use vesper::protocol::{Frame, FrameTag, i16_to_payload, read_frame, write_frame};
use vesper::store::BehaviourStore;
use vesper::synth::{SynthesizedAudio, Synthesizer};
use vesper::tools::ToolRegistry;
use vesper::tools::close::CloseVoiceChannel;
use vesper::tools::math::PerformMathOperation;
use vesper::tools::time::GetCurrentTime;
use vesper::voice::VoiceServer;

/// Transcriber that plays back scripted texts, one per utterance.
struct ScriptedTranscriber {
    texts: Mutex<VecDeque<String>>,
}

impl ScriptedTranscriber {
    fn new(texts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            texts: Mutex::new(texts.iter().map(|t| (*t).to_owned()).collect()),
        })
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<Segment>> {
        // Give a queued INT0 time to land before the response starts.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let text = self
            .texts
            .lock()
            .expect("texts lock")
            .pop_front()
            .unwrap_or_default();
        Ok(vec![Segment { text }])
    }
}

/// Synthesizer producing a short fixed tone for any sentence.
struct ToneSynth;

#[async_trait]
impl Synthesizer for ToneSynth {
    async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio> {
        Ok(SynthesizedAudio {
            samples: vec![0.1; 2000],
            sample_rate: 16_000,
        })
    }
}

/// Model that plays back scripted turns.
struct ScriptedModel {
    turns: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedModel {
    fn new(turns: &[&[&str]]) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(
                turns
                    .iter()
                    .map(|turn| turn.iter().map(|t| (*t).to_owned()).collect())
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> Result<TokenStream> {
        let tokens = self
            .turns
            .lock()
            .expect("turns lock")
            .pop_front()
            .unwrap_or_default();
        Ok(futures_util::stream::iter(tokens.into_iter().map(Ok)).boxed())
    }
}

/// Start a full server on an ephemeral port; returns its address.
async fn start_server(
    dir: &tempfile::TempDir,
    transcriber: Arc<dyn Transcriber>,
    model: Arc<dyn ModelClient>,
) -> std::net::SocketAddr {
    let behaviour = Arc::new(BehaviourStore::new(dir.path().join("behaviour.json")));
    let prompt = PromptAssembler::new(
        dir.path().join("instructions.txt"),
        dir.path().join("knowledge.txt"),
        behaviour,
        None,
    );
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CloseVoiceChannel));
    registry.register(Arc::new(GetCurrentTime));
    registry.register(Arc::new(PerformMathOperation));
    let assistant = Arc::new(Assistant::new(prompt, registry, model));

    let server = VoiceServer::new(assistant, transcriber, Arc::new(ToneSynth), AssistantConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(server.serve(listener, CancellationToken::new()));
    addr
}

/// Loud frames that the energy VAD classifies as speech.
fn speech_payload() -> Vec<u8> {
    i16_to_payload(&vec![12_000i16; 1024])
}

/// Read frames until (and including) the given tag.
async fn read_until(socket: &mut TcpStream, tag: FrameTag) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(socket))
            .await
            .expect("timed out waiting for frame")
            .expect("read frame")
            .expect("connection closed early");
        let done = frame.tag == tag;
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

fn count_tag(frames: &[Frame], tag: FrameTag) -> usize {
    frames.iter().filter(|f| f.tag == tag).count()
}

#[tokio::test]
async fn time_query_speaks_and_auto_closes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transcriber = ScriptedTranscriber::new(&["What time is it?"]);
    let model = ScriptedModel::new(&[
        &["{\"name\":\"get_current_time\",\"parameters\":{}}"],
        &[
            "4:15PM. ",
            "{\"name\":\"close_voice_channel\",\"parameters\":{}}",
        ],
    ]);
    let addr = start_server(&dir, transcriber, model).await;
    let mut socket = TcpStream::connect(addr).await.expect("connect");

    // Open: greeting audio then ready.
    write_frame(&mut socket, FrameTag::Open, &[]).await.expect("open");
    let greeting = read_until(&mut socket, FrameTag::Rdy0).await;
    assert!(count_tag(&greeting, FrameTag::Tts0) >= 1, "greeting spoken");

    // Speak, then flush the utterance.
    for _ in 0..3 {
        write_frame(&mut socket, FrameTag::Aud0, &speech_payload())
            .await
            .expect("audio");
    }
    write_frame(&mut socket, FrameTag::Stop, &[]).await.expect("stop");

    // Status line + answer spoken, then three beeps and close.
    let frames = read_until(&mut socket, FrameTag::Clos).await;
    assert!(count_tag(&frames, FrameTag::Tts0) >= 1, "answer spoken");
    assert_eq!(count_tag(&frames, FrameTag::Beep), 3, "three close beeps");
    assert_eq!(frames.last().expect("frames").tag, FrameTag::Clos);

    // Server closes the connection after CLOS.
    let end = read_frame(&mut socket).await.expect("read");
    assert!(end.is_none());
}

#[tokio::test]
async fn turn_without_close_returns_to_listening() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transcriber = ScriptedTranscriber::new(&["What is five divided by zero?"]);
    let model = ScriptedModel::new(&[
        &["{\"name\":\"perform_math_operation\",\"parameters\":{\"operation\":\"division\",\"number1\":5,\"number2\":0}}"],
        &["Division by zero is undefined, sorry."],
    ]);
    let addr = start_server(&dir, transcriber, model).await;
    let mut socket = TcpStream::connect(addr).await.expect("connect");

    write_frame(&mut socket, FrameTag::Open, &[]).await.expect("open");
    read_until(&mut socket, FrameTag::Rdy0).await;

    write_frame(&mut socket, FrameTag::Aud0, &speech_payload())
        .await
        .expect("audio");
    write_frame(&mut socket, FrameTag::Stop, &[]).await.expect("stop");

    // The apology is spoken and the channel stays open (RDY0, no CLOS).
    let frames = read_until(&mut socket, FrameTag::Rdy0).await;
    assert!(count_tag(&frames, FrameTag::Tts0) >= 1);
    assert_eq!(count_tag(&frames, FrameTag::Beep), 0);
    assert_eq!(count_tag(&frames, FrameTag::Clos), 0);
}

#[tokio::test]
async fn barge_in_discards_response_and_next_utterance_is_fresh() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transcriber = ScriptedTranscriber::new(&["Tell me everything", "Are you still there?"]);
    let model = ScriptedModel::new(&[
        &["This is a very long answer. It goes on and on. Nobody will hear it."],
        &["Still here."],
    ]);
    let addr = start_server(&dir, transcriber, model).await;
    let mut socket = TcpStream::connect(addr).await.expect("connect");

    write_frame(&mut socket, FrameTag::Open, &[]).await.expect("open");
    read_until(&mut socket, FrameTag::Rdy0).await;

    // Utterance, then barge in before the (slow) transcription finishes.
    write_frame(&mut socket, FrameTag::Aud0, &speech_payload())
        .await
        .expect("audio");
    write_frame(&mut socket, FrameTag::Stop, &[]).await.expect("stop");
    write_frame(&mut socket, FrameTag::Int0, &[]).await.expect("int");

    // The cancelled turn produces no TTS audio, just readiness.
    let frames = read_until(&mut socket, FrameTag::Rdy0).await;
    assert_eq!(count_tag(&frames, FrameTag::Tts0), 0, "response discarded");

    // A fresh utterance is answered normally.
    write_frame(&mut socket, FrameTag::Aud0, &speech_payload())
        .await
        .expect("audio");
    write_frame(&mut socket, FrameTag::Stop, &[]).await.expect("stop");
    let frames = read_until(&mut socket, FrameTag::Rdy0).await;
    assert!(count_tag(&frames, FrameTag::Tts0) >= 1, "fresh turn spoken");
}

/// Model whose turns only start streaming after a fixed delay, keeping
/// the turn alive long enough for wire events to race it.
struct SlowStartModel {
    turns: Mutex<VecDeque<Vec<String>>>,
    delay: Duration,
}

impl SlowStartModel {
    fn new(turns: &[&[&str]], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(
                turns
                    .iter()
                    .map(|turn| turn.iter().map(|t| (*t).to_owned()).collect())
                    .collect(),
            ),
            delay,
        })
    }
}

#[async_trait]
impl ModelClient for SlowStartModel {
    async fn generate(&self, _prompt: &str) -> Result<TokenStream> {
        let tokens = self
            .turns
            .lock()
            .expect("turns lock")
            .pop_front()
            .unwrap_or_default();
        let delay = self.delay;
        let head = futures_util::stream::once(async move {
            tokio::time::sleep(delay).await;
            Ok(String::new())
        });
        Ok(head
            .chain(futures_util::stream::iter(tokens.into_iter().map(Ok)))
            .boxed())
    }
}

#[tokio::test]
async fn utterance_after_barge_in_during_live_turn_is_not_lost() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transcriber = ScriptedTranscriber::new(&["Tell me everything", "Second question"]);
    let model = SlowStartModel::new(
        &[&["A long doomed answer."], &["Still here."]],
        Duration::from_millis(300),
    );
    let addr = start_server(&dir, transcriber, model).await;
    let mut socket = TcpStream::connect(addr).await.expect("connect");

    write_frame(&mut socket, FrameTag::Open, &[]).await.expect("open");
    read_until(&mut socket, FrameTag::Rdy0).await;

    // First utterance, then — while the first turn is still streaming —
    // a barge-in followed immediately by a second utterance.
    write_frame(&mut socket, FrameTag::Aud0, &speech_payload())
        .await
        .expect("audio");
    write_frame(&mut socket, FrameTag::Stop, &[]).await.expect("stop");
    write_frame(&mut socket, FrameTag::Int0, &[]).await.expect("int");
    write_frame(&mut socket, FrameTag::Aud0, &speech_payload())
        .await
        .expect("audio");
    write_frame(&mut socket, FrameTag::Stop, &[]).await.expect("stop");

    // The first turn winds down, then the stashed second utterance must
    // become its own turn: a second RDY0 preceded by spoken audio.
    read_until(&mut socket, FrameTag::Rdy0).await;
    let second_turn = read_until(&mut socket, FrameTag::Rdy0).await;
    assert!(
        count_tag(&second_turn, FrameTag::Tts0) >= 1,
        "second utterance answered"
    );
}

#[tokio::test]
async fn close_phrase_short_circuits_the_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transcriber = ScriptedTranscriber::new(&["please finish conversation now"]);
    // No scripted turns: the model must never be consulted.
    let model = ScriptedModel::new(&[]);
    let addr = start_server(&dir, transcriber, model).await;
    let mut socket = TcpStream::connect(addr).await.expect("connect");

    write_frame(&mut socket, FrameTag::Open, &[]).await.expect("open");
    read_until(&mut socket, FrameTag::Rdy0).await;

    write_frame(&mut socket, FrameTag::Aud0, &speech_payload())
        .await
        .expect("audio");
    write_frame(&mut socket, FrameTag::Stop, &[]).await.expect("stop");

    let frames = read_until(&mut socket, FrameTag::Clos).await;
    assert_eq!(count_tag(&frames, FrameTag::Beep), 3);
}

#[tokio::test]
async fn unknown_tags_are_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transcriber = ScriptedTranscriber::new(&[]);
    let model = ScriptedModel::new(&[]);
    let addr = start_server(&dir, transcriber, model).await;
    let mut socket = TcpStream::connect(addr).await.expect("connect");

    write_frame(&mut socket, FrameTag::Unknown(*b"ZZZZ"), b"future")
        .await
        .expect("unknown");
    write_frame(&mut socket, FrameTag::Open, &[]).await.expect("open");

    let frames = read_until(&mut socket, FrameTag::Rdy0).await;
    assert!(count_tag(&frames, FrameTag::Tts0) >= 1);
}

#[tokio::test]
async fn oversized_frame_beeps_and_tears_down_the_connection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transcriber = ScriptedTranscriber::new(&[]);
    let model = ScriptedModel::new(&[]);
    let addr = start_server(&dir, transcriber, model).await;
    let mut socket = TcpStream::connect(addr).await.expect("connect");

    // Header claiming a 2^31-byte payload, with nothing behind it.
    let mut header = Vec::new();
    header.extend_from_slice(b"AUD0");
    header.extend_from_slice(&(1u32 << 31).to_le_bytes());
    socket.write_all(&header).await.expect("write");

    // The forced close is audible: three descending beeps, then CLOS,
    // then the socket goes away — all without another read cycle.
    let frames = read_until(&mut socket, FrameTag::Clos).await;
    assert_eq!(count_tag(&frames, FrameTag::Beep), 3);
    assert_eq!(count_tag(&frames, FrameTag::Tts0), 0);

    let end = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut socket))
        .await
        .expect("timed out waiting for teardown")
        .expect("read");
    assert!(end.is_none(), "server should close the connection");
}
