//! The console session loop: wires the transport to stdin, audio files and the
//! viewer tools.

use crate::config::Config;
use crate::tools::HeadlessViewer;
use anyhow::{Context, Result};
use gemini_realtime::{
    AudioInConfig, Endpoint, OutboundUnit, Part, Phase, RetryPolicy, SessionConfig,
    SessionEvent, SessionTransport, TransportOptions,
};
use livemol_core::audio::{LIVE_INPUT_SAMPLE_RATE, LIVE_OUTPUT_SAMPLE_RATE};
use livemol_core::viewer::{self, detect_structure_ids};
use livemol_core::{AudioSource, WavFileSource, WavRecorder};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a structural biology assistant. \
When the user asks about a protein, load its structure with load_structure, \
then use set_representation and highlight_residues to point out what you describe.";

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub prompt: Option<String>,
    pub audio_in: Option<PathBuf>,
    pub audio_out: Option<PathBuf>,
    pub system: Option<String>,
    /// Exit after the model completes its first turn.
    pub once: bool,
}

/// Builds the handshake configuration for this run.
pub fn session_config(config: &Config, system: Option<&str>, audio_input: bool) -> SessionConfig {
    let mut session = SessionConfig::new(config.model.clone(), vec![config.response_modality])
        .with_system_instruction(system.unwrap_or(DEFAULT_SYSTEM_INSTRUCTION))
        .with_functions(viewer::tool_declarations());
    if let Some(voice) = &config.voice {
        session = session.with_voice(voice.clone());
    }
    if audio_input {
        session = session.with_audio_input(AudioInConfig {
            language_code: Some(config.language.clone()),
            ..AudioInConfig::pcm16(LIVE_INPUT_SAMPLE_RATE)
        });
    }
    session
}

pub fn transport_options(config: &Config) -> TransportOptions {
    let endpoint = Endpoint::new(config.endpoint.clone()).with_api_key(config.gemini_api_key.clone());
    TransportOptions::new(endpoint)
        .with_handshake_timeout(config.handshake_timeout)
        .with_retry(RetryPolicy::new(
            config.max_connect_attempts,
            config.retry_base_delay,
        ))
        .with_auto_reconnect(config.auto_reconnect)
}

/// What the loop should do after an event.
#[derive(Debug, Default, PartialEq)]
pub struct Reaction {
    /// A frame to send back, e.g. the answer to a tool call.
    pub reply: Option<OutboundUnit>,
    pub stop: bool,
}

/// Turns session events into console output, recorded audio and tool replies.
pub struct EventHandler<W: Write> {
    out: W,
    viewer: HeadlessViewer,
    recorder: Option<WavRecorder>,
    auto_reconnect: bool,
    stop_after_turn: bool,
    /// Set between `SetupComplete` and the next `Close`. A close seen outside
    /// that window belongs to a failed attempt, not to the session.
    session_open: bool,
    turn_text: String,
    audio_bytes: u64,
}

impl<W: Write> EventHandler<W> {
    pub fn new(out: W, recorder: Option<WavRecorder>, auto_reconnect: bool, stop_after_turn: bool) -> Self {
        Self {
            out,
            viewer: HeadlessViewer::new(),
            recorder,
            auto_reconnect,
            stop_after_turn,
            session_open: false,
            turn_text: String::new(),
            audio_bytes: 0,
        }
    }

    pub fn viewer(&self) -> &HeadlessViewer {
        &self.viewer
    }

    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes
    }

    pub fn handle(&mut self, event: SessionEvent) -> Result<Reaction> {
        let mut reaction = Reaction::default();
        match event {
            SessionEvent::Open => writeln!(self.out, "[socket open]")?,
            SessionEvent::SetupComplete => {
                self.session_open = true;
                writeln!(self.out, "[session ready]")?;
            }
            SessionEvent::Content(parts) => self.print_parts(&parts)?,
            SessionEvent::Audio(bytes) => {
                self.audio_bytes += bytes.len() as u64;
                if let Some(recorder) = self.recorder.as_mut() {
                    if let Err(e) = recorder.write_chunk(&bytes) {
                        warn!(error = %e, len = bytes.len(), "Dropped model audio chunk");
                    }
                }
            }
            SessionEvent::Interrupted => {
                self.turn_text.clear();
                writeln!(self.out, " [interrupted]")?;
            }
            SessionEvent::TurnComplete => {
                writeln!(self.out)?;
                let ids = detect_structure_ids(&self.turn_text);
                if !ids.is_empty() {
                    writeln!(self.out, "[structures mentioned: {}]", ids.join(", "))?;
                }
                self.turn_text.clear();
                reaction.stop = self.stop_after_turn;
            }
            SessionEvent::ToolCall(calls) => {
                let responses: Vec<_> = calls
                    .iter()
                    .map(|call| {
                        let response = viewer::respond(&mut self.viewer, call);
                        (call.name.clone(), response)
                    })
                    .collect();
                for (name, response) in &responses {
                    writeln!(self.out, "[tool] {name} -> {}", response.response)?;
                }
                reaction.reply = Some(OutboundUnit::tool_response(
                    responses.into_iter().map(|(_, r)| r).collect(),
                ));
            }
            SessionEvent::ToolCallCancelled(ids) => {
                warn!(?ids, "Tool calls cancelled by the server");
                writeln!(self.out, "[tool calls cancelled: {}]", ids.join(", "))?;
            }
            SessionEvent::Close(reason) => {
                writeln!(self.out, "[{reason}]")?;
                let was_open = std::mem::replace(&mut self.session_open, false);
                reaction.stop = was_open && !self.auto_reconnect;
            }
            SessionEvent::Error(err) => {
                // Terminal failures are caught by the loop through the Error phase.
                writeln!(self.out, "[error] {}", err.message)?;
            }
            // Already mirrored to tracing by the transport.
            SessionEvent::Log(_) => {}
        }
        self.out.flush()?;
        Ok(reaction)
    }

    fn print_parts(&mut self, parts: &[Part]) -> Result<()> {
        for part in parts {
            if let Some(text) = &part.text {
                write!(self.out, "{text}")?;
                self.turn_text.push_str(text);
            } else if let Some(blob) = &part.inline_data {
                writeln!(self.out, "[{} attachment, {} bytes base64]", blob.mime_type, blob.data.len())?;
            }
        }
        Ok(())
    }

    /// Closes the recording, returning how many samples it holds.
    pub fn finish(self) -> Result<Option<u64>> {
        self.recorder
            .map(|recorder| recorder.finalize().context("Failed to finalize recording"))
            .transpose()
    }
}

/// Streams `source` as realtime input, then marks the end of the user turn.
async fn pump_audio<S: AudioSource + 'static>(transport: SessionTransport, mut source: S) -> Result<usize> {
    let rate = source.sample_rate();
    let mut frames = 0;
    while let Some(frame) = source.next_frame().await {
        transport
            .send(OutboundUnit::audio_chunk(rate, frame.to_base64()))
            .await
            .context("Failed to stream audio frame")?;
        frames += 1;
    }
    transport
        .send(OutboundUnit::end_of_turn())
        .await
        .context("Failed to send end of turn")?;
    Ok(frames)
}

/// Resolves when the pump finishes; never resolves when there is none.
async fn wait_pump(pump: &mut Option<JoinHandle<Result<usize>>>) -> Result<usize> {
    let Some(handle) = pump.as_mut() else {
        return std::future::pending().await;
    };
    let result = handle.await;
    *pump = None;
    result.context("Audio task panicked")?
}

/// Runs one interactive session until the user quits, the session ends, or
/// Ctrl+C is pressed.
pub async fn run(config: Config, args: RunArgs) -> Result<()> {
    let recorder = args
        .audio_out
        .as_ref()
        .map(|path| WavRecorder::create(path, LIVE_OUTPUT_SAMPLE_RATE))
        .transpose()
        .context("Failed to create output WAV file")?;
    let source = args
        .audio_in
        .as_ref()
        .map(|path| WavFileSource::open(path, LIVE_INPUT_SAMPLE_RATE).map(|s| s.with_pacing(true)))
        .transpose()
        .context("Failed to open input WAV file")?;

    let transport = SessionTransport::new(transport_options(&config));
    let mut events = transport.subscribe();
    let mut handler = EventHandler::new(std::io::stdout(), recorder, config.auto_reconnect, args.once);

    info!(model = %config.model, modality = %config.response_modality, "Opening live session");
    let session = session_config(&config, args.system.as_deref(), source.is_some());
    transport
        .connect(session)
        .await
        .context("Failed to open live session")?;

    if let Some(prompt) = &args.prompt {
        transport
            .send(OutboundUnit::user_text(prompt.clone()))
            .await
            .context("Failed to send prompt")?;
    }

    let mut pump = source.map(|source| tokio::spawn(pump_audio(transport.clone(), source)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Closing session...");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "" => {}
                        "/quit" => break,
                        text => {
                            if let Err(e) = transport.send(OutboundUnit::user_text(text)).await {
                                warn!(error = %e, "Message not sent");
                            }
                        }
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin; no longer reading input");
                        stdin_open = false;
                    }
                }
            }
            result = wait_pump(&mut pump) => match result {
                Ok(frames) => info!(frames, "Finished streaming audio input"),
                Err(e) => warn!(error = %e, "Audio input stopped early"),
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let reaction = match handler.handle(event) {
                        Ok(reaction) => reaction,
                        Err(e) => {
                            error!(error = %e, "Console output failed");
                            break;
                        }
                    };
                    if let Some(reply) = reaction.reply {
                        if let Err(e) = transport.send(reply).await {
                            error!(error = %e, "Failed to answer tool call");
                        }
                    }
                    if reaction.stop || transport.phase() == Phase::Error {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Console fell behind the session"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(pump) = pump.take() {
        pump.abort();
    }
    transport.disconnect().await.context("Failed to close session")?;
    info!(audio_bytes = handler.audio_bytes(), "Session finished");
    if let Some(samples) = handler.finish()? {
        info!(samples, "Saved model audio");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt, future, stream};
    use gemini_realtime::{
        CloseReason, Connector, ErrorEvent, ErrorKind, FrameSink, FrameStream, FunctionCall,
        ResponseModality, SocketError, SocketFrame,
    };
    use secrecy::SecretString;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing::Level;

    fn config() -> Config {
        Config {
            gemini_api_key: SecretString::from("test-key"),
            model: "models/test-live".to_string(),
            response_modality: ResponseModality::Audio,
            voice: Some("Puck".to_string()),
            language: "en".to_string(),
            endpoint: "ws://localhost:9000/live".to_string(),
            handshake_timeout: Duration::from_secs(5),
            max_connect_attempts: 2,
            retry_base_delay: Duration::from_millis(500),
            auto_reconnect: false,
            log_level: Level::INFO,
        }
    }

    fn handler(once: bool) -> EventHandler<Vec<u8>> {
        EventHandler::new(Vec::new(), None, false, once)
    }

    fn output(handler: &EventHandler<Vec<u8>>) -> String {
        String::from_utf8(handler.out.clone()).unwrap()
    }

    #[test]
    fn test_session_config_handshake() {
        let session = session_config(&config(), None, true);
        assert!(session.validate().is_ok());

        let frame = gemini_realtime::protocol::handshake_frame(&session).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let setup = &value["setup"];
        assert_eq!(setup["model"], "models/test-live");
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(setup["generationConfig"]["audioInConfig"]["sampleRateHz"], 16000);
        assert_eq!(setup["generationConfig"]["audioInConfig"]["languageCode"], "en");
        assert_eq!(setup["tools"][0]["functionDeclarations"].as_array().unwrap().len(), 3);
        assert_eq!(
            setup["systemInstruction"]["parts"][0]["text"],
            DEFAULT_SYSTEM_INSTRUCTION
        );
    }

    #[test]
    fn test_session_config_without_audio_input() {
        let session = session_config(&config(), Some("Be brief."), false);
        assert!(session.generation_config.audio_in_config.is_none());
        let frame = gemini_realtime::protocol::handshake_frame(&session).unwrap();
        assert!(frame.contains("Be brief."));
    }

    #[test]
    fn test_transport_options_from_config() {
        let options = transport_options(&config());
        assert_eq!(options.endpoint.url(), "ws://localhost:9000/live");
        assert!(options.endpoint.request_url().ends_with("?key=test-key"));
        assert_eq!(options.handshake_timeout, Duration::from_secs(5));
        assert_eq!(options.retry, RetryPolicy::new(2, Duration::from_millis(500)));
        assert!(!options.auto_reconnect);
    }

    #[test]
    fn test_tool_call_is_answered() {
        let mut handler = handler(false);
        let reaction = handler
            .handle(SessionEvent::ToolCall(vec![
                FunctionCall {
                    id: "c1".to_string(),
                    name: viewer::LOAD_STRUCTURE.to_string(),
                    args: json!({"id": "1crn"}),
                },
                FunctionCall {
                    id: "c2".to_string(),
                    name: viewer::HIGHLIGHT_RESIDUES.to_string(),
                    args: json!({"chain": "A", "start": 3, "end": 9}),
                },
            ]))
            .unwrap();

        let frame = reaction.reply.unwrap().to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let responses = value["toolResponse"]["functionResponses"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], "c1");
        assert_eq!(responses[0]["response"]["ok"], true);
        assert_eq!(responses[1]["id"], "c2");
        assert_eq!(responses[1]["response"]["ok"], true);

        assert_eq!(handler.viewer().structure(), Some("1CRN"));
        assert_eq!(handler.viewer().highlights().len(), 1);
        assert!(!reaction.stop);
    }

    #[test]
    fn test_text_turn_and_structure_mentions() {
        let mut handler = handler(true);
        handler
            .handle(SessionEvent::Content(vec![Part::text("Loading PDB ")]))
            .unwrap();
        handler
            .handle(SessionEvent::Content(vec![Part::text("4HHB now.")]))
            .unwrap();
        let reaction = handler.handle(SessionEvent::TurnComplete).unwrap();

        assert!(reaction.stop);
        let out = output(&handler);
        assert!(out.contains("Loading PDB 4HHB now.\n"));
        assert!(out.contains("[structures mentioned: 4HHB]"));
    }

    #[test]
    fn test_interruption_discards_turn_text() {
        let mut handler = handler(false);
        handler
            .handle(SessionEvent::Content(vec![Part::text("show 1CRN")]))
            .unwrap();
        handler.handle(SessionEvent::Interrupted).unwrap();
        let reaction = handler.handle(SessionEvent::TurnComplete).unwrap();

        assert!(!reaction.stop);
        assert!(!output(&handler).contains("structures mentioned"));
    }

    /// Each `open` pops the next script entry: `true` acknowledges the
    /// handshake, `false` stays silent. An empty script refuses.
    struct ScriptedConnector {
        acks: Mutex<VecDeque<bool>>,
    }

    impl ScriptedConnector {
        fn new(acks: impl IntoIterator<Item = bool>) -> Arc<Self> {
            Arc::new(Self {
                acks: Mutex::new(acks.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(&self, _endpoint: &Endpoint) -> Result<(FrameSink, FrameStream), SocketError> {
            let ack = self
                .acks
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SocketError::new("connection refused"))?;
            let sink: FrameSink =
                Box::pin(futures::sink::drain::<String>().sink_map_err(|never: Infallible| match never {}));
            let frames: FrameStream = if ack {
                let setup = SocketFrame::Text(r#"{"setupComplete":{}}"#.to_string());
                Box::pin(stream::once(future::ready(Ok(setup))).chain(stream::pending()))
            } else {
                Box::pin(stream::pending())
            };
            Ok((sink, frames))
        }
    }

    fn remote_close() -> SessionEvent {
        SessionEvent::Close(CloseReason::Remote {
            code: Some(1000),
            reason: "bye".to_string(),
        })
    }

    #[test]
    fn test_close_stops_unless_reconnecting() {
        let mut plain = handler(false);
        plain.handle(SessionEvent::SetupComplete).unwrap();
        assert!(plain.handle(remote_close()).unwrap().stop);

        let mut reconnecting = EventHandler::new(Vec::new(), None, true, false);
        reconnecting.handle(SessionEvent::SetupComplete).unwrap();
        assert!(!reconnecting.handle(remote_close()).unwrap().stop);
    }

    #[test]
    fn test_close_before_setup_is_an_attempt_failure() {
        let mut handler = handler(false);
        handler.handle(SessionEvent::Open).unwrap();
        let reaction = handler
            .handle(SessionEvent::Close(CloseReason::Failed(
                "Handshake not acknowledged within 10s".to_string(),
            )))
            .unwrap();
        assert!(!reaction.stop);

        handler.handle(SessionEvent::Open).unwrap();
        handler.handle(SessionEvent::SetupComplete).unwrap();
        assert!(handler.handle(remote_close()).unwrap().stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_survives_timed_out_first_attempt() {
        let options = TransportOptions::new(Endpoint::new("ws://scripted.invalid/live"))
            .with_handshake_timeout(Duration::from_secs(1))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(100)));
        let transport = SessionTransport::with_connector(options, ScriptedConnector::new([false, true]));
        let mut events = transport.subscribe();

        transport
            .connect(session_config(&config(), None, false))
            .await
            .unwrap();
        assert_eq!(transport.phase(), Phase::OpenConfirmed);

        let mut handler = handler(false);
        let mut attempt_closes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::Close(CloseReason::Failed(_))) {
                attempt_closes += 1;
            }
            assert!(!handler.handle(event).unwrap().stop);
        }
        assert_eq!(attempt_closes, 1);
        assert!(output(&handler).contains("[session ready]"));

        transport.disconnect().await.unwrap();
        assert_eq!(transport.phase(), Phase::Closed);
    }

    #[test]
    fn test_protocol_errors_do_not_stop() {
        let mut handler = handler(false);
        let reaction = handler
            .handle(SessionEvent::Error(ErrorEvent::new(
                ErrorKind::Protocol,
                "Malformed frame",
            )))
            .unwrap();
        assert!(!reaction.stop);
        assert!(output(&handler).contains("[error] Malformed frame"));
    }

    #[test]
    fn test_audio_is_recorded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reply.wav");
        let recorder = WavRecorder::create(&path, LIVE_OUTPUT_SAMPLE_RATE).unwrap();

        let mut handler = EventHandler::new(Vec::new(), Some(recorder), false, false);
        handler
            .handle(SessionEvent::Audio(Bytes::from_static(&[1, 0, 2, 0])))
            .unwrap();
        handler
            .handle(SessionEvent::Audio(Bytes::from_static(&[3, 0])))
            .unwrap();
        assert_eq!(handler.audio_bytes(), 6);
        assert_eq!(handler.finish().unwrap(), Some(3));
    }

    #[test]
    fn test_malformed_audio_chunk_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reply.wav");
        let recorder = WavRecorder::create(&path, LIVE_OUTPUT_SAMPLE_RATE).unwrap();

        let mut handler = EventHandler::new(Vec::new(), Some(recorder), false, false);
        let reaction = handler
            .handle(SessionEvent::Audio(Bytes::from_static(&[1, 2, 3])))
            .unwrap();
        assert!(!reaction.stop);
        handler
            .handle(SessionEvent::Audio(Bytes::from_static(&[4, 0])))
            .unwrap();
        assert_eq!(handler.finish().unwrap(), Some(1));
    }
}
