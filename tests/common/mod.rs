#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use sfu_signal::error::{ChannelError, EngineError};
use sfu_signal::peer::{
    IceCandidateInit, MediaEngine, NegotiationConfig, SdpType, SessionDescription, TrackKind,
    TransceiverDirection,
};
use sfu_signal::presenter::{ChannelPresenter, UiSignal};
use sfu_signal::signaling::{ChannelEvent, Transport};
use sfu_signal::{EventQueue, EventSender, Session, SessionConfig, SessionEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Транспорт в памяти: каждый отправленный кадр разбирается и сохраняется
#[derive(Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<Value>>>,
    closed: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|f| f["method"].as_str().unwrap_or("<response>").to_string())
            .collect()
    }

    pub fn take(&self) -> Vec<Value> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: Bytes) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let value = serde_json::from_slice(&frame).map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.sent.lock().unwrap().push(value);
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    AddTransceiver(TrackKind, TransceiverDirection),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SessionDescription),
    AddCandidate(String),
    Close,
}

/// Media engine, который записывает вызовы и отказывает по команде
#[derive(Default)]
pub struct ScriptedEngine {
    calls: Mutex<Vec<EngineCall>>,
    reject_remote: Mutex<bool>,
    reject_candidates: Mutex<bool>,
    offers: Mutex<u32>,
}

impl ScriptedEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::SetRemote(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn reject_remote_descriptions(&self, reject: bool) {
        *self.reject_remote.lock().unwrap() = reject;
    }

    pub fn reject_candidates(&self, reject: bool) {
        *self.reject_candidates.lock().unwrap() = reject;
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaEngine for ScriptedEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.record(EngineCall::CreateOffer);
        let n = {
            let mut offers = self.offers.lock().unwrap();
            *offers += 1;
            *offers
        };
        Ok(SessionDescription::offer(format!("local-offer-{n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.record(EngineCall::CreateAnswer);
        Ok(SessionDescription::answer("local-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.record(EngineCall::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        if *self.reject_remote.lock().unwrap() {
            return Err(EngineError::DescriptionRejected("scripted rejection".into()));
        }
        self.record(EngineCall::SetRemote(desc));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), EngineError> {
        if *self.reject_candidates.lock().unwrap() {
            return Err(EngineError::CandidateRejected(candidate.candidate));
        }
        self.record(EngineCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::AddTransceiver(kind, direction));
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        None
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Close);
        Ok(())
    }
}

pub type TestSession = Session<MockTransport, ScriptedEngine, ChannelPresenter>;

pub struct Harness {
    pub session: TestSession,
    pub transport: MockTransport,
    pub engine: Arc<ScriptedEngine>,
    pub ui: UnboundedReceiver<UiSignal>,
    /// Очередь сессии, когда её крутит `Session::run`
    pub events: EventSender,
}

impl Harness {
    pub fn new(room: &str) -> Self {
        Self::with_config(NegotiationConfig::new(room))
    }

    pub fn with_config(negotiation: NegotiationConfig) -> Self {
        let mut config = SessionConfig::new(negotiation);
        config.grace_period = Duration::from_secs(10);
        let transport = MockTransport::default();
        let engine = Arc::new(ScriptedEngine::default());
        let (presenter, ui) = ChannelPresenter::new();
        let (events, queue) = EventQueue::new();
        let session = Session::new(config, transport.clone(), engine.clone(), presenter, queue);
        Self {
            session,
            transport,
            engine,
            ui,
            events,
        }
    }

    /// Обрабатывает одно событие; паника, если сессия завершилась
    pub async fn feed(&mut self, event: impl Into<SessionEvent>) {
        let flow = self.session.handle(event.into()).await;
        assert!(flow.is_continue(), "session ended unexpectedly: {flow:?}");
    }

    pub async fn receive(&mut self, frame: Value) {
        self.feed(ChannelEvent::Message(Bytes::from(frame.to_string()))).await;
    }

    /// Открывает канал и завершает обмен join
    pub async fn joined(&mut self) {
        self.feed(ChannelEvent::Opened).await;
        let id = self.transport.sent()[0]["id"].clone();
        self.receive(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"type": "answer", "sdp": "sfu-answer"}
        }))
        .await;
    }

    pub fn ui_signals(&mut self) -> Vec<UiSignal> {
        drain(&mut self.ui)
    }

    pub fn statuses(&mut self) -> Vec<(String, bool)> {
        statuses(&mut self.ui)
    }
}

pub fn drain(ui: &mut UnboundedReceiver<UiSignal>) -> Vec<UiSignal> {
    let mut out = Vec::new();
    while let Ok(signal) = ui.try_recv() {
        out.push(signal);
    }
    out
}

pub fn statuses(ui: &mut UnboundedReceiver<UiSignal>) -> Vec<(String, bool)> {
    drain(ui)
        .into_iter()
        .filter_map(|s| match s {
            UiSignal::Status { message, is_error } => Some((message, is_error)),
            _ => None,
        })
        .collect()
}

pub fn candidate(n: u32) -> Value {
    serde_json::json!({
        "candidate": format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
        "sdpMid": "0",
        "sdpMLineIndex": 0
    })
}

pub fn candidate_line(n: u32) -> String {
    format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host")
}
