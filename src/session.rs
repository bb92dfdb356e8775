//! Сессия клиента с SFU: одна очередь событий, обрабатываемых строго по одному.

use crate::error::{ChannelError, ProtocolError, RpcError, SignalError};
use crate::peer::engine::{EngineEvent, MediaEngine};
use crate::peer::negotiation::{
    NegotiationConfig, Negotiator, ServerOffer, METHOD_ANSWER, METHOD_JOIN, METHOD_OFFER,
    METHOD_TRICKLE,
};
use crate::peer::state::Phase;
use crate::peer::types::{ConnectionState, SessionDescription, TrickleParams};
use crate::presenter::Presenter;
use crate::registry::TrackRegistry;
use crate::rpc::{Inbound, PendingCall, RequestId, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::signaling::{ChannelEvent, SignalingChannel, Transport, CLOSE_NORMAL};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    Engine(EngineEvent),
    /// Начать переговоры (или повторить после неудачного join)
    Join,
    /// Локальное завершение сессии
    Close,
}

impl From<ChannelEvent> for SessionEvent {
    fn from(event: ChannelEvent) -> Self {
        SessionEvent::Channel(event)
    }
}

impl From<EngineEvent> for SessionEvent {
    fn from(event: EngineEvent) -> Self {
        SessionEvent::Engine(event)
    }
}

/// Отправитель в очередь сессии; клонируется в транспорт и media engine
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    /// false, если сессия уже завершилась
    pub fn push(&self, event: impl Into<SessionEvent>) -> bool {
        match self.tx.send(event.into()) {
            Ok(()) => true,
            Err(e) => {
                debug!("session is gone, dropping event {:?}", e.0);
                false
            }
        }
    }

    pub fn join(&self) -> bool {
        self.push(SessionEvent::Join)
    }

    pub fn close(&self) -> bool {
        self.push(SessionEvent::Close)
    }
}

pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventQueue {
    pub fn new() -> (EventSender, EventQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, EventQueue { rx })
    }

    /// Следующее событие; `None`, когда все отправители удалены
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub negotiation: NegotiationConfig,
    /// Присоединиться к комнате сразу после открытия канала
    pub join_on_open: bool,
    pub grace_period: Duration,
}

impl SessionConfig {
    pub fn new(negotiation: NegotiationConfig) -> Self {
        Self {
            negotiation,
            join_on_open: true,
            grace_period: crate::config::GRACE_PERIOD,
        }
    }
}

pub struct Session<T: Transport, E: MediaEngine, P: Presenter> {
    channel: SignalingChannel<T>,
    negotiator: Negotiator<E>,
    registry: TrackRegistry,
    presenter: P,
    queue: EventQueue,
    join_on_open: bool,
    grace_period: Duration,
    grace_deadline: Option<Instant>,
    connection: ConnectionState,
}

impl<T: Transport, E: MediaEngine, P: Presenter> Session<T, E, P> {
    pub fn new(config: SessionConfig, transport: T, engine: Arc<E>, presenter: P, queue: EventQueue) -> Self {
        Self {
            channel: SignalingChannel::new(transport),
            negotiator: Negotiator::new(engine, config.negotiation),
            registry: TrackRegistry::new(),
            presenter,
            queue,
            join_on_open: config.join_on_open,
            grace_period: config.grace_period,
            grace_deadline: None,
            connection: ConnectionState::New,
        }
    }

    pub fn phase(&self) -> Phase {
        self.negotiator.phase()
    }

    pub fn negotiator(&self) -> &Negotiator<E> {
        &self.negotiator
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn pending_calls(&self) -> usize {
        self.channel.pending_calls()
    }

    /// Крутит очередь до закрытия канала. Ok при локальном или нормальном закрытии.
    pub async fn run(mut self) -> Result<(), ChannelError> {
        loop {
            let deadline = self.next_deadline();
            let event = tokio::select! {
                event = self.queue.recv() => event,
                _ = wait_until(deadline) => {
                    self.on_timer().await;
                    continue;
                }
            };
            // все отправители удалены: закрываемся сами
            let event = event.unwrap_or(SessionEvent::Close);
            if let ControlFlow::Break(result) = self.handle(event).await {
                return result;
            }
        }
    }

    /// Обрабатывает одно событие целиком, включая все await на engine и канал
    pub async fn handle(&mut self, event: SessionEvent) -> ControlFlow<Result<(), ChannelError>> {
        if self.negotiator.phase() == Phase::Closed {
            debug!("session closed, ignoring {event:?}");
            return ControlFlow::Break(Ok(()));
        }

        let result = match event {
            SessionEvent::Channel(event) => match self.on_channel_event(event).await {
                ControlFlow::Continue(result) => result,
                ControlFlow::Break(end) => return ControlFlow::Break(end),
            },
            SessionEvent::Engine(event) => self.on_engine_event(event).await,
            SessionEvent::Join => self.negotiator.join(&mut self.channel).await,
            SessionEvent::Close => {
                info!("Closing session");
                let cancelled = self.channel.close().await;
                self.teardown(cancelled).await;
                return ControlFlow::Break(Ok(()));
            }
        };

        self.flush_reports();
        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(SignalError::Channel(e)) => {
                self.report_status(&format!("Signaling failed: {e}"), true);
                let cancelled = self.channel.mark_closed();
                self.teardown(cancelled).await;
                ControlFlow::Break(Err(e))
            }
            Err(e) => {
                self.report(&e);
                ControlFlow::Continue(())
            }
        }
    }

    /// Break: канал закрыт; Continue несёт результат обработки
    async fn on_channel_event(
        &mut self,
        event: ChannelEvent,
    ) -> ControlFlow<Result<(), ChannelError>, Result<(), SignalError>> {
        match event {
            ChannelEvent::Opened => {
                let room = self.negotiator.sid().to_string();
                self.report_status(&format!("Connected! Joining room: {room}"), false);
                if self.join_on_open {
                    return ControlFlow::Continue(self.negotiator.join(&mut self.channel).await);
                }
                ControlFlow::Continue(Ok(()))
            }
            ChannelEvent::Message(frame) => ControlFlow::Continue(self.on_message(&frame).await),
            ChannelEvent::Errored(reason) => {
                self.report_status(&format!("WebSocket error: {reason}"), true);
                ControlFlow::Continue(Ok(()))
            }
            ChannelEvent::Closed { code, reason } => {
                self.report_status(
                    &format!("Connection closed (code: {code}). Refresh to reconnect."),
                    true,
                );
                let cancelled = self.channel.mark_closed();
                self.teardown(cancelled).await;
                if code == CLOSE_NORMAL {
                    ControlFlow::Break(Ok(()))
                } else {
                    ControlFlow::Break(Err(ChannelError::UnexpectedClose { code, reason }))
                }
            }
        }
    }

    async fn on_message(&mut self, frame: &[u8]) -> Result<(), SignalError> {
        debug!("<- {}", String::from_utf8_lossy(frame));
        match self.channel.decode(frame)? {
            Inbound::Response { call, outcome } => self.on_response(call, outcome).await,
            Inbound::Notification { method, params } => match method.as_str() {
                METHOD_TRICKLE => {
                    let params = parse_params::<TrickleParams>(&method, params)?;
                    self.negotiator.on_remote_candidate(params).await
                }
                METHOD_OFFER => {
                    let description = parse_params::<SessionDescription>(&method, params)?;
                    let offer = ServerOffer {
                        description,
                        reply_to: None,
                    };
                    self.negotiator.on_server_offer(offer, &mut self.channel).await
                }
                _ => Err(ProtocolError::UnknownMethod(method).into()),
            },
            Inbound::Call { id, method, params } => self.on_server_call(id, method, params).await,
        }
    }

    async fn on_server_call(&mut self, id: RequestId, method: String, params: Value) -> Result<(), SignalError> {
        match method.as_str() {
            METHOD_OFFER => {
                let description = match parse_params::<SessionDescription>(&method, params) {
                    Ok(description) => description,
                    Err(e) => {
                        self.channel
                            .respond_error(&id, INVALID_PARAMS, e.to_string())
                            .await?;
                        return Err(e.into());
                    }
                };
                let offer = ServerOffer {
                    description,
                    reply_to: Some(id),
                };
                self.negotiator.on_server_offer(offer, &mut self.channel).await
            }
            METHOD_TRICKLE => {
                let params = parse_params::<TrickleParams>(&method, params)?;
                self.channel.respond(&id, &Value::Null).await?;
                self.negotiator.on_remote_candidate(params).await
            }
            _ => {
                self.channel
                    .respond_error(&id, METHOD_NOT_FOUND, format!("method '{method}' not found"))
                    .await?;
                Err(ProtocolError::UnknownMethod(method).into())
            }
        }
    }

    async fn on_response(&mut self, call: PendingCall, outcome: Result<Value, RpcError>) -> Result<(), SignalError> {
        let elapsed = chrono::Utc::now() - call.submitted_at;
        debug!(
            "response for call #{} '{}' after {} ms",
            call.id,
            call.method,
            elapsed.num_milliseconds()
        );
        match call.method.as_str() {
            METHOD_JOIN => {
                self.negotiator
                    .on_join_response(call.id, outcome, &mut self.channel)
                    .await
            }
            METHOD_ANSWER => match outcome {
                Ok(_) => Ok(()),
                Err(e) => Err(e.into()),
            },
            other => Err(ProtocolError::UnexpectedResult {
                method: other.to_string(),
                reason: "no handler for this response".into(),
            }
            .into()),
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) -> Result<(), SignalError> {
        match event {
            EngineEvent::IceCandidate(candidate) => {
                self.negotiator
                    .on_local_candidate(candidate, &mut self.channel)
                    .await
            }
            EngineEvent::TrackAdded(track) => {
                self.registry.track_added(&track, &mut self.presenter);
                let room = self.negotiator.sid().to_string();
                self.report_status(&format!("Receiving stream from room: {room}"), false);
                Ok(())
            }
            EngineEvent::TrackRemoved(track) => {
                self.registry.track_removed(&track, &mut self.presenter)?;
                Ok(())
            }
            EngineEvent::ConnectionStateChanged(state) => {
                self.on_connection_state(state);
                Ok(())
            }
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        info!("Peer connection state changed to: {state}");
        self.connection = state;
        let room = self.negotiator.sid().to_string();
        match state {
            ConnectionState::Connected => {
                if self.grace_deadline.take().is_some() {
                    info!("Connection recovered during grace period");
                }
                self.report_status(&format!("Streaming from room: {room}"), false);
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.report_status(&format!("Connection {state}. Try refreshing."), true);
                if self.grace_deadline.is_none() {
                    debug!("Grace period started, waiting {} s", self.grace_period.as_secs());
                    self.grace_deadline = Some(Instant::now() + self.grace_period);
                }
            }
            ConnectionState::Closed => {
                self.grace_deadline = None;
            }
            _ => {}
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.negotiator.join_deadline(), self.grace_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        if let Some((call, err)) = self.negotiator.on_timer(now) {
            self.channel.forget(call);
            self.report(&SignalError::from(err));
        }

        if let Some(deadline) = self.grace_deadline {
            if now >= deadline {
                self.grace_deadline = None;
                if self.connection != ConnectionState::Connected {
                    self.report_status("Connection failed: media did not recover", true);
                }
            }
        }
    }

    async fn teardown(&mut self, cancelled: Vec<(PendingCall, RpcError)>) {
        for (call, err) in cancelled {
            warn!("call #{} '{}' failed: {err}", call.id, call.method);
        }
        self.registry.clear(&mut self.presenter);
        self.negotiator.close().await;
        self.grace_deadline = None;
    }

    fn flush_reports(&mut self) {
        for e in self.negotiator.take_reports() {
            self.report(&e);
        }
    }

    fn report(&mut self, err: &SignalError) {
        match err {
            SignalError::Protocol(_) | SignalError::Registry(_) => warn!("{err}"),
            _ => error!("{err}"),
        }
        self.presenter.status(&err.to_string(), true);
    }

    fn report_status(&mut self, message: &str, is_error: bool) {
        if is_error {
            warn!("{message}");
        } else {
            info!("{message}");
        }
        self.presenter.status(message, is_error);
    }
}

fn parse_params<P: serde::de::DeserializeOwned>(method: &str, params: Value) -> Result<P, ProtocolError> {
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
