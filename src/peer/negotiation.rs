//! Машина состояний offer/answer с SFU.
//!
//! Все методы вызываются из одной очереди событий сессии, поэтому внутри нет
//! блокировок: пока один обмен не завершён, следующий offer ждёт в очереди.

use crate::error::{
    EngineError, NegotiationError, NegotiationStep, ProtocolError, RpcError, SignalError,
};
use crate::peer::engine::MediaEngine;
use crate::peer::ice::{apply_pending_candidates, describe_candidate, CandidateQueue, CandidateStats};
use crate::peer::state::{DescriptionState, Phase};
use crate::peer::types::{
    IceCandidateInit, JoinParams, SdpType, SessionDescription, TrackKind, TransceiverDirection,
    Trickle, TrickleParams, TrickleTarget,
};
use crate::rpc::{CallId, RequestId};
use crate::signaling::{SignalingChannel, Transport};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const METHOD_JOIN: &str = "join";
pub const METHOD_TRICKLE: &str = "trickle";
pub const METHOD_OFFER: &str = "offer";
pub const METHOD_ANSWER: &str = "answer";

#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    pub sid: String,
    pub uid: Option<String>,
    pub transceivers: Vec<(TrackKind, TransceiverDirection)>,
    pub join_timeout: Option<Duration>,
}

impl NegotiationConfig {
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            uid: None,
            transceivers: Vec::new(),
            join_timeout: None,
        }
    }
}

/// Offer от сервера; `reply_to` задан, если он пришёл как вызов
#[derive(Debug, Clone)]
pub struct ServerOffer {
    pub description: SessionDescription,
    pub reply_to: Option<RequestId>,
}

pub struct Negotiator<E: MediaEngine> {
    engine: Arc<E>,
    config: NegotiationConfig,
    phase: Phase,
    descriptions: DescriptionState,
    pending_remote: CandidateQueue,
    pending_local: CandidateQueue,
    queued_offers: VecDeque<ServerOffer>,
    join_call: Option<CallId>,
    join_deadline: Option<Instant>,
    transceivers_added: bool,
    local_stats: CandidateStats,
    reports: Vec<SignalError>,
}

impl<E: MediaEngine> Negotiator<E> {
    pub fn new(engine: Arc<E>, config: NegotiationConfig) -> Self {
        Self {
            engine,
            config,
            phase: Phase::Idle,
            descriptions: DescriptionState::default(),
            pending_remote: CandidateQueue::new(),
            pending_local: CandidateQueue::new(),
            queued_offers: VecDeque::new(),
            join_call: None,
            join_deadline: None,
            transceivers_added: false,
            local_stats: CandidateStats::default(),
            reports: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sid(&self) -> &str {
        &self.config.sid
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    pub fn queued_offers(&self) -> usize {
        self.queued_offers.len()
    }

    pub fn join_deadline(&self) -> Option<Instant> {
        self.join_deadline
    }

    /// Нефатальные ошибки, накопленные за последнее событие
    pub fn take_reports(&mut self) -> Vec<SignalError> {
        std::mem::take(&mut self.reports)
    }

    /// Сбой на шаге `step`: откат в последнюю стабильную фазу
    fn fail(&mut self, step: NegotiationStep, source: EngineError) -> SignalError {
        let phase = self.phase;
        self.set_stable(phase.stable());
        NegotiationError::engine(step, phase, source).into()
    }

    /// Offers брошенного join не переживают возврат в Idle
    fn set_stable(&mut self, phase: Phase) {
        self.phase = phase;
        if phase == Phase::Idle && !self.queued_offers.is_empty() {
            debug!("Dropping {} offer(s) queued during failed join", self.queued_offers.len());
            self.queued_offers.clear();
        }
    }

    /// Idle → Joining: offer уходит вызовом "join"
    pub async fn join<T: Transport>(&mut self, channel: &mut SignalingChannel<T>) -> Result<(), SignalError> {
        let step = NegotiationStep::Join;
        if self.phase != Phase::Idle {
            return Err(NegotiationError::InvalidPhase {
                step,
                phase: self.phase,
            }
            .into());
        }

        if !self.transceivers_added {
            for (kind, direction) in self.config.transceivers.clone() {
                debug!("Adding {kind} transceiver ({direction:?})");
                if let Err(e) = self.engine.add_transceiver(kind, direction).await {
                    return Err(self.fail(step, e));
                }
            }
            self.transceivers_added = true;
        }

        let offer = match self.engine.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(step, e)),
        };
        if let Err(e) = self.engine.set_local_description(offer.clone()).await {
            return Err(self.fail(step, e));
        }
        self.descriptions.local = Some(SdpType::Offer);
        let offer = self.engine.local_description().await.unwrap_or(offer);

        let params = JoinParams {
            sid: self.config.sid.clone(),
            uid: self.config.uid.clone(),
            offer,
        };
        let id = channel.call(METHOD_JOIN, &params).await?;
        self.join_call = Some(id);
        self.join_deadline = self.config.join_timeout.map(|t| Instant::now() + t);
        self.phase = Phase::Joining;
        info!("Joining room '{}' (call #{id})", self.config.sid);

        // кандидаты, найденные до отправки join
        for candidate in self.pending_local.take_all() {
            self.send_trickle(candidate, channel).await?;
        }
        Ok(())
    }

    /// Ответ на "join": remote description, затем отложенные кандидаты
    pub async fn on_join_response<T: Transport>(
        &mut self,
        call_id: CallId,
        outcome: Result<Value, RpcError>,
        channel: &mut SignalingChannel<T>,
    ) -> Result<(), SignalError> {
        if self.phase != Phase::Joining || self.join_call != Some(call_id) {
            return Err(ProtocolError::UnexpectedInPhase {
                method: METHOD_JOIN.into(),
                phase: self.phase,
            }
            .into());
        }
        self.join_call = None;
        self.join_deadline = None;

        let step = NegotiationStep::JoinAnswer;
        let value = match outcome {
            Ok(value) => value,
            Err(source) => {
                self.set_stable(Phase::Idle);
                return Err(NegotiationError::Rejected {
                    step,
                    phase: Phase::Joining,
                    source,
                }
                .into());
            }
        };

        let answer: SessionDescription = match serde_json::from_value(value) {
            Ok(answer) => answer,
            Err(e) => {
                self.set_stable(Phase::Idle);
                return Err(ProtocolError::UnexpectedResult {
                    method: METHOD_JOIN.into(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        info!("Received SFU answer");
        let sdp_type = answer.sdp_type;
        if let Err(e) = self.engine.set_remote_description(answer).await {
            return Err(self.fail(step, e));
        }
        self.descriptions.remote = Some(sdp_type);
        self.flush_remote().await;
        self.phase = Phase::Joined;
        info!("Joined room '{}'", self.config.sid);

        self.drain_offers(channel).await
    }

    /// Локальный кандидат от engine; `None` (конец сбора) не отправляется
    pub async fn on_local_candidate<T: Transport>(
        &mut self,
        candidate: Option<IceCandidateInit>,
        channel: &mut SignalingChannel<T>,
    ) -> Result<(), SignalError> {
        let Some(candidate) = candidate else {
            debug!("ICE candidate gathering completed (null candidate received)");
            self.local_stats.log_summary();
            return Ok(());
        };

        match self.phase {
            Phase::Closed => Ok(()),
            Phase::Idle => {
                debug!("Not joined yet, queuing local candidate");
                self.pending_local.push(candidate);
                Ok(())
            }
            _ => self.send_trickle(candidate, channel).await,
        }
    }

    async fn send_trickle<T: Transport>(
        &mut self,
        candidate: IceCandidateInit,
        channel: &mut SignalingChannel<T>,
    ) -> Result<(), SignalError> {
        debug!("Sending ICE candidate: {}", describe_candidate(&candidate));
        self.local_stats.record(&candidate);
        channel
            .notify(
                METHOD_TRICKLE,
                &Trickle {
                    candidate,
                    target: TrickleTarget::Publisher,
                },
            )
            .await
    }

    /// Удалённый кандидат: сразу, если remote description есть, иначе в очередь
    pub async fn on_remote_candidate(&mut self, params: TrickleParams) -> Result<(), SignalError> {
        let Some(candidate) = params.candidate else {
            debug!("Remote end of candidates (target {:?})", params.target);
            return Ok(());
        };
        if self.phase == Phase::Closed {
            return Ok(());
        }

        if self.descriptions.has_remote() {
            debug!("Received ICE candidate: {}", candidate.candidate);
            let phase = self.phase;
            self.engine.add_ice_candidate(candidate).await.map_err(|e| {
                SignalError::from(NegotiationError::engine(NegotiationStep::RemoteCandidate, phase, e))
            })
        } else {
            debug!("Remote description not set yet, queuing candidate");
            self.pending_remote.push(candidate);
            Ok(())
        }
    }

    /// Offer от SFU. Пока идёт другой обмен, offer ждёт своей очереди.
    pub async fn on_server_offer<T: Transport>(
        &mut self,
        offer: ServerOffer,
        channel: &mut SignalingChannel<T>,
    ) -> Result<(), SignalError> {
        match self.phase {
            Phase::Closed => Ok(()),
            Phase::Idle => Err(ProtocolError::UnexpectedInPhase {
                method: METHOD_OFFER.into(),
                phase: Phase::Idle,
            }
            .into()),
            Phase::Joining | Phase::Renegotiating => {
                debug!("Exchange in flight ({}), queuing server offer", self.phase);
                self.queued_offers.push_back(offer);
                Ok(())
            }
            Phase::Joined => {
                self.queued_offers.push_back(offer);
                self.drain_offers(channel).await
            }
        }
    }

    async fn drain_offers<T: Transport>(&mut self, channel: &mut SignalingChannel<T>) -> Result<(), SignalError> {
        while self.phase == Phase::Joined {
            let Some(offer) = self.queued_offers.pop_front() else {
                break;
            };
            if let Err(e) = self.renegotiate(offer, channel).await {
                if e.is_terminal() {
                    return Err(e);
                }
                self.reports.push(e);
            }
        }
        Ok(())
    }

    async fn renegotiate<T: Transport>(
        &mut self,
        offer: ServerOffer,
        channel: &mut SignalingChannel<T>,
    ) -> Result<(), SignalError> {
        let step = NegotiationStep::Renegotiation;
        info!("Received renegotiation offer from SFU");
        self.phase = Phase::Renegotiating;

        let sdp_type = offer.description.sdp_type;
        if let Err(e) = self.engine.set_remote_description(offer.description).await {
            return Err(self.fail(step, e));
        }
        self.descriptions.remote = Some(sdp_type);
        self.flush_remote().await;

        let answer = match self.engine.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(step, e)),
        };
        if let Err(e) = self.engine.set_local_description(answer.clone()).await {
            return Err(self.fail(step, e));
        }
        self.descriptions.local = Some(SdpType::Answer);
        let answer = self.engine.local_description().await.unwrap_or(answer);

        let sent = send_answer(channel, offer.reply_to.as_ref(), &answer).await;
        self.phase = Phase::Joined;
        sent?;
        debug!("Renegotiation answer sent");
        Ok(())
    }

    async fn flush_remote(&mut self) {
        let phase = self.phase;
        for e in apply_pending_candidates(self.engine.as_ref(), &mut self.pending_remote).await {
            self.reports
                .push(NegotiationError::engine(NegotiationStep::RemoteCandidate, phase, e).into());
        }
    }

    /// Проверка таймаута "join"; возвращает call id, который больше не ждём
    pub fn on_timer(&mut self, now: Instant) -> Option<(CallId, NegotiationError)> {
        let deadline = self.join_deadline?;
        if now < deadline {
            return None;
        }
        self.join_deadline = None;
        if self.phase != Phase::Joining {
            return None;
        }
        self.set_stable(Phase::Idle);
        let call = self.join_call.take()?;
        let secs = self.config.join_timeout.map(|t| t.as_secs()).unwrap_or_default();
        warn!("Join call #{call} timed out after {secs}s");
        Some((
            call,
            NegotiationError::Timeout {
                step: NegotiationStep::Join,
                secs,
            },
        ))
    }

    /// Терминальная фаза; очереди больше никогда не понадобятся
    pub async fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        info!("Negotiation closed in phase {}", self.phase);
        self.phase = Phase::Closed;
        self.join_call = None;
        self.join_deadline = None;
        self.pending_remote.clear();
        self.pending_local.clear();
        self.queued_offers.clear();
        if let Err(e) = self.engine.close().await {
            warn!("Failed to close media engine: {e}");
        }
    }
}

/// Ответ на offer-вызов с тем же id (если был), затем вызов "answer"
async fn send_answer<T: Transport>(
    channel: &mut SignalingChannel<T>,
    reply_to: Option<&RequestId>,
    answer: &SessionDescription,
) -> Result<(), SignalError> {
    if let Some(id) = reply_to {
        channel.respond(id, answer).await?;
    }
    channel.call(METHOD_ANSWER, answer).await?;
    Ok(())
}
