use crate::error::EngineError;
use crate::peer::types::{
    ConnectionState, IceCandidateInit, SessionDescription, TrackInfo, TrackKind,
    TransceiverDirection,
};
use async_trait::async_trait;

/// Операции peer connection, которые нужны сигналингу
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// `DescriptionRejected` для некорректного или несовместимого SDP
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// `CandidateRejected`, если кандидат не применился
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), EngineError>;

    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> Result<(), EngineError>;

    /// Текущее локальное описание (после set_local_description оно может
    /// отличаться от созданного, например содержать кандидатов)
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// События media engine; доставляются через очередь сессии
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// `None` означает конец сбора кандидатов
    IceCandidate(Option<IceCandidateInit>),
    TrackAdded(TrackInfo),
    TrackRemoved(TrackInfo),
    ConnectionStateChanged(ConnectionState),
}
