use crate::peer::state::Phase;
use std::fmt;
use thiserror::Error;

/// Ошибки транспорта сигналинга. Для сессии всегда терминальны.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open channel to {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("channel is closed")]
    Closed,

    #[error("channel closed unexpectedly (code {code}): {reason}")]
    UnexpectedClose { code: u16, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Конверт, который не удалось разобрать или маршрутизировать.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope has neither method nor id")]
    Unroutable,

    #[error("response for unknown call id {0}")]
    UnknownResponse(String),

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("invalid params for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("unexpected result for '{method}': {reason}")]
    UnexpectedResult { method: String, reason: String },

    #[error("'{method}' is not expected in phase {phase}")]
    UnexpectedInPhase { method: String, phase: Phase },
}

/// Ошибки внешнего media engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("description rejected: {0}")]
    DescriptionRejected(String),

    #[error("candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("media engine failure: {0}")]
    Failed(String),

    #[error("media source: {0}")]
    Media(String),
}

/// Шаг переговоров, на котором случился сбой.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    Join,
    JoinAnswer,
    Renegotiation,
    RemoteCandidate,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Join => "join",
            Self::JoinAnswer => "join answer",
            Self::Renegotiation => "renegotiation",
            Self::RemoteCandidate => "remote candidate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("{step} failed in phase {phase}: {source}")]
    Engine {
        step: NegotiationStep,
        phase: Phase,
        #[source]
        source: EngineError,
    },

    #[error("{step} refused by server in phase {phase}: {source}")]
    Rejected {
        step: NegotiationStep,
        phase: Phase,
        #[source]
        source: RpcError,
    },

    #[error("cannot {step} while {phase}")]
    InvalidPhase { step: NegotiationStep, phase: Phase },

    #[error("no answer for {step} within {secs}s")]
    Timeout { step: NegotiationStep, secs: u64 },
}

impl NegotiationError {
    pub fn engine(step: NegotiationStep, phase: Phase, source: EngineError) -> Self {
        Self::Engine {
            step,
            phase,
            source,
        }
    }
}

/// Ошибка отдельного RPC вызова.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("call {id} ('{method}') cancelled: channel closed")]
    Cancelled { id: u64, method: String },

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

/// Удаление трека, для которого нет записи в реестре.
#[derive(Debug, Error)]
#[error("track removal for stream '{stream_id}' ({kind}) without matching creation")]
pub struct RegistryInconsistency {
    pub stream_id: String,
    pub kind: crate::peer::types::TrackKind,
}

/// Ошибки загрузки и проверки конфигурации клиента.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Registry(#[from] RegistryInconsistency),
}

impl SignalError {
    /// Только ошибки канала завершают сессию.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Channel(_))
    }
}

pub type Result<T, E = SignalError> = std::result::Result<T, E>;
