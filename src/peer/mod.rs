pub mod connection;
pub mod engine;
pub mod ice;
pub mod media;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::WebRtcEngine;
pub use engine::{EngineEvent, MediaEngine};
pub use media::MediaSources;
pub use negotiation::{NegotiationConfig, Negotiator, ServerOffer};
pub use state::{DescriptionState, Phase};
pub use types::{
    ConnectionState, IceCandidateInit, SdpType, ServerConfig, SessionDescription, TrackInfo,
    TrackKind, TransceiverDirection, TrickleTarget,
};
