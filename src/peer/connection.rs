//! MediaEngine поверх webrtc-rs `RTCPeerConnection`.

use crate::error::EngineError;
use crate::peer::engine::{EngineEvent, MediaEngine};
use crate::peer::media::{self, MediaSources};
use crate::peer::types::{
    ConnectionState, IceCandidateInit, SdpType, ServerConfig, SessionDescription, TrackInfo,
    TrackKind, TransceiverDirection,
};
use crate::session::EventSender;
use crate::utils::{add_ice_url_scheme, random_id};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

pub struct WebRtcEngine {
    id: String,
    pc: Arc<RTCPeerConnection>,
    sources: MediaSources,
    /// Проигрывание локальных треков; останавливается при close
    playback: Mutex<Vec<JoinHandle<()>>>,
}

impl WebRtcEngine {
    /// Создаёт peer connection; все его события уходят в очередь сессии
    pub async fn new(servers: &[ServerConfig], events: EventSender) -> Result<Self, EngineError> {
        let mut media = RtcMediaEngine::default();
        media.register_default_codecs().map_err(failed)?;
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(failed)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await.map_err(failed)?);
        let id = random_id();
        info!("Peer connection {id} created with {} ICE servers", servers.len());

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let event = match cand {
                None => Some(EngineEvent::IceCandidate(None)),
                Some(c) => match c.to_json() {
                    Ok(init) => Some(EngineEvent::IceCandidate(Some(from_rtc_candidate(init)))),
                    Err(e) => {
                        debug!("Skipping unserializable candidate: {e}");
                        None
                    }
                },
            };
            if let Some(event) = event {
                tx.push(event);
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            if let Some(state) = to_connection_state(st) {
                tx.push(EngineEvent::ConnectionStateChanged(state));
            }
            Box::pin(async {})
        }));

        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tx = events.clone();
            Box::pin(async move {
                let Some(info) = track_info(&track) else {
                    debug!("Ignoring track {} of unsupported kind", track.id());
                    return;
                };
                tx.push(EngineEvent::TrackAdded(info.clone()));
                // ошибка чтения RTP означает, что трек убран
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!("Track {} ended", info.track_id);
                    tx.push(EngineEvent::TrackRemoved(info));
                });
            })
        }));

        Ok(Self {
            id,
            pc,
            sources: MediaSources::default(),
            playback: Mutex::new(Vec::new()),
        })
    }

    /// Файлы для отправляющих трансиверов
    pub fn with_sources(mut self, sources: MediaSources) -> Self {
        self.sources = sources;
        self
    }

    /// Локальный трек до первого offer; RTCP от отправителя вычитывается,
    /// иначе interceptors не получают отчётов
    async fn add_local_track(&self, kind: TrackKind, init: RTCRtpTransceiverInit) -> Result<(), EngineError> {
        let track = media::local_track(kind, &self.id);
        let transceiver = self
            .pc
            .add_transceiver_from_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>, Some(init))
            .await
            .map_err(failed)?;
        info!("Added local {kind} track to {}", self.id);

        let sender = transceiver.sender().await;
        let mut tasks = vec![tokio::spawn(async move {
            while sender.read_rtcp().await.is_ok() {}
        })];

        match self.sources.for_kind(kind) {
            Some(path) => {
                let path = path.to_path_buf();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = media::play(kind, path, track).await {
                        warn!("Stopped publishing {kind}: {e}");
                    }
                }));
            }
            None => warn!("No {kind} source configured, the track stays silent"),
        }

        if let Ok(mut playback) = self.playback.lock() {
            playback.extend(tasks);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(failed)?;
        Ok(from_rtc_description(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(failed)?;
        Ok(from_rtc_description(answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.pc.set_local_description(desc).await.map_err(failed)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| EngineError::DescriptionRejected(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| EngineError::CandidateRejected(e.to_string()))
    }

    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> Result<(), EngineError> {
        let init = RTCRtpTransceiverInit {
            direction: to_rtc_direction(direction),
            send_encodings: vec![],
        };
        if direction.sends() {
            return self.add_local_track(kind, init).await;
        }
        self.pc
            .add_transceiver_from_kind(to_codec_type(kind), Some(init))
            .await
            .map_err(failed)?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(from_rtc_description)
    }

    async fn close(&self) -> Result<(), EngineError> {
        info!("Closing peer connection {}", self.id);
        if let Ok(mut playback) = self.playback.lock() {
            for task in playback.drain(..) {
                task.abort();
            }
        }
        self.pc.close().await.map_err(failed)
    }
}

fn failed(e: webrtc::Error) -> EngineError {
    EngineError::Failed(e.to_string())
}

/// Конфигурация peer connection; без серверов используются STUN Google
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = if servers.is_empty() {
        vec![RTCIceServer {
            urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            ..Default::default()
        }]
    } else {
        get_user_ice_servers(servers)
    };

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn track_info(track: &TrackRemote) -> Option<TrackInfo> {
    let kind = match track.kind() {
        RTPCodecType::Audio => TrackKind::Audio,
        RTPCodecType::Video => TrackKind::Video,
        _ => return None,
    };
    Some(TrackInfo {
        track_id: track.id(),
        kind,
        stream_id: track.stream_id(),
        participant_id: None,
    })
}

fn to_codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn to_rtc_direction(direction: TransceiverDirection) -> RTCRtpTransceiverDirection {
    match direction {
        TransceiverDirection::Sendrecv => RTCRtpTransceiverDirection::Sendrecv,
        TransceiverDirection::Sendonly => RTCRtpTransceiverDirection::Sendonly,
        TransceiverDirection::Recvonly => RTCRtpTransceiverDirection::Recvonly,
        TransceiverDirection::Inactive => RTCRtpTransceiverDirection::Inactive,
    }
}

fn to_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    Some(match state {
        RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => return None,
    })
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let rejected = |e: webrtc::Error| EngineError::DescriptionRejected(e.to_string());
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp).map_err(rejected),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp).map_err(rejected),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp).map_err(rejected),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = desc.sdp;
            Ok(rollback)
        }
    }
}

fn from_rtc_description(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Offer,
    };
    SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    }
}

fn to_rtc_candidate(candidate: IceCandidateInit) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidateInit {
    IceCandidateInit {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
