//! Реестр удалённых потоков: stream id → ресурс отображения.
//!
//! Запись существует, пока у потока есть хотя бы один вид дорожки.
//! Ресурс создаётся и уничтожается ровно один раз за жизнь записи.

use crate::error::RegistryInconsistency;
use crate::peer::types::{TrackInfo, TrackKind};
use crate::presenter::{Presenter, ResourceHandle};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub participant_id: Option<String>,
    pub kinds: BTreeSet<TrackKind>,
    pub handle: ResourceHandle,
}

#[derive(Debug, Default)]
pub struct TrackRegistry {
    streams: HashMap<String, RemoteStream>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_added(&mut self, track: &TrackInfo, presenter: &mut dyn Presenter) {
        info!(
            "Received {} track {} for stream {}",
            track.kind, track.track_id, track.stream_id
        );

        let entry = self
            .streams
            .entry(track.stream_id.clone())
            .or_insert_with(|| {
                let handle =
                    presenter.resource_created(&track.stream_id, track.participant_id.as_deref());
                debug!("Created resource {handle:?} for stream {}", track.stream_id);
                RemoteStream {
                    stream_id: track.stream_id.clone(),
                    participant_id: track.participant_id.clone(),
                    kinds: BTreeSet::new(),
                    handle,
                }
            });

        if entry.participant_id.is_none() && track.participant_id.is_some() {
            entry.participant_id = track.participant_id.clone();
        }

        if entry.kinds.insert(track.kind) {
            presenter.attach(entry.handle, &entry.stream_id, track.kind);
        } else {
            debug!(
                "Stream {} already has {} attached, ignoring track {}",
                track.stream_id, track.kind, track.track_id
            );
        }
    }

    pub fn track_removed(
        &mut self,
        track: &TrackInfo,
        presenter: &mut dyn Presenter,
    ) -> Result<(), RegistryInconsistency> {
        let inconsistency = || RegistryInconsistency {
            stream_id: track.stream_id.clone(),
            kind: track.kind,
        };

        let entry = self.streams.get_mut(&track.stream_id).ok_or_else(inconsistency)?;
        if !entry.kinds.remove(&track.kind) {
            return Err(inconsistency());
        }
        presenter.detach(entry.handle, &entry.stream_id, track.kind);

        if entry.kinds.is_empty() {
            if let Some(stream) = self.streams.remove(&track.stream_id) {
                info!("Stream {} has no tracks left, removing", stream.stream_id);
                presenter.resource_destroyed(stream.handle, &stream.stream_id);
            }
        }
        Ok(())
    }

    /// Освобождает все ресурсы; вызывается при закрытии сессии
    pub fn clear(&mut self, presenter: &mut dyn Presenter) {
        let mut ids: Vec<String> = self.streams.keys().cloned().collect();
        ids.sort();
        for id in ids {
            if let Some(stream) = self.streams.remove(&id) {
                teardown(stream, presenter);
            }
        }
    }

    pub fn get(&self, stream_id: &str) -> Option<&RemoteStream> {
        self.streams.get(stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

fn teardown(stream: RemoteStream, presenter: &mut dyn Presenter) {
    for kind in &stream.kinds {
        presenter.detach(stream.handle, &stream.stream_id, *kind);
    }
    presenter.resource_destroyed(stream.handle, &stream.stream_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::{ChannelPresenter, UiSignal};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn track(stream: &str, kind: TrackKind) -> TrackInfo {
        TrackInfo {
            track_id: format!("{stream}-{kind}"),
            kind,
            stream_id: stream.to_string(),
            participant_id: None,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<UiSignal>) -> Vec<UiSignal> {
        let mut out = Vec::new();
        while let Ok(s) = rx.try_recv() {
            out.push(s);
        }
        out
    }

    #[test]
    fn duplicate_kind_attaches_once() {
        let (mut presenter, mut rx) = ChannelPresenter::new();
        let mut registry = TrackRegistry::new();

        registry.track_added(&track("s1", TrackKind::Video), &mut presenter);
        registry.track_added(&track("s1", TrackKind::Video), &mut presenter);

        let signals = drain(&mut rx);
        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[0], UiSignal::ResourceCreated { .. }));
        assert_eq!(
            signals[1],
            UiSignal::Attach {
                stream_id: "s1".into(),
                kind: TrackKind::Video
            }
        );

        registry.track_removed(&track("s1", TrackKind::Video), &mut presenter).unwrap();
        let signals = drain(&mut rx);
        assert_eq!(
            signals,
            vec![
                UiSignal::Detach {
                    stream_id: "s1".into(),
                    kind: TrackKind::Video
                },
                UiSignal::ResourceDestroyed {
                    stream_id: "s1".into()
                },
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn stream_survives_until_last_kind_is_removed() {
        let (mut presenter, mut rx) = ChannelPresenter::new();
        let mut registry = TrackRegistry::new();

        registry.track_added(&track("s1", TrackKind::Video), &mut presenter);
        registry.track_added(&track("s1", TrackKind::Audio), &mut presenter);
        registry.track_removed(&track("s1", TrackKind::Video), &mut presenter).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!drain(&mut rx)
            .iter()
            .any(|s| matches!(s, UiSignal::ResourceDestroyed { .. })));

        registry.track_removed(&track("s1", TrackKind::Audio), &mut presenter).unwrap();
        let destroyed = drain(&mut rx)
            .into_iter()
            .filter(|s| matches!(s, UiSignal::ResourceDestroyed { .. }))
            .count();
        assert_eq!(destroyed, 1);
        assert!(registry.get("s1").is_none());
    }

    #[test]
    fn removal_before_creation_is_a_noop() {
        let (mut presenter, mut rx) = ChannelPresenter::new();
        let mut registry = TrackRegistry::new();

        let err = registry
            .track_removed(&track("ghost", TrackKind::Audio), &mut presenter)
            .unwrap_err();
        assert_eq!(err.stream_id, "ghost");

        registry.track_added(&track("s1", TrackKind::Video), &mut presenter);
        assert!(registry
            .track_removed(&track("s1", TrackKind::Audio), &mut presenter)
            .is_err());
        assert_eq!(registry.get("s1").map(|s| s.kinds.len()), Some(1));
        assert!(drain(&mut rx)
            .iter()
            .all(|s| !matches!(s, UiSignal::Detach { .. } | UiSignal::ResourceDestroyed { .. })));
    }

    #[test]
    fn participant_is_filled_in_later() {
        let (mut presenter, _rx) = ChannelPresenter::new();
        let mut registry = TrackRegistry::new();

        registry.track_added(&track("s1", TrackKind::Audio), &mut presenter);
        let mut video = track("s1", TrackKind::Video);
        video.participant_id = Some("alice".into());
        registry.track_added(&video, &mut presenter);

        assert_eq!(
            registry.get("s1").and_then(|s| s.participant_id.as_deref()),
            Some("alice")
        );
    }

    #[test]
    fn clear_tears_down_everything() {
        let (mut presenter, mut rx) = ChannelPresenter::new();
        let mut registry = TrackRegistry::new();

        registry.track_added(&track("a", TrackKind::Audio), &mut presenter);
        registry.track_added(&track("a", TrackKind::Video), &mut presenter);
        registry.track_added(&track("b", TrackKind::Video), &mut presenter);
        drain(&mut rx);

        registry.clear(&mut presenter);
        let signals = drain(&mut rx);
        let destroyed: Vec<_> = signals
            .iter()
            .filter_map(|s| match s {
                UiSignal::ResourceDestroyed { stream_id } => Some(stream_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(destroyed, ["a", "b"]);
        assert_eq!(
            signals.iter().filter(|s| matches!(s, UiSignal::Detach { .. })).count(),
            3
        );
        assert!(registry.is_empty());
    }
}
