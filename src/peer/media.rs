//! Локальные треки для режима публикации.
//!
//! Источник медиа: VP8 в IVF и Opus в Ogg. Файл проигрывается по кругу в
//! темпе своих временных меток, пока трек не будет остановлен.

use crate::error::EngineError;
use crate::peer::types::TrackKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const OGG_PAGE_DURATION: Duration = Duration::from_millis(20);
const OPUS_CLOCK_RATE: u32 = 48000;
const VP8_CLOCK_RATE: u32 = 90000;

/// Файлы, которые публикуются в комнату
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaSources {
    /// VP8 в контейнере IVF
    pub video_file: Option<PathBuf>,
    /// Opus в контейнере Ogg
    pub audio_file: Option<PathBuf>,
}

impl MediaSources {
    pub fn for_kind(&self, kind: TrackKind) -> Option<&Path> {
        match kind {
            TrackKind::Audio => self.audio_file.as_deref(),
            TrackKind::Video => self.video_file.as_deref(),
        }
    }
}

pub fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: VP8_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

/// Новый локальный трек; id трека совпадает с видом, поток общий на клиента
pub fn local_track(kind: TrackKind, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        codec_capability(kind),
        kind.to_string(),
        stream_id.to_owned(),
    ))
}

/// Проигрывает файл в трек по кругу. Ошибка, если файл не даёт ни одного кадра.
pub async fn play(kind: TrackKind, path: PathBuf, track: Arc<TrackLocalStaticSample>) -> Result<(), EngineError> {
    info!("Publishing {kind} from {}", path.display());
    loop {
        let written = match kind {
            TrackKind::Video => play_ivf(&path, &track).await?,
            TrackKind::Audio => play_ogg(&path, &track).await?,
        };
        if written == 0 {
            return Err(EngineError::Media(format!("{} has no {kind} frames", path.display())));
        }
        debug!("{} finished after {written} samples, restarting", path.display());
    }
}

fn open(path: &Path) -> Result<BufReader<File>, EngineError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| EngineError::Media(format!("{}: {e}", path.display())))
}

async fn play_ivf(path: &Path, track: &TrackLocalStaticSample) -> Result<usize, EngineError> {
    let (mut reader, header) =
        IVFReader::new(open(path)?).map_err(|e| EngineError::Media(format!("{}: {e}", path.display())))?;
    if header.timebase_denominator == 0 {
        return Err(EngineError::Media(format!("{}: zero IVF timebase", path.display())));
    }
    let frame_duration = Duration::from_millis(
        u64::from(header.timebase_numerator) * 1000 / u64::from(header.timebase_denominator),
    );
    let mut ticker = tokio::time::interval(frame_duration.max(Duration::from_millis(1)));

    let mut written = 0;
    loop {
        ticker.tick().await;
        // конец файла и обрезанный кадр одинаково завершают проход
        let Ok((frame, _)) = reader.parse_next_frame() else {
            return Ok(written);
        };
        let sample = Sample {
            data: frame.freeze(),
            duration: frame_duration,
            ..Default::default()
        };
        write(track, &sample).await?;
        written += 1;
    }
}

async fn play_ogg(path: &Path, track: &TrackLocalStaticSample) -> Result<usize, EngineError> {
    let (mut reader, _header) =
        OggReader::new(open(path)?, true).map_err(|e| EngineError::Media(format!("{}: {e}", path.display())))?;
    let mut ticker = tokio::time::interval(OGG_PAGE_DURATION);

    let mut last_granule = 0;
    let mut written = 0;
    loop {
        ticker.tick().await;
        let Ok((page, header)) = reader.parse_next_page() else {
            return Ok(written);
        };
        let samples = header.granule_position.saturating_sub(last_granule);
        last_granule = header.granule_position;
        let sample = Sample {
            data: page.freeze(),
            duration: Duration::from_millis(samples * 1000 / u64::from(OPUS_CLOCK_RATE)),
            ..Default::default()
        };
        write(track, &sample).await?;
        written += 1;
    }
}

async fn write(track: &TrackLocalStaticSample, sample: &Sample) -> Result<(), EngineError> {
    track.write_sample(sample).await.map_err(|e| {
        warn!("Failed to write sample: {e}");
        EngineError::Media(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_match_kind() {
        let audio = codec_capability(TrackKind::Audio);
        assert_eq!(audio.mime_type, "audio/opus");
        assert_eq!(audio.clock_rate, 48000);
        assert_eq!(codec_capability(TrackKind::Video).mime_type, "video/VP8");
    }

    #[test]
    fn sources_are_looked_up_by_kind() {
        let sources = MediaSources {
            video_file: Some("clip.ivf".into()),
            audio_file: None,
        };
        assert_eq!(sources.for_kind(TrackKind::Video), Some(Path::new("clip.ivf")));
        assert!(sources.for_kind(TrackKind::Audio).is_none());
    }

    #[tokio::test]
    async fn missing_file_is_a_media_error() {
        let track = local_track(TrackKind::Video, "local");
        let err = play(TrackKind::Video, "/nonexistent/clip.ivf".into(), track)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Media(m) if m.contains("/nonexistent/clip.ivf")));
    }

    #[tokio::test]
    async fn file_that_is_not_ivf_is_rejected() {
        let path = std::env::temp_dir().join(format!("sfu-signal-{}.ivf", std::process::id()));
        std::fs::write(&path, b"definitely not an ivf header").unwrap();
        let track = local_track(TrackKind::Video, "local");
        let result = play(TrackKind::Video, path.clone(), track).await;
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(EngineError::Media(_))));
    }
}
