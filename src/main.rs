use anyhow::Context;
use clap::Parser;
use sfu_signal::config::Role;
use sfu_signal::{logger, ClientConfig};
use std::path::PathBuf;

/// Подключается к комнате ion-sfu: принимает её потоки или публикует свои
#[derive(Parser, Debug)]
#[command(name = "sfu-client", version, about)]
struct Args {
    /// JSON-файл с конфигурацией клиента
    #[arg(short, long, env = "SFU_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket URL сигналинга SFU
    #[arg(long, env = "SFU_URL")]
    sfu: Option<String>,

    /// Комната (sid)
    #[arg(short, long, env = "SFU_ROOM")]
    room: Option<String>,

    #[arg(long, env = "SFU_UID")]
    uid: Option<String>,

    /// Сколько секунд ждать ответа на join
    #[arg(long)]
    join_timeout: Option<u64>,

    #[arg(long)]
    no_audio: bool,

    #[arg(long)]
    no_video: bool,

    /// Публиковать вместо просмотра
    #[arg(long)]
    publish: bool,

    /// VP8 в IVF для публикации
    #[arg(long, requires = "publish")]
    video_file: Option<PathBuf>,

    /// Opus в Ogg для публикации
    #[arg(long, requires = "publish")]
    audio_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        if let Some(sfu) = self.sfu {
            config.sfu_url = sfu;
        }
        if let Some(room) = self.room {
            config.room = room;
        }
        if self.uid.is_some() {
            config.uid = self.uid;
        }
        if self.join_timeout.is_some() {
            config.join_timeout_secs = self.join_timeout;
        }
        if self.publish {
            config.role = Role::Publisher;
        }
        if self.video_file.is_some() {
            config.publish.video_file = self.video_file;
        }
        if self.audio_file.is_some() {
            config.publish.audio_file = self.audio_file;
        }
        config.audio &= !self.no_audio;
        config.video &= !self.no_video;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();

    let config = Args::parse().into_config().context("invalid configuration")?;
    sfu_signal::run(config).await.context("session ended with an error")?;
    Ok(())
}
