// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::ConfigError;
use crate::peer::media::MediaSources;
use crate::peer::negotiation::NegotiationConfig;
use crate::peer::types::{ServerConfig, TrackKind, TransceiverDirection};
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

pub const DEFAULT_SFU_URL: &str = "ws://localhost:7000/ws";
pub const DEFAULT_ROOM: &str = "test room";

/// Сколько ждём восстановления медиасоединения после disconnected/failed
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Роль клиента в комнате
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Принимает потоки комнаты
    #[default]
    Viewer,
    /// Отправляет свои треки
    Publisher,
}

impl Role {
    pub fn direction(self) -> TransceiverDirection {
        match self {
            Role::Viewer => TransceiverDirection::Recvonly,
            Role::Publisher => TransceiverDirection::Sendonly,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub sfu_url: String,
    pub room: String,
    pub uid: Option<String>,
    pub ice_servers: Vec<ServerConfig>,
    pub role: Role,
    #[serde(alias = "receive_audio")]
    pub audio: bool,
    #[serde(alias = "receive_video")]
    pub video: bool,
    /// Что публиковать в роли publisher
    pub publish: MediaSources,
    /// Таймаут ответа на "join", секунды; по умолчанию ждём бесконечно
    pub join_timeout_secs: Option<u64>,
    pub grace_period_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sfu_url: DEFAULT_SFU_URL.into(),
            room: DEFAULT_ROOM.into(),
            uid: None,
            ice_servers: default_ice_servers(),
            role: Role::Viewer,
            audio: true,
            video: true,
            publish: MediaSources::default(),
            join_timeout_secs: None,
            grace_period_secs: GRACE_PERIOD.as_secs(),
        }
    }
}

impl ClientConfig {
    /// JSON-файл; отсутствующие поля берутся из значений по умолчанию
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sfu_url.is_empty() {
            return Err(ConfigError::Invalid("SFU url cannot be empty".into()));
        }
        if self.room.is_empty() {
            return Err(ConfigError::Invalid("room cannot be empty".into()));
        }
        if !self.audio && !self.video {
            return Err(ConfigError::Invalid("both audio and video are disabled".into()));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ICE server '{}': url cannot be empty",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
                return Err(ConfigError::Invalid(format!(
                    "ICE server '{}': TURN servers require username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn negotiation(&self) -> NegotiationConfig {
        let direction = self.role.direction();
        let mut transceivers = Vec::new();
        if self.audio {
            transceivers.push((TrackKind::Audio, direction));
        }
        if self.video {
            transceivers.push((TrackKind::Video, direction));
        }
        NegotiationConfig {
            sid: self.room.clone(),
            uid: self.uid.clone(),
            transceivers,
            join_timeout: self.join_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn session(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.negotiation());
        config.grace_period = Duration::from_secs(self.grace_period_secs);
        config
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
