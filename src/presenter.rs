//! Сигналы наверх, для слоя отображения.
//!
//! Сигналинг ничего не рисует сам: он сообщает, когда для удалённого потока
//! нужно создать ресурс, подключить к нему дорожку и когда ресурс больше не нужен.

use crate::peer::types::TrackKind;
use tokio::sync::mpsc;

/// Непрозрачный дескриптор ресурса, созданного слоем отображения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

pub trait Presenter: Send {
    fn resource_created(&mut self, stream_id: &str, participant_id: Option<&str>) -> ResourceHandle;

    fn attach(&mut self, handle: ResourceHandle, stream_id: &str, kind: TrackKind);

    fn detach(&mut self, handle: ResourceHandle, stream_id: &str, kind: TrackKind);

    fn resource_destroyed(&mut self, handle: ResourceHandle, stream_id: &str);

    fn status(&mut self, message: &str, is_error: bool);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiSignal {
    ResourceCreated {
        handle: ResourceHandle,
        stream_id: String,
        participant_id: Option<String>,
    },
    Attach {
        stream_id: String,
        kind: TrackKind,
    },
    Detach {
        stream_id: String,
        kind: TrackKind,
    },
    ResourceDestroyed {
        stream_id: String,
    },
    Status {
        message: String,
        is_error: bool,
    },
}

/// Пересылает сигналы в канал, например в UI-поток приложения
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<UiSignal>,
    next_handle: u64,
}

impl ChannelPresenter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, next_handle: 1 }, rx)
    }

    fn emit(&self, signal: UiSignal) {
        // получатель мог уйти раньше сессии, это не ошибка
        let _ = self.tx.send(signal);
    }
}

impl Presenter for ChannelPresenter {
    fn resource_created(&mut self, stream_id: &str, participant_id: Option<&str>) -> ResourceHandle {
        let handle = ResourceHandle(self.next_handle);
        self.next_handle += 1;
        self.emit(UiSignal::ResourceCreated {
            handle,
            stream_id: stream_id.to_string(),
            participant_id: participant_id.map(str::to_string),
        });
        handle
    }

    fn attach(&mut self, _handle: ResourceHandle, stream_id: &str, kind: TrackKind) {
        self.emit(UiSignal::Attach {
            stream_id: stream_id.to_string(),
            kind,
        });
    }

    fn detach(&mut self, _handle: ResourceHandle, stream_id: &str, kind: TrackKind) {
        self.emit(UiSignal::Detach {
            stream_id: stream_id.to_string(),
            kind,
        });
    }

    fn resource_destroyed(&mut self, _handle: ResourceHandle, stream_id: &str) {
        self.emit(UiSignal::ResourceDestroyed {
            stream_id: stream_id.to_string(),
        });
    }

    fn status(&mut self, message: &str, is_error: bool) {
        self.emit(UiSignal::Status {
            message: message.to_string(),
            is_error,
        });
    }
}
