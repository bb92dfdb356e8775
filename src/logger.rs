//! Логирование с временными метками и presenter, который только пишет в лог.

use crate::peer::types::TrackKind;
use crate::presenter::{Presenter, ResourceHandle};
use tracing::{error, info};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Ставит глобальный subscriber. Уровень берётся из RUST_LOG, по умолчанию info.
pub fn init() {
    if !enabled() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // повторная инициализация (например, из тестов) не ошибка
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(false)
        .try_init();
}

fn enabled() -> bool {
    crate::config::LOGGING_ENABLED && crate::config::dev::ENABLE_LOGGING
}

/// Presenter для консольного клиента: ресурсов нет, только события в логе
#[derive(Debug, Default)]
pub struct LogPresenter {
    next_handle: u64,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for LogPresenter {
    fn resource_created(&mut self, stream_id: &str, participant_id: Option<&str>) -> ResourceHandle {
        self.next_handle += 1;
        info!(
            "New remote stream {stream_id} (participant {})",
            participant_id.unwrap_or("unknown")
        );
        ResourceHandle(self.next_handle)
    }

    fn attach(&mut self, handle: ResourceHandle, stream_id: &str, kind: TrackKind) {
        info!("Attached {kind} of {stream_id} to #{}", handle.0);
    }

    fn detach(&mut self, handle: ResourceHandle, stream_id: &str, kind: TrackKind) {
        info!("Detached {kind} of {stream_id} from #{}", handle.0);
    }

    fn resource_destroyed(&mut self, handle: ResourceHandle, stream_id: &str) {
        info!("Remote stream {stream_id} gone (#{})", handle.0);
    }

    fn status(&mut self, message: &str, is_error: bool) {
        if is_error {
            error!("status: {message}");
        } else {
            info!("status: {message}");
        }
    }
}
