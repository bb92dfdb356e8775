use super::{ChannelEvent, Transport, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS};
use crate::error::ChannelError;
use crate::session::EventSender;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use tracing::{debug, error, info, warn};

/// WebSocket транспорт: текстовые кадры, один JSON-RPC конверт на кадр
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Подключается к `url`; события канала идут в очередь сессии в порядке получения
    pub async fn open(url: &str, events: EventSender) -> Result<Self, ChannelError> {
        info!("Connecting to {url}");
        let (stream, _response) = connect_async(url).await.map_err(|e| {
            let reason = e.to_string();
            events.push(ChannelEvent::Errored(reason.clone()));
            ChannelError::Open {
                url: url.to_string(),
                reason,
            }
        })?;

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        // писатель завершится сам, когда отправитель `outgoing` будет удалён
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    error!("Failed to send WebSocket message: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        events.push(ChannelEvent::Opened);

        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        reader_events.push(ChannelEvent::Message(Bytes::from(text)));
                    }
                    Ok(Message::Binary(data)) => {
                        reader_events.push(ChannelEvent::Message(Bytes::from(data)));
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.into_owned()),
                            None => (CLOSE_NO_STATUS, String::new()),
                        };
                        debug!("WebSocket closed by server: {code} {reason}");
                        reader_events.push(ChannelEvent::Closed { code, reason });
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error: {e}");
                        reader_events.push(ChannelEvent::Errored(e.to_string()));
                        reader_events.push(ChannelEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }
            reader_events.push(ChannelEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: "stream ended".into(),
            });
        });

        Ok(Self { outgoing, reader })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: Bytes) -> Result<(), ChannelError> {
        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| ChannelError::Transport(format!("frame is not UTF-8: {e}")))?;
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| ChannelError::Closed)
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let frame = CloseFrame {
            code: CloseCode::from(CLOSE_NORMAL),
            reason: Cow::Borrowed("client closed"),
        };
        self.outgoing
            .send(Message::Close(Some(frame)))
            .map_err(|_| ChannelError::Closed)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
