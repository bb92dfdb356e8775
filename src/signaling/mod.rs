//! Канал сигналинга: транспорт + JSON-RPC кодек.

pub mod websocket;

use crate::error::{ChannelError, ProtocolError, RpcError, SignalError};
use crate::rpc::{CallId, ErrorObject, Inbound, PendingCall, RequestId, RpcCodec};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

pub use websocket::WebSocketTransport;

/// События жизненного цикла транспорта, в порядке получения
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(Bytes),
    Errored(String),
    Closed { code: u16, reason: String },
}

/// Нормальное закрытие (RFC 6455)
pub const CLOSE_NORMAL: u16 = 1000;
/// Закрытие без close-фрейма
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Обрыв соединения
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Транспорт, ориентированный на сообщения: по одному конверту на кадр
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: Bytes) -> Result<(), ChannelError>;

    async fn close(&self) -> Result<(), ChannelError>;
}

/// Адаптер канала: после закрытия ничего не отправляет и не буферизует
pub struct SignalingChannel<T: Transport> {
    transport: T,
    codec: RpcCodec,
    closed: bool,
}

impl<T: Transport> SignalingChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            codec: RpcCodec::new(),
            closed: false,
        }
    }

    pub async fn send(&self, frame: Bytes) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        trace!("-> {}", String::from_utf8_lossy(&frame));
        self.transport.send(frame).await
    }

    pub async fn call<P: Serialize>(&mut self, method: &str, params: &P) -> Result<CallId, SignalError> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }
        let params = to_params(method, params)?;
        let (id, frame) = self.codec.call(method, &params)?;
        if let Err(e) = self.send(frame).await {
            self.codec.forget(id);
            return Err(e.into());
        }
        debug!("call #{id} '{method}' sent");
        Ok(id)
    }

    pub async fn notify<P: Serialize>(&self, method: &str, params: &P) -> Result<(), SignalError> {
        let params = to_params(method, params)?;
        let frame = self.codec.notification(method, &params)?;
        self.send(frame).await?;
        Ok(())
    }

    pub async fn respond<R: Serialize>(&self, id: &RequestId, result: &R) -> Result<(), SignalError> {
        let result = to_params("response", result)?;
        let frame = self.codec.response(id, &result)?;
        self.send(frame).await?;
        Ok(())
    }

    pub async fn respond_error(&self, id: &RequestId, code: i64, message: impl Into<String>) -> Result<(), SignalError> {
        let error = ErrorObject {
            code,
            message: message.into(),
            data: None,
        };
        let frame = self.codec.error_response(id, &error)?;
        self.send(frame).await?;
        Ok(())
    }

    pub fn decode(&mut self, frame: &[u8]) -> Result<Inbound, ProtocolError> {
        self.codec.decode(frame)
    }

    pub fn forget(&mut self, id: CallId) -> Option<PendingCall> {
        self.codec.forget(id)
    }

    pub fn pending_calls(&self) -> usize {
        self.codec.pending_len()
    }

    /// Канал закрыт (нами или удалённой стороной): все ожидающие вызовы отменяются
    pub fn mark_closed(&mut self) -> Vec<(PendingCall, RpcError)> {
        self.closed = true;
        self.codec.cancel_all()
    }

    /// Локальное закрытие
    pub async fn close(&mut self) -> Vec<(PendingCall, RpcError)> {
        if !self.closed {
            if let Err(e) = self.transport.close().await {
                debug!("transport close: {e}");
            }
        }
        self.mark_closed()
    }
}

fn to_params<P: Serialize>(method: &str, params: &P) -> Result<Value, ProtocolError> {
    serde_json::to_value(params).map_err(|e| ProtocolError::InvalidParams {
        method: method.to_string(),
        reason: e.to_string(),
    })
}
