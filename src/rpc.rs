//! JSON-RPC 2.0 конверты сигналинга.
//!
//! Кодек не знает о транспорте: он выдаёт готовые кадры и разбирает входящие
//! в `Inbound`, сопоставляя ответы с ожидающими вызовами по id.

use crate::error::{ProtocolError, RpcError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

pub type CallId = u64;

/// Id входящего сообщения: SFU может прислать число или строку
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Num(u64),
    Str(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<ErrorObject> for RpcError {
    fn from(e: ErrorObject) -> Self {
        RpcError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

/// Поле `error` без формы объекта JSON-RPC всё равно проваливает вызов
fn remote_error(error: Value) -> RpcError {
    match serde_json::from_value::<ErrorObject>(error.clone()) {
        Ok(object) => object.into(),
        Err(_) => RpcError::Remote {
            code: INTERNAL_ERROR,
            message: match error {
                Value::String(text) => text,
                other => other.to_string(),
            },
        },
    }
}

/// Вызов, ожидающий ответа
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub id: CallId,
    pub method: String,
    pub submitted_at: DateTime<Utc>,
}

/// Разобранное входящее сообщение
#[derive(Debug)]
pub enum Inbound {
    /// Ответ на наш вызов; запись уже удалена из таблицы ожидания
    Response {
        call: PendingCall,
        outcome: Result<Value, RpcError>,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// Вызов от сервера, на который нужно ответить с тем же id
    Call {
        id: RequestId,
        method: String,
        params: Value,
    },
}

#[derive(Serialize)]
struct Outgoing<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<CallId>,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct OutgoingResponse<'a> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug)]
pub struct RpcCodec {
    next_id: CallId,
    pending: HashMap<CallId, PendingCall>,
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcCodec {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Кодирует вызов со свежим id и регистрирует его как ожидающий
    pub fn call(&mut self, method: &str, params: &Value) -> Result<(CallId, Bytes), ProtocolError> {
        let id = self.next_id;
        let frame = serde_json::to_vec(&Outgoing {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params,
        })?;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingCall {
                id,
                method: method.to_string(),
                submitted_at: Utc::now(),
            },
        );
        Ok((id, Bytes::from(frame)))
    }

    pub fn notification(&self, method: &str, params: &Value) -> Result<Bytes, ProtocolError> {
        let frame = serde_json::to_vec(&Outgoing {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params,
        })?;
        Ok(Bytes::from(frame))
    }

    pub fn response(&self, id: &RequestId, result: &Value) -> Result<Bytes, ProtocolError> {
        let frame = serde_json::to_vec(&OutgoingResponse {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        })?;
        Ok(Bytes::from(frame))
    }

    pub fn error_response(&self, id: &RequestId, error: &ErrorObject) -> Result<Bytes, ProtocolError> {
        let frame = serde_json::to_vec(&OutgoingResponse {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        })?;
        Ok(Bytes::from(frame))
    }

    /// Разбирает входящий кадр. Ответ снимает вызов с ожидания ровно один раз.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Inbound, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_slice(frame)?;

        match (raw.method, raw.id) {
            (Some(method), None) => Ok(Inbound::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (Some(method), Some(id)) => Ok(Inbound::Call {
                id,
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, Some(id)) => {
                let call = match &id {
                    RequestId::Num(n) => self.pending.remove(n),
                    RequestId::Str(s) => s.parse::<CallId>().ok().and_then(|n| self.pending.remove(&n)),
                }
                .ok_or_else(|| ProtocolError::UnknownResponse(id.to_string()))?;

                let outcome = match raw.error {
                    Some(error) => Err(remote_error(error)),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(Inbound::Response { call, outcome })
            }
            (None, None) => Err(ProtocolError::Unroutable),
        }
    }

    /// Забыть вызов, не дожидаясь ответа (таймаут)
    pub fn forget(&mut self, id: CallId) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Все ожидающие вызовы завершаются отменой; вызывается при закрытии канала
    pub fn cancel_all(&mut self) -> Vec<(PendingCall, RpcError)> {
        let mut calls: Vec<_> = self.pending.drain().map(|(_, call)| call).collect();
        calls.sort_by_key(|c| c.id);
        calls
            .into_iter()
            .map(|call| {
                let err = RpcError::Cancelled {
                    id: call.id,
                    method: call.method.clone(),
                };
                (call, err)
            })
            .collect()
    }

    pub fn is_pending(&self, id: CallId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
