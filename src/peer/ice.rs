use crate::error::EngineError;
use crate::peer::engine::MediaEngine;
use crate::peer::types::IceCandidateInit;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// FIFO кандидатов: удалённые до установки remote description
/// и локальные до отправки "join"
#[derive(Debug, Default, Clone)]
pub struct CandidateQueue {
    items: VecDeque<IceCandidateInit>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidateInit) {
        self.items.push_back(candidate);
    }

    /// Забирает всё в порядке поступления
    pub fn take_all(&mut self) -> Vec<IceCandidateInit> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Применяет все отложенные кандидаты после установки remote description.
/// Сбой одного кандидата не мешает остальным; ошибки возвращаются вызывающему.
pub async fn apply_pending_candidates<E: MediaEngine + ?Sized>(
    engine: &E,
    pending: &mut CandidateQueue,
) -> Vec<EngineError> {
    let candidates = pending.take_all();
    if !candidates.is_empty() {
        info!("Applying {} pending remote candidates", candidates.len());
    }

    let mut failures = Vec::new();
    for candidate in candidates {
        debug!("Applying pending candidate: {}", describe_candidate(&candidate));
        if let Err(e) = engine.add_ice_candidate(candidate).await {
            warn!("Failed to apply pending candidate: {e}");
            failures.push(e);
        }
    }
    failures
}

/// Тип кандидата из строки `candidate:... typ <type> ...`
pub fn candidate_type(candidate: &IceCandidateInit) -> &'static str {
    let mut parts = candidate.candidate.split_whitespace();
    while let Some(part) = parts.next() {
        if part == "typ" {
            return match parts.next() {
                Some("host") => "host",
                Some("srflx") => "srflx",
                Some("prflx") => "prflx",
                Some("relay") => "relay",
                _ => "unknown",
            };
        }
    }
    "unknown"
}

pub fn describe_candidate(candidate: &IceCandidateInit) -> String {
    format!(
        "{} sdp_mid={:?} sdp_mline_index={:?}",
        candidate.candidate, candidate.sdp_mid, candidate.sdp_mline_index
    )
}

/// Счётчик отправленных локальных кандидатов по типам
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

impl CandidateStats {
    pub fn record(&mut self, candidate: &IceCandidateInit) {
        match candidate_type(candidate) {
            "host" => self.host += 1,
            "srflx" => self.srflx += 1,
            "relay" => self.relay += 1,
            _ => self.other += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay + self.other
    }

    pub fn log_summary(&self) {
        info!(
            "Candidate analysis: {} sent ({} host, {} srflx, {} relay)",
            self.total(),
            self.host,
            self.srflx,
            self.relay
        );
        if self.relay == 0 {
            warn!("No TURN relay candidates found! Connection through NAT may fail.");
        }
    }
}
