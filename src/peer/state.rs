use std::fmt;

/// ========== ФАЗЫ ПЕРЕГОВОРОВ ==========
///
/// `Idle → Joining → Joined ⇄ Renegotiating`, из любой фазы в `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Joining,
    Joined,
    Renegotiating,
    Closed,
}

impl Phase {
    /// Фаза, в которую откатываемся после сбоя
    pub fn stable(self) -> Phase {
        match self {
            Phase::Idle | Phase::Joining => Phase::Idle,
            Phase::Joined | Phase::Renegotiating => Phase::Joined,
            Phase::Closed => Phase::Closed,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Joining => "joining",
            Phase::Joined => "joined",
            Phase::Renegotiating => "renegotiating",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Состояние описаний на нашей стороне
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptionState {
    pub local: Option<crate::peer::types::SdpType>,
    pub remote: Option<crate::peer::types::SdpType>,
}

impl DescriptionState {
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}
