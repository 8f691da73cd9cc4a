/// Block device status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum DiskStatus {
    /// No card negotiated yet, or the last negotiation failed.
    Uninitialized,
    /// Card negotiated and the block length is fixed.
    Ready,
}

/// Card family detected during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CardVersion {
    /// MMC v3, initialized with SEND_OP_COND.
    MmcV3,
    /// SD v1, rejects SEND_IF_COND.
    SdV1,
    /// SD v2 or later, standard or high capacity.
    SdV2Plus,
}

/// State of the attached card.
///
/// The version is only set together with [`DiskStatus::Ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSession {
    status: DiskStatus,
    version: Option<CardVersion>,
}

impl CardSession {
    /// Session of a card that was never negotiated.
    pub const fn new() -> Self {
        CardSession {
            status: DiskStatus::Uninitialized,
            version: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> DiskStatus {
        self.status
    }

    /// Detected card family, `None` unless ready.
    pub fn version(&self) -> Option<CardVersion> {
        self.version
    }

    /// Shorthand for `status() == DiskStatus::Ready`.
    pub fn is_ready(&self) -> bool {
        self.status == DiskStatus::Ready
    }

    /// Block length is confirmed, the card accepts transfers.
    pub(crate) fn mark_ready(&mut self, version: CardVersion) {
        self.status = DiskStatus::Ready;
        self.version = Some(version);
    }

    /// Forgets the card, a new negotiation is required.
    pub(crate) fn reset(&mut self) {
        *self = CardSession::new();
    }
}

impl Default for CardSession {
    fn default() -> Self {
        Self::new()
    }
}
