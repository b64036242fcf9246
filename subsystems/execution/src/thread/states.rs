//! # Thread States
//!
//! Scheduling status plus the cancellation and exit vocabulary shared with
//! the user-level threading library.

/// Scheduling status of a thread slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ThreadStatus {
    /// Slot is available for allocation
    #[default]
    Free = 0,
    /// Thread may be dispatched
    Runnable = 1,
    /// Thread waits for an event
    Blocked = 2,
}

impl ThreadStatus {
    /// Convert from u32
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Free),
            1 => Some(Self::Runnable),
            2 => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Convert to u32
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Check if thread can be scheduled
    pub const fn is_runnable(self) -> bool {
        matches!(self, ThreadStatus::Runnable)
    }
}

/// Whether a thread accepts cancellation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum CancelState {
    /// Requests are honored
    Cancelable = 0,
    /// Requests fail with a not-cancelable error
    #[default]
    NotCancelable = 1,
}

impl CancelState {
    /// Convert from u32
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Cancelable),
            1 => Some(Self::NotCancelable),
            _ => None,
        }
    }
}

/// When an accepted cancellation request takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum CancelType {
    /// At the target's next cancellation-point check
    #[default]
    Deferred = 0,
    /// As soon as it is requested
    Immediate = 1,
}

impl CancelType {
    /// Convert from u32
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Deferred),
            1 => Some(Self::Immediate),
            _ => None,
        }
    }
}

/// Value a terminated thread hands to its joiners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadExit {
    /// Exited or returned with a value
    Returned(u64),
    /// Terminated by cancellation
    Canceled,
}

impl ThreadExit {
    /// Register encoding of [`ThreadExit::Canceled`]
    pub const CANCELED_WORD: u64 = u64::MAX;

    /// Encode for a register
    pub const fn to_word(self) -> u64 {
        match self {
            ThreadExit::Returned(value) => value,
            ThreadExit::Canceled => Self::CANCELED_WORD,
        }
    }

    /// Decode from a register
    pub const fn from_word(word: u64) -> Self {
        if word == Self::CANCELED_WORD {
            ThreadExit::Canceled
        } else {
            ThreadExit::Returned(word)
        }
    }
}

impl Default for ThreadExit {
    fn default() -> Self {
        ThreadExit::Returned(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversion() {
        for status in [ThreadStatus::Free, ThreadStatus::Runnable, ThreadStatus::Blocked] {
            assert_eq!(ThreadStatus::from_u32(status.as_u32()), Some(status));
        }
        assert_eq!(ThreadStatus::from_u32(3), None);
        assert!(ThreadStatus::Runnable.is_runnable());
        assert!(!ThreadStatus::Blocked.is_runnable());
    }

    #[test]
    fn test_cancel_defaults() {
        assert_eq!(CancelState::default(), CancelState::NotCancelable);
        assert_eq!(CancelType::default(), CancelType::Deferred);
        assert_eq!(CancelType::from_u32(7), None);
    }

    #[test]
    fn test_exit_words() {
        assert_eq!(ThreadExit::from_word(42), ThreadExit::Returned(42));
        assert_eq!(ThreadExit::from_word(ThreadExit::Canceled.to_word()), ThreadExit::Canceled);
    }
}
