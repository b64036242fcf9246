//! # Priority Management
//!
//! A thread's priority is the length of its quantum: the number of
//! consecutive scheduling turns it keeps the CPU before being rotated out.

/// Thread priority (always positive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u32);

impl Priority {
    /// Default priority: one turn per rotation
    pub const DEFAULT: Self = Self(1);

    /// Create a priority; zero is rejected
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Raw priority value
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Turns granted per dispatch
    pub const fn quantum(self) -> u32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_only() {
        assert!(Priority::new(0).is_none());
        assert_eq!(Priority::new(3).map(Priority::quantum), Some(3));
        assert_eq!(Priority::default().get(), 1);
    }
}
