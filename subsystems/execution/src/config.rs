//! # Kernel Configuration

use crate::scheduler::Priority;
use crate::{ExecError, ExecResult, ProcessId};
use lattice_hal::Asid;

/// Configuration of the execution core
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Number of process descriptors
    pub process_capacity: usize,
    /// Number of hardware address-space tags handed out
    pub asid_count: usize,
    /// Priority of threads created without an explicit one
    pub default_priority: Priority,
    /// Status word installed in every fresh thread context
    pub initial_status: u64,
    /// Pages mapped into the shared kernel region at boot
    pub kernel_template_pages: usize,
}

impl ExecConfig {
    /// Default process table size
    pub const DEFAULT_PROCESS_CAPACITY: usize = ProcessId::MAX_SLOTS;
    /// User mode with interrupts enabled
    pub const DEFAULT_STATUS: u64 = 0x1000_100c;

    /// Create default configuration
    pub fn new() -> Self {
        Self {
            process_capacity: Self::DEFAULT_PROCESS_CAPACITY,
            asid_count: Asid::LIMIT,
            default_priority: Priority::DEFAULT,
            initial_status: Self::DEFAULT_STATUS,
            kernel_template_pages: 1,
        }
    }

    /// Create a configuration with a smaller process table
    pub fn with_capacity(process_capacity: usize) -> Self {
        Self {
            process_capacity,
            ..Self::new()
        }
    }

    /// Check every bound the id encoding and the hardware impose
    pub fn validate(&self) -> ExecResult<()> {
        if self.process_capacity == 0 || self.process_capacity > ProcessId::MAX_SLOTS {
            return Err(ExecError::InvalidArgument);
        }
        if self.asid_count == 0 || self.asid_count > Asid::LIMIT {
            return Err(ExecError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = ExecConfig::new();
        assert_eq!(config.process_capacity, 1024);
        assert_eq!(config.asid_count, 64);
        assert_eq!(config.initial_status, 0x1000_100c);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bounds_rejected() {
        assert_eq!(ExecConfig::with_capacity(0).validate(), Err(ExecError::InvalidArgument));
        assert_eq!(ExecConfig::with_capacity(1025).validate(), Err(ExecError::InvalidArgument));
        let config = ExecConfig {
            asid_count: 65,
            ..ExecConfig::new()
        };
        assert_eq!(config.validate(), Err(ExecError::InvalidArgument));
    }
}
