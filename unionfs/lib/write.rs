use parking_lot::Mutex;

use crate::{OvlError, OvlResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Tracks writers of the upper layer so a remount to read-only cannot race a mutation.
#[derive(Debug)]
pub struct UpperWriteAccess {
    has_upper: bool,
    state: Mutex<WriteState>,
}

/// A scoped reservation on the upper layer. Released on drop.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    access: &'a UpperWriteAccess,
}

#[derive(Debug, Default)]
struct WriteState {
    read_only: bool,
    writers: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UpperWriteAccess {
    /// Creates the tracker. Without an upper layer every reservation fails.
    pub fn new(has_upper: bool) -> Self {
        Self {
            has_upper,
            state: Mutex::new(WriteState::default()),
        }
    }

    /// Reserves the upper layer for writing.
    pub fn want_write(&self) -> OvlResult<WriteGuard<'_>> {
        if !self.has_upper {
            return Err(OvlError::ReadOnlyFilesystem);
        }

        let mut state = self.state.lock();
        if state.read_only {
            return Err(OvlError::ReadOnlyFilesystem);
        }

        state.writers += 1;
        Ok(WriteGuard { access: self })
    }

    /// Switches the overlay to read-only. Fails while any reservation is held.
    pub fn remount_read_only(&self) -> OvlResult<()> {
        let mut state = self.state.lock();
        if state.writers > 0 {
            return Err(OvlError::Busy(state.writers));
        }

        state.read_only = true;
        tracing::debug!("overlay remounted read-only");
        Ok(())
    }

    /// Switches the overlay back to read-write.
    pub fn remount_read_write(&self) -> OvlResult<()> {
        if !self.has_upper {
            return Err(OvlError::ReadOnlyFilesystem);
        }

        self.state.lock().read_only = false;
        tracing::debug!("overlay remounted read-write");
        Ok(())
    }

    /// Returns true if writes are refused.
    pub fn is_read_only(&self) -> bool {
        !self.has_upper || self.state.lock().read_only
    }

    /// Number of reservations currently held.
    pub fn writers(&self) -> usize {
        self.state.lock().writers
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.access.state.lock();
        state.writers = state.writers.saturating_sub(1);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
