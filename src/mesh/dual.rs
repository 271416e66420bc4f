use datasize::DataSize;
use thiserror::Error;

/// Error produced when reading a dual array which has pending host modifications.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("host copy was modified and has not been published")]
    Unpublished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncState {
    /// Host and compute copies agree.
    Synced,
    /// Host copy has been written since the last publish.
    HostModified,
}

/// An array with a host copy (written while building metadata) and a compute side
/// mirror (read by kernels).
///
/// Writes go through `stage_write` and only become visible after `publish`. Reading
/// while host modifications are pending is an error, so no reader can observe a
/// half written table.
#[derive(Clone, Debug)]
pub struct DualArray<T> {
    host: Vec<T>,
    device: Vec<T>,
    state: SyncState,
}

impl<T: Clone> DualArray<T> {
    /// Allocates an array with both copies filled with `value`.
    pub fn new(len: usize, value: T) -> Self {
        Self {
            host: vec![value.clone(); len],
            device: vec![value; len],
            state: SyncState::Synced,
        }
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Gives mutable access to the host copy and marks it as modified.
    pub fn stage_write(&mut self) -> &mut [T] {
        self.state = SyncState::HostModified;
        &mut self.host
    }

    /// Replaces the host copy, which may change the length of the array.
    pub fn stage_resize(&mut self, len: usize, value: T) -> &mut [T] {
        self.host.clear();
        self.host.resize(len, value);
        self.stage_write()
    }

    /// Copies the host data to the compute side mirror.
    pub fn publish(&mut self) {
        if self.state == SyncState::Synced {
            return;
        }

        self.device.clone_from(&self.host);
        self.state = SyncState::Synced;
    }

    pub fn is_published(&self) -> bool {
        self.state == SyncState::Synced
    }

    /// Reads the published data.
    pub fn read(&self) -> Result<&[T], SyncError> {
        match self.state {
            SyncState::Synced => Ok(&self.device),
            SyncState::HostModified => Err(SyncError::Unpublished),
        }
    }

    /// The compute side mirror as of the last publish, regardless of pending writes.
    pub fn device(&self) -> &[T] {
        &self.device
    }
}

impl<T: DataSize> DataSize for DualArray<T> {
    const IS_DYNAMIC: bool = true;
    const STATIC_HEAP_SIZE: usize = 0;

    fn estimate_heap_size(&self) -> usize {
        self.host.estimate_heap_size() + self.device.estimate_heap_size()
    }
}
