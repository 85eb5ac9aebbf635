//! Counter record shared by the named-pipe and shared-memory samples.

/// Encoded size of a [`CounterRecord`]
pub const RECORD_SIZE: usize = std::mem::size_of::<CounterRecord>();

/// Who wrote last, and the value they wrote
///
/// Laid out as two native-endian `i32`s, both in the FIFO byte stream and in
/// the shared-memory object.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterRecord {
    /// Writer's process (or participant) id
    pub pid: i32,
    /// Counter value
    pub counter: i32,
}

impl CounterRecord {
    /// Initial shared-memory value: written by nobody, counter zero
    pub const UNOWNED: Self = Self {
        pid: -1,
        counter: 0,
    };

    /// Create a record
    #[must_use]
    pub const fn new(pid: i32, counter: i32) -> Self {
        Self { pid, counter }
    }

    /// Native-endian wire bytes
    #[must_use]
    pub fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..4].copy_from_slice(&self.pid.to_ne_bytes());
        out[4..].copy_from_slice(&self.counter.to_ne_bytes());
        out
    }

    /// Decode native-endian wire bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
        Self {
            pid: i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            counter: i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_c_struct() {
        assert_eq!(RECORD_SIZE, 8);
        assert_eq!(std::mem::align_of::<CounterRecord>(), 4);
    }

    #[test]
    fn test_field_order() {
        let bytes = CounterRecord::new(1, 2).to_bytes();
        assert_eq!(&bytes[..4], &1i32.to_ne_bytes());
        assert_eq!(CounterRecord::from_bytes(bytes).counter, 2);
    }
}
