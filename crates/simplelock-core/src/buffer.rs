//! Size-bounded password accumulator
//!
//! Keeps committed fragments in the order they were typed so BackSpace can
//! drop the last one, whatever its byte length. Fragments are wiped when
//! they are removed or the buffer is dropped. That is best effort: copies
//! held by the input method or the display server are out of reach.

use zeroize::Zeroizing;

use crate::config::BufferConfig;

/// Ordered, bounded sequence of committed password fragments
pub struct PasswordBuffer {
    fragments: Vec<Zeroizing<Vec<u8>>>,
    len: usize,
    max_len: usize,
}

impl PasswordBuffer {
    /// Create an empty buffer bounded by `config.max_len`
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            fragments: Vec::new(),
            len: 0,
            max_len: config.max_len,
        }
    }

    /// Append a fragment
    ///
    /// Returns `false` (and keeps the buffer unchanged) when the fragment is
    /// empty or would push the total past the ceiling.
    pub fn push(&mut self, fragment: &[u8]) -> bool {
        if fragment.is_empty() || self.len + fragment.len() > self.max_len {
            return false;
        }

        self.fragments.push(Zeroizing::new(fragment.to_vec()));
        self.len += fragment.len();
        true
    }

    /// Drop the most recent fragment; no-op on an empty buffer
    pub fn pop(&mut self) {
        if let Some(fragment) = self.fragments.pop() {
            self.len -= fragment.len();
        }
    }

    /// Drop every fragment
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.len = 0;
    }

    /// Concatenation of all fragments
    pub fn contents(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.len));
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        out
    }

    /// Total buffered bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of committed fragments
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Configured byte ceiling
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

impl std::fmt::Debug for PasswordBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordBuffer")
            .field("fragments", &self.fragments.len())
            .field("len", &self.len)
            .field("max_len", &self.max_len)
            .finish()
    }
}
