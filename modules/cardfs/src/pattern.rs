use crate::config::NAME_LEN;

/// Compare `name` against `pattern` position by position. `?` matches any
/// byte and the end of a slice counts as a NUL.
///
/// Once the name ends only the pattern byte at that same position is
/// checked: it must be a terminator or `?`. Whatever follows it in the
/// pattern is not looked at, so `"AB?X"` matches `"AB"`.
pub fn matches(name: &[u8], pattern: &[u8]) -> bool {
    let mut pos = 0usize;
    while let Some(&c) = name.get(pos).filter(|&&c| c != 0) {
        let p = byte_at(pattern, pos);
        if p != b'?' && p != c {
            return false;
        }
        pos += 1;
    }
    let tail = byte_at(pattern, pos);
    tail == 0 || tail == b'?'
}

fn byte_at(buf: &[u8], pos: usize) -> u8 {
    buf.get(pos).copied().unwrap_or(0)
}

/// A compiled enumeration filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FindPattern {
    bytes: [u8; NAME_LEN],
}

impl FindPattern {
    /// Compile a caller filter.
    ///
    /// Bytes are copied up to the first `*`; a `*` pads the rest of the
    /// pattern with `?`. A filter without `*` is copied verbatim and
    /// terminated. An empty filter becomes 19 `?`, so it does not reach
    /// names using all 20 bytes.
    pub fn compile(filter: &[u8]) -> Self {
        let mut bytes = [b'?'; NAME_LEN];
        bytes[NAME_LEN - 1] = 0;
        if filter.is_empty() {
            return Self { bytes };
        }
        let mut out = 0usize;
        let mut star = false;
        for &c in filter.iter().take_while(|&&c| c != 0) {
            if c == b'*' {
                star = true;
                break;
            }
            if out == NAME_LEN {
                break;
            }
            bytes[out] = c;
            out += 1;
        }
        if star {
            bytes[out..].fill(b'?');
        } else if out < NAME_LEN {
            bytes[out] = 0;
        }
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn matches(&self, name: &[u8]) -> bool {
        matches(name, &self.bytes)
    }
}

impl Default for FindPattern {
    fn default() -> Self {
        Self::compile(b"")
    }
}

/// The one outstanding enumeration: a compiled pattern and the index of
/// the entry last returned.
///
/// There is a single cursor for both ports. Starting a new enumeration
/// replaces it, and every successful lookup moves it, including the ones
/// an `open` performs. Enumerations are therefore strictly sequential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FindCursor {
    pub pattern: FindPattern,
    pub last: i32,
}

impl FindCursor {
    pub fn new() -> Self {
        Self {
            pattern: FindPattern::default(),
            last: -1,
        }
    }

    /// Discard any enumeration in progress and start one for `filter`.
    pub fn restart(&mut self, filter: &[u8]) {
        self.pattern = FindPattern::compile(filter);
        self.last = -1;
    }

    /// Directory index the next scan starts from.
    pub fn resume_index(&self) -> usize {
        (self.last + 1).max(0) as usize
    }
}

impl Default for FindCursor {
    fn default() -> Self {
        Self::new()
    }
}
