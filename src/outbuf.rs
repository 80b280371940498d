pub(crate) struct OutBuf<'a> {
    storage: &'a mut [u8],
    len: usize,
    overflowed: bool,
}

impl<'a> OutBuf<'a> {
    pub fn new(storage: &'a mut [u8]) -> Self {
        Self {
            storage,
            len: 0,
            overflowed: false,
        }
    }

    /// Writes `src` at `pos`, sliding `[pos, len)` right to make room.
    /// Once an insert does not fit (or `pos` is past the cursor) the
    /// overflow flag latches, the cursor stops moving, and every later
    /// call is refused.
    pub fn insert(&mut self, src: &[u8], pos: usize) {
        if self.overflowed {
            return;
        }
        if pos > self.len || src.len() > self.storage.len() - self.len {
            self.overflowed = true;
            return;
        }
        self.storage.copy_within(pos..self.len, pos + src.len());
        self.storage[pos..pos + src.len()].copy_from_slice(src);
        self.len += src.len();
    }

    pub fn append(&mut self, src: &[u8]) {
        self.insert(src, self.len)
    }

    pub fn end(&self) -> usize {
        self.len
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    pub fn into_slice(self) -> &'a [u8] {
        let data: &'a [u8] = self.storage;
        &data[..self.len]
    }
}
