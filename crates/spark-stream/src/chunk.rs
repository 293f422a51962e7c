use core::ops::Deref;

use bytes::Bytes;

/// 入队后的不可变数据块。
///
/// `sequence` 是所属流分配的入队序号，从 0 开始单调递增，仅用于排序与排障；
/// 数据经管道转发到下一个流时会获得新的序号。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    sequence: u64,
    data: Bytes,
}

impl Chunk {
    pub(crate) fn new(sequence: u64, data: Bytes) -> Self {
        Self { sequence, data }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl Deref for Chunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
