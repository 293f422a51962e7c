use core::ops::{Deref, DerefMut};

use bytes::{Bytes, BytesMut};

/// 缓冲句柄的底层来源。
///
/// - `Pooled`：切自当前 slab 的一段区间，与 slab 共享同一块内存；
/// - `Standalone`：超过阈值的大块请求，独占一次独立分配。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackingKind {
    Pooled,
    Standalone,
}

/// `BufferHandle` 是分配器交给生产者的可写字节视图。
///
/// # 设计动机（Why）
/// - 生产者需要先拿到一段可写内存、填充数据，再把它作为不可变 chunk 推入流；
///   句柄因此在“填充期”可写，在 [`freeze`](Self::freeze) 之后转为只读 [`Bytes`]。
/// - slab 的生命周期由句柄驱动：只要仍有句柄（或由其冻结出的 `Bytes`）存活，
///   slab 内存就不会被释放，分配器本身从不显式回收。
///
/// # 结构设计（How）
/// - 内部持有 `BytesMut`。池化句柄由 slab 的 `split_to` 切出，
///   `bytes` 的引用计数保证多个句柄共享同一分配且互不重叠；
/// - `kind` 记录来源，便于测试与统计区分池化与直接分配。
///
/// # 契约说明（What）
/// - `len()` 等于分配时请求的字节数（除非调用方随后 [`truncate`](Self::truncate)）；
/// - 句柄内容初始为零，不会泄露 slab 中其它句柄或旧数据；
/// - 句柄只暴露定长的读写视图，不提供扩容接口，避免写入越过 slab 区间。
#[derive(Debug)]
pub struct BufferHandle {
    data: BytesMut,
    kind: BackingKind,
}

impl BufferHandle {
    pub(crate) fn pooled(data: BytesMut) -> Self {
        Self {
            data,
            kind: BackingKind::Pooled,
        }
    }

    pub(crate) fn standalone(data: BytesMut) -> Self {
        Self {
            data,
            kind: BackingKind::Standalone,
        }
    }

    /// 零长度句柄：不触碰 slab，也不产生堆分配。
    pub fn empty() -> Self {
        Self::pooled(BytesMut::new())
    }

    /// 当前视图长度。
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> BackingKind {
        self.kind
    }

    pub fn is_pooled(&self) -> bool {
        self.kind == BackingKind::Pooled
    }

    /// 缩短视图至 `len` 字节；`len` 不小于当前长度时不做任何事。
    ///
    /// 读取类生产者常按固定大小申请、再按实际读到的字节数截断。
    /// 截掉的尾部仍属于原 slab，不会被再次分配。
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// 冻结为不可变的 [`Bytes`]，之后即可作为 chunk 进入流的队列。
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

impl Deref for BufferHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for BufferHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for BufferHandle {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for BufferHandle {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl From<BufferHandle> for Bytes {
    fn from(handle: BufferHandle) -> Self {
        handle.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_handle_is_pooled_and_zero_length() {
        let handle = BufferHandle::empty();
        assert!(handle.is_empty());
        assert!(handle.is_pooled());
    }

    #[test]
    fn truncate_then_freeze_keeps_prefix() {
        let mut handle = BufferHandle::standalone(BytesMut::zeroed(8));
        handle.copy_from_slice(b"abcdefgh");
        handle.truncate(3);
        assert_eq!(handle.len(), 3);
        assert_eq!(handle.freeze().as_ref(), b"abc");
    }
}
