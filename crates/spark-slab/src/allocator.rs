use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use spin::Mutex;
use tracing::{debug, trace};

use crate::{BufferHandle, SlabConfig};

/// `SlabAllocator` 以固定容量的 slab 切片服务变长字节请求，超过阈值的请求直接分配。
///
/// # 模块角色（Why）
/// - 流水线中的生产者每次读取都需要一段新内存；逐次向堆申请小块会放大分配开销，
///   因此先申请一整块 slab，再按游标顺序切出互不重叠的区间，摊薄分配成本；
/// - 大块请求（`size > capacity / 2`）若也走 slab，会迅速耗尽当前 slab 并频繁替换，
///   反而破坏池化收益，所以直接走独立分配。
///
/// # 核心机制（How）
/// - `spin::Mutex<Option<Slab>>` 保护“当前 slab + 游标”，游标只由分配器推进；
/// - 每个池化句柄通过 `BytesMut::split_to` 持有 slab 的引用计数，
///   旧 slab 被替换后仅由尚存的句柄维持生命周期，最后一个句柄释放时内存自然归还；
/// - `SlabMetrics` 以原子计数记录 slab 创建次数与两类分配的次数、字节数，供 [`stats`](Self::stats) 快照。
///
/// # 契约说明（What）
/// - **线程安全**：满足 `Send + Sync`，克隆后共享同一 slab 状态；
/// - **前置条件**：无；`size == 0` 返回零长度句柄，不触碰 slab；
/// - **后置条件**：池化句柄互不重叠，任意时刻 `cursor() <= capacity`；
/// - **失败语义**：内存耗尽由 Rust 运行时直接终止进程，不以 `Result` 形式返回。
///
/// # 设计权衡（Trade-offs）
/// - 不提供 `free`：slab 永远只前进不回退，替换后的尾部碎片随 slab 一并释放；
/// - 新 slab 以零填充方式申请，牺牲少量初始化成本，避免句柄读到残留数据。
#[derive(Clone, Default)]
pub struct SlabAllocator {
    inner: Arc<AllocatorInner>,
}

impl SlabAllocator {
    /// 使用默认配置（8 KiB slab）创建分配器。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SlabConfig) -> Self {
        Self {
            inner: Arc::new(AllocatorInner::new(config)),
        }
    }

    pub fn config(&self) -> &SlabConfig {
        &self.inner.config
    }

    /// 分配一段长度恰为 `size` 的缓冲。
    ///
    /// # 执行步骤（How）
    /// 1. `size == 0`：返回空句柄；
    /// 2. `size > threshold`：独立分配 `size` 字节；
    /// 3. 否则若没有当前 slab，或剩余空间不足 `size`，丢弃当前 slab 并新建一块（游标归零）；
    /// 4. 从当前 slab 切出 `[cursor, cursor + size)`，游标前进 `size`。
    pub fn allocate(&self, size: usize) -> BufferHandle {
        if size == 0 {
            return BufferHandle::empty();
        }
        let threshold = self.inner.config.threshold();
        if size > threshold {
            self.inner.metrics.record_standalone(size);
            trace!(size, threshold, "bypassing slab for large allocation");
            return BufferHandle::standalone(BytesMut::zeroed(size));
        }

        let mut current = self.inner.slab.lock();
        if current.as_ref().is_some_and(|slab| slab.remaining() < size) {
            // 旧 slab 只剩已发出的句柄在引用，分配器不再从中切片。
            current.take();
        }
        let slab = current.get_or_insert_with(|| self.inner.open_slab());
        let region = slab.carve(size);
        self.inner.metrics.record_pooled(size);
        BufferHandle::pooled(region)
    }

    /// 当前 slab 已发出的字节数；尚未创建 slab 时为 0。
    pub fn cursor(&self) -> usize {
        self.inner.slab.lock().as_ref().map_or(0, Slab::cursor)
    }

    /// 当前 slab 的剩余字节数；尚未创建 slab 时为 0。
    pub fn slab_remaining(&self) -> usize {
        self.inner.slab.lock().as_ref().map_or(0, Slab::remaining)
    }

    pub fn stats(&self) -> SlabStats {
        self.inner.metrics.snapshot()
    }
}

impl core::fmt::Debug for SlabAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlabAllocator")
            .field("config", &self.inner.config)
            .field("cursor", &self.cursor())
            .field("stats", &self.stats())
            .finish()
    }
}

struct AllocatorInner {
    config: SlabConfig,
    slab: Mutex<Option<Slab>>,
    metrics: SlabMetrics,
}

impl Default for AllocatorInner {
    fn default() -> Self {
        Self::new(SlabConfig::default())
    }
}

impl AllocatorInner {
    fn new(config: SlabConfig) -> Self {
        Self {
            config,
            slab: Mutex::new(None),
            metrics: SlabMetrics::default(),
        }
    }

    fn open_slab(&self) -> Slab {
        let id = self.metrics.record_slab();
        let capacity = self.config.capacity;
        debug!(slab = id, capacity, "created new slab");
        Slab {
            capacity,
            unissued: BytesMut::zeroed(capacity),
        }
    }
}

/// 当前 slab：`unissued` 是尚未切出的尾部，游标由容量与其长度推得。
struct Slab {
    capacity: usize,
    unissued: BytesMut,
}

impl Slab {
    fn cursor(&self) -> usize {
        self.capacity - self.unissued.len()
    }

    fn remaining(&self) -> usize {
        self.unissued.len()
    }

    fn carve(&mut self, size: usize) -> BytesMut {
        debug_assert!(size <= self.remaining());
        self.unissued.split_to(size)
    }
}

/// 分配器统计快照。
///
/// - `slabs_created`：累计创建的 slab 数量，每次溢出替换恰好加一；
/// - `pooled_*` / `standalone_*`：两条分配路径各自的次数与字节数（零长度请求不计入）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlabStats {
    pub slabs_created: u64,
    pub pooled_allocations: u64,
    pub pooled_bytes: usize,
    pub standalone_allocations: u64,
    pub standalone_bytes: usize,
}

#[derive(Default)]
struct SlabMetrics {
    slabs_created: AtomicU64,
    pooled_allocations: AtomicU64,
    pooled_bytes: AtomicUsize,
    standalone_allocations: AtomicU64,
    standalone_bytes: AtomicUsize,
}

impl SlabMetrics {
    /// 返回新 slab 的序号（从 1 开始）。
    fn record_slab(&self) -> u64 {
        self.slabs_created.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_pooled(&self, size: usize) {
        self.pooled_allocations.fetch_add(1, Ordering::Relaxed);
        self.pooled_bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn record_standalone(&self, size: usize) {
        self.standalone_allocations.fetch_add(1, Ordering::Relaxed);
        self.standalone_bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SlabStats {
        SlabStats {
            slabs_created: self.slabs_created.load(Ordering::Relaxed),
            pooled_allocations: self.pooled_allocations.load(Ordering::Relaxed),
            pooled_bytes: self.pooled_bytes.load(Ordering::Relaxed),
            standalone_allocations: self.standalone_allocations.load(Ordering::Relaxed),
            standalone_bytes: self.standalone_bytes.load(Ordering::Relaxed),
        }
    }
}
