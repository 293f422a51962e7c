//! `spark-slab` 提供面向流式管道的 slab 池化分配器。
//!
//! # 模块定位（Why）
//! - 生产者向流推送 chunk 之前需要一段可写内存；若每个 chunk 都单独向堆申请，
//!   高频小块读写会被分配开销主导；
//! - 本 crate 以固定容量 slab 批量申请内存，再按请求大小顺序切片，
//!   大块请求则直接分配，避免撑爆共享 slab。
//!
//! # 设计概要（How）
//! - `allocator` 模块实现 [`SlabAllocator`]，维护当前 slab 与游标；
//! - `handle` 模块实现 [`BufferHandle`]，借助 `bytes` 的引用计数让句柄与 slab 共享内存，
//!   slab 的释放完全由句柄生命周期驱动；
//! - `config` 模块提供可由 TOML 反序列化的 [`SlabConfig`]。
//!
//! # 使用约定（What）
//! - 分配器需显式构造并注入到每条管道，不存在进程级的全局池；
//! - 句柄填充完毕后调用 [`BufferHandle::freeze`] 转为不可变 `Bytes`，再写入流。

mod allocator;
mod config;
mod handle;

pub use allocator::{SlabAllocator, SlabStats};
pub use config::SlabConfig;
pub use handle::{BackingKind, BufferHandle};
