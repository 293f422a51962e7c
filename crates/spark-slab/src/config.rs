use serde::{Deserialize, Serialize};

/// slab 分配器的配置。
///
/// # 契约说明（What）
/// - `capacity`：单个 slab 的字节容量，默认 [`SlabConfig::DEFAULT_CAPACITY`]（8 KiB）；
/// - 大块阈值不可单独配置，恒为 `capacity / 2`（向下取整），见 [`threshold`](Self::threshold)；
/// - 反序列化时缺省字段回落到默认值，因此空表 `[slab]` 等价于默认配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlabConfig {
    pub capacity: usize,
}

impl SlabConfig {
    pub const DEFAULT_CAPACITY: usize = 8 * 1024;

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// 大块请求阈值：请求字节数严格大于该值时绕过 slab。
    pub fn threshold(&self) -> usize {
        self.capacity / 2
    }
}

impl Default for SlabConfig {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}
