use serde::{Deserialize, Serialize};
use spark_slab::SlabConfig;

use crate::error::ConfigError;

/// 单个流的背压配置。
///
/// `high_water_mark` 为缓冲字节阈值：写入后缓冲量严格大于该值时 `write` 返回 `false`。
/// 读端与写端的默认值不同，分别见 [`readable`](Self::readable) 与 [`writable`](Self::writable)。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub high_water_mark: usize,
}

impl StreamConfig {
    pub const DEFAULT_READABLE_HIGH_WATER_MARK: usize = 64 * 1024;
    pub const DEFAULT_WRITABLE_HIGH_WATER_MARK: usize = 16 * 1024;

    pub const fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self { high_water_mark }
    }

    /// 生产侧（源）默认值：64 KiB。
    pub const fn readable() -> Self {
        Self::with_high_water_mark(Self::DEFAULT_READABLE_HIGH_WATER_MARK)
    }

    /// 消费侧（汇）默认值：16 KiB。
    pub const fn writable() -> Self {
        Self::with_high_water_mark(Self::DEFAULT_WRITABLE_HIGH_WATER_MARK)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::writable()
    }
}

/// 一条管道的完整配置。
///
/// # 教案式说明
/// - **意图 (Why)**：分配器、源与汇的阈值需要一起调优，集中在一份可由 TOML 加载的结构中，
///   便于在压测时整体替换；
/// - **契约 (What)**：
///   - 缺省字段回落到 [`Default`]：8 KiB slab、64 KiB 源阈值、16 KiB 汇阈值、4 KiB 读取块；
///   - 显式给出 `[source]`/`[sink]` 表时必须包含 `high_water_mark`；
///   - [`validate`](Self::validate) 拒绝零容量 slab 与零长度读取块，`high_water_mark = 0` 合法
///     （任何非空写入都会立即触发背压）。
/// - **风险 (Trade-offs)**：`read_chunk_size` 大于 slab 阈值时读取缓冲全部走直接分配，
///   池化不再生效；这是合法配置，但通常不是想要的结果。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub slab: SlabConfig,
    pub source: StreamConfig,
    pub sink: StreamConfig,
    pub read_chunk_size: usize,
}

impl PipelineConfig {
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 4 * 1024;

    /// 从 TOML 文本加载并校验配置。
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slab.capacity == 0 {
            return Err(ConfigError::ZeroSlabCapacity);
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::ZeroReadChunk);
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slab: SlabConfig::default(),
            source: StreamConfig::readable(),
            sink: StreamConfig::writable(),
            read_chunk_size: Self::DEFAULT_READ_CHUNK_SIZE,
        }
    }
}
