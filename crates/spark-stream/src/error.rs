//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义流、管道、配置与 I/O 适配层的错误语义；
//! - 每个变体都映射到 `<域>.<语义>` 形式的稳定错误码，日志与告警可以按码聚合，
//!   无需解析自然语言消息。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`，可直接交给 `anyhow` 等上层框架；
//! - [`StreamError`] 需要 `Clone`：终态流会把同一个失败原因返回给之后的每一次调用；
//! - 内存分配失败不在此建模，由运行时直接终止进程。

use core::fmt;

use thiserror::Error;

/// 稳定错误码。
pub mod codes {
    pub const STREAM_WRITE_AFTER_END: &str = "stream.write_after_end";
    pub const STREAM_DESTROYED: &str = "stream.destroyed";
    pub const STREAM_FAILED: &str = "stream.failed";
    pub const CONFIG_PARSE: &str = "config.parse";
    pub const CONFIG_INVALID: &str = "config.invalid";
    pub const IO_FAILURE: &str = "io.failure";
}

/// 流操作错误。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“调用方误用”（结束后继续写）与“流已进入失败终态”两类情况，
///   前者不影响管道其它部分，后者会被管道上报并触发两端销毁；
/// - **契约 (What)**：
///   - `WriteAfterEnd`：`end()` 之后或流已 `Ended` 时写入；
///   - `Destroyed`：流被 `destroy` 主动终止，`reason` 为空表示有意中止；
///   - `Failed`：I/O 协作方通过 `fail` 报告的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("write after end")]
    WriteAfterEnd,
    #[error("stream destroyed{}", DisplayReason(.reason.as_deref()))]
    Destroyed { reason: Option<String> },
    #[error("stream failed: {reason}")]
    Failed { reason: String },
}

impl StreamError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::WriteAfterEnd => codes::STREAM_WRITE_AFTER_END,
            StreamError::Destroyed { .. } => codes::STREAM_DESTROYED,
            StreamError::Failed { .. } => codes::STREAM_FAILED,
        }
    }
}

struct DisplayReason<'a>(Option<&'a str>);

impl fmt::Display for DisplayReason<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(reason) => write!(f, ": {reason}"),
            None => Ok(()),
        }
    }
}

/// 管道的哪一端出错。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipeSide {
    Source,
    Sink,
}

impl fmt::Display for PipeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipeSide::Source => "source",
            PipeSide::Sink => "sink",
        })
    }
}

/// 管道唯一一次失败结果：首个错误所在的一端及其原因。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("pipe {side} failed: {error}")]
pub struct PipeError {
    side: PipeSide,
    #[source]
    error: StreamError,
}

impl PipeError {
    pub fn new(side: PipeSide, error: StreamError) -> Self {
        Self { side, error }
    }

    pub fn side(&self) -> PipeSide {
        self.side
    }

    pub fn error(&self) -> &StreamError {
        &self.error
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("slab capacity must be greater than zero")]
    ZeroSlabCapacity,
    #[error("read chunk size must be greater than zero")]
    ZeroReadChunk,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Parse(_) => codes::CONFIG_PARSE,
            ConfigError::ZeroSlabCapacity | ConfigError::ZeroReadChunk => codes::CONFIG_INVALID,
        }
    }
}

/// I/O 适配层错误。
#[cfg(feature = "runtime-tokio")]
#[derive(Debug, Error)]
pub enum CopyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "runtime-tokio")]
impl CopyError {
    pub fn code(&self) -> &'static str {
        match self {
            CopyError::Config(err) => err.code(),
            CopyError::Pipe(err) => err.code(),
            CopyError::Stream(err) => err.code(),
            CopyError::Io(_) => codes::IO_FAILURE,
        }
    }
}
