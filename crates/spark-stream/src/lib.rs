//! `spark-stream` 提供带背压的有界字节流，以及把两条流串接起来的管道编排器。
//!
//! # 模块定位（Why）
//! - 生产者与消费者速度不一致时，缓冲必须有界：[`FlowStream`] 以高水位（high-water mark）
//!   衡量缓冲字节数，`write` 越过阈值即返回 `false`，缓冲回落后发出一次 drain 信号；
//! - [`Pipe`] 把源流的数据转发到汇流，在汇饱和时暂停源、在汇 drain 后恢复源，
//!   并保证任一端失败时两端都被销毁、错误只上报一次。
//!
//! # 设计概要（How）
//! - `stream` 模块：状态机 `Idle → Flowing ⇄ Paused → Ended`，以及失败终态 `Errored`/`Destroyed`；
//!   数据、drain、完成与关闭四类通知各自使用一个 `AtomicWaker` 槽位；
//! - `pipe` 模块：管道是一个手写的 `Future`，不依赖特定运行时；
//! - `io` 模块（`runtime-tokio` 特性）：把 Tokio 的 `AsyncRead`/`AsyncWrite` 接入流，
//!   读缓冲来自 [`spark_slab::SlabAllocator`]；
//! - `config`/`error`：TOML 配置与带稳定错误码的错误类型。
//!
//! # 使用约定（What）
//! - 流句柄可克隆，所有克隆共享同一状态；
//! - 每个通知槽位同一时刻只服务一个等待者，管道运行期间不要在其占用的槽位上另行等待；
//! - 数据块以 `bytes::Bytes` 传递，转发过程中不发生拷贝。

mod chunk;
mod config;
mod error;
#[cfg(feature = "runtime-tokio")]
mod io;
mod pipe;
mod stream;

pub use chunk::Chunk;
pub use config::{PipelineConfig, StreamConfig};
#[cfg(feature = "runtime-tokio")]
pub use error::CopyError;
pub use error::{ConfigError, PipeError, PipeSide, StreamError, codes};
#[cfg(feature = "runtime-tokio")]
pub use io::{CopyReport, copy, drain_to_writer, pump_reader};
pub use pipe::{Pipe, PipePhase, PipeSummary};
pub use stream::{Consumed, FlowStream, StreamState, StreamStats};
