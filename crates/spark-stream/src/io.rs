//! Tokio I/O 适配层：把 `AsyncRead`/`AsyncWrite` 接到流的两端。
//!
//! # 教案式说明
//! - **意图 (Why)**：流与管道本身不做任何 I/O；真实场景中源来自 socket 或文件，
//!   汇最终写回另一个句柄。本模块提供最小的三件套，让调用方无需手写泵循环；
//! - **逻辑 (How)**：
//!   - [`pump_reader`] 从 [`SlabAllocator`] 取缓冲、读满一次即写入源流，
//!     `write` 返回 `false` 时挂起等待源流 drain；
//!   - [`drain_to_writer`] 以流动模式消费汇流并逐块 `write_all`；
//!   - [`copy`] 组装两条流与一个 [`Pipe`]，在同一个任务内并发推进三者；
//! - **契约 (What)**：
//!   - 读/写失败通过 [`FlowStream::fail`] 注入流，管道随即销毁两端，三者都会返回；
//!   - [`copy`] 优先报告管道错误，它描述了首个失败的一端；
//! - **风险 (Trade-offs)**：三者在同一任务内以 `join3` 推进，不额外派生任务，
//!   因此不要求 `Send`，但也无法利用多核并行。

use futures_util::future::join3;
use spark_slab::{SlabAllocator, SlabStats};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::{ConfigError, CopyError, FlowStream, Pipe, PipeSummary, PipelineConfig};

/// 一次 [`copy`] 的结果汇总。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyReport {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub summary: PipeSummary,
    pub slab: SlabStats,
}

/// 从 `reader` 读取数据写入 `stream`，直到 EOF 后调用 `end()`。返回读取的总字节数。
///
/// 每次读取申请 `chunk_size` 字节的缓冲；读取失败时以错误描述调用 `stream.fail`。
/// `chunk_size == 0` 会让每次读取都形同 EOF，因此直接以 [`ConfigError::ZeroReadChunk`] 拒绝，流保持不变。
pub async fn pump_reader<R>(
    mut reader: R,
    stream: &FlowStream,
    allocator: &SlabAllocator,
    chunk_size: usize,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin,
{
    if chunk_size == 0 {
        return Err(ConfigError::ZeroReadChunk.into());
    }
    let mut total = 0u64;
    loop {
        let mut buffer = allocator.allocate(chunk_size);
        let read = match reader.read(&mut buffer[..]).await {
            Ok(read) => read,
            Err(err) => {
                warn!(stream = stream.id(), error = %err, "reader failed");
                stream.fail(err.to_string());
                return Err(err.into());
            }
        };
        if read == 0 {
            stream.end()?;
            debug!(stream = stream.id(), bytes = total, "reader reached eof");
            return Ok(total);
        }
        buffer.truncate(read);
        total += read as u64;
        if !stream.write(buffer.freeze())? {
            stream.drained().await?;
        }
    }
}

/// 以流动模式消费 `stream` 并写入 `writer`，流结束后 flush。返回写出的总字节数。
pub async fn drain_to_writer<W>(stream: &FlowStream, mut writer: W) -> Result<u64, CopyError>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    while let Some(chunk) = stream.next_chunk().await? {
        if let Err(err) = writer.write_all(&chunk).await {
            warn!(stream = stream.id(), error = %err, "writer failed");
            stream.fail(err.to_string());
            return Err(err.into());
        }
        total += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// 按 `config` 组装 `reader → source → Pipe → sink → writer` 并运行到结束。
///
/// ```no_run
/// # async fn demo() -> Result<(), spark_stream::CopyError> {
/// let config = spark_stream::PipelineConfig::default();
/// let report = spark_stream::copy(&b"hello"[..], tokio::io::sink(), &config).await?;
/// assert_eq!(report.bytes_written, 5);
/// # Ok(())
/// # }
/// ```
pub async fn copy<R, W>(reader: R, writer: W, config: &PipelineConfig) -> Result<CopyReport, CopyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config.validate()?;
    let allocator = SlabAllocator::with_config(config.slab.clone());
    let source = FlowStream::new(config.source);
    let sink = FlowStream::new(config.sink);
    let pipe = Pipe::new(source.clone(), sink.clone());

    let (read, piped, written) = join3(
        pump_reader(reader, &source, &allocator, config.read_chunk_size),
        pipe,
        drain_to_writer(&sink, writer),
    )
    .await;

    let summary = piped?;
    let bytes_read = read?;
    let bytes_written = written?;
    Ok(CopyReport {
        bytes_read,
        bytes_written,
        summary,
        slab: allocator.stats(),
    })
}
