use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::future::FusedFuture;
use tracing::{debug, trace, warn};

use crate::{FlowStream, PipeError, PipeSide, StreamError};

/// 管道当前所处阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipePhase {
    /// 正在从源读取并写入汇。
    Copying,
    /// 汇超过高水位，源已暂停，等待汇的 drain 信号。
    AwaitingDrain,
    /// 源已结束并已对汇调用 `end()`，等待汇转入 `Ended`。
    Finishing,
    Finished,
    Failed,
}

/// 管道成功完成时的统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeSummary {
    /// 转发的数据块数。
    pub chunks: u64,
    /// 转发的总字节数。
    pub bytes: u64,
    /// 汇拒绝（`write` 返回 `false`）导致源暂停的次数。
    pub backpressure_events: u64,
    /// 收到汇 drain 信号并恢复源的次数。
    pub drain_events: u64,
}

/// `Pipe` 把源流中的数据块搬运到汇流，并沿途传播背压与生命周期。
///
/// # 教案式说明
/// - **意图 (Why)**：慢速消费者不应迫使源无界缓冲；管道在汇超过高水位时立即暂停源，
///   直到汇发出 drain 再恢复，从而把两端的缓冲都限制在各自的高水位附近。
/// - **逻辑 (How)**：`Pipe` 本身是一个 `Future`，每次轮询推进一个小状态机：
///   1. `Copying`：以流动模式从源取块并写入汇；写入返回 `false` 时暂停源，进入 `AwaitingDrain`，
///      不会在拒绝点之后再多取一块；源结束时对汇调用 `end()`，进入 `Finishing`；
///   2. `AwaitingDrain`：等待汇的 drain，随后恢复源回到 `Copying`。
///      源的结束只能在恢复之后被观察到，因此 `end()` 永远排在 drain 之后；
///   3. `Finishing`：等待汇转入 `Ended`，此时才报告成功；
///   4. 任一阶段挂起时都会同时监听另一端的失败，任一端失败即销毁两端并报告一次错误。
/// - **契约 (What)**：
///   - 输出恰好一个结果：`Ok(PipeSummary)` 或首个 `PipeError`；之后的错误被忽略；
///   - 结果产出后再次轮询保持 `Pending`，[`FusedFuture::is_terminated`] 返回 `true`；
///   - 首次轮询时恢复源：调用方预先暂停的源也会被接管为流动模式；
///   - 一个 `Pipe` 只服务一对流，不可复用；
///   - 丢弃未完成的 `Pipe` 不会改变两端状态（源可能停留在 `Paused`）。
/// - **风险 (Trade-offs)**：管道占用源的 data 槽位与汇的 drain/finish 槽位，
///   运行期间其它任务不应在这些槽位上等待。
#[derive(Debug)]
pub struct Pipe {
    source: FlowStream,
    sink: FlowStream,
    phase: PipePhase,
    summary: PipeSummary,
    started: bool,
}

impl Pipe {
    pub fn new(source: FlowStream, sink: FlowStream) -> Self {
        Self {
            source,
            sink,
            phase: PipePhase::Copying,
            summary: PipeSummary::default(),
            started: false,
        }
    }

    pub fn source(&self) -> &FlowStream {
        &self.source
    }

    pub fn sink(&self) -> &FlowStream {
        &self.sink
    }

    pub fn phase(&self) -> PipePhase {
        self.phase
    }

    /// 到目前为止的转发统计。
    pub fn summary(&self) -> PipeSummary {
        self.summary
    }

    fn fail(&mut self, side: PipeSide, error: StreamError) -> Poll<Result<PipeSummary, PipeError>> {
        let reason = format!("{side} failed: {error}");
        self.source.destroy(Some(reason.clone()));
        self.sink.destroy(Some(reason));
        self.phase = PipePhase::Failed;
        warn!(
            source = self.source.id(),
            sink = self.sink.id(),
            %side,
            code = error.code(),
            %error,
            "pipe failed"
        );
        Poll::Ready(Err(PipeError::new(side, error)))
    }

    fn finish(&mut self) -> Poll<Result<PipeSummary, PipeError>> {
        self.phase = PipePhase::Finished;
        debug!(
            source = self.source.id(),
            sink = self.sink.id(),
            chunks = self.summary.chunks,
            bytes = self.summary.bytes,
            "pipe finished"
        );
        Poll::Ready(Ok(self.summary))
    }
}

impl Future for Pipe {
    type Output = Result<PipeSummary, PipeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.started {
            this.started = true;
            this.source.resume();
        }
        loop {
            match this.phase {
                PipePhase::Copying => match this.source.poll_consume(cx) {
                    Poll::Ready(Ok(Some(chunk))) => {
                        let len = chunk.len() as u64;
                        match this.sink.write(chunk.into_bytes()) {
                            Ok(accepted) => {
                                this.summary.chunks += 1;
                                this.summary.bytes += len;
                                if !accepted {
                                    this.source.pause();
                                    this.summary.backpressure_events += 1;
                                    this.phase = PipePhase::AwaitingDrain;
                                    trace!(sink = this.sink.id(), "sink saturated, source paused");
                                }
                            }
                            Err(err) => return this.fail(PipeSide::Sink, err),
                        }
                    }
                    Poll::Ready(Ok(None)) => {
                        if let Err(err) = this.sink.end() {
                            return this.fail(PipeSide::Sink, err);
                        }
                        this.phase = PipePhase::Finishing;
                    }
                    Poll::Ready(Err(err)) => return this.fail(PipeSide::Source, err),
                    Poll::Pending => {
                        if let Poll::Ready(err) = this.sink.poll_closed(cx) {
                            return this.fail(PipeSide::Sink, err);
                        }
                        return Poll::Pending;
                    }
                },
                PipePhase::AwaitingDrain => match this.sink.poll_drain(cx) {
                    Poll::Ready(Ok(())) => {
                        this.source.resume();
                        this.summary.drain_events += 1;
                        this.phase = PipePhase::Copying;
                        trace!(sink = this.sink.id(), "sink drained, source resumed");
                    }
                    Poll::Ready(Err(err)) => return this.fail(PipeSide::Sink, err),
                    Poll::Pending => {
                        if let Poll::Ready(err) = this.source.poll_closed(cx) {
                            return this.fail(PipeSide::Source, err);
                        }
                        return Poll::Pending;
                    }
                },
                PipePhase::Finishing => {
                    return match this.sink.poll_finished(cx) {
                        Poll::Ready(Ok(())) => this.finish(),
                        Poll::Ready(Err(err)) => this.fail(PipeSide::Sink, err),
                        Poll::Pending => Poll::Pending,
                    };
                }
                PipePhase::Finished | PipePhase::Failed => return Poll::Pending,
            }
        }
    }
}

impl FusedFuture for Pipe {
    fn is_terminated(&self) -> bool {
        matches!(self.phase, PipePhase::Finished | PipePhase::Failed)
    }
}
