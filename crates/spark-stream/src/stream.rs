use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::{
    future::poll_fn,
    ready,
    stream::{FusedStream, Stream},
    task::AtomicWaker,
};
use spin::Mutex;
use tracing::{debug, trace};

use crate::{Chunk, StreamConfig, StreamError};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// 流的生命周期状态。
///
/// ```text
/// Idle ──► Flowing ⇄ Paused ──► Ended
///   └───────┴─────────┴──────► Errored / Destroyed
/// ```
///
/// `Ended`、`Errored`、`Destroyed` 为终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    Flowing,
    Paused,
    Ended,
    Errored,
    Destroyed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Ended | StreamState::Errored | StreamState::Destroyed
        )
    }

    /// 是否处于失败终态（`Errored` 或 `Destroyed`）。
    pub fn is_failed(self) -> bool {
        matches!(self, StreamState::Errored | StreamState::Destroyed)
    }
}

/// 轮询式消费的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Consumed {
    /// 队首数据块。
    Chunk(Chunk),
    /// 队列暂时为空，但之后仍可能有数据到达。
    Empty,
    /// 流已结束，不会再有数据。
    End,
}

/// 流的统计快照。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamStats {
    pub state: StreamState,
    pub buffered_bytes: usize,
    pub queued_chunks: usize,
    pub high_water_mark: usize,
    pub need_drain: bool,
    pub ending: bool,
    pub written_chunks: u64,
    pub written_bytes: u64,
    pub consumed_chunks: u64,
    pub consumed_bytes: u64,
    /// `write` 返回 `false` 的次数。
    pub backpressure_events: u64,
    /// 发出 drain 信号的次数。
    pub drain_events: u64,
}

/// `FlowStream` 是带背压信号的有界字节流，同一类型既可作为生产端也可作为消费端。
///
/// # 设计动机（Why）
/// - 生产者与消费者速度不一致时，需要一个可观测的缓冲量与阈值，
///   让生产者在缓冲超过高水位后暂停，避免内存无界增长；
/// - 事件回调式的 `data`/`drain`/`finish`/`error` 通知在 Rust 中表达为一组 `Future`：
///   每种信号对应一个 [`AtomicWaker`] 槽位，同一时刻每个槽位只有一个等待者。
///
/// # 结构设计（How）
/// - 句柄可 `Clone`，所有克隆共享同一个 `Arc<Shared>`；
/// - 队列、缓冲计数与状态机放在 `spin::Mutex<Core>` 内，任何变更都在锁内完成；
///   需要唤醒的信号在锁内记录、解锁后统一唤醒，避免在持锁期间执行外部代码；
/// - 等待方遵循“检查 → 注册 waker → 再检查”的顺序，保证不会丢失唤醒。
///
/// # 契约说明（What）
/// - `buffered_bytes` 在任意可观测时刻都等于队列中所有数据块长度之和；
/// - 数据块按写入顺序交付，不重排、不重复、不丢失（`destroy`/`fail` 会丢弃未消费数据）；
/// - drain 信号在每次越过高水位之后至多发出一次，且只在缓冲回落到高水位及以下时发出；
/// - 背压只是建议：`write` 返回 `false` 时数据已入队，调用方应等待 [`drained`](Self::drained)。
///
/// # 风险与取舍（Trade-offs）
/// - 每个信号只支持一个等待者；多个任务同时等待同一信号时，只有最后注册者会被唤醒；
/// - 没有超时：停滞的消费者会一直占用缓冲内存。
#[derive(Clone)]
pub struct FlowStream {
    shared: Arc<Shared>,
    /// 仅作用于本句柄的 `Stream` 适配：产出结束或首个错误后置位。
    terminated: bool,
}

struct Shared {
    id: u64,
    core: Mutex<Core>,
    data: AtomicWaker,
    drain: AtomicWaker,
    finish: AtomicWaker,
    close: AtomicWaker,
}

struct Core {
    state: StreamState,
    queue: VecDeque<Chunk>,
    buffered_bytes: usize,
    high_water_mark: usize,
    need_drain: bool,
    ending: bool,
    next_sequence: u64,
    failure: Option<StreamError>,
    written_chunks: u64,
    written_bytes: u64,
    consumed_chunks: u64,
    consumed_bytes: u64,
    backpressure_events: u64,
    drain_events: u64,
}

/// 一次状态变更后需要唤醒的信号集合。
#[derive(Clone, Copy, Default)]
struct Signals {
    data: bool,
    drain: bool,
    finish: bool,
    close: bool,
}

impl Signals {
    fn all() -> Self {
        Self {
            data: true,
            drain: true,
            finish: true,
            close: true,
        }
    }
}

impl FlowStream {
    pub fn new(config: StreamConfig) -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::new(Shared {
                id,
                core: Mutex::new(Core::new(config.high_water_mark)),
                data: AtomicWaker::new(),
                drain: AtomicWaker::new(),
                finish: AtomicWaker::new(),
                close: AtomicWaker::new(),
            }),
            terminated: false,
        }
    }

    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self::new(StreamConfig::with_high_water_mark(high_water_mark))
    }

    /// 进程内唯一的流编号，仅用于日志关联。
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// 追加一个数据块。
    ///
    /// # 契约说明（What）
    /// - 返回 `Ok(true)`：写入后缓冲量不超过高水位；
    /// - 返回 `Ok(false)`：数据已入队，但缓冲量严格大于高水位，`need_drain` 被置位；
    /// - 返回 `Err`：流已请求结束或处于终态，数据未入队，其它状态不受影响。
    ///
    /// 流处于 `Flowing` 时唤醒等待数据的消费者；`Paused` 时通知被抑制，直到 `resume`。
    pub fn write(&self, data: impl Into<Bytes>) -> Result<bool, StreamError> {
        let data = data.into();
        let (accepted, signals) = {
            let mut core = self.shared.core.lock();
            core.ensure_writable()?;
            let len = data.len();
            let sequence = core.next_sequence;
            core.next_sequence += 1;
            core.queue.push_back(Chunk::new(sequence, data));
            core.buffered_bytes += len;
            core.written_chunks += 1;
            core.written_bytes += len as u64;

            let accepted = core.buffered_bytes <= core.high_water_mark;
            if !accepted {
                core.need_drain = true;
                core.backpressure_events += 1;
                trace!(
                    stream = self.shared.id,
                    buffered = core.buffered_bytes,
                    high_water_mark = core.high_water_mark,
                    "write exceeded high water mark"
                );
            }
            let signals = Signals {
                data: core.state == StreamState::Flowing,
                ..Signals::default()
            };
            (accepted, signals)
        };
        self.wake(signals);
        Ok(accepted)
    }

    /// 轮询式消费：不改变 `Paused` 状态，也不依赖数据可用通知。
    ///
    /// 队列在结束请求之后被取空时，流转入 `Ended` 并发出一次完成信号；
    /// 此后每次调用都返回 [`Consumed::End`]。
    pub fn consume(&self) -> Result<Consumed, StreamError> {
        let (consumed, signals) = {
            let mut core = self.shared.core.lock();
            core.take(self.shared.id)?
        };
        self.wake(signals);
        Ok(consumed)
    }

    /// 流动模式消费：`Idle` 的流在首次轮询时转入 `Flowing`；
    /// `Paused` 时即使队列非空也保持挂起，失败终态则立即返回错误。
    ///
    /// 返回 `Ready(Ok(None))` 表示流已结束。
    pub fn poll_consume(&self, cx: &mut Context<'_>) -> Poll<Result<Option<Chunk>, StreamError>> {
        if let Some(ready) = self.try_deliver() {
            return Poll::Ready(ready);
        }
        self.shared.data.register(cx.waker());
        match self.try_deliver() {
            Some(ready) => Poll::Ready(ready),
            None => Poll::Pending,
        }
    }

    /// [`poll_consume`](Self::poll_consume) 的异步形式。
    pub async fn next_chunk(&self) -> Result<Option<Chunk>, StreamError> {
        poll_fn(|cx| self.poll_consume(cx)).await
    }

    fn try_deliver(&self) -> Option<Result<Option<Chunk>, StreamError>> {
        let (outcome, signals) = {
            let mut core = self.shared.core.lock();
            match core.state {
                StreamState::Idle => core.state = StreamState::Flowing,
                StreamState::Paused => return None,
                _ => {}
            }
            match core.take(self.shared.id) {
                Ok((Consumed::Chunk(chunk), signals)) => (Ok(Some(chunk)), signals),
                Ok((Consumed::End, signals)) => (Ok(None), signals),
                Ok((Consumed::Empty, _)) => return None,
                Err(err) => (Err(err), Signals::default()),
            }
        };
        self.wake(signals);
        Some(outcome)
    }

    /// `Flowing`（或 `Idle`）→ `Paused`。返回是否发生了状态迁移。
    pub fn pause(&self) -> bool {
        let mut core = self.shared.core.lock();
        match core.state {
            StreamState::Idle | StreamState::Flowing => {
                core.state = StreamState::Paused;
                debug!(stream = self.shared.id, buffered = core.buffered_bytes, "stream paused");
                true
            }
            _ => false,
        }
    }

    /// `Paused`（或 `Idle`）→ `Flowing`，并同步唤醒被抑制的消费者。返回是否发生了状态迁移。
    pub fn resume(&self) -> bool {
        let resumed = {
            let mut core = self.shared.core.lock();
            match core.state {
                StreamState::Idle | StreamState::Paused => {
                    core.state = StreamState::Flowing;
                    debug!(stream = self.shared.id, buffered = core.buffered_bytes, "stream resumed");
                    true
                }
                _ => false,
            }
        };
        if resumed {
            self.shared.data.wake();
        }
        resumed
    }

    /// 请求结束：此后写入被拒绝，队列取空后流转入 `Ended` 并发出完成信号。
    ///
    /// 对已结束或已请求结束的流重复调用是无害的；失败终态返回对应错误。
    pub fn end(&self) -> Result<(), StreamError> {
        let signals = {
            let mut core = self.shared.core.lock();
            if let Some(failure) = core.failure() {
                return Err(failure);
            }
            if core.ending {
                return Ok(());
            }
            core.ending = true;
            debug!(stream = self.shared.id, queued = core.queue.len(), "stream end requested");
            core.finish_if_drained(self.shared.id)
        };
        self.wake(signals);
        Ok(())
    }

    /// 立即终止：丢弃队列、转入 `Destroyed` 并唤醒所有等待者。
    ///
    /// `reason` 为 `None` 表示有意中止。对终态流调用无任何效果，返回 `false`，
    /// 因此重复调用不会产生重复通知。
    pub fn destroy(&self, reason: Option<String>) -> bool {
        self.terminate(StreamState::Destroyed, StreamError::Destroyed { reason })
    }

    /// I/O 协作方报告失败：丢弃队列、转入 `Errored`。语义与 [`destroy`](Self::destroy) 相同，仅终态不同。
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.terminate(
            StreamState::Errored,
            StreamError::Failed {
                reason: reason.into(),
            },
        )
    }

    fn terminate(&self, state: StreamState, error: StreamError) -> bool {
        {
            let mut core = self.shared.core.lock();
            if core.state.is_terminal() {
                return false;
            }
            debug!(
                stream = self.shared.id,
                ?state,
                discarded = core.queue.len(),
                %error,
                "stream terminated"
            );
            core.queue.clear();
            core.buffered_bytes = 0;
            core.need_drain = false;
            core.state = state;
            core.failure = Some(error);
        }
        self.wake(Signals::all());
        true
    }

    /// 缓冲回落到高水位及以下时就绪；未处于背压状态时立即就绪。
    pub fn poll_drain(&self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        if let Some(ready) = self.check_drain() {
            return Poll::Ready(ready);
        }
        self.shared.drain.register(cx.waker());
        match self.check_drain() {
            Some(ready) => Poll::Ready(ready),
            None => Poll::Pending,
        }
    }

    /// 等待 drain 信号，对应生产者在 `write` 返回 `false` 之后的挂起点。
    pub async fn drained(&self) -> Result<(), StreamError> {
        poll_fn(|cx| self.poll_drain(cx)).await
    }

    fn check_drain(&self) -> Option<Result<(), StreamError>> {
        let core = self.shared.core.lock();
        if let Some(failure) = core.failure() {
            Some(Err(failure))
        } else if core.need_drain {
            None
        } else {
            Some(Ok(()))
        }
    }

    /// 流转入 `Ended` 时就绪；失败终态返回对应错误。
    pub fn poll_finished(&self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        if let Some(ready) = self.check_finished() {
            return Poll::Ready(ready);
        }
        self.shared.finish.register(cx.waker());
        match self.check_finished() {
            Some(ready) => Poll::Ready(ready),
            None => Poll::Pending,
        }
    }

    pub async fn finished(&self) -> Result<(), StreamError> {
        poll_fn(|cx| self.poll_finished(cx)).await
    }

    fn check_finished(&self) -> Option<Result<(), StreamError>> {
        let core = self.shared.core.lock();
        match core.state {
            StreamState::Ended => Some(Ok(())),
            _ => core.failure().map(Err),
        }
    }

    /// 流进入失败终态时就绪，返回失败原因；正常结束永远不会使其就绪。
    pub fn poll_closed(&self, cx: &mut Context<'_>) -> Poll<StreamError> {
        if let Some(failure) = self.shared.core.lock().failure() {
            return Poll::Ready(failure);
        }
        self.shared.close.register(cx.waker());
        match self.shared.core.lock().failure() {
            Some(failure) => Poll::Ready(failure),
            None => Poll::Pending,
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.core.lock().state
    }

    pub fn buffered_bytes(&self) -> usize {
        self.shared.core.lock().buffered_bytes
    }

    pub fn high_water_mark(&self) -> usize {
        self.shared.core.lock().high_water_mark
    }

    pub fn need_drain(&self) -> bool {
        self.shared.core.lock().need_drain
    }

    /// 是否已请求结束（包括已经 `Ended`）。
    pub fn is_ending(&self) -> bool {
        self.shared.core.lock().ending
    }

    pub fn stats(&self) -> StreamStats {
        let core = self.shared.core.lock();
        StreamStats {
            state: core.state,
            buffered_bytes: core.buffered_bytes,
            queued_chunks: core.queue.len(),
            high_water_mark: core.high_water_mark,
            need_drain: core.need_drain,
            ending: core.ending,
            written_chunks: core.written_chunks,
            written_bytes: core.written_bytes,
            consumed_chunks: core.consumed_chunks,
            consumed_bytes: core.consumed_bytes,
            backpressure_events: core.backpressure_events,
            drain_events: core.drain_events,
        }
    }

    fn wake(&self, signals: Signals) {
        if signals.data {
            self.shared.data.wake();
        }
        if signals.drain {
            self.shared.drain.wake();
        }
        if signals.finish {
            self.shared.finish.wake();
        }
        if signals.close {
            self.shared.close.wake();
        }
    }
}

impl Default for FlowStream {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl core::fmt::Debug for FlowStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlowStream")
            .field("id", &self.shared.id)
            .field("stats", &self.stats())
            .finish()
    }
}

/// 以 `futures` 的 `Stream` 形式按流动模式逐块消费。
///
/// 失败终态只产出一次错误，随后与正常结束一样返回 `None`；
/// 终止标记属于句柄本身，此后克隆出的句柄继承该标记。
impl Stream for FlowStream {
    type Item = Result<Chunk, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        let item = ready!(self.poll_consume(cx)).transpose();
        if !matches!(item, Some(Ok(_))) {
            self.terminated = true;
        }
        Poll::Ready(item)
    }
}

impl FusedStream for FlowStream {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Core {
    fn new(high_water_mark: usize) -> Self {
        Self {
            state: StreamState::Idle,
            queue: VecDeque::new(),
            buffered_bytes: 0,
            high_water_mark,
            need_drain: false,
            ending: false,
            next_sequence: 0,
            failure: None,
            written_chunks: 0,
            written_bytes: 0,
            consumed_chunks: 0,
            consumed_bytes: 0,
            backpressure_events: 0,
            drain_events: 0,
        }
    }

    /// 失败终态下的错误；其它状态为 `None`。
    fn failure(&self) -> Option<StreamError> {
        if self.state.is_failed() {
            self.failure.clone()
        } else {
            None
        }
    }

    fn ensure_writable(&self) -> Result<(), StreamError> {
        if let Some(failure) = self.failure() {
            return Err(failure);
        }
        if self.ending {
            return Err(StreamError::WriteAfterEnd);
        }
        Ok(())
    }

    fn take(&mut self, id: u64) -> Result<(Consumed, Signals), StreamError> {
        if let Some(failure) = self.failure() {
            return Err(failure);
        }
        if self.state == StreamState::Ended {
            return Ok((Consumed::End, Signals::default()));
        }
        let Some(chunk) = self.queue.pop_front() else {
            return Ok((Consumed::Empty, Signals::default()));
        };

        self.buffered_bytes -= chunk.len();
        self.consumed_chunks += 1;
        self.consumed_bytes += chunk.len() as u64;

        let mut signals = self.finish_if_drained(id);
        if self.need_drain && self.buffered_bytes <= self.high_water_mark {
            self.need_drain = false;
            self.drain_events += 1;
            signals.drain = true;
            debug!(stream = id, buffered = self.buffered_bytes, "stream drained");
        }
        Ok((Consumed::Chunk(chunk), signals))
    }

    /// 已请求结束且队列为空时转入 `Ended`；只会发生一次。
    fn finish_if_drained(&mut self, id: u64) -> Signals {
        if !self.ending || !self.queue.is_empty() || self.state.is_terminal() {
            return Signals::default();
        }
        self.state = StreamState::Ended;
        debug!(stream = id, chunks = self.consumed_chunks, "stream ended");
        Signals {
            data: true,
            finish: true,
            ..Signals::default()
        }
    }
}
