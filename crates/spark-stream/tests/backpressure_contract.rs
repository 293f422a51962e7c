//! `backpressure_contract` 集成测试：从公开 API 验证单个 `FlowStream` 的背压与生命周期契约。
//!
//! # 测试目标（Why）
//! - 高水位判定与 drain 信号是管道暂停/恢复的唯一依据，信号多发或漏发都会让管道卡死或无界缓冲；
//! - 终态（`Ended`/`Errored`/`Destroyed`）必须吸收后续操作，且不会重复通知。
//!
//! # 结构安排（How）
//! - 手动构造 `Context`（`noop_waker_ref`）逐步轮询，精确观察每一步的就绪状态；
//! - 计数型 waker 用于断言“恰好一次”唤醒；
//! - `proptest` 覆盖任意写入/消费交错下 drain 次数与缓冲量的影子模型。

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, Wake, Waker},
};

use futures::{StreamExt, executor::block_on, stream::FusedStream, task::noop_waker_ref};
use proptest::prelude::*;
use spark_stream::{Consumed, FlowStream, StreamConfig, StreamError, StreamState};

#[derive(Default)]
struct CountingWaker {
    wakes: AtomicUsize,
}

impl Wake for CountingWaker {
    fn wake(self: Arc<Self>) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting_waker() -> (Arc<CountingWaker>, Waker) {
    let counter = Arc::new(CountingWaker::default());
    let waker = Waker::from(counter.clone());
    (counter, waker)
}

fn noop_cx() -> Context<'static> {
    Context::from_waker(noop_waker_ref())
}

/// H=16：10 + 10 字节时第二次写入返回 `false`；消费第一块后恰好触发一次 drain。
#[test]
fn backpressure_round_trip() {
    let stream = FlowStream::with_high_water_mark(16);
    assert_eq!(stream.write(vec![1u8; 10]), Ok(true));
    assert_eq!(stream.write(vec![2u8; 10]), Ok(false));
    assert!(stream.need_drain());
    assert_eq!(stream.buffered_bytes(), 20);

    let (counter, waker) = counting_waker();
    let mut cx = Context::from_waker(&waker);
    assert!(stream.poll_drain(&mut cx).is_pending());

    let Ok(Consumed::Chunk(first)) = stream.consume() else {
        panic!("应取到第一块");
    };
    assert_eq!(&first[..], &[1u8; 10][..]);
    assert_eq!(stream.buffered_bytes(), 10);
    assert!(!stream.need_drain());
    assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
    assert_eq!(stream.poll_drain(&mut cx), Poll::Ready(Ok(())));

    assert!(matches!(stream.consume(), Ok(Consumed::Chunk(_))));
    assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
    assert_eq!(stream.stats().drain_events, 1);
    assert_eq!(stream.stats().backpressure_events, 1);
}

/// 恰好等于高水位仍视为接受。
#[test]
fn buffered_equal_to_mark_is_accepted() {
    let stream = FlowStream::with_high_water_mark(16);
    assert_eq!(stream.write(vec![0u8; 16]), Ok(true));
    assert_eq!(stream.write(Vec::<u8>::new()), Ok(true));
    assert_eq!(stream.write(vec![0u8; 1]), Ok(false));
}

/// 高水位为 0 时任何非空写入都立即触发背压。
#[test]
fn zero_high_water_mark_rejects_every_non_empty_write() {
    let stream = FlowStream::new(StreamConfig::with_high_water_mark(0));
    assert_eq!(stream.write(&b"x"[..]), Ok(false));
    assert!(matches!(stream.consume(), Ok(Consumed::Chunk(_))));
    assert_eq!(stream.poll_drain(&mut noop_cx()), Poll::Ready(Ok(())));
}

#[test]
fn write_after_end_is_rejected_without_side_effects() {
    let stream = FlowStream::with_high_water_mark(16);
    stream.write(&b"tail"[..]).expect("结束前写入");
    stream.end().expect("请求结束");
    assert!(stream.is_ending());
    assert_eq!(stream.write(&b"late"[..]), Err(StreamError::WriteAfterEnd));
    assert_eq!(stream.buffered_bytes(), 4);

    assert!(matches!(stream.consume(), Ok(Consumed::Chunk(chunk)) if &chunk[..] == b"tail"));
    assert_eq!(stream.state(), StreamState::Ended);
    assert_eq!(stream.consume(), Ok(Consumed::End));
    assert_eq!(stream.write(&b"later"[..]), Err(StreamError::WriteAfterEnd));
}

#[test]
fn end_on_empty_stream_finishes_immediately() {
    let stream = FlowStream::with_high_water_mark(16);
    assert!(stream.poll_finished(&mut noop_cx()).is_pending());
    stream.end().expect("请求结束");
    assert_eq!(stream.state(), StreamState::Ended);
    assert_eq!(stream.poll_finished(&mut noop_cx()), Poll::Ready(Ok(())));
    assert!(stream.end().is_ok());
}

/// 重复 destroy 与一次 destroy 的可观察效果相同：不重复唤醒、不覆盖原因。
#[test]
fn destroy_is_idempotent() {
    let stream = FlowStream::with_high_water_mark(16);
    stream.write(vec![0u8; 32]).expect("写入");

    let (counter, waker) = counting_waker();
    let mut cx = Context::from_waker(&waker);
    assert!(stream.poll_drain(&mut cx).is_pending());

    assert!(stream.destroy(Some("first".to_owned())));
    let wakes = counter.wakes.load(Ordering::SeqCst);
    assert_eq!(wakes, 1);
    assert!(!stream.destroy(Some("second".to_owned())));
    assert!(!stream.fail("third"));
    assert_eq!(counter.wakes.load(Ordering::SeqCst), wakes);

    let expected = StreamError::Destroyed {
        reason: Some("first".to_owned()),
    };
    assert_eq!(stream.state(), StreamState::Destroyed);
    assert_eq!(stream.buffered_bytes(), 0);
    assert_eq!(stream.poll_drain(&mut cx), Poll::Ready(Err(expected.clone())));
    assert_eq!(stream.consume(), Err(expected.clone()));
    assert_eq!(stream.write(&b"x"[..]), Err(expected.clone()));
    assert_eq!(stream.end(), Err(expected.clone()));
    assert_eq!(stream.poll_closed(&mut cx), Poll::Ready(expected));
}

#[test]
fn destroy_after_end_has_no_effect() {
    let stream = FlowStream::with_high_water_mark(16);
    stream.end().expect("请求结束");
    assert!(!stream.destroy(None));
    assert_eq!(stream.state(), StreamState::Ended);
    assert!(stream.poll_closed(&mut noop_cx()).is_pending());
}

/// `Paused` 时流动模式消费挂起，`resume` 后唤醒等待者并交付积压数据。
#[test]
fn pause_suppresses_flowing_delivery_until_resume() {
    let stream = FlowStream::with_high_water_mark(64);
    let (counter, waker) = counting_waker();
    let mut cx = Context::from_waker(&waker);

    assert!(stream.poll_consume(&mut cx).is_pending());
    assert_eq!(stream.state(), StreamState::Flowing);
    assert!(stream.pause());
    stream.write(&b"held"[..]).expect("写入");
    assert!(stream.poll_consume(&mut cx).is_pending());
    assert_eq!(counter.wakes.load(Ordering::SeqCst), 0);

    assert!(stream.resume());
    assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
    assert!(matches!(stream.poll_consume(&mut cx), Poll::Ready(Ok(Some(chunk))) if &chunk[..] == b"held"));
    assert!(!stream.resume());
}

#[test]
fn stream_adapter_yields_chunks_then_terminates() {
    let stream = FlowStream::with_high_water_mark(64);
    for payload in [&b"a"[..], &b"bc"[..], &b"def"[..]] {
        stream.write(payload).expect("写入");
    }
    stream.end().expect("请求结束");

    let collected: Vec<Vec<u8>> = block_on(
        stream
            .clone()
            .map(|item| item.map(|chunk| chunk.to_vec()))
            .collect::<Vec<_>>(),
    )
    .into_iter()
    .collect::<Result<_, _>>()
    .expect("无错误");
    assert_eq!(collected, vec![b"a".to_vec(), b"bc".to_vec(), b"def".to_vec()]);
}

/// 失败终态通过 `Stream` 适配只产出一次错误，随后结束，`collect` 得以返回。
#[test]
fn stream_adapter_stops_after_failure() {
    let stream = FlowStream::with_high_water_mark(64);
    stream.write(&b"lost"[..]).expect("写入");
    assert!(stream.fail("boom"));

    let mut consumer = stream.clone();
    let items: Vec<Result<Vec<u8>, StreamError>> =
        block_on((&mut consumer).map(|item| item.map(|chunk| chunk.to_vec())).collect());
    assert_eq!(
        items,
        vec![Err(StreamError::Failed {
            reason: "boom".to_owned()
        })]
    );
    assert!(consumer.is_terminated());
    assert_eq!(block_on(consumer.next()), None);

    let destroyed = FlowStream::with_high_water_mark(64);
    destroyed.destroy(None);
    assert_eq!(block_on(destroyed.collect::<Vec<_>>()).len(), 1);
}

#[derive(Clone, Debug)]
enum Op {
    Write(usize),
    Consume,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0usize..48).prop_map(Op::Write), Just(Op::Consume)]
}

proptest! {
    /// 影子模型：对任意写入/消费交错，`write` 的返回值、drain 次数与缓冲量都与模型一致，
    /// 且 drain 只在缓冲回落到高水位及以下时发生。
    #[test]
    fn drain_matches_shadow_model(mark in 0usize..64, ops in prop::collection::vec(op(), 0..64)) {
        let stream = FlowStream::with_high_water_mark(mark);
        let mut queue = std::collections::VecDeque::new();
        let mut buffered = 0usize;
        let mut need_drain = false;
        let mut drains = 0u64;

        for op in ops {
            match op {
                Op::Write(len) => {
                    buffered += len;
                    queue.push_back(len);
                    let accepted = buffered <= mark;
                    if !accepted {
                        need_drain = true;
                    }
                    prop_assert_eq!(stream.write(vec![0u8; len]), Ok(accepted));
                }
                Op::Consume => {
                    let consumed = stream.consume();
                    match queue.pop_front() {
                        Some(len) => {
                            buffered -= len;
                            if need_drain && buffered <= mark {
                                need_drain = false;
                                drains += 1;
                            }
                            prop_assert!(matches!(consumed, Ok(Consumed::Chunk(ref chunk)) if chunk.len() == len));
                        }
                        None => prop_assert_eq!(consumed, Ok(Consumed::Empty)),
                    }
                }
            }
            prop_assert_eq!(stream.buffered_bytes(), buffered);
            prop_assert_eq!(stream.need_drain(), need_drain);
        }
        prop_assert_eq!(stream.stats().drain_events, drains);
    }
}
