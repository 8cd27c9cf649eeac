//! Latest-value boards shared between the recognition thread and consumers.
//!
//! Both boards follow the same discipline: exactly one writer (the
//! recognition loop), any number of readers, and every read returns a whole
//! value.

use crate::decision::Decision;
use crate::overlay::AnnotatedFrame;
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// State of the decision board.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardState {
    /// No recognition pass has completed yet.
    Waiting,
    /// The most recent decision.
    Live { decision: Decision },
    /// The producer has stopped; no further writes will happen.
    Stopped { last: Option<Decision> },
}

impl BoardState {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            BoardState::Waiting => None,
            BoardState::Live { decision } => Some(decision),
            BoardState::Stopped { last } => last.as_ref(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, BoardState::Stopped { .. })
    }
}

/// A board read: the state plus the generation it was read at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub generation: u64,
    #[serde(flatten)]
    pub state: BoardState,
}

struct Inner {
    state: BoardState,
    generation: u64,
}

/// Single-writer, many-reader holder of the current decision.
pub struct DecisionBoard {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Default for DecisionBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionBoard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BoardState::Waiting,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current decision. Ignored once the board is closed.
    pub fn write(&self, decision: Decision) {
        let mut inner = self.lock();
        if inner.state.is_stopped() {
            tracing::warn!(verdict = %decision.verdict, "write after close ignored");
            return;
        }
        inner.state = BoardState::Live { decision };
        inner.generation += 1;
        drop(inner);
        self.changed.notify_all();
    }

    pub fn read(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            generation: inner.generation,
            state: inner.state.clone(),
        }
    }

    /// Block until the generation passes `seen`, the board closes, or
    /// `timeout` elapses, then return the current snapshot.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Snapshot {
        // A timeout too large to represent as an Instant means no deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.lock();

        while inner.generation <= seen && !inner.state.is_stopped() {
            inner = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    self.changed
                        .wait_timeout(inner, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .changed
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }

        Snapshot {
            generation: inner.generation,
            state: inner.state.clone(),
        }
    }

    /// Enter the terminal state and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state.is_stopped() {
            return;
        }
        let last = inner.state.decision().cloned();
        inner.state = BoardState::Stopped { last };
        inner.generation += 1;
        drop(inner);
        self.changed.notify_all();
        tracing::debug!("decision board closed");
    }
}

/// Most recent display frame, annotated or pass-through.
#[derive(Default)]
pub struct FrameBuffer {
    latest: RwLock<Option<Arc<AnnotatedFrame>>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Arc<AnnotatedFrame>) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn latest(&self) -> Option<Arc<AnnotatedFrame>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Verdict;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn approved(name: &str) -> Decision {
        Decision::now(Verdict::Approved {
            identity: name.into(),
        })
    }

    #[test]
    fn test_starts_waiting() {
        let board = DecisionBoard::new();
        let snap = board.read();
        assert_eq!(snap.generation, 0);
        assert_eq!(snap.state, BoardState::Waiting);
        assert!(snap.state.decision().is_none());
    }

    #[test]
    fn test_write_replaces_and_bumps_generation() {
        let board = DecisionBoard::new();
        board.write(Decision::now(Verdict::NoFace));
        board.write(approved("alice"));
        let snap = board.read();
        assert_eq!(snap.generation, 2);
        assert_eq!(
            snap.state.decision().map(|d| &d.verdict),
            Some(&Verdict::Approved { identity: "alice".into() })
        );
    }

    #[test]
    fn test_close_keeps_last_and_rejects_writes() {
        let board = DecisionBoard::new();
        board.write(Decision::now(Verdict::Unknown));
        board.close();
        board.close();
        board.write(approved("mallory"));

        let snap = board.read();
        assert_eq!(snap.generation, 2);
        match snap.state {
            BoardState::Stopped { last: Some(d) } => assert_eq!(d.verdict, Verdict::Unknown),
            other => panic!("expected stopped with last decision, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_newer_times_out_without_writes() {
        let board = DecisionBoard::new();
        let start = Instant::now();
        let snap = board.wait_newer(0, Duration::from_millis(30));
        assert_eq!(snap.generation, 0);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_newer_returns_immediately_when_behind() {
        let board = DecisionBoard::new();
        board.write(Decision::now(Verdict::NoFace));
        let snap = board.wait_newer(0, Duration::from_secs(10));
        assert_eq!(snap.generation, 1);
    }

    #[test]
    fn test_close_wakes_blocked_waiter() {
        let board = Arc::new(DecisionBoard::new());
        let waiter = {
            let board = Arc::clone(&board);
            thread::spawn(move || board.wait_newer(0, Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        board.close();
        let snap = waiter.join().unwrap();
        assert!(snap.state.is_stopped());
    }

    #[test]
    fn test_wait_newer_with_unbounded_timeout() {
        let board = Arc::new(DecisionBoard::new());
        let waiter = {
            let board = Arc::clone(&board);
            thread::spawn(move || board.wait_newer(0, Duration::MAX))
        };
        thread::sleep(Duration::from_millis(50));
        board.close();
        let snap = waiter.join().unwrap();
        assert!(snap.state.is_stopped());
        assert_eq!(snap.generation, 1);
    }

    #[test]
    fn test_concurrent_reads_never_torn() {
        // Every observed snapshot must be exactly the pre-write or the
        // post-write value, with the verdict matching its generation.
        let board = Arc::new(DecisionBoard::new());
        let before = approved("alice");
        board.write(before.clone());
        let after = Decision::now(Verdict::Unknown);

        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let board = Arc::clone(&board);
                let done = Arc::clone(&done);
                let (before, after) = (before.clone(), after.clone());
                thread::spawn(move || {
                    let mut reads = 0usize;
                    while !done.load(Ordering::Acquire) || reads < 100 {
                        let snap = board.read();
                        match (snap.generation, snap.state) {
                            (1, BoardState::Live { decision }) => assert_eq!(decision, before),
                            (2, BoardState::Live { decision }) => assert_eq!(decision, after),
                            other => panic!("torn or unexpected read: {other:?}"),
                        }
                        reads += 1;
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(5));
        board.write(after.clone());
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_snapshot_json_shape() {
        let board = DecisionBoard::new();
        assert_eq!(
            serde_json::to_value(board.read()).unwrap(),
            serde_json::json!({"generation": 0, "state": "WAITING"})
        );
        board.write(approved("alice"));
        let json = serde_json::to_value(board.read()).unwrap();
        assert_eq!(json["state"], "LIVE");
        assert_eq!(json["decision"]["status"], "APPROVED");
        assert_eq!(json["decision"]["identity"], "alice");
    }

    #[test]
    fn test_frame_buffer_latest_wins() {
        let buffer = FrameBuffer::new();
        assert!(buffer.latest().is_none());
        for sequence in 0..3 {
            buffer.publish(Arc::new(AnnotatedFrame::passthrough(
                image::RgbImage::new(4, 4),
                sequence,
            )));
        }
        assert_eq!(buffer.latest().map(|f| f.sequence), Some(2));
    }
}
