//! Single-producer/single-consumer handoff of converted sample blocks.
//!
//! Filled blocks travel to the consumer over one bounded channel and come
//! back for reuse over a second one. Exactly one spare block circulates, so
//! at most one published block waits for the consumer and a second
//! [`StreamWriter::swap`] blocks until the consumer has taken it.
//!
//! Blocks are stamped with the session that produced them. Whatever an
//! earlier session left unread is recycled, never handed out, once a new
//! session begins.

use num_complex::Complex32;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};

/// Largest block a single swap may publish.
pub const STREAM_BUFFER_SIZE: usize = 1_000_000;

// One block plus one end-of-session wakeup.
const PUBLISHED_DEPTH: usize = 2;
// The circulating spare, one wakeup and a replacement spare.
const RECYCLED_DEPTH: usize = 3;

enum Published {
    Block { session: u64, samples: Vec<Complex32> },
    Ended,
}

enum Recycled {
    Slot(Vec<Complex32>),
    Wake,
}

#[derive(Debug, Default)]
struct Shared {
    capacity: usize,
    session: AtomicU64,
    ended: AtomicBool,
    ended_queued: AtomicBool,
    writer_stopped: AtomicBool,
    reader_stopped: AtomicBool,
    reader_gone: AtomicBool,
    wake_pending: AtomicBool,
}

impl Shared {
    fn writer_halted(&self) -> bool {
        self.writer_stopped.load(Ordering::Acquire)
            || self.reader_stopped.load(Ordering::Acquire)
            || self.reader_gone.load(Ordering::Acquire)
    }

    /// Kick a producer blocked on the recycle channel. At most one wakeup is
    /// queued at a time.
    fn wake_writer(&self, recycle: &SyncSender<Recycled>) {
        if !self.wake_pending.swap(true, Ordering::AcqRel)
            && recycle.try_send(Recycled::Wake).is_err()
        {
            self.wake_pending.store(false, Ordering::Release);
        }
    }
}

pub fn channel(capacity: usize) -> (StreamWriter, StreamReader) {
    let (full_tx, full_rx) = sync_channel(PUBLISHED_DEPTH);
    let (recycle_tx, recycle_rx) = sync_channel(RECYCLED_DEPTH);
    let _ = recycle_tx.try_send(Recycled::Slot(Vec::new()));

    let shared = Arc::new(Shared {
        capacity,
        ..Shared::default()
    });
    let control = StreamControl {
        shared: shared.clone(),
        published: full_tx,
        recycle: recycle_tx.clone(),
        recycled: Arc::new(Mutex::new(recycle_rx)),
    };
    (
        StreamWriter {
            control,
            slot: Vec::new(),
            spare: None,
        },
        StreamReader {
            shared,
            published: full_rx,
            recycle: recycle_tx,
            current: Vec::new(),
        },
    )
}

#[derive(Debug)]
pub struct StreamWriter {
    control: StreamControl,
    slot: Vec<Complex32>,
    spare: Option<Vec<Complex32>>,
}

impl StreamWriter {
    /// The writable slot, sized to `count` samples (at most the channel
    /// capacity).
    pub fn write_slot(&mut self, count: usize) -> &mut [Complex32] {
        let count = count.min(self.control.shared.capacity);
        self.slot.resize(count, Complex32::default());
        &mut self.slot[..]
    }

    /// Publish the first `count` samples of the slot. Blocks while the
    /// previous block is still unread; returns false without publishing if
    /// the writer was stopped or the consumer stopped or went away.
    pub fn swap(&mut self, count: usize) -> bool {
        let next = match self.spare.take() {
            Some(spare) => spare,
            None => match self.next_spare() {
                Some(spare) => spare,
                None => return false,
            },
        };
        let shared = &self.control.shared;
        if shared.writer_halted() {
            self.spare = Some(next);
            return false;
        }

        let mut samples = mem::replace(&mut self.slot, next);
        samples.truncate(count);
        let session = shared.session.load(Ordering::Acquire);
        self.control
            .published
            .send(Published::Block { session, samples })
            .is_ok()
    }

    fn next_spare(&mut self) -> Option<Vec<Complex32>> {
        let shared = &self.control.shared;
        let recycled = self
            .control
            .recycled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if shared.writer_halted() {
                return None;
            }
            match recycled.recv() {
                Ok(Recycled::Slot(slot)) => return Some(slot),
                Ok(Recycled::Wake) => shared.wake_pending.store(false, Ordering::Release),
                Err(_) => return None,
            }
        }
    }

    /// Mark the session as over. A consumer waiting in `read()` gets `None`
    /// once it has taken the blocks already published.
    pub fn finish(&self) {
        self.control.end_session();
    }

    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }
}

/// Producer-side switches usable from another thread.
#[derive(Debug, Clone)]
pub struct StreamControl {
    shared: Arc<Shared>,
    published: SyncSender<Published>,
    recycle: SyncSender<Recycled>,
    // Outlives any one writer so a replacement can pick up the spares.
    recycled: Arc<Mutex<Receiver<Recycled>>>,
}

impl StreamControl {
    /// Start a new session: clears the writer stop and the ended mark, and
    /// retires every block published before this call.
    pub fn begin_session(&self) {
        self.shared.session.fetch_add(1, Ordering::AcqRel);
        self.shared.ended.store(false, Ordering::Release);
        self.shared.writer_stopped.store(false, Ordering::Release);
    }

    /// Wake a blocked `swap` and make further swaps fail.
    pub fn stop_writer(&self) {
        self.shared.writer_stopped.store(true, Ordering::Release);
        self.shared.wake_writer(&self.recycle);
    }

    pub fn end_session(&self) {
        self.shared.ended.store(true, Ordering::Release);
        // One queued wakeup is enough; a full channel wakes the reader anyway.
        if !self.shared.ended_queued.swap(true, Ordering::AcqRel)
            && self.published.try_send(Published::Ended).is_err()
        {
            self.shared.ended_queued.store(false, Ordering::Release);
        }
    }

    /// True once the consumer's reader has been dropped.
    pub fn reader_gone(&self) -> bool {
        self.shared.reader_gone.load(Ordering::Acquire)
    }

    /// Replacement writer after the previous one was lost with its thread.
    pub(crate) fn writer(&self) -> StreamWriter {
        StreamWriter {
            control: self.clone(),
            slot: Vec::new(),
            spare: Some(Vec::new()),
        }
    }
}

#[derive(Debug)]
pub struct StreamReader {
    shared: Arc<Shared>,
    published: Receiver<Published>,
    recycle: SyncSender<Recycled>,
    current: Vec<Complex32>,
}

impl StreamReader {
    /// Wait for the next published block. Returns `None` once the reader
    /// has been stopped, or once the session has ended and every block it
    /// published has been read.
    pub fn read(&mut self) -> Option<&[Complex32]> {
        loop {
            if self.shared.reader_stopped.load(Ordering::Acquire) {
                return None;
            }
            let msg = match self.published.try_recv() {
                Ok(msg) => msg,
                Err(TryRecvError::Empty) => {
                    if self.shared.ended.load(Ordering::Acquire) {
                        return None;
                    }
                    match self.published.recv() {
                        Ok(msg) => msg,
                        Err(_) => return None,
                    }
                }
                Err(TryRecvError::Disconnected) => return None,
            };
            let Published::Block { session, samples } = msg else {
                self.shared.ended_queued.store(false, Ordering::Release);
                continue;
            };
            if session == self.shared.session.load(Ordering::Acquire) {
                let done = mem::replace(&mut self.current, samples);
                self.give_back(done);
                break;
            }
            self.give_back(samples);
        }
        Some(&self.current[..])
    }

    /// Tear down the consumer side: wakes a blocked producer, whose swap
    /// then fails.
    pub fn stop(&self) {
        self.shared.reader_stopped.store(true, Ordering::Release);
        self.shared.wake_writer(&self.recycle);
    }

    pub fn clear_read_stop(&self) {
        self.shared.reader_stopped.store(false, Ordering::Release);
    }

    /// Drop any published block so a blocked producer can continue.
    pub fn clear(&self) {
        while let Ok(msg) = self.published.try_recv() {
            match msg {
                Published::Block { samples, .. } => self.give_back(samples),
                Published::Ended => self.shared.ended_queued.store(false, Ordering::Release),
            }
        }
    }

    fn give_back(&self, slot: Vec<Complex32>) {
        let _ = self.recycle.try_send(Recycled::Slot(slot));
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.shared.reader_gone.store(true, Ordering::Release);
        self.shared.wake_writer(&self.recycle);
    }
}
