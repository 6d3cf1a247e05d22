//! Serial link framing.
//!
//! Received bytes arrive from the UART idle-line/DMA interrupt and are
//! assembled into newline-terminated frames. The superloop picks up at most one
//! completed frame per poll. Outbound traffic goes through a single slot: the
//! loop queues a payload, the periodic timer interrupt hands it to the DMA
//! engine, and the transfer-complete interrupt frees the slot again.
//!
//! All methods take `&self` so one `LinkFramer` can live in a `static` shared
//! by the interrupt handlers and the loop.

use core::{
    cell::RefCell,
    sync::atomic::{AtomicU32, AtomicU8, Ordering},
};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

/// Largest frame, in either direction, excluding the terminator.
pub const FRAME_CAPACITY: usize = 64;

/// Byte that ends an inbound frame.
pub const TERMINATOR: u8 = b'\n';

/// One received line, without its terminator.
pub type Frame = heapless::Vec<u8, FRAME_CAPACITY>;

/// Result of [`LinkFramer::try_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Payload copied into the slot; the next timer tick starts the transfer.
    Sent,
    /// A previous payload is still queued or on the wire. Nothing was copied.
    Busy,
    /// Payload is larger than [`FRAME_CAPACITY`]. Nothing was copied.
    BufferFull,
}

/// Receive-side counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStats {
    pub frames: u32,
    /// Frames thrown away because they outgrew the buffer.
    pub discarded: u32,
    /// Completed frames replaced by a newer one before the loop took them.
    pub overwritten: u32,
}

const TX_IDLE: u8 = 0;
const TX_QUEUED: u8 = 1;
const TX_IN_FLIGHT: u8 = 2;

enum Assembled {
    Pending,
    Complete(Frame),
    Discarded,
}

/// Interrupt-owned line assembler.
///
/// An oversized line is dropped whole: once the buffer is full every further
/// byte is ignored until the terminator, which then resets the assembler
/// without producing a frame.
struct Assembler {
    buf: Frame,
    overflowed: bool,
}

impl Assembler {
    const fn new() -> Self {
        Self {
            buf: Frame::new(),
            overflowed: false,
        }
    }

    fn push(&mut self, byte: u8) -> Assembled {
        if byte == TERMINATOR {
            if core::mem::take(&mut self.overflowed) {
                self.buf.clear();
                return Assembled::Discarded;
            }
            return Assembled::Complete(core::mem::take(&mut self.buf));
        }

        if !self.overflowed && self.buf.push(byte).is_err() {
            self.overflowed = true;
            self.buf.clear();
        }
        Assembled::Pending
    }
}

pub struct LinkFramer {
    rx: Mutex<CriticalSectionRawMutex, RefCell<Assembler>>,
    ready: Mutex<CriticalSectionRawMutex, RefCell<Option<Frame>>>,
    tx_state: AtomicU8,
    tx_buf: Mutex<CriticalSectionRawMutex, RefCell<Frame>>,
    frames: AtomicU32,
    discarded: AtomicU32,
    overwritten: AtomicU32,
}

impl LinkFramer {
    pub const fn new() -> Self {
        Self {
            rx: Mutex::new(RefCell::new(Assembler::new())),
            ready: Mutex::new(RefCell::new(None)),
            tx_state: AtomicU8::new(TX_IDLE),
            tx_buf: Mutex::new(RefCell::new(Frame::new())),
            frames: AtomicU32::new(0),
            discarded: AtomicU32::new(0),
            overwritten: AtomicU32::new(0),
        }
    }

    /// Receive interrupt side: append one byte.
    pub fn feed(
        &self,
        byte: u8,
    ) {
        let assembled = self.rx.lock(|rx| rx.borrow_mut().push(byte));
        match assembled {
            Assembled::Pending => {}
            Assembled::Discarded => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
            Assembled::Complete(frame) => {
                let previous = self.ready.lock(|ready| ready.borrow_mut().replace(frame));
                if previous.is_some() {
                    self.overwritten.fetch_add(1, Ordering::Relaxed);
                }
                self.frames.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Receive interrupt side: append every byte of one DMA idle-line event.
    pub fn feed_slice(
        &self,
        bytes: &[u8],
    ) {
        for &b in bytes {
            self.feed(b);
        }
    }

    /// Loop side: take the completed frame, if any. Each frame is returned once.
    pub fn take_frame(&self) -> Option<Frame> {
        self.ready.lock(|ready| ready.borrow_mut().take())
    }

    /// Loop side: queue `payload` for transmission.
    pub fn try_send(
        &self,
        payload: &[u8],
    ) -> SendOutcome {
        if payload.len() > FRAME_CAPACITY {
            return SendOutcome::BufferFull;
        }
        // Only the loop moves the slot out of IDLE, so no interrupt can race this check.
        if self.tx_state.load(Ordering::Acquire) != TX_IDLE {
            return SendOutcome::Busy;
        }
        self.tx_buf.lock(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            let _ = buf.extend_from_slice(payload);
        });
        self.tx_state.store(TX_QUEUED, Ordering::Release);
        SendOutcome::Sent
    }

    /// Timer interrupt side: hand a queued payload to `start`, which kicks off
    /// the DMA transfer. Returns `true` if a transfer was started.
    pub fn start_transmit<F>(
        &self,
        start: F,
    ) -> bool
    where
        F: FnOnce(&[u8]),
    {
        if self.tx_state.load(Ordering::Acquire) != TX_QUEUED {
            return false;
        }
        self.tx_state.store(TX_IN_FLIGHT, Ordering::Release);
        self.tx_buf.lock(|buf| start(&buf.borrow()));
        true
    }

    /// Transfer-complete interrupt side.
    pub fn on_transmit_complete(&self) {
        self.tx_state.store(TX_IDLE, Ordering::Release);
    }

    pub fn is_tx_idle(&self) -> bool {
        self.tx_state.load(Ordering::Acquire) == TX_IDLE
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            frames: self.frames.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
        }
    }
}

impl Default for LinkFramer {
    fn default() -> Self {
        Self::new()
    }
}
