//! Correlation-multiplexed host server transport
//!
//! One transport owns one socket to one host service. Several logical
//! callers may issue requests through it concurrently: every outgoing frame
//! is stamped with a fresh correlation ID, and inbound frames are matched
//! back to their waiters by that ID. A frame that arrives while its claimant
//! is not the active reader is buffered, not dropped; whichever caller holds
//! the channel lock performs the physical read and parks frames destined for
//! other callers.

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::frame::{Frame, CODE_END_OF_SESSION};
use crate::service::HostService;

pub use crate::frame::{DynStream, ReadWrite};

/// Capability set every host service transport offers
pub trait Transport: Send + Sync {
    /// The host service this transport is connected to
    fn service(&self) -> HostService;

    /// Stamp the next correlation ID on the frame, write it, return the ID
    fn send(&self, frame: &Frame) -> TransportResult<u32>;

    /// Send a request whose reply should be dropped when it arrives
    fn send_and_discard(&self, frame: &Frame) -> TransportResult<u32>;

    /// Block until the frame stamped with the given correlation ID arrives
    fn receive(&self, correlation: u32) -> TransportResult<Frame>;

    /// Send and receive as one exchange, no interleaved sends in between
    fn send_and_receive(&self, frame: &Frame) -> TransportResult<Frame>;

    /// Send a best-effort end-of-session frame and close the socket
    fn disconnect(&self);

    /// True once the transport has latched closed
    fn is_closed(&self) -> bool;
}

/// Per-socket channel state, guarded by the transport lock
struct Channel {
    /// Live stream; None once the transport has latched closed
    stream: Option<DynStream>,
    /// Next correlation ID to allocate; zero is never a valid ID
    next_correlation: u32,
    /// Replies read off the socket but not yet claimed
    pending: Vec<Frame>,
    /// Correlation IDs whose replies are dropped on arrival
    discard: HashSet<u32>,
}

/// Lock-step request/reply multiplexer over one host service socket
///
/// All physical reads and writes are serialized by one connection-wide lock.
/// While a caller is inside `send_and_receive` no other caller can touch the
/// socket; correctness of frame boundaries is traded for per-request
/// concurrency. Callers needing true parallelism use distinct transports.
pub struct HostTransport {
    service: HostService,
    inner: Mutex<Channel>,
}

impl HostTransport {
    /// Create a transport over an established, negotiated stream
    pub fn new(service: HostService, stream: DynStream) -> Self {
        Self {
            service,
            inner: Mutex::new(Channel {
                stream: Some(stream),
                next_correlation: 1,
                pending: Vec::new(),
                discard: HashSet::new(),
            }),
        }
    }

    fn channel(&self) -> MutexGuard<'_, Channel> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocate the next correlation ID
    ///
    /// The counter wraps past u32::MAX back to 1. An ID that is still
    /// outstanding (buffered reply or pending discard) is never reissued;
    /// allocation fails instead of silently colliding.
    fn allocate_correlation(channel: &mut Channel) -> TransportResult<u32> {
        let id = channel.next_correlation;
        if channel.discard.contains(&id)
            || channel.pending.iter().any(|f| f.correlation == id)
        {
            return Err(TransportError::CorrelationInUse { correlation: id });
        }
        channel.next_correlation = match channel.next_correlation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        Ok(id)
    }

    fn send_locked(
        channel: &mut Channel,
        frame: &Frame,
        discard_reply: bool,
    ) -> TransportResult<u32> {
        if channel.stream.is_none() {
            return Err(TransportError::Closed);
        }
        let id = Self::allocate_correlation(channel)?;

        let mut bytes = frame.to_bytes();
        Frame::set_correlation_in(&mut bytes, id);

        let stream = match channel.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(TransportError::Closed),
        };
        if let Err(e) = stream.write_all(&bytes).and_then(|_| stream.flush()) {
            channel.stream = None;
            return Err(TransportError::from(e));
        }
        if discard_reply {
            channel.discard.insert(id);
        }
        Ok(id)
    }

    fn receive_locked(channel: &mut Channel, correlation: u32) -> TransportResult<Frame> {
        loop {
            // A reply buffered by an earlier reader is claimed without IO
            if let Some(pos) = channel
                .pending
                .iter()
                .position(|f| f.correlation == correlation)
            {
                return Ok(channel.pending.remove(pos));
            }

            let stream = match channel.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(TransportError::Closed),
            };

            let frame = match Frame::read_from(&mut **stream) {
                Ok(frame) => frame,
                Err(e) => {
                    // Reads cannot be resynchronized mid-stream; latch closed
                    channel.stream = None;
                    return Err(e);
                }
            };

            if channel.discard.remove(&frame.correlation) {
                debug!(
                    "dropping discarded reply, correlation {} code 0x{:04X}",
                    frame.correlation, frame.code
                );
                continue;
            }

            // Not necessarily ours; park it for its rightful claimant
            channel.pending.push(frame);
        }
    }
}

impl Transport for HostTransport {
    fn service(&self) -> HostService {
        self.service
    }

    fn send(&self, frame: &Frame) -> TransportResult<u32> {
        let mut channel = self.channel();
        Self::send_locked(&mut channel, frame, false)
    }

    fn send_and_discard(&self, frame: &Frame) -> TransportResult<u32> {
        let mut channel = self.channel();
        Self::send_locked(&mut channel, frame, true)
    }

    fn receive(&self, correlation: u32) -> TransportResult<Frame> {
        let mut channel = self.channel();
        Self::receive_locked(&mut channel, correlation)
    }

    fn send_and_receive(&self, frame: &Frame) -> TransportResult<Frame> {
        // One lock acquisition covers both halves so no other caller's
        // request can interleave between our send and our receive.
        let mut channel = self.channel();
        let id = Self::send_locked(&mut channel, frame, false)?;
        Self::receive_locked(&mut channel, id)
    }

    fn disconnect(&self) {
        let mut channel = self.channel();
        if let Some(mut stream) = channel.stream.take() {
            let eos = Frame::new(self.service.id(), CODE_END_OF_SESSION, Vec::new());
            if let Err(e) = stream.write_all(&eos.to_bytes()).and_then(|_| stream.flush()) {
                warn!("end-of-session send failed for {}: {e}", self.service);
            }
            channel.pending.clear();
            channel.discard.clear();
        }
    }

    fn is_closed(&self) -> bool {
        self.channel().stream.is_none()
    }
}
