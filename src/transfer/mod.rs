//! The ping-pong transfer loop.
//!
//! The loop drives a [`Channel`] through `rounds` iterations of two
//! half-rounds each. Role-specific behavior is confined to the two
//! [`Strategy`] implementations, which only differ in the order of the shared
//! send/receive steps; the loop itself never branches on the role, so a role
//! cannot issue two consecutive sends or receives within a round.

use crate::config::{Config, Role};
use crate::error::{Error, Result, TransferOp};
use crate::memory::Buffer;
use crate::stats::LatencyLog;
use std::fmt;
use std::hint;
use std::io;
use std::ptr;
use std::sync::atomic::{self, Ordering};
use tracing::debug;

/// Connection seam the loop runs over: a bound transfer buffer plus the four
/// wire primitives. Post/complete calls are blocking and never time out; at
/// most one send and one receive are outstanding at a time.
pub trait Channel {
    /// The registered transfer buffer.
    fn buf(&mut self) -> &mut [u8];
    fn post_send(&mut self) -> io::Result<()>;
    fn post_recv(&mut self) -> io::Result<()>;
    /// Blocks until the outstanding send completes successfully.
    fn complete_send(&mut self) -> io::Result<()>;
    /// Blocks until the outstanding receive completes successfully.
    fn complete_recv(&mut self) -> io::Result<()>;
}

/// A role's schedule for one round: exactly one send step and one receive
/// step, in role-specific order.
pub trait Strategy {
    fn round<C: Channel>(pp: &mut Pingpong<C>, round: usize) -> Result<()>;
}

/// Sends the first half-round of each round.
pub struct Initiator;

/// Receives the first half-round; its first receive is posted during
/// connection setup, before the initiator can send.
pub struct Responder;

impl Strategy for Initiator {
    fn round<C: Channel>(pp: &mut Pingpong<C>, round: usize) -> Result<()> {
        pp.send_step(2 * round)?;
        pp.receive_step(2 * round + 1)
    }
}

impl Strategy for Responder {
    fn round<C: Channel>(pp: &mut Pingpong<C>, round: usize) -> Result<()> {
        pp.receive_step(2 * round)?;
        pp.send_step(2 * round + 1)
    }
}

/// The transfer loop state: the channel, the consistency-mode knobs, the
/// optional device-backed mirror, and the latency log.
pub struct Pingpong<C: Channel> {
    ch: C,
    rounds: usize,
    pattern_fill: bool,
    busy_poll: bool,
    mirror: Option<Buffer>,
    log: LatencyLog,
}

impl<C: Channel> fmt::Debug for Pingpong<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pingpong")
            .field("rounds", &self.rounds)
            .field("pattern_fill", &self.pattern_fill)
            .field("busy_poll", &self.busy_poll)
            .field("mirror", &self.mirror)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl<C: Channel> Pingpong<C> {
    /// The mirror, when given, must match the transfer buffer's size.
    pub fn new(mut ch: C, cfg: &Config, mirror: Option<Buffer>) -> Result<Pingpong<C>> {
        if let Some(m) = &mirror {
            if m.len() != ch.buf().len() {
                return Err(Error::Argument(format!(
                    "mirror region is {} bytes, transfer buffer is {}",
                    m.len(),
                    ch.buf().len()
                )));
            }
        }
        Ok(Pingpong {
            ch,
            rounds: cfg.rounds,
            pattern_fill: cfg.pattern_fill,
            busy_poll: cfg.busy_poll,
            mirror,
            log: LatencyLog::with_capacity(cfg.rounds),
        })
    }

    /// Runs all rounds for the given role and returns the completed log.
    pub fn run(self, role: Role) -> Result<LatencyLog> {
        match role {
            Role::Initiator => self.drive::<Initiator>(),
            Role::Responder => self.drive::<Responder>(),
        }
    }

    fn drive<S: Strategy>(mut self) -> Result<LatencyLog> {
        self.log.restart();
        for round in 0..self.rounds {
            S::round(&mut self, round)?;
        }
        debug!(samples = self.log.len(), "transfer loop finished");
        Ok(self.log)
    }

    /// Pattern byte for half-round `half`: strictly increasing, mod 256.
    fn pattern(half: usize) -> u8 {
        (half + 1) as u8
    }

    fn send_step(&mut self, half: usize) -> Result<()> {
        let pattern = Self::pattern(half);
        if self.pattern_fill {
            match &mut self.mirror {
                Some(mirror) => mirror.as_mut_slice().fill(pattern),
                None => self.ch.buf().fill(pattern),
            }
        }
        if let Some(mirror) = &self.mirror {
            // Producing side sources its payload from the device domain.
            self.ch.buf().copy_from_slice(mirror.as_slice());
        }
        // The transport may read the buffer the moment the send is posted.
        atomic::fence(Ordering::SeqCst);

        self.ch
            .post_send()
            .map_err(|e| Error::transfer(TransferOp::Send, e))?;
        self.ch
            .complete_send()
            .map_err(|e| Error::transfer(TransferOp::Completion, e))?;
        self.log.record();

        // Arm the receive for the peer's next send before it can be posted.
        self.ch
            .post_recv()
            .map_err(|e| Error::transfer(TransferOp::Receive, e))
    }

    fn receive_step(&mut self, half: usize) -> Result<()> {
        if self.busy_poll {
            self.spin_until(Self::pattern(half));
        }
        self.ch
            .complete_recv()
            .map_err(|e| Error::transfer(TransferOp::Completion, e))?;
        self.log.record();

        if let Some(mirror) = &mut self.mirror {
            // Consuming side shadows the received payload into the device
            // domain.
            mirror.as_mut_slice().copy_from_slice(self.ch.buf());
        }
        Ok(())
    }

    /// Data-visibility probe: watches the first byte of the buffer for the
    /// expected pattern while the transport writes it. The completion poll
    /// that follows remains the authoritative signal.
    fn spin_until(&mut self, expected: u8) {
        let first = self.ch.buf().as_ptr();
        while unsafe { ptr::read_volatile(first) } != expected {
            hint::spin_loop();
        }
        atomic::fence(Ordering::SeqCst);
    }
}

/// Convenience driver: wraps the channel, runs every round for the
/// configured role, and hands back the latency log.
pub fn run<C: Channel>(ch: C, cfg: &Config, mirror: Option<Buffer>) -> Result<LatencyLog> {
    Pingpong::new(ch, cfg, mirror)?.run(cfg.role())
}
