//! Rank-group communication primitives.
//!
//! The solver never touches global state to learn who it is or who its peers are.
//! Every collective call receives an explicit [`Communicator`], which is the
//! transport interface the core consumes:
//!
//! - `rank()` / `size()`: identity within a fixed-size group.
//! - `all_reduce_sum`: element-wise global sum, identical on every rank.
//! - `exchange`: point-to-point sparse all-to-all of [`Parcel`]s.
//! - `barrier`: synchronisation without payload.
//!
//! Two implementations ship with the crate. [`SelfComm`] is a group of size one,
//! so the entire solver runs and is testable in a single process. [`ThreadComm`]
//! models a group of ranks as OS threads talking over `crossbeam-channel`
//! mailboxes; it exercises the exact same collective code paths an MPI binding
//! would.
//!
//! All ranks must enter the same collectives in the same order. [`ThreadComm`]
//! stamps every message with a sequence number and a tag and reports a
//! [`ErrorKind::Transport`] error when ranks disagree, instead of hanging.

use crate::error::{ErrorKind, Result, SolverError};
use crossbeam_channel::{self as cc, Receiver, RecvTimeoutError, Sender};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

/// Sparse payload exchanged between ranks: global amplitude indices and the
/// values to accumulate at them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parcel {
    pub indices: Vec<u64>,
    pub values: Vec<f64>,
}

impl Parcel {
    pub fn push(&mut self, index: u64, value: f64) {
        self.indices.push(index);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Collective communication within a fixed, rank-addressed process group.
pub trait Communicator {
    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Replaces every entry of `values` by its sum over all ranks.
    ///
    /// Contributions are summed in rank order on every rank, so all ranks hold
    /// bitwise identical results afterwards.
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()>;

    /// Sends `outgoing[dest]` to each `dest` and returns what every peer sent
    /// to this rank, keyed by source rank. Empty parcels are omitted from the
    /// result.
    fn exchange(&self, outgoing: BTreeMap<usize, Parcel>) -> Result<BTreeMap<usize, Parcel>>;

    /// Blocks until every rank has arrived.
    fn barrier(&self) -> Result<()>;

    /// Global sum of a single scalar.
    fn reduce_sum(&self, local: f64) -> Result<f64> {
        let mut buf = [local];
        self.all_reduce_sum(&mut buf)?;
        Ok(buf[0])
    }

    /// Turns a rank-local precondition check into a group-wide verdict.
    ///
    /// Every rank passes the outcome of its own check; one scalar reduction
    /// counts the failures. A rank whose own check failed gets its error back.
    /// The others get a `Transport` error naming how many peers failed, so no
    /// rank goes on to a collective that some peer will never enter.
    fn agree(&self, local: Result<()>) -> Result<()> {
        let failed = self.reduce_sum(if local.is_err() { 1.0 } else { 0.0 })?;
        local?;
        if failed > 0.0 {
            return Err(ErrorKind::Transport {
                rank: self.rank(),
                message: format!("{failed} peer rank(s) failed a precondition"),
            }
            .into());
        }
        Ok(())
    }

    /// Gathers one slice per rank onto every rank, in rank order.
    fn all_gather(&self, local: &[f64]) -> Result<Vec<Vec<f64>>> {
        let outgoing = (0..self.size())
            .filter(|&dest| dest != self.rank())
            .map(|dest| {
                (
                    dest,
                    Parcel {
                        indices: Vec::new(),
                        values: local.to_vec(),
                    },
                )
            })
            .collect();
        let mut received = self.exchange(outgoing)?;
        Ok((0..self.size())
            .map(|src| {
                if src == self.rank() {
                    local.to_vec()
                } else {
                    received.remove(&src).map(|p| p.values).unwrap_or_default()
                }
            })
            .collect())
    }
}

fn check_destinations(rank: usize, size: usize, outgoing: &BTreeMap<usize, Parcel>) -> Result<()> {
    if let Some(dest) = outgoing.keys().find(|&&dest| dest >= size) {
        return Err(ErrorKind::Transport {
            rank,
            message: format!("exchange addressed to rank {dest} in a group of {size}"),
        }
        .into());
    }
    Ok(())
}

/// The trivial group: one rank, no peers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn exchange(&self, mut outgoing: BTreeMap<usize, Parcel>) -> Result<BTreeMap<usize, Parcel>> {
        check_destinations(0, 1, &outgoing)?;
        outgoing.retain(|_, parcel| !parcel.is_empty());
        Ok(outgoing)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Reduce,
    Exchange,
    Barrier,
}

#[derive(Debug)]
enum Payload {
    Scalars(Vec<f64>),
    Parcel(Parcel),
    Empty,
}

#[derive(Debug)]
struct Envelope {
    from: usize,
    seq: u64,
    tag: Tag,
    payload: Payload,
}

/// One rank of an in-process group created by [`ThreadGroup`].
///
/// Each rank owns a mailbox and a sender into every peer's mailbox. Messages
/// from one peer arrive in the order they were sent; messages that belong to a
/// later collective (a fast peer running ahead) are parked per source until
/// this rank reaches that collective.
pub struct ThreadComm {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    mailbox: Receiver<Envelope>,
    parked: RefCell<Vec<VecDeque<Envelope>>>,
    seq: Cell<u64>,
    timeout: Duration,
}

impl ThreadComm {
    fn transport_error(&self, message: String) -> SolverError {
        ErrorKind::Transport {
            rank: self.rank,
            message,
        }
        .into()
    }

    /// Runs one collective step: sends `payload_for(dest)` to every peer and
    /// returns the matching envelope from every peer, indexed by source rank.
    fn collective(
        &self,
        tag: Tag,
        mut payload_for: impl FnMut(usize) -> Payload,
    ) -> Result<Vec<Option<Payload>>> {
        let seq = self.seq.get();
        self.seq.set(seq + 1);

        for (dest, sender) in self.peers.iter().enumerate() {
            if dest == self.rank {
                continue;
            }
            let envelope = Envelope {
                from: self.rank,
                seq,
                tag,
                payload: payload_for(dest),
            };
            sender
                .send(envelope)
                .map_err(|_| self.transport_error(format!("rank {dest} has left the group")))?;
        }

        let mut received: Vec<Option<Payload>> = (0..self.peers.len()).map(|_| None).collect();
        for src in 0..self.peers.len() {
            if src == self.rank {
                continue;
            }
            let envelope = self.next_from(src)?;
            if envelope.seq != seq || envelope.tag != tag {
                return Err(self.transport_error(format!(
                    "collective mismatch with rank {src}: expected {tag:?}#{seq}, got {:?}#{}",
                    envelope.tag, envelope.seq
                )));
            }
            received[src] = Some(envelope.payload);
        }
        Ok(received)
    }

    fn next_from(&self, src: usize) -> Result<Envelope> {
        if let Some(envelope) = self.parked.borrow_mut()[src].pop_front() {
            return Ok(envelope);
        }
        loop {
            let envelope = match self.mailbox.recv_timeout(self.timeout) {
                Ok(envelope) => envelope,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(self.transport_error(format!(
                        "timed out after {:?} waiting for rank {src}",
                        self.timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.transport_error("mailbox disconnected".to_string()));
                }
            };
            if envelope.from == src {
                return Ok(envelope);
            }
            let from = envelope.from;
            self.parked.borrow_mut()[from].push_back(envelope);
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()> {
        let local = values.to_vec();
        let received = self.collective(Tag::Reduce, |_| Payload::Scalars(local.clone()))?;

        values.iter_mut().for_each(|v| *v = 0.0);
        for (src, payload) in received.into_iter().enumerate() {
            let contribution = if src == self.rank {
                local.clone()
            } else {
                match payload {
                    Some(Payload::Scalars(s)) => s,
                    _ => {
                        let message = format!("bad reduce payload from rank {src}");
                        return Err(self.transport_error(message));
                    }
                }
            };
            if contribution.len() != values.len() {
                return Err(self.transport_error(format!(
                    "reduce length mismatch: rank {src} sent {}, expected {}",
                    contribution.len(),
                    values.len()
                )));
            }
            for (acc, c) in values.iter_mut().zip(contribution) {
                *acc += c;
            }
        }
        Ok(())
    }

    fn exchange(&self, mut outgoing: BTreeMap<usize, Parcel>) -> Result<BTreeMap<usize, Parcel>> {
        check_destinations(self.rank, self.size(), &outgoing)?;
        let mut own = outgoing.remove(&self.rank).unwrap_or_default();
        let received = self.collective(Tag::Exchange, |dest| {
            Payload::Parcel(outgoing.remove(&dest).unwrap_or_default())
        })?;

        let mut result = BTreeMap::new();
        for (src, payload) in received.into_iter().enumerate() {
            let parcel = if src == self.rank {
                std::mem::take(&mut own)
            } else {
                match payload {
                    Some(Payload::Parcel(p)) => p,
                    _ => {
                        let message = format!("bad exchange payload from rank {src}");
                        return Err(self.transport_error(message));
                    }
                }
            };
            if !parcel.is_empty() {
                result.insert(src, parcel);
            }
        }
        Ok(result)
    }

    fn barrier(&self) -> Result<()> {
        self.collective(Tag::Barrier, |_| Payload::Empty).map(|_| ())
    }
}

/// Builder for an in-process group of [`ThreadComm`] ranks.
#[derive(Debug, Clone, Copy)]
pub struct ThreadGroup {
    size: usize,
    timeout: Duration,
}

impl ThreadGroup {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            timeout: Duration::from_secs(120),
        }
    }

    /// How long a rank waits on a silent peer before reporting a transport error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates the communicators, one per rank, in rank order.
    pub fn communicators(&self) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| cc::unbounded::<Envelope>()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, mailbox)| ThreadComm {
                rank,
                peers: senders.clone(),
                mailbox,
                parked: RefCell::new((0..self.size).map(|_| VecDeque::new()).collect()),
                seq: Cell::new(0),
                timeout: self.timeout,
            })
            .collect()
    }

    /// Runs `body` once per rank on its own thread and returns the per-rank
    /// results in rank order.
    ///
    /// # Panics
    /// Re-raises the panic of any rank thread.
    pub fn run<T, F>(&self, body: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&ThreadComm) -> T + Sync,
    {
        let comms = self.communicators();
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let body = &body;
                    scope.spawn(move || body(&comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(value) => value,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}
