//! Reliable UDP endpoint.
//!
//! All networking is datagram based. Most traffic (inputs, snapshots)
//! prefers freshness over delivery: a lost snapshot is abridged by
//! interpolating from its neighbours, and a late input is worse than a
//! missing one. The handful of messages that must arrive (connects,
//! deaths, leaves) piggy-back their acknowledgements on the continuous
//! bi-directional traffic instead of holding a separate ordered
//! connection open: every header carries the latest sequence seen from
//! the peer plus a 32-bit bitfield of the 32 before it. Reliable sends
//! are buffered until acknowledged and retransmitted on a timer.
//!
//! A dedicated thread performs blocking receives and hands buffer
//! indices to the main thread through the SPSC queues; see `spsc` and
//! `pool` for the ownership rules.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::net::peer::{
    window_slot, PeerState, PendingPacket, MAX_RETRANSMIT_ATTEMPTS, PEER_INACTIVITY_TIMEOUT,
    RETRANSMIT_RTT_SCALE,
};
use crate::net::pool::{PacketPool, PACKET_POOL_SIZE};
use crate::net::protocol::{Encode, PacketHeader, Writer, HEADER_SIZE, MAX_PACKET_SIZE};
use crate::net::spsc::{self, Consumer, Producer};

pub const MAX_PEERS: usize = 16;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);
const FREE_QUEUE_STARVED_SLEEP: Duration = Duration::from_micros(100);

/// Buffers the main thread keeps back for reliable-window copies; the
/// rest feed the receive thread through the free ring.
const LOCAL_FREE_RESERVE: usize = 64;

pub type PeerId = u32;

/// Peer identity is a mixed hash of the source address. Uniqueness is
/// checked at insertion; a genuine collision within the 16-peer
/// capacity rejects the newcomer.
pub fn hash_addr(addr: &SocketAddr) -> PeerId {
    match addr {
        SocketAddr::V4(v4) => {
            let ip = u32::from(*v4.ip());
            let port = v4.port() as u32;
            ip ^ (port << 16) ^ (port >> 16)
        }
        SocketAddr::V6(v6) => {
            let mut hash = v6.port() as u32;
            for chunk in v6.ip().octets().chunks_exact(4) {
                hash ^= u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                hash = hash.rotate_left(5);
            }
            hash
        }
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown peer")]
    UnknownPeer,
    #[error("reliable window full")]
    WindowFull,
    #[error("no free packet buffers")]
    NoBuffers,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer limit reached")]
    LimitReached,
    #[error("address hash collision")]
    AddressCollision,
}

/// What to do with datagrams from addresses we have no peer for. The
/// server accepts (that is how connections start); the client only
/// talks to the server it added explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownSenderPolicy {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy)]
pub enum TransportEvent {
    PeerRemoved(PeerId),
}

#[derive(Clone, Copy)]
struct RecvDescriptor {
    buffer: u8,
    size: u16,
    from: SocketAddr,
}

/// A payload surfaced by `poll`. The buffer stays checked out to the
/// caller until handed back via `Transport::release`.
#[derive(Debug)]
pub struct Polled {
    pub from: PeerId,
    buffer: u8,
    len: u16,
}

struct ReceiveWorker {
    socket: Arc<UdpSocket>,
    pool: Arc<PacketPool>,
    free: Consumer<u8>,
    received: Producer<RecvDescriptor>,
    running: Arc<AtomicBool>,
}

impl ReceiveWorker {
    fn run(mut self) {
        // On any failure the worker keeps its buffer and reuses it for
        // the next read; indices only travel main -> free ring -> here
        // -> recv ring -> main, so both rings stay single-producer.
        let mut held: Option<u8> = None;

        while self.running.load(Ordering::Acquire) {
            let Some(index) = held.take().or_else(|| self.free.try_pop()) else {
                std::thread::sleep(FREE_QUEUE_STARVED_SLEEP);
                continue;
            };

            // Exclusive: this index came off the free ring and is not
            // published anywhere until pushed below.
            let buffer = unsafe { self.pool.buffer_mut(index) };

            match self.socket.recv_from(buffer) {
                Ok((size, from)) if size >= HEADER_SIZE => {
                    let desc = RecvDescriptor {
                        buffer: index,
                        size: size as u16,
                        from,
                    };
                    if !self.received.try_push(desc) {
                        // Queue full: drop the packet, keep the buffer.
                        held = Some(index);
                    }
                }
                Ok(_) => {
                    // Runt datagram.
                    held = Some(index);
                }
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    held = Some(index);
                }
                Err(e) => {
                    log::debug!("udp receive error: {e}");
                    held = Some(index);
                }
            }
        }
    }
}

pub struct Transport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    pool: Arc<PacketPool>,
    free_tx: Producer<u8>,
    recv_rx: Consumer<RecvDescriptor>,
    running: Arc<AtomicBool>,
    recv_thread: Option<JoinHandle<()>>,

    peers: HashMap<PeerId, PeerState>,
    policy: UnknownSenderPolicy,
    events: VecDeque<TransportEvent>,

    /// Free indices owned by this thread, for reliable-window copies.
    local_free: Vec<u8>,
    /// Reused scratch for ack-freed indices.
    ack_freed: Vec<u8>,

    time: f64,
}

impl Transport {
    pub fn bind<A: ToSocketAddrs>(addr: A, policy: UnknownSenderPolicy) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let pool = Arc::new(PacketPool::new());
        let (mut free_tx, free_rx) = spsc::channel::<u8>(PACKET_POOL_SIZE * 2);
        let (recv_tx, recv_rx) = spsc::channel::<RecvDescriptor>(PACKET_POOL_SIZE * 2);

        let mut local_free = Vec::with_capacity(PACKET_POOL_SIZE);
        for index in 0..PACKET_POOL_SIZE as u8 {
            if (index as usize) < LOCAL_FREE_RESERVE {
                local_free.push(index);
            } else {
                // Ring capacity exceeds the pool, so this cannot fail.
                free_tx.try_push(index);
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let worker = ReceiveWorker {
            socket: Arc::clone(&socket),
            pool: Arc::clone(&pool),
            free: free_rx,
            received: recv_tx,
            running: Arc::clone(&running),
        };
        let recv_thread = std::thread::Builder::new()
            .name("net-recv".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            socket,
            local_addr,
            pool,
            free_tx,
            recv_rx,
            running,
            recv_thread: Some(recv_thread),
            peers: HashMap::with_capacity(MAX_PEERS),
            policy,
            events: VecDeque::new(),
            local_free,
            ack_freed: Vec::with_capacity(PACKET_POOL_SIZE),
            time: 0.0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn now(&self) -> f64 {
        self.time
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_peer(&self, peer_id: PeerId) -> bool {
        self.peers.contains_key(&peer_id)
    }

    pub fn peer_rtt(&self, peer_id: PeerId) -> Option<f32> {
        self.peers.get(&peer_id).map(|p| p.round_trip_time as f32)
    }

    /// Reliable packets still awaiting acknowledgement.
    pub fn unacked_count(&self, peer_id: PeerId) -> u32 {
        self.peers
            .get(&peer_id)
            .map_or(0, |p| p.window_mask.count_ones())
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = TransportEvent> + '_ {
        self.events.drain(..)
    }

    pub fn add_peer(&mut self, addr: SocketAddr) -> Result<PeerId, PeerError> {
        let peer_id = hash_addr(&addr);

        if let Some(existing) = self.peers.get(&peer_id) {
            if existing.addr == addr {
                return Ok(peer_id);
            }
            return Err(PeerError::AddressCollision);
        }

        if self.peers.len() >= MAX_PEERS {
            return Err(PeerError::LimitReached);
        }

        self.peers.insert(peer_id, PeerState::new(addr, self.time));
        Ok(peer_id)
    }

    pub fn remove_peer(&mut self, peer_id: PeerId) {
        let Some(mut peer) = self.peers.remove(&peer_id) else {
            return;
        };

        let mut freed = std::mem::take(&mut self.ack_freed);
        peer.release_window(&mut freed);
        for index in freed.drain(..) {
            self.local_free.push(index);
        }
        self.ack_freed = freed;
        self.balance_free();

        self.events.push_back(TransportEvent::PeerRemoved(peer_id));
    }

    pub fn send_reliable<M: Encode>(&mut self, peer_id: PeerId, msg: &M) -> Result<(), SendError> {
        self.send_message(peer_id, msg, true)
    }

    pub fn send_unreliable<M: Encode>(
        &mut self,
        peer_id: PeerId,
        msg: &M,
    ) -> Result<(), SendError> {
        self.send_message(peer_id, msg, false)
    }

    fn send_message<M: Encode>(
        &mut self,
        peer_id: PeerId,
        msg: &M,
        reliable: bool,
    ) -> Result<(), SendError> {
        debug_assert!(HEADER_SIZE + M::SIZE <= MAX_PACKET_SIZE);

        let now = self.time;
        let peer = self.peers.get_mut(&peer_id).ok_or(SendError::UnknownPeer)?;

        if reliable {
            if !peer.has_window_space() {
                return Err(SendError::WindowFull);
            }
            if self.local_free.is_empty() {
                return Err(SendError::NoBuffers);
            }
        }

        peer.local_sequence = peer.local_sequence.wrapping_add(1);
        let sequence = peer.local_sequence;

        let header = PacketHeader {
            kind: M::KIND as u8,
            flags: if reliable { PacketHeader::FLAG_RELIABLE } else { 0 },
            sequence,
            ack_bits: peer.remote_ack_bits,
            ack: peer.remote_sequence,
        };

        let mut datagram = [0u8; MAX_PACKET_SIZE];
        header.encode(&mut datagram);
        let mut writer = Writer::new(&mut datagram[HEADER_SIZE..]);
        msg.encode_payload(&mut writer);
        let total = HEADER_SIZE + writer.written();

        self.socket.send_to(&datagram[..total], peer.addr)?;

        if reliable {
            let Some(buffer_idx) = self.local_free.pop() else {
                return Err(SendError::NoBuffers);
            };

            // Exclusive: just popped from the local reserve.
            let stored = unsafe { self.pool.buffer_mut(buffer_idx) };
            stored[..total].copy_from_slice(&datagram[..total]);

            let slot = window_slot(sequence);
            peer.window[slot] = PendingPacket {
                buffer: buffer_idx,
                size: total as u16,
                send_time: now,
                next_retransmit_time: now + peer.round_trip_time * RETRANSMIT_RTT_SCALE,
                retry_count: 0,
            };
            peer.window_mask |= 1 << slot;
        }

        Ok(())
    }

    /// Drains the receive queue until a fresh payload for a known (or
    /// newly accepted) peer turns up. The caller must `release` the
    /// returned descriptor after reading the payload.
    pub fn poll(&mut self) -> Option<Polled> {
        loop {
            let desc = self.recv_rx.try_pop()?;
            let peer_id = hash_addr(&desc.from);

            if !self.peers.contains_key(&peer_id) {
                let accepted =
                    self.policy == UnknownSenderPolicy::Accept && self.add_peer(desc.from).is_ok();
                if !accepted {
                    self.reclaim(desc.buffer);
                    continue;
                }
            }

            let header = {
                // Shared read: the descriptor is ours until released.
                let data = unsafe { self.pool.buffer(desc.buffer) };
                match PacketHeader::decode(&data[..desc.size as usize]) {
                    Ok(h) => h,
                    Err(_) => {
                        self.reclaim(desc.buffer);
                        continue;
                    }
                }
            };

            let now = self.time;
            let mut freed = std::mem::take(&mut self.ack_freed);
            let fresh = match self.peers.get_mut(&peer_id) {
                Some(peer) if peer.addr == desc.from => {
                    peer.last_seen_time = now;
                    peer.process_acks(header.ack, header.ack_bits, now, &mut freed);
                    peer.note_received(header.sequence)
                }
                // Hash collision with an established peer, or a raced
                // removal: not our traffic.
                _ => false,
            };
            for index in freed.drain(..) {
                self.local_free.push(index);
            }
            self.ack_freed = freed;
            self.balance_free();

            if !fresh {
                self.reclaim(desc.buffer);
                continue;
            }

            return Some(Polled {
                from: peer_id,
                buffer: desc.buffer,
                len: desc.size - HEADER_SIZE as u16,
            });
        }
    }

    /// Payload bytes of a polled packet, header stripped.
    pub fn payload(&self, polled: &Polled) -> &[u8] {
        // Shared read: the caller holds the descriptor.
        let data = unsafe { self.pool.buffer(polled.buffer) };
        &data[HEADER_SIZE..HEADER_SIZE + polled.len as usize]
    }

    /// Returns a polled buffer to the pool.
    pub fn release(&mut self, polled: Polled) {
        self.reclaim(polled.buffer);
    }

    /// Advances transport time, prunes inactive peers and retransmits
    /// overdue reliable packets. Call at a coarse cadence (the server
    /// runs it every 100 ms).
    pub fn update(&mut self, dt: f32) {
        self.time += dt as f64;
        let now = self.time;

        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, peer)| now - peer.last_seen_time > PEER_INACTIVITY_TIMEOUT)
            .map(|(&id, _)| id)
            .collect();
        for peer_id in stale {
            log::info!("peer {peer_id:08x} timed out");
            self.remove_peer(peer_id);
        }

        let ids: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer_id in ids {
            let mut exceeded_retries = false;

            if let Some(peer) = self.peers.get_mut(&peer_id) {
                let addr = peer.addr;
                let rtt = peer.round_trip_time;

                let mut mask = peer.window_mask;
                while mask != 0 {
                    let slot = mask.trailing_zeros() as usize;
                    mask &= !(1u32 << slot);

                    let pending = &mut peer.window[slot];
                    if now < pending.next_retransmit_time {
                        continue;
                    }
                    if pending.retry_count >= MAX_RETRANSMIT_ATTEMPTS {
                        exceeded_retries = true;
                        break;
                    }

                    // Shared read: window slots belong to this thread.
                    let data = unsafe { self.pool.buffer(pending.buffer) };
                    if let Err(e) = self.socket.send_to(&data[..pending.size as usize], addr) {
                        log::debug!("retransmit to {addr} failed: {e}");
                    }

                    pending.retry_count += 1;
                    pending.next_retransmit_time = now + rtt * RETRANSMIT_RTT_SCALE;
                }
            }

            if exceeded_retries {
                log::warn!("peer {peer_id:08x} unreachable, giving up");
                self.remove_peer(peer_id);
            }
        }
    }

    fn reclaim(&mut self, index: u8) {
        self.local_free.push(index);
        self.balance_free();
    }

    /// Keeps a bounded reserve locally and feeds everything else back to
    /// the receive thread.
    fn balance_free(&mut self) {
        while self.local_free.len() > LOCAL_FREE_RESERVE {
            let Some(index) = self.local_free.pop() else {
                break;
            };
            if !self.free_tx.try_push(index) {
                self.local_free.push(index);
                break;
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_distinguishes_ports() {
        let a: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:7778".parse().unwrap();
        let c: SocketAddr = "127.0.0.2:7777".parse().unwrap();

        assert_ne!(hash_addr(&a), hash_addr(&b));
        assert_ne!(hash_addr(&a), hash_addr(&c));
    }

    #[test]
    fn peer_limit_enforced() {
        let mut transport =
            Transport::bind("127.0.0.1:0", UnknownSenderPolicy::Reject).unwrap();

        for i in 0..MAX_PEERS {
            let addr: SocketAddr = format!("10.0.0.{}:1000", i + 1).parse().unwrap();
            transport.add_peer(addr).unwrap();
        }

        let extra: SocketAddr = "10.0.1.1:1000".parse().unwrap();
        assert!(matches!(
            transport.add_peer(extra),
            Err(PeerError::LimitReached)
        ));
    }

    #[test]
    fn add_peer_is_idempotent() {
        let mut transport =
            Transport::bind("127.0.0.1:0", UnknownSenderPolicy::Reject).unwrap();
        let addr: SocketAddr = "10.0.0.1:1000".parse().unwrap();

        let first = transport.add_peer(addr).unwrap();
        let second = transport.add_peer(addr).unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.peer_count(), 1);
    }
}
