//! Session controller and public surface: `new` / `start` / `send` / `recv`
//! / `close`, the receive worker, and the retransmit worker.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::config::Config;
use crate::delivery::{DeliveryItem, DeliveryQueue};
use crate::error::Result;
use crate::frame::{Channel, Frame};
use crate::freshness::FreshnessFilter;
use crate::metrics::{EpochSnapshot, Metrics};
use crate::reassembly::ReassemblyBuffer;
use crate::registry::SendRegistry;
use crate::seq::Seq;

/// Read timeout the receive worker blocks on, so it can observe `running`
/// going false in a timely manner.
const RECV_SOCKET_TIMEOUT: Duration = Duration::from_millis(200);
/// Sleep between retransmit-worker sweeps of the send registry.
const RETRANSMIT_TICK: Duration = Duration::from_millis(10);
/// Sleep between `recv` polls of the delivery queue.
const RECV_POLL_TICK: Duration = Duration::from_millis(5);

struct SendState {
    next_reliable_seq: Seq,
    next_unreliable_seq: Seq,
    registry: SendRegistry,
    reliable_sent: u32,
    unreliable_sent: u32,
}

impl SendState {
    fn new() -> Self {
        Self {
            next_reliable_seq: Seq::ZERO,
            next_unreliable_seq: Seq::ZERO,
            registry: SendRegistry::new(),
            reliable_sent: 0,
            unreliable_sent: 0,
        }
    }
}

struct ReceiveState {
    reassembly: ReassemblyBuffer,
    freshness: FreshnessFilter,
    metrics: Metrics,
    epoch_start: Instant,
}

impl ReceiveState {
    fn new(now: Instant) -> Self {
        Self {
            reassembly: ReassemblyBuffer::new(),
            freshness: FreshnessFilter::new(),
            metrics: Metrics::new(),
            epoch_start: now,
        }
    }
}

struct Inner {
    config: Config,
    // Split into independent clones of the same OS socket so a blocking
    // receive doesn't hold up a concurrent send, and so `close` can drop
    // each half explicitly rather than waiting on the last `Arc<Inner>`.
    recv_socket: Mutex<Option<UdpSocket>>,
    send_socket: Mutex<Option<UdpSocket>>,
    send_state: Mutex<SendState>,
    recv_state: Mutex<ReceiveState>,
    delivery: DeliveryQueue,
    running: AtomicBool,
    last_epoch_snapshot: Mutex<Option<EpochSnapshot>>,
}

struct Workers {
    receive: JoinHandle<()>,
    retransmit: JoinHandle<()>,
}

/// A hybrid reliable/unreliable datagram transport bound to exactly one
/// remote peer.
pub struct HudpTransport {
    inner: Arc<Inner>,
    workers: Mutex<Option<Workers>>,
}

impl HudpTransport {
    /// Validate `config` and bind the socket. Fails with `InvalidConfig`
    /// before anything touches the network.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(config.local_addr)?;
        socket.connect(config.peer_addr)?;
        socket.set_read_timeout(Some(RECV_SOCKET_TIMEOUT))?;
        let send_socket = socket.try_clone()?;

        let now = Instant::now();
        let inner = Arc::new(Inner {
            config,
            recv_socket: Mutex::new(Some(socket)),
            send_socket: Mutex::new(Some(send_socket)),
            send_state: Mutex::new(SendState::new()),
            recv_state: Mutex::new(ReceiveState::new(now)),
            delivery: DeliveryQueue::new(),
            running: AtomicBool::new(false),
            last_epoch_snapshot: Mutex::new(None),
        });

        Ok(Self {
            inner,
            workers: Mutex::new(None),
        })
    }

    /// Launch the receive and retransmit worker threads.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::Release);

        let recv_inner = Arc::clone(&self.inner);
        let retx_inner = Arc::clone(&self.inner);

        let receive = thread::spawn(move || receive_worker(recv_inner));
        let retransmit = thread::spawn(move || retransmit_worker(retx_inner));

        *self.workers.lock() = Some(Workers { receive, retransmit });
    }

    /// Send one datagram. Returns the sequence assigned to it.
    pub fn send(&self, payload: Bytes, reliable: bool) -> Result<Seq> {
        if reliable {
            self.send_reliable(payload)
        } else {
            self.send_unreliable(payload)
        }
    }

    fn send_reliable(&self, payload: Bytes) -> Result<Seq> {
        let now = Instant::now();
        let mut state = self.inner.send_state.lock();
        let seq = state.next_reliable_seq;
        state.next_reliable_seq = seq.next();

        let framed = Frame::encode(Channel::Reliable, seq, payload.clone());
        socket_send(&self.inner, &framed)?;
        state.registry.insert(seq, Channel::Reliable, payload.clone(), now);
        state.reliable_sent += 1;
        tracing::trace!(?seq, len = payload.len(), "sent reliable datagram");
        Ok(seq)
    }

    fn send_unreliable(&self, payload: Bytes) -> Result<Seq> {
        let mut state = self.inner.send_state.lock();
        let seq = state.next_unreliable_seq;
        state.next_unreliable_seq = seq.next();

        let framed = Frame::encode(Channel::Unreliable, seq, payload.clone());
        socket_send(&self.inner, &framed)?;
        state.unreliable_sent += 1;
        tracing::trace!(?seq, len = payload.len(), "sent unreliable datagram");
        Ok(seq)
    }

    /// Poll the delivery queue, returning as soon as one item is available,
    /// opportunistically draining a small batch, or an empty list once
    /// `timeout_ms` elapses.
    pub fn recv(&self, timeout_ms: u64) -> Vec<DeliveryItem> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let batch = self.inner.delivery.drain_batch();
            if !batch.is_empty() {
                return batch;
            }
            if Instant::now() >= deadline {
                return Vec::new();
            }
            thread::sleep(RECV_POLL_TICK);
        }
    }

    /// The most recent epoch snapshot, if any EPOCH datagram has been
    /// processed yet.
    pub fn last_epoch_snapshot(&self) -> Option<EpochSnapshot> {
        *self.inner.last_epoch_snapshot.lock()
    }

    /// Drain-then-stop: wait for the send registry to empty, emit an EPOCH
    /// marker (itself retried like any other reliable packet), wait again,
    /// then stop the workers and close the socket. Idempotent.
    pub fn close(&self) -> Result<()> {
        // Taking the workers is the idempotency guard: a second call (or a
        // call when `start` was never invoked) finds `None` and returns
        // immediately, tolerating an already-closed session.
        let workers = match self.workers.lock().take() {
            Some(workers) => workers,
            None => return Ok(()),
        };

        wait_for_empty_registry(&self.inner);
        self.emit_epoch_marker()?;
        wait_for_empty_registry(&self.inner);

        self.inner.running.store(false, Ordering::Release);
        let _ = workers.receive.join();
        let _ = workers.retransmit.join();

        // Workers are joined and no longer touch the socket; drop both
        // halves now so the local port is free the moment `close` returns.
        self.inner.recv_socket.lock().take();
        self.inner.send_socket.lock().take();

        Ok(())
    }

    fn emit_epoch_marker(&self) -> Result<()> {
        let now = Instant::now();
        let mut state = self.inner.send_state.lock();
        let seq = state.next_reliable_seq;
        state.next_reliable_seq = seq.next();

        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(state.reliable_sent);
        payload.put_u32(state.unreliable_sent);
        let payload = payload.freeze();

        let framed = Frame::encode(Channel::Epoch, seq, payload.clone());
        socket_send(&self.inner, &framed)?;
        state.registry.insert(seq, Channel::Epoch, payload, now);
        Ok(())
    }
}

/// Send on the shared socket through its mutex-guarded slot, so `close` can
/// take and drop it out from under any future caller.
fn socket_send(inner: &Inner, buf: &[u8]) -> std::io::Result<usize> {
    match inner.send_socket.lock().as_ref() {
        Some(socket) => socket.send(buf),
        None => Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "socket closed")),
    }
}

fn socket_recv(inner: &Inner, buf: &mut [u8]) -> std::io::Result<usize> {
    match inner.recv_socket.lock().as_ref() {
        Some(socket) => socket.recv(buf),
        None => Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "socket closed")),
    }
}

fn wait_for_empty_registry(inner: &Inner) {
    loop {
        if inner.send_state.lock().registry.is_empty() {
            return;
        }
        thread::sleep(RETRANSMIT_TICK);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

fn receive_worker(inner: Arc<Inner>) {
    let mut buf = [0u8; 65535];
    while inner.running.load(Ordering::Acquire) {
        match socket_recv(&inner, &mut buf) {
            Ok(len) => handle_incoming(&inner, &buf[..len]),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "receive worker terminating on socket error");
                break;
            }
        }
    }
}

fn handle_incoming(inner: &Inner, data: &[u8]) {
    let frame = match Frame::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, len = data.len(), "dropping datagram");
            return;
        }
    };

    match frame.channel {
        Channel::Ack => {
            let now = Instant::now();
            let mut state = inner.send_state.lock();
            if let Some(rtt) = state.registry.ack(frame.seq, now) {
                tracing::trace!(seq = ?frame.seq, rtt_ms = rtt.as_millis(), "ack received");
            } else {
                tracing::trace!(seq = ?frame.seq, "ack for unknown sequence ignored");
            }
        }
        Channel::Reliable => {
            send_ack(inner, frame.seq);
            deliver_reliable(inner, frame.seq, frame.origin_ts_ms, frame.payload);
        }
        Channel::Unreliable => {
            let recv_ts = now_ms();
            let mut state = inner.recv_state.lock();
            if state.freshness.admit(frame.seq) {
                let latency = latency_ms(frame.origin_ts_ms, recv_ts);
                state.metrics.unreliable.record_recv(frame.payload.len(), latency as f64);
                inner.delivery.push(DeliveryItem {
                    channel: Channel::Unreliable,
                    seq: frame.seq,
                    origin_ts_ms: frame.origin_ts_ms,
                    payload: frame.payload,
                    recv_ts_ms: recv_ts,
                    latency_ms: Some(latency),
                    retries_observed: 0,
                });
            }
        }
        Channel::Epoch => {
            send_ack(inner, frame.seq);
            process_epoch(inner, frame.payload);
        }
    }
}

fn send_ack(inner: &Inner, seq: Seq) {
    let framed = Frame::encode(Channel::Ack, seq, Bytes::new());
    if let Err(e) = socket_send(inner, &framed) {
        tracing::debug!(error = %e, ?seq, "failed to send ack");
    }
}

fn deliver_reliable(inner: &Inner, seq: Seq, origin_ts_ms: u32, payload: Bytes) {
    let now = Instant::now();
    let recv_ts = now_ms();
    let gap_skip_timeout_ms = inner.config.gap_skip_timeout_ms;

    let mut state = inner.recv_state.lock();
    let delivered = state
        .reassembly
        .on_arrival(seq, origin_ts_ms, payload, now, gap_skip_timeout_ms);

    for item in delivered {
        let latency = latency_ms(item.origin_ts_ms, recv_ts);
        state.metrics.reliable.record_recv(item.payload.len(), latency as f64);
        inner.delivery.push(DeliveryItem {
            channel: Channel::Reliable,
            seq: item.seq,
            origin_ts_ms: item.origin_ts_ms,
            payload: item.payload,
            recv_ts_ms: recv_ts,
            latency_ms: Some(latency),
            retries_observed: item.retries_observed,
        });
    }
}

fn latency_ms(origin_ts_ms: u32, recv_ts_ms: u64) -> u64 {
    // Both timestamps are low-32-bits-of-wall-clock milliseconds; compare in
    // the same truncated space to avoid spurious huge latencies from the
    // high bits recv_ts_ms carries that origin_ts_ms does not.
    let recv_truncated = (recv_ts_ms & 0xFFFF_FFFF) as u32;
    recv_truncated.wrapping_sub(origin_ts_ms) as u64
}

fn process_epoch(inner: &Inner, payload: Bytes) {
    if payload.len() < 8 {
        tracing::debug!(len = payload.len(), "epoch payload too short, ignoring counters");
        return;
    }
    let mut p = &payload[..];
    let peer_reliable_sent = p.get_u32();
    let peer_unreliable_sent = p.get_u32();

    let now = Instant::now();
    let mut state = inner.recv_state.lock();
    let elapsed = now.duration_since(state.epoch_start);
    let snapshot = EpochSnapshot::compute(&state.metrics, elapsed, peer_reliable_sent, peer_unreliable_sent);

    if inner.config.metric {
        tracing::info!(
            reliable_throughput = snapshot.reliable.throughput_bytes_per_sec,
            reliable_pdr = snapshot.reliable.pdr,
            unreliable_throughput = snapshot.unreliable.throughput_bytes_per_sec,
            unreliable_pdr = snapshot.unreliable.pdr,
            "epoch closed"
        );
    }

    *inner.last_epoch_snapshot.lock() = Some(snapshot);

    state.reassembly.reset_for_epoch();
    state.freshness.reset_for_epoch();
    state.metrics.reset();
    state.epoch_start = now;
}

fn retransmit_worker(inner: Arc<Inner>) {
    while inner.running.load(Ordering::Acquire) {
        let now = Instant::now();
        let due = {
            let state = inner.send_state.lock();
            state.registry.due_for_retransmit(now, inner.config.retransmission_timeout_ms)
        };

        for (seq, channel, payload) in due {
            let framed = Frame::encode(channel, seq, payload);
            match socket_send(&inner, &framed) {
                Ok(_) => {
                    let mut state = inner.send_state.lock();
                    state.registry.record_retransmission(seq, Instant::now());
                }
                Err(e) => {
                    tracing::debug!(error = %e, ?seq, "retransmission send failed");
                }
            }
        }

        thread::sleep(RETRANSMIT_TICK);
    }
}
