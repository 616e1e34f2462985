//! UDP ingest.
//!
//! The [`Listener`] owns the datagram socket. Every datagram is decoded on its
//! own and, if accepted, queued on the [`SnapshotStore`] without waiting for
//! the merge. The receive loop therefore never stalls behind a slow save.
//!
//! # Delivery
//!
//! Ingest is at-most-once with no acknowledgment. A datagram that is lost on
//! the wire, rejected by the decoder, or dropped because the merge queue is
//! full leaves no trace except a log line and a counter. Senders that need
//! every reading applied must resend; a resent reading simply overwrites
//! the same fields again.
//!
//! Every datagram is logged with its origin: accepted ones at `info`,
//! rejected and dropped ones at `warn`.
//!
//! A datagram longer than `max_datagram_size` is rejected whole. The receive
//! buffer is one byte larger than the limit, so an oversized datagram shows up
//! as too long instead of being silently cut to a prefix that might decode.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::decoder::{self, Decoded};
use crate::error::{Error, Result};
use crate::store::SnapshotStore;

/// Datagram counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Datagrams read from the socket.
    pub received: u64,
    /// Datagrams decoded and queued for merging.
    pub accepted: u64,
    /// Datagrams the decoder rejected.
    pub rejected: u64,
    /// Accepted datagrams dropped because the store could not take them.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

/// Receives sensor datagrams and feeds them to the store.
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
    store: SnapshotStore,
    max_datagram_size: usize,
    counters: Arc<Counters>,
}

impl Listener {
    /// Bind the datagram socket at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        max_datagram_size: usize,
        store: SnapshotStore,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind {
                kind: "udp",
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            socket,
            store,
            max_datagram_size: max_datagram_size.max(1),
            counters: Arc::new(Counters::default()),
        })
    }

    /// The address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// A handle for reading the counters while the listener runs.
    #[must_use]
    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Counters since bind.
    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        self.stats_handle().get()
    }

    /// Receive datagrams until `shutdown` flips to `true` or its sender is
    /// dropped.
    ///
    /// Socket receive errors are logged and the loop continues.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> ListenerStats {
        let mut buf = vec![0u8; self.max_datagram_size + 1];
        match self.socket.local_addr() {
            Ok(addr) => info!("Listening for sensor datagrams on udp://{}", addr),
            Err(e) => warn!("Listening for sensor datagrams (address unknown: {})", e),
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, origin)) => self.handle(&buf[..len], origin),
                    Err(e) => warn!("Datagram receive failed: {}", e),
                },
            }
        }

        let stats = self.stats();
        info!(
            received = stats.received,
            accepted = stats.accepted,
            rejected = stats.rejected,
            dropped = stats.dropped,
            "Datagram listener stopped"
        );
        stats
    }

    fn handle(&self, payload: &[u8], origin: SocketAddr) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if payload.len() > self.max_datagram_size {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                origin = %origin,
                "Rejected datagram (longer than {} bytes): {}",
                self.max_datagram_size,
                preview(payload)
            );
            return;
        }

        let decoded = decoder::decode(payload);
        let kind = decoded.kind();
        if let Decoded::Rejected(reason) = &decoded {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                origin = %origin,
                "Rejected datagram ({}): {}",
                reason,
                preview(payload)
            );
            return;
        }
        let Some(update) = decoded.into_update() else {
            return;
        };

        match self.store.submit(update) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                info!(origin = %origin, kind, "Accepted datagram");
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(origin = %origin, kind, "Dropped datagram: {}", e);
            }
        }
    }
}

/// Read-only view of a listener's counters.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    counters: Arc<Counters>,
}

impl StatsHandle {
    /// Current counter values.
    #[must_use]
    pub fn get(&self) -> ListenerStats {
        ListenerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Payload text for log lines, cut to a readable length.
fn preview(payload: &[u8]) -> String {
    const MAX: usize = 96;
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::logging::init_test_logging;
    use crate::snapshot::{Axes, Snapshot};
    use crate::storage::MemoryBackend;
    use crate::store::StoreOptions;

    struct Harness {
        store: SnapshotStore,
        target: SocketAddr,
        stats: StatsHandle,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<ListenerStats>,
    }

    async fn harness() -> Harness {
        harness_with_limit(2048).await
    }

    async fn harness_with_limit(max_datagram_size: usize) -> Harness {
        init_test_logging();
        let (store, _actor) =
            SnapshotStore::start(Box::new(MemoryBackend::new()), StoreOptions::default()).await;
        let listener = Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            max_datagram_size,
            store.clone(),
        )
            .await
            .unwrap();
        let target = listener.local_addr().unwrap();
        let stats = listener.stats_handle();
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(listener.run(signal));
        Harness {
            store,
            target,
            stats,
            shutdown,
            task,
        }
    }

    async fn send(target: SocketAddr, payload: &str) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(payload.as_bytes(), target).await.unwrap();
    }

    async fn wait_for(stats: &StatsHandle, received: u64) -> ListenerStats {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let current = stats.get();
                if current.received >= received {
                    return current;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listener did not receive datagrams in time")
    }

    async fn wait_for_snapshot(store: &SnapshotStore, done: impl Fn(&Snapshot) -> bool) -> Snapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = store.read();
                if done(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("snapshot was not updated in time")
    }

    #[tokio::test]
    async fn test_rotation_datagram_updates_gyroscope() {
        let h = harness().await;

        send(h.target, "rotation,1.0,2.0,3.0").await;

        let snapshot = wait_for_snapshot(&h.store, |s| s.gz == 3.0).await;
        assert_eq!(snapshot.gyroscope(), Axes::new(1.0, 2.0, 3.0));
        assert_eq!(snapshot.acceleration(), Axes::default());
    }

    #[tokio::test]
    async fn test_structured_datagram_updates_both_groups() {
        let h = harness().await;

        send(
            h.target,
            r#"{"acceleration":{"x":2,"y":5,"z":0},"gyroscope":{"x":0.1,"y":0.2,"z":0.3}}"#,
        )
        .await;

        let snapshot = wait_for_snapshot(&h.store, |s| s.ax == 2.0).await;
        assert_eq!(snapshot.acceleration(), Axes::new(2.0, 5.0, 0.0));
        assert_eq!(snapshot.gyroscope(), Axes::new(0.1, 0.2, 0.3));
        assert_eq!(snapshot.hb, 1);
    }

    #[tokio::test]
    async fn test_rejected_datagram_leaves_snapshot_unchanged() {
        let h = harness().await;
        let before = h.store.read();

        send(h.target, "foo,1,2,3").await;
        send(h.target, "not a datagram").await;
        let stats = wait_for(&h.stats, 2).await;

        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.accepted, 0);
        assert_eq!(h.store.read(), before);
    }

    #[tokio::test]
    async fn test_counts_accepted_and_rejected() {
        let h = harness().await;

        send(h.target, "linear_acceleration,0.5,0,0").await;
        send(h.target, "rotation,x,0,0").await;
        send(h.target, "rotation,1,2").await;
        let stats = wait_for(&h.stats, 3).await;

        assert_eq!(stats.received, 3);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run_loop() {
        let h = harness().await;

        send(h.target, "rotation,0,0,1").await;
        wait_for(&h.stats, 1).await;
        h.shutdown.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert_eq!(stats.received, 1);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        init_test_logging();
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let (store, _actor) =
            SnapshotStore::start(Box::new(MemoryBackend::new()), StoreOptions::default()).await;

        let err = Listener::bind(addr, 1024, store).await.unwrap_err();
        assert!(matches!(err, Error::Bind { kind: "udp", .. }));
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_rejected_not_truncated() {
        let h = harness_with_limit(16).await;
        let before = h.store.read();

        // The first 16 bytes, "rotation,1,2,345", would decode on their own.
        send(h.target, "rotation,1,2,345678").await;
        let stats = wait_for(&h.stats, 1).await;

        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.accepted, 0);
        assert_eq!(h.store.read(), before);
    }

    #[tokio::test]
    async fn test_datagram_at_size_limit_is_accepted() {
        let h = harness_with_limit(16).await;

        send(h.target, "rotation,1,2,345").await;

        let snapshot = wait_for_snapshot(&h.store, |s| s.gz == 345.0).await;
        assert_eq!(snapshot.gyroscope(), Axes::new(1.0, 2.0, 345.0));
        assert_eq!(h.stats.get().rejected, 0);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_accepted_datagram_logs_origin_at_info() {
        let (store, _actor) =
            SnapshotStore::start(Box::new(MemoryBackend::new()), StoreOptions::default()).await;
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 2048, store)
            .await
            .unwrap();
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let origin: SocketAddr = "192.0.2.7:5555".parse().unwrap();

        tracing::subscriber::with_default(subscriber, || {
            listener.handle(b"rotation,1,2,3", origin);
        });

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("INFO"), "{output}");
        assert!(output.contains("Accepted datagram"), "{output}");
        assert!(output.contains("192.0.2.7:5555"), "{output}");
        assert_eq!(listener.stats().accepted, 1);
    }

    #[test]
    fn test_preview_truncates_long_payloads() {
        let long = "x".repeat(500);
        let shown = preview(long.as_bytes());
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 99);
        assert_eq!(preview(b"  rotation,1,2,3\n"), "rotation,1,2,3");
    }
}
