//! Per-socket traffic counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters available through `getstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stat {
    /// Number of reads that returned data.
    RecvCnt,
    /// Largest single read, in bytes.
    RecvMax,
    /// Average read size, in bytes.
    RecvAvg,
    /// Total bytes received.
    RecvOct,
    /// Average deviation of read size from the running average.
    RecvDvi,
    /// Number of completed sends.
    SendCnt,
    /// Largest single send, in bytes.
    SendMax,
    /// Average send size, in bytes.
    SendAvg,
    /// Total bytes sent.
    SendOct,
    /// Bytes handed to `send_nowait` that are not yet written.
    SendPend,
}

impl Stat {
    /// Every counter, in reporting order.
    pub const ALL: [Stat; 10] = [
        Stat::RecvCnt,
        Stat::RecvMax,
        Stat::RecvAvg,
        Stat::RecvOct,
        Stat::RecvDvi,
        Stat::SendCnt,
        Stat::SendMax,
        Stat::SendAvg,
        Stat::SendOct,
        Stat::SendPend,
    ];
}

/// Point-in-time values of the requested counters.
pub type StatsSnapshot = BTreeMap<Stat, u64>;

/// Lock-free counters updated from the owning task and helper tasks.
#[derive(Debug, Default)]
pub(crate) struct SocketStats {
    recv_cnt: AtomicU64,
    recv_max: AtomicU64,
    recv_oct: AtomicU64,
    recv_dev: AtomicU64,
    send_cnt: AtomicU64,
    send_max: AtomicU64,
    send_oct: AtomicU64,
    send_pend: AtomicU64,
}

impl SocketStats {
    pub(crate) fn record_recv(&self, len: usize) {
        let len = len as u64;
        // Deviation is measured against the average before this read.
        let cnt = self.recv_cnt.load(Ordering::Relaxed);
        if cnt > 0 {
            let avg = self.recv_oct.load(Ordering::Relaxed) / cnt;
            self.recv_dev.fetch_add(len.abs_diff(avg), Ordering::Relaxed);
        }
        self.recv_cnt.fetch_add(1, Ordering::Relaxed);
        self.recv_oct.fetch_add(len, Ordering::Relaxed);
        self.recv_max.fetch_max(len, Ordering::Relaxed);
        metrics::counter!("broker_net_bytes_received_total").increment(len);
    }

    pub(crate) fn record_send(&self, len: usize) {
        let len = len as u64;
        self.send_cnt.fetch_add(1, Ordering::Relaxed);
        self.send_oct.fetch_add(len, Ordering::Relaxed);
        self.send_max.fetch_max(len, Ordering::Relaxed);
        metrics::counter!("broker_net_bytes_sent_total").increment(len);
    }

    pub(crate) fn add_pending(&self, len: usize) {
        self.send_pend.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn remove_pending(&self, len: usize) {
        let len = len as u64;
        let _ = self
            .send_pend
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                Some(p.saturating_sub(len))
            });
    }

    pub(crate) fn get(&self, stat: Stat) -> u64 {
        match stat {
            Stat::RecvCnt => self.recv_cnt.load(Ordering::Relaxed),
            Stat::RecvMax => self.recv_max.load(Ordering::Relaxed),
            Stat::RecvAvg => average(&self.recv_oct, &self.recv_cnt),
            Stat::RecvOct => self.recv_oct.load(Ordering::Relaxed),
            Stat::RecvDvi => {
                let cnt = self.recv_cnt.load(Ordering::Relaxed);
                // The first read has nothing to deviate from.
                match cnt {
                    0 | 1 => 0,
                    n => self.recv_dev.load(Ordering::Relaxed) / (n - 1),
                }
            }
            Stat::SendCnt => self.send_cnt.load(Ordering::Relaxed),
            Stat::SendMax => self.send_max.load(Ordering::Relaxed),
            Stat::SendAvg => average(&self.send_oct, &self.send_cnt),
            Stat::SendOct => self.send_oct.load(Ordering::Relaxed),
            Stat::SendPend => self.send_pend.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn snapshot(&self, stats: &[Stat]) -> StatsSnapshot {
        stats.iter().map(|&s| (s, self.get(s))).collect()
    }
}

fn average(total: &AtomicU64, count: &AtomicU64) -> u64 {
    match count.load(Ordering::Relaxed) {
        0 => 0,
        n => total.load(Ordering::Relaxed) / n,
    }
}
