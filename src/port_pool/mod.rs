//! PortPool - UDP Port Reservation
//!
//! ## Responsibilities
//!
//! - Lease single ports or consecutive (RTP, RTCP) pairs
//! - Probe OS-level availability before handing a port out
//! - Return ports to the pool on session teardown
//!
//! The pool is the only state shared between sessions; all lease/cancel
//! mutations are serialized through one async mutex so two sessions can
//! never race onto the same port. The transcoder requires RTCP = RTP + 1,
//! so a pair lease is exactly (p, p+1), never a non-consecutive fallback.

use crate::error::{Error, Result};
use crate::hap::IpFamily;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Default reservation range (Linux ephemeral ports).
pub const DEFAULT_PORT_RANGE_START: u16 = 32768;
/// Default range end (exclusive).
pub const DEFAULT_PORT_RANGE_END: u16 = 61000;

/// Candidate ports examined before giving up on a reservation.
const RESERVE_ATTEMPTS: usize = 64;

/// How many ports one reservation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCount {
    Single,
    /// Consecutive (RTP, RTCP) pair; the returned port is the RTP half.
    Pair,
}

struct PoolState {
    leased: HashSet<u16>,
    /// Next candidate, wraps within the range.
    cursor: u16,
}

/// UDP port reservation pool
pub struct PortPool {
    range_start: u16,
    range_end: u16,
    state: Mutex<PoolState>,
}

impl PortPool {
    /// Create a pool over `[range_start, range_end)`.
    pub fn new(range_start: u16, range_end: u16) -> Self {
        Self {
            range_start,
            range_end,
            state: Mutex::new(PoolState {
                leased: HashSet::new(),
                cursor: range_start,
            }),
        }
    }

    /// Reserve a port (or a consecutive pair) for the given IP family.
    ///
    /// Returns the reserved port (the RTP half for a pair). Fails with
    /// [`Error::PortExhausted`] once the retry budget is spent; the caller
    /// must treat that as fatal for its session, not for the process.
    pub async fn reserve(&self, family: IpFamily, count: PortCount) -> Result<u16> {
        let mut state = self.state.lock().await;

        for _ in 0..RESERVE_ATTEMPTS {
            let candidate = self.next_candidate(&mut state);

            if state.leased.contains(&candidate) {
                continue;
            }
            if !probe(family, candidate).await {
                // Externally bound; skip it and keep searching.
                continue;
            }

            match count {
                PortCount::Single => {
                    state.leased.insert(candidate);
                    tracing::debug!(port = candidate, "Port reserved");
                    return Ok(candidate);
                }
                PortCount::Pair => {
                    let rtcp = match candidate.checked_add(1) {
                        Some(p) if p < self.range_end => p,
                        _ => continue,
                    };
                    if state.leased.contains(&rtcp) {
                        continue;
                    }
                    if !probe(family, rtcp).await {
                        // The RTP probe socket is already dropped; restart
                        // the whole pair search rather than pairing
                        // non-consecutive ports.
                        continue;
                    }
                    state.leased.insert(candidate);
                    state.leased.insert(rtcp);
                    tracing::debug!(rtp = candidate, rtcp = rtcp, "Port pair reserved");
                    return Ok(candidate);
                }
            }
        }

        tracing::warn!(
            attempts = RESERVE_ATTEMPTS,
            leased = state.leased.len(),
            "Port reservation retry budget spent"
        );
        Err(Error::PortExhausted)
    }

    /// Return a previously reserved port to the pool.
    ///
    /// Unknown ports are ignored, so double-cancel on teardown paths is safe.
    pub async fn cancel(&self, port: u16) {
        let mut state = self.state.lock().await;
        if state.leased.remove(&port) {
            tracing::debug!(port = port, "Port released");
        } else {
            tracing::debug!(port = port, "Port already released");
        }
    }

    /// Number of currently leased ports.
    pub async fn leased_count(&self) -> usize {
        self.state.lock().await.leased.len()
    }

    fn next_candidate(&self, state: &mut PoolState) -> u16 {
        let candidate = state.cursor;
        state.cursor = if state.cursor + 1 >= self.range_end {
            self.range_start
        } else {
            state.cursor + 1
        };
        candidate
    }
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
    }
}

/// Probe whether the OS will let us bind this port.
///
/// The probe socket is dropped immediately; the window between probe and
/// actual bind is accepted; the pool's own accounting prevents the only
/// collision source we control (another session).
async fn probe(family: IpFamily, port: u16) -> bool {
    let addr: SocketAddr = match family {
        IpFamily::V4 => (Ipv4Addr::UNSPECIFIED, port).into(),
        IpFamily::V6 => (Ipv6Addr::UNSPECIFIED, port).into(),
    };
    UdpSocket::bind(addr).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_reserve_and_cancel() {
        let pool = PortPool::new(41000, 41010);

        let port = pool.reserve(IpFamily::V4, PortCount::Single).await.unwrap();
        assert!((41000..41010).contains(&port));
        assert_eq!(pool.leased_count().await, 1);

        pool.cancel(port).await;
        assert_eq!(pool.leased_count().await, 0);
    }

    #[tokio::test]
    async fn test_pair_is_consecutive() {
        let pool = PortPool::new(41020, 41040);

        let rtp = pool.reserve(IpFamily::V4, PortCount::Pair).await.unwrap();
        assert_eq!(pool.leased_count().await, 2);

        // Both halves are held: a follow-up reservation must avoid them.
        let other = pool.reserve(IpFamily::V4, PortCount::Single).await.unwrap();
        assert_ne!(other, rtp);
        assert_ne!(other, rtp + 1);
    }

    #[tokio::test]
    async fn test_no_overlapping_leases() {
        let pool = std::sync::Arc::new(PortPool::new(41050, 41080));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.reserve(IpFamily::V4, PortCount::Pair).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let rtp = handle.await.unwrap();
            assert!(seen.insert(rtp), "rtp port {rtp} handed out twice");
            assert!(seen.insert(rtp + 1), "rtcp port {} overlaps", rtp + 1);
        }
    }

    #[tokio::test]
    async fn test_externally_bound_port_is_skipped() {
        let pool = PortPool::new(41090, 41094);

        // Occupy the first candidate outside the pool's accounting.
        let _blocker = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 41090))
            .await
            .unwrap();

        let port = pool.reserve(IpFamily::V4, PortCount::Single).await.unwrap();
        assert_ne!(port, 41090);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let pool = PortPool::new(41100, 41101);

        // One-port range can never satisfy a pair.
        let result = pool.reserve(IpFamily::V4, PortCount::Pair).await;
        assert!(matches!(result, Err(Error::PortExhausted)));

        // The failed search must not leak a lease.
        assert_eq!(pool.leased_count().await, 0);
    }

    #[tokio::test]
    async fn test_double_cancel_is_harmless() {
        let pool = PortPool::new(41110, 41120);

        let port = pool.reserve(IpFamily::V4, PortCount::Single).await.unwrap();
        pool.cancel(port).await;
        pool.cancel(port).await;
        assert_eq!(pool.leased_count().await, 0);
    }
}
