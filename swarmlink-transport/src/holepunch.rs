//! Hole-punch primitives (system specification §4.2), grounded on the
//! backoff-loop shape of `nyx_transport::hole_punch` and the
//! candidate/connectivity-check vocabulary of `nyx_transport::ice`.

use crate::channel::UdpFrameChannel;
use crate::errors::{Result, TransportError};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use swarmlink_core::PeerIdentity;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Exponential backoff schedule for UDP probes: 50ms, 100ms, 200ms, ... up
/// to a 3s cap, per system specification §4.2.
fn backoff_schedule(cap: Duration) -> impl Iterator<Item = Duration> {
    let mut next = Duration::from_millis(50);
    std::iter::from_fn(move || {
        let this = next.min(cap);
        next = (next * 2).min(cap);
        Some(this)
    })
}

/// A short probe payload distinguishing our probes from application data on
/// the same socket during the punch phase.
const PROBE_MAGIC: &[u8; 4] = b"PNCH";

fn is_probe(data: &[u8]) -> bool {
    data.len() >= 4 && &data[..4] == PROBE_MAGIC
}

/// Perform simultaneous UDP hole punching against every candidate of the
/// remote peer. Sends probes from `socket`'s bound source port to each
/// candidate address at exponential backoff until a probe is received back
/// (the socket is declared live) or `deadline` elapses.
pub async fn udp_hole_punch(
    socket: UdpSocket,
    candidates: &[SocketAddr],
    deadline: Duration,
) -> Result<UdpFrameChannel> {
    if candidates.is_empty() {
        return Err(TransportError::HolePunchFailed("no candidates".into()));
    }

    let start = Instant::now();
    let mut schedule = backoff_schedule(Duration::from_secs(3));
    let mut buf = [0u8; 1500];

    loop {
        if start.elapsed() >= deadline {
            return Err(TransportError::HolePunchFailed(format!(
                "deadline of {:?} exceeded",
                deadline
            )));
        }

        for candidate in candidates {
            if let Err(e) = socket.send_to(PROBE_MAGIC, candidate).await {
                warn!("hole punch probe to {candidate} failed: {e}");
            }
        }

        let wait = schedule.next().unwrap_or(Duration::from_secs(3));
        let remaining = deadline.saturating_sub(start.elapsed());
        let wait = wait.min(remaining);
        if wait.is_zero() {
            continue;
        }

        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) if candidates.contains(&from) => {
                if is_probe(&buf[..n]) {
                    info!("hole punch succeeded with {from}");
                    socket.connect(from).await?;
                    return Ok(UdpFrameChannel::new(
                        socket,
                        from,
                        Duration::from_secs(60),
                    ));
                }
                debug!("received non-probe datagram from {from} during punch, ignoring");
            }
            Ok(Ok((_, from))) => {
                debug!("ignoring datagram from unexpected address {from}");
            }
            Ok(Err(e)) => return Err(TransportError::Io(e)),
            Err(_elapsed) => {
                // No packet within this backoff step; loop and send again.
            }
        }
    }
}

/// Derives the next likely external port from the last two observed
/// mappings, for NATs with address-dependent (sequential) allocation
/// (system specification §4.2).
pub trait PortPredictor: Send + Sync {
    fn predict_next(&self, observed: &[u16]) -> Option<u16>;
}

/// Linear-delta predictor: assumes the external port advances by the same
/// delta observed between the last two mappings.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearDeltaPredictor;

impl PortPredictor for LinearDeltaPredictor {
    fn predict_next(&self, observed: &[u16]) -> Option<u16> {
        let len = observed.len();
        if len < 2 {
            return None;
        }
        let a = observed[len - 2] as i32;
        let b = observed[len - 1] as i32;
        let delta = b - a;
        let predicted = b + delta;
        if (0..=u16::MAX as i32).contains(&predicted) {
            Some(predicted as u16)
        } else {
            None
        }
    }
}

/// Attempt TCP simultaneous open / predictive punch (system specification
/// §4.2): both peers `connect` to the other's predicted address repeatedly
/// within a small window, succeeding on whichever comes first, `connect` or
/// a passive `accept` on the same 5-tuple.
///
/// Tie break (system specification §4.4): a symmetric attempt can let both
/// `connect()` and `accept()` complete on each side, which would otherwise
/// leave each peer holding its own independent live socket for the same
/// logical pair. The peer whose identity sorts lexicographically smaller in
/// `(local, remote)` is the one that keeps its `connect()`-originated
/// socket; the other peer closes its own `connect()` attempt (if it wins
/// the local race) and keeps only the socket it accepted. Both sides derive
/// the same decision independently, so exactly one socket survives.
pub async fn tcp_simultaneous_open(
    local: &PeerIdentity,
    remote: &PeerIdentity,
    local_bind: SocketAddr,
    candidates: &[SocketAddr],
    attempts: u32,
    attempt_interval: Duration,
) -> Result<tokio::net::TcpStream> {
    use tokio::net::{TcpListener, TcpSocket};

    let listener = TcpListener::bind(local_bind).await?;
    let we_keep_connect = local.as_str() < remote.as_str();

    for attempt in 0..attempts.max(1) {
        for candidate in candidates {
            let sock = if candidate.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            sock.set_reuseaddr(true)?;
            if sock.bind(local_bind).is_ok() {
                let connect_fut = sock.connect(*candidate);
                let accept_fut = listener.accept();

                tokio::select! {
                    Ok(stream) = connect_fut => {
                        if we_keep_connect {
                            info!("tcp simultaneous open: connect() won tie-break to {candidate}");
                            return Ok(stream);
                        }
                        debug!("tcp simultaneous open: connect() succeeded to {candidate} but tie-break favors the peer's connect, closing and re-accepting");
                        drop(stream);
                    }
                    Ok((stream, peer)) = accept_fut => {
                        if !we_keep_connect {
                            info!("tcp simultaneous open: accept() won tie-break from {peer}");
                            return Ok(stream);
                        }
                        debug!("tcp simultaneous open: accept() succeeded from {peer} but tie-break favors our connect, closing and retrying");
                        drop(stream);
                    }
                    else => {}
                }
            }
        }
        debug!("tcp simultaneous open attempt {attempt} exhausted candidates");
        sleep(attempt_interval).await;
    }

    Err(TransportError::SimultaneousOpenFailed(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_delta_predictor_extrapolates() {
        let predictor = LinearDeltaPredictor;
        assert_eq!(predictor.predict_next(&[1000, 1002]), Some(1004));
        assert_eq!(predictor.predict_next(&[1000]), None);
    }

    #[test]
    fn linear_delta_predictor_rejects_overflow() {
        let predictor = LinearDeltaPredictor;
        assert_eq!(predictor.predict_next(&[u16::MAX - 1, u16::MAX]), None);
    }

    #[test]
    fn backoff_schedule_caps_and_doubles() {
        let mut it = backoff_schedule(Duration::from_millis(300));
        assert_eq!(it.next(), Some(Duration::from_millis(50)));
        assert_eq!(it.next(), Some(Duration::from_millis(100)));
        assert_eq!(it.next(), Some(Duration::from_millis(200)));
        assert_eq!(it.next(), Some(Duration::from_millis(300)));
        assert_eq!(it.next(), Some(Duration::from_millis(300)));
    }

    #[tokio::test]
    async fn tcp_simultaneous_open_resolves_tie_break_by_identity() {
        let reserve_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = reserve_a.local_addr().unwrap();
        let reserve_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_b = reserve_b.local_addr().unwrap();
        drop(reserve_a);
        drop(reserve_b);

        let peer_a = PeerIdentity::new("a");
        let peer_b = PeerIdentity::new("b");

        let task_a = tokio::spawn(async move {
            tcp_simultaneous_open(&peer_a, &peer_b, addr_a, &[addr_b], 20, Duration::from_millis(20)).await
        });
        let peer_a2 = PeerIdentity::new("a");
        let peer_b2 = PeerIdentity::new("b");
        let task_b = tokio::spawn(async move {
            tcp_simultaneous_open(&peer_b2, &peer_a2, addr_b, &[addr_a], 20, Duration::from_millis(20)).await
        });

        let (stream_a, stream_b) = tokio::join!(task_a, task_b);
        let stream_a = stream_a.unwrap().unwrap();
        let stream_b = stream_b.unwrap().unwrap();

        // "a" sorts before "b", so "a" is the side that keeps its connect()
        // and "b" keeps whatever it accepted from "a" — both streams should
        // describe the same single logical connection.
        assert_eq!(stream_a.peer_addr().unwrap(), addr_b);
        assert_eq!(stream_b.peer_addr().unwrap(), addr_a);
    }

    #[tokio::test]
    async fn udp_hole_punch_succeeds_between_two_local_sockets() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr_a = a.local_addr().unwrap();
        let addr_b = b.local_addr().unwrap();

        let task_a = tokio::spawn(async move { udp_hole_punch(a, &[addr_b], Duration::from_secs(5)).await });
        let task_b = tokio::spawn(async move { udp_hole_punch(b, &[addr_a], Duration::from_secs(5)).await });

        let (chan_a, chan_b) = tokio::join!(task_a, task_b);
        assert!(chan_a.unwrap().is_ok());
        assert!(chan_b.unwrap().is_ok());
    }

    #[tokio::test]
    async fn udp_hole_punch_fails_with_no_candidates() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let err = match udp_hole_punch(a, &[], Duration::from_millis(10)).await {
            Err(e) => e,
            Ok(_) => unreachable!(),
        };
        assert!(matches!(err, TransportError::HolePunchFailed(_)));
    }
}
