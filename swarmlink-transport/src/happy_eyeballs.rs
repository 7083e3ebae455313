//! Dual-stack happy-eyeballs connect racing (system specification §9 design
//! note), grounded on the candidate-racing pattern used throughout
//! `nyx_transport::ice`'s connectivity checks.

use crate::channel::{Channel, TcpFrameChannel};
use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::errors::{Result, TransportError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, info};

/// Stagger between successive candidate connect attempts, per the
/// specification's "~250ms" happy-eyeballs recommendation.
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(250);

/// Race TCP connects against `candidates` in order (e.g. IPv6 first when
/// preferred), staggered by `stagger`. The first to complete wins; the rest
/// are dropped (and thus closed) once the race resolves.
pub async fn happy_eyeballs_connect(
    candidates: &[SocketAddr],
    stagger: Duration,
) -> Result<TcpFrameChannel> {
    if candidates.is_empty() {
        return Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "no candidates",
        )));
    }

    let mut futs = futures::stream::FuturesUnordered::new();
    for (i, addr) in candidates.iter().enumerate() {
        let addr = *addr;
        let delay = stagger * i as u32;
        futs.push(Box::pin(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            debug!("happy eyeballs: attempting {addr}");
            TcpStream::connect(addr).await.map(|s| (addr, s))
        }));
    }

    use futures::StreamExt;
    let mut last_err = None;
    while let Some(result) = futs.next().await {
        match result {
            Ok((addr, stream)) => {
                info!("happy eyeballs: {addr} won the race");
                return TcpFrameChannel::new(stream, DEFAULT_MAX_FRAME_LEN).map_err(Into::into);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(TransportError::Io(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "all candidates failed")
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn picks_the_reachable_candidate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good_addr = listener.local_addr().unwrap();
        let bad_addr: SocketAddr = "127.0.0.1:1".parse().unwrap(); // reserved, refuses

        let accept_task = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let chan = happy_eyeballs_connect(&[bad_addr, good_addr], Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(chan.remote().unwrap(), good_addr);
        accept_task.await.unwrap();
    }
}
