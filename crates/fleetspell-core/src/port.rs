// Local port allocation for SSH port-forwards.
//
// A port is considered free when a TCP connect to it on localhost fails.
// The answer is only a hint: another process may grab the port before the
// tunnel binds it.

use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::CoreError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pick a random unused localhost port from `range`.
pub async fn get_free_port(range: RangeInclusive<u16>) -> Result<u16, CoreError> {
    get_free_port_with(range, port_in_use).await
}

/// Same as [`get_free_port`] with a custom "is this port taken?" probe.
pub async fn get_free_port_with<F, Fut>(
    range: RangeInclusive<u16>,
    mut in_use: F,
) -> Result<u16, CoreError>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = bool>,
{
    let (start, end) = (*range.start(), *range.end());
    let mut candidates: Vec<u16> = range.collect();
    candidates.shuffle(&mut rand::thread_rng());

    for port in candidates {
        if in_use(port).await {
            trace!(port, "port in use");
        } else {
            debug!(port, "found free port");
            return Ok(port);
        }
    }

    Err(CoreError::NoFreePort { start, end })
}

async fn port_in_use(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[tokio::test]
    async fn picks_a_port_within_range() {
        let range = 20000..=20009;
        for _ in 0..20 {
            let port = get_free_port_with(range.clone(), |_| async { false })
                .await
                .unwrap();
            assert!(range.contains(&port));
        }
    }

    #[tokio::test]
    async fn skips_occupied_ports() {
        let occupied: HashSet<u16> = (20000..=20008).collect();
        let port = get_free_port_with(20000..=20009, |p| {
            let taken = occupied.contains(&p);
            async move { taken }
        })
        .await
        .unwrap();
        assert_eq!(port, 20009);
    }

    #[tokio::test]
    async fn fails_when_all_occupied() {
        let err = get_free_port_with(20000..=20009, |_| async { true })
            .await
            .unwrap_err();
        assert!(
            matches!(err, CoreError::NoFreePort { start: 20000, end: 20009 }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn probes_real_listeners() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = get_free_port(port..=port).await.unwrap_err();
        assert!(matches!(err, CoreError::NoFreePort { .. }));

        drop(listener);
        assert_eq!(get_free_port(port..=port).await.unwrap(), port);
    }
}
