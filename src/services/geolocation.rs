use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::watch,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};

use crate::models::geo::LatLng;

pub const FIX_TIMEOUT: Duration = Duration::from_millis(15_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a fix")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix still acceptable. Zero forces a fresh fix.
    pub maximum_age: Duration,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: FIX_TIMEOUT,
            maximum_age: Duration::ZERO,
        }
    }
}

#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn current_position(&self, options: &FixOptions) -> Result<LatLng, GeoError>;
}

#[derive(Debug, Clone, Copy)]
struct Fix {
    position: LatLng,
    received_at: Instant,
}

/// Producer side of a [`FeedProvider`].
pub struct FeedHandle {
    tx: watch::Sender<Option<Fix>>,
}

impl FeedHandle {
    /// Publishes a fix. Returns `false` once every provider is gone.
    pub fn push(&self, position: LatLng) -> bool {
        self.tx
            .send(Some(Fix {
                position,
                received_at: Instant::now(),
            }))
            .is_ok()
    }
}

/// Provider backed by fixes pushed from elsewhere, e.g. a GPS receiver
/// piped into the process. Dropping the [`FeedHandle`] closes the feed.
#[derive(Clone)]
pub struct FeedProvider {
    rx: watch::Receiver<Option<Fix>>,
}

pub fn feed() -> (FeedHandle, FeedProvider) {
    let (tx, rx) = watch::channel(None);
    (FeedHandle { tx }, FeedProvider { rx })
}

#[async_trait]
impl GeolocationProvider for FeedProvider {
    async fn current_position(&self, options: &FixOptions) -> Result<LatLng, GeoError> {
        let mut rx = self.rx.clone();
        let requested_at = Instant::now();

        let cached = *rx.borrow_and_update();
        if let Some(fix) = cached {
            if !options.maximum_age.is_zero() && fix.received_at.elapsed() <= options.maximum_age {
                return Ok(fix.position);
            }
        }

        loop {
            rx.changed()
                .await
                .map_err(|_| GeoError::PositionUnavailable)?;
            let latest = *rx.borrow_and_update();
            if let Some(fix) = latest {
                if fix.received_at >= requested_at {
                    debug!(high_accuracy = options.high_accuracy, "fresh fix received");
                    return Ok(fix.position);
                }
            }
        }
    }
}

/// Parses `lat,lng` (comma or whitespace separated).
pub fn parse_fix_line(line: &str) -> Option<LatLng> {
    let mut parts = line
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|part| !part.is_empty());
    let lat = parts.next()?.parse::<f64>().ok()?;
    let lng = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let position = LatLng::new(lat, lng);
    position.is_valid().then_some(position)
}

/// Feeds `handle` from `lat,lng` lines until the reader ends.
pub fn spawn_line_reader<R>(reader: R, handle: FeedHandle) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_fix_line(&line) {
                    Some(position) => {
                        if !handle.push(position) {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => warn!(line = %line, "ignoring unreadable fix"),
                },
                Ok(None) => break,
                Err(err) => {
                    warn!("fix feed read failed: {err}");
                    break;
                }
            }
        }
        debug!("fix feed ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fix_lines() {
        assert_eq!(parse_fix_line("12.97,77.59"), Some(LatLng::new(12.97, 77.59)));
        assert_eq!(parse_fix_line(" 12.97  77.59 "), Some(LatLng::new(12.97, 77.59)));
        assert_eq!(parse_fix_line("12.97"), None);
        assert_eq!(parse_fix_line("12.97,77.59,3"), None);
        assert_eq!(parse_fix_line("91,0"), None);
        assert_eq!(parse_fix_line("north,east"), None);
    }

    #[tokio::test]
    async fn fresh_fix_is_required_by_default() {
        let (handle, provider) = feed();
        handle.push(LatLng::new(1.0, 1.0));

        let request = tokio::spawn({
            let provider = provider.clone();
            async move { provider.current_position(&FixOptions::default()).await }
        });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        handle.push(LatLng::new(2.0, 2.0));

        let position = request.await.expect("join").expect("fix");
        assert_eq!(position, LatLng::new(2.0, 2.0));
    }

    #[tokio::test]
    async fn cached_fix_is_used_when_young_enough() {
        let (handle, provider) = feed();
        handle.push(LatLng::new(1.0, 1.0));
        let options = FixOptions {
            maximum_age: Duration::from_secs(60),
            ..FixOptions::default()
        };
        assert_eq!(
            provider.current_position(&options).await,
            Ok(LatLng::new(1.0, 1.0))
        );
    }

    #[tokio::test]
    async fn closed_feed_is_unavailable() {
        let (handle, provider) = feed();
        drop(handle);
        assert_eq!(
            provider.current_position(&FixOptions::default()).await,
            Err(GeoError::PositionUnavailable)
        );
    }

    #[tokio::test]
    async fn line_reader_feeds_the_provider() {
        let (handle, provider) = feed();
        let input: &[u8] = b"garbage\n12.97,77.59\n";
        spawn_line_reader(input, handle).await.expect("reader");

        let options = FixOptions {
            maximum_age: Duration::from_secs(60),
            ..FixOptions::default()
        };
        assert_eq!(
            provider.current_position(&options).await,
            Ok(LatLng::new(12.97, 77.59))
        );
    }
}
