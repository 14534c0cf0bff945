//! Hard deadline around any [`ModelClient`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};

use super::{Classification, ModelClient};
use crate::error::ClassificationError;

/// Extra in-flight calls allowed beyond the callers actually waiting.
pub const DEFAULT_ABANDONED_SLACK: usize = 8;

/// Bounds every `classify` call by `timeout`.
///
/// The inner call runs on its own thread. When the deadline passes the
/// caller gets `ClassificationError::Timeout` and the late result, if any,
/// is discarded.
///
/// A thread cannot be killed, so a timed-out call keeps running (and keeps
/// its copy of the image) until the inner client gives up on its own. The
/// number of model threads alive at once is capped by `max_in_flight`;
/// past the cap new calls fail immediately as `Unreachable` instead of
/// piling up threads behind a hung server.
pub struct TimeoutClient {
    inner: Arc<dyn ModelClient>,
    timeout: Duration,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

impl TimeoutClient {
    pub fn new(inner: Arc<dyn ModelClient>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_in_flight: num_cpus::get() + DEFAULT_ABANDONED_SLACK,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the cap on concurrently running model threads. Should exceed the
    /// number of callers (import workers).
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Model threads still running, including ones past their deadline.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Counts one running model thread until dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ModelClient for TimeoutClient {
    fn classify(
        &self,
        image: &[u8],
        format_hint: Option<&str>,
    ) -> Result<Classification, ClassificationError> {
        let Some(slot) = InFlight::acquire(&self.in_flight, self.max_in_flight) else {
            return Err(ClassificationError::Unreachable(format!(
                "{} model call(s) still running, refusing to start another",
                self.in_flight()
            )));
        };

        let (tx, rx) = bounded(1);
        let inner = Arc::clone(&self.inner);
        let image = image.to_vec();
        let hint = format_hint.map(str::to_string);

        thread::Builder::new()
            .name("picorg-classify".to_string())
            .spawn(move || {
                let _slot = slot;
                let result = inner.classify(&image, hint.as_deref());
                // Receiver is gone if the deadline already passed.
                let _ = tx.send(result);
            })
            .map_err(|e| {
                ClassificationError::Unreachable(format!("failed to spawn model call: {}", e))
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{} did not answer within {:?}",
                    self.inner.name(),
                    self.timeout
                );
                Err(ClassificationError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClassificationError::Unreachable(
                "model call terminated without a result".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Sleepy(Duration);

    impl ModelClient for Sleepy {
        fn classify(
            &self,
            _image: &[u8],
            _format_hint: Option<&str>,
        ) -> Result<Classification, ClassificationError> {
            thread::sleep(self.0);
            Ok(Classification {
                description: "slow".to_string(),
                category: None,
                confidence: 1.0,
            })
        }
    }

    struct Panicky;

    impl ModelClient for Panicky {
        fn classify(
            &self,
            _image: &[u8],
            _format_hint: Option<&str>,
        ) -> Result<Classification, ClassificationError> {
            panic!("boom");
        }
    }

    #[test]
    fn test_fast_call_passes_through() {
        let client = TimeoutClient::new(Arc::new(Sleepy(Duration::ZERO)), Duration::from_secs(5));
        assert_eq!(client.classify(b"x", None).unwrap().description, "slow");
    }

    #[test]
    fn test_slow_call_times_out() {
        let client = TimeoutClient::new(
            Arc::new(Sleepy(Duration::from_secs(2))),
            Duration::from_millis(50),
        );
        let start = Instant::now();
        let err = client.classify(b"x", None).unwrap_err();
        assert_eq!(err, ClassificationError::Timeout(Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_panicking_client_is_unreachable() {
        let client = TimeoutClient::new(Arc::new(Panicky), Duration::from_secs(5));
        assert!(matches!(
            client.classify(b"x", None),
            Err(ClassificationError::Unreachable(_))
        ));
    }

    #[test]
    fn test_abandoned_calls_are_capped() {
        let client = TimeoutClient::new(
            Arc::new(Sleepy(Duration::from_millis(300))),
            Duration::from_millis(20),
        )
        .with_max_in_flight(1);

        assert!(matches!(
            client.classify(b"x", None),
            Err(ClassificationError::Timeout(_))
        ));
        assert_eq!(client.in_flight(), 1);
        assert!(matches!(
            client.classify(b"x", None),
            Err(ClassificationError::Unreachable(_))
        ));

        // The late thread finishes and frees its slot.
        thread::sleep(Duration::from_millis(600));
        assert_eq!(client.in_flight(), 0);
        assert!(matches!(
            client.classify(b"x", None),
            Err(ClassificationError::Timeout(_))
        ));
    }
}
