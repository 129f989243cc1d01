//! Sliding-window admission control for the query-serving boundary.
//!
//! Each client identity gets a window of recent admission timestamps; only
//! entries within the trailing interval count. Check and record happen under
//! one lock so a burst of concurrent requests from the same client can never
//! slip past the limit together.

use crate::application::admission::client_identity::ClientKey;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    /// Admissions allowed per client within one window.
    pub limit: usize,
    /// Length of the trailing window.
    pub window: Duration,
    /// Believe the first hop of a forwarded-identity header. Off unless the
    /// deployment explicitly fronts this process with a trusted proxy.
    pub trust_forwarded_header: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(3600),
            trust_forwarded_header: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::Denied { retry_after } => Some(*retry_after),
        }
    }
}

pub struct AdmissionController {
    limit: usize,
    window: Duration,
    windows: Mutex<HashMap<ClientKey, VecDeque<Instant>>>,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            limit: config.limit,
            window: config.window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Decides admission for one request and, when allowed, records it, all
    /// in a single critical section. Never fails; an unseen client starts
    /// with an empty window.
    pub fn check_and_record(&self, key: &ClientKey, now: Instant) -> AdmissionDecision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = windows.entry(key.clone()).or_default();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit {
            let retry_after = window
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(self.window);
            debug!(
                "AdmissionController: denied {} ({} in window, retry in {:?})",
                key,
                window.len(),
                retry_after
            );
            return AdmissionDecision::Denied { retry_after };
        }

        window.push_back(now);
        AdmissionDecision::Allowed
    }

    /// Number of client identities currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn controller(limit: usize, window: Duration) -> AdmissionController {
        AdmissionController::new(&AdmissionConfig {
            limit,
            window,
            trust_forwarded_header: false,
        })
    }

    #[test]
    fn test_limit_allows_exactly_l_within_window() {
        let controller = controller(5, Duration::from_secs(3600));
        let key = ClientKey::new("A");
        let base = Instant::now();

        for i in 0..5 {
            let decision = controller.check_and_record(&key, base + Duration::from_millis(i * 100));
            assert!(decision.is_allowed(), "call {} should be allowed", i + 1);
        }

        let decision = controller.check_and_record(&key, base + Duration::from_secs(1));
        assert!(!decision.is_allowed());
        assert!(decision.retry_after().unwrap() > Duration::ZERO);
    }

    #[test]
    fn test_excess_requests_are_denied() {
        let controller = controller(3, Duration::from_secs(3600));
        let key = ClientKey::new("A");
        let base = Instant::now();

        let mut allowed = 0;
        let mut denied = 0;
        for i in 0..10u64 {
            match controller.check_and_record(&key, base + Duration::from_millis(i)) {
                AdmissionDecision::Allowed => allowed += 1,
                AdmissionDecision::Denied { .. } => denied += 1,
            }
        }

        assert_eq!(allowed, 3);
        assert_eq!(denied, 7);
    }

    #[test]
    fn test_expired_entries_free_capacity() {
        let window = Duration::from_secs(60);
        let controller = controller(2, window);
        let key = ClientKey::new("A");
        let base = Instant::now();

        assert!(controller.check_and_record(&key, base).is_allowed());
        assert!(
            controller
                .check_and_record(&key, base + Duration::from_secs(1))
                .is_allowed()
        );
        assert!(
            !controller
                .check_and_record(&key, base + Duration::from_secs(2))
                .is_allowed()
        );

        // The first admission leaves the window; one slot opens.
        assert!(
            controller
                .check_and_record(&key, base + window)
                .is_allowed()
        );
    }

    #[test]
    fn test_retry_after_tracks_oldest_entry() {
        let window = Duration::from_secs(60);
        let controller = controller(1, window);
        let key = ClientKey::new("A");
        let base = Instant::now();

        assert!(controller.check_and_record(&key, base).is_allowed());

        let decision = controller.check_and_record(&key, base + Duration::from_secs(45));
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_clients_are_limited_independently() {
        let controller = controller(1, Duration::from_secs(3600));
        let base = Instant::now();

        assert!(
            controller
                .check_and_record(&ClientKey::new("A"), base)
                .is_allowed()
        );
        assert!(
            controller
                .check_and_record(&ClientKey::new("B"), base)
                .is_allowed()
        );
        assert!(
            !controller
                .check_and_record(&ClientKey::new("A"), base + Duration::from_secs(1))
                .is_allowed()
        );
        assert_eq!(controller.tracked_clients(), 2);
    }

    #[test]
    fn test_concurrent_burst_never_overadmits() {
        let limit = 5;
        let controller = Arc::new(controller(limit, Duration::from_secs(3600)));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let controller = Arc::clone(&controller);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    let key = ClientKey::new("A");
                    if controller.check_and_record(&key, Instant::now()).is_allowed() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), limit);
    }

    #[test]
    fn test_zero_limit_denies_with_full_window_wait() {
        let window = Duration::from_secs(60);
        let controller = controller(0, window);

        let decision = controller.check_and_record(&ClientKey::new("A"), Instant::now());
        assert_eq!(decision.retry_after(), Some(window));
    }
}
