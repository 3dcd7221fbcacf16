use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::window::BandwidthSampleWindow;
use crate::rules::TransferRules;

pub type SourceId = u32;

/// Persisted shape of a source, owned by an external configuration manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: Url,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Concurrency cap for transfers against this source.
    pub max_download: usize,
}

/// Measured throughput of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// Not enough samples gathered yet.
    Unknown,
    /// Bytes per second.
    Measured(u64),
}

impl Bandwidth {
    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::Measured(v) => Some(*v),
        }
    }
}

/// A configured mirror endpoint with live transfer state.
///
/// Each active transfer registers itself under a transfer id and feeds byte
/// samples into its own window plus the source-wide aggregate window. The
/// aggregate drives [`Source::bandwidth`], which the selector uses to rank
/// candidates.
#[derive(Debug)]
pub struct Source {
    id: SourceId,
    config: SourceConfig,
    sample_capacity: usize,
    sample_max_age: Duration,
    min_samples: usize,
    windows: Mutex<Windows>,
}

#[derive(Debug)]
struct Windows {
    per_transfer: HashMap<Uuid, BandwidthSampleWindow>,
    aggregate: BandwidthSampleWindow,
}

impl Source {
    pub fn new(id: SourceId, config: SourceConfig, rules: &TransferRules) -> Self {
        // All window resources are allocated up front; nothing is lazily
        // initialized later.
        let aggregate = BandwidthSampleWindow::new(rules.sample_capacity, rules.sample_max_age);
        Self {
            id,
            config,
            sample_capacity: rules.sample_capacity,
            sample_max_age: rules.sample_max_age,
            min_samples: rules.min_samples,
            windows: Mutex::new(Windows {
                per_transfer: HashMap::new(),
                aggregate,
            }),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.config.url
    }

    pub fn username(&self) -> Option<&str> {
        self.config.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.config.password.as_deref()
    }

    pub fn max_download(&self) -> usize {
        self.config.max_download
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Trailing average throughput from the aggregate window.
    ///
    /// Below the minimum sample count the estimate is `Unknown`. When the
    /// window spans less than one second the raw byte total is returned
    /// instead of amplifying it into an unstable per-second figure.
    pub fn bandwidth(&self) -> Bandwidth {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let samples = windows.aggregate.samples();
        if samples.len() < self.min_samples {
            return Bandwidth::Unknown;
        }
        let total: u64 = samples.iter().map(|s| s.bytes).sum();
        let oldest = samples.front().map(|s| s.at);
        let newest = samples.back().map(|s| s.at);
        match (oldest, newest) {
            (Some(oldest), Some(newest)) => {
                let elapsed = newest.duration_since(oldest);
                if elapsed < Duration::from_secs(1) {
                    Bandwidth::Measured(total)
                } else {
                    Bandwidth::Measured((total as f64 / elapsed.as_secs_f64()) as u64)
                }
            }
            _ => Bandwidth::Unknown,
        }
    }

    /// Register a transfer id. Returns false when the id is already active.
    pub fn begin_transfer(&self, id: Uuid) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if windows.per_transfer.contains_key(&id) {
            return false;
        }
        windows.per_transfer.insert(
            id,
            BandwidthSampleWindow::new(self.sample_capacity, self.sample_max_age),
        );
        debug!("source {}: transfer {id} started", self.id);
        true
    }

    /// Record delivered bytes against both the transfer window and the
    /// aggregate window.
    pub fn record_bytes(&self, id: Uuid, bytes: u64) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(window) = windows.per_transfer.get_mut(&id) {
            window.push(bytes);
        }
        windows.aggregate.push(bytes);
    }

    /// Release a transfer id and its window. Idempotent.
    pub fn end_transfer(&self, id: Uuid) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if windows.per_transfer.remove(&id).is_some() {
            debug!("source {}: transfer {id} ended", self.id);
        }
    }

    /// Count of live transfer ids.
    pub fn active_downloads(&self) -> usize {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.per_transfer.len()
    }

    /// Release every sample window. Safe to call multiple times; the owner
    /// must call this before dropping the source from the registry.
    pub fn close(&self) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.per_transfer.clear();
        windows.aggregate.clear();
    }

    /// Bandwidth first, id as tie-break.
    pub fn compare(&self, other: &Self) -> std::cmp::Ordering {
        match super::selector::compare_bandwidth(self.bandwidth(), other.bandwidth()) {
            std::cmp::Ordering::Equal => self.id.cmp(&other.id),
            ord => ord,
        }
    }
}

impl PartialEq for Source {
    /// Same id, or same endpoint coordinates (url + credentials).
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            || (self.config.url == other.config.url
                && self.config.username == other.config.username
                && self.config.password == other.config.password)
    }
}

impl Eq for Source {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_source(id: SourceId) -> Source {
        let rules = TransferRules {
            min_samples: 3,
            ..TransferRules::default()
        };
        let config = SourceConfig {
            url: Url::parse("https://mirror.example.com/products/").expect("url"),
            username: Some("svc".into()),
            password: Some("secret".into()),
            max_download: 2,
        };
        Source::new(id, config, &rules)
    }

    #[test]
    fn begin_transfer_is_idempotent() {
        let source = test_source(1);
        let id = Uuid::new_v4();
        assert!(source.begin_transfer(id));
        assert!(!source.begin_transfer(id));
        assert_eq!(source.active_downloads(), 1);
        source.end_transfer(id);
        source.end_transfer(id);
        assert_eq!(source.active_downloads(), 0);
    }

    #[test]
    fn bandwidth_unknown_below_min_samples() {
        let source = test_source(1);
        let id = Uuid::new_v4();
        source.begin_transfer(id);
        source.record_bytes(id, 1000);
        source.record_bytes(id, 1000);
        assert_eq!(source.bandwidth(), Bandwidth::Unknown);
    }

    #[test]
    fn sub_second_window_reports_raw_byte_total() {
        let source = test_source(1);
        let id = Uuid::new_v4();
        source.begin_transfer(id);
        for _ in 0..5 {
            source.record_bytes(id, 100);
        }
        // All samples land within the same second.
        assert_eq!(source.bandwidth(), Bandwidth::Measured(500));
    }

    #[test]
    fn identity_by_id_or_coordinates() {
        let a = test_source(1);
        let b = test_source(1);
        assert_eq!(a, b);

        let rules = TransferRules::default();
        let c = Source::new(
            9,
            SourceConfig {
                url: Url::parse("https://other.example.com/").expect("url"),
                username: None,
                password: None,
                max_download: 1,
            },
            &rules,
        );
        assert_ne!(a, c);
        // Same coordinates, different id.
        let d = Source::new(7, a.config().clone(), &rules);
        assert_eq!(a, d);
    }

    #[test]
    fn close_releases_all_windows() {
        let source = test_source(1);
        let id = Uuid::new_v4();
        source.begin_transfer(id);
        source.record_bytes(id, 42);
        source.close();
        source.close();
        assert_eq!(source.active_downloads(), 0);
        assert_eq!(source.bandwidth(), Bandwidth::Unknown);
    }
}
