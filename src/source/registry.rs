use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::info;

use super::endpoint::{Source, SourceConfig, SourceId};
use crate::rules::TransferRules;

/// CRUD over the configured sources.
///
/// The registry assigns stable ids and owns the live `Source` instances;
/// persistence of the underlying `SourceConfig` belongs to an external
/// configuration manager. Candidate listing is in id order so selection
/// behaves deterministically when every bandwidth is still unknown.
pub struct SourceRegistry {
    rules: TransferRules,
    inner: Mutex<Inner>,
}

struct Inner {
    sources: BTreeMap<SourceId, Arc<Source>>,
    next_id: SourceId,
}

impl SourceRegistry {
    pub fn new(rules: TransferRules) -> Self {
        Self {
            rules,
            inner: Mutex::new(Inner {
                sources: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn rules(&self) -> &TransferRules {
        &self.rules
    }

    /// Materialize a new source under the next stable id.
    pub fn create(&self, config: SourceConfig) -> Arc<Source> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        let source = Arc::new(Source::new(id, config, &self.rules));
        info!("registered source {id} at {}", source.url());
        inner.sources.insert(id, source.clone());
        source
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<Source>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sources.get(&id).cloned()
    }

    /// Replace the configuration of an existing source, keeping its id.
    /// The previous instance is closed; live transfers against it finish
    /// against the old endpoint.
    pub fn update(&self, id: SourceId, config: SourceConfig) -> Option<Arc<Source>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.sources.contains_key(&id) {
            return None;
        }
        let replacement = Arc::new(Source::new(id, config, &self.rules));
        if let Some(previous) = inner.sources.insert(id, replacement.clone()) {
            previous.close();
        }
        Some(replacement)
    }

    /// Remove and close a source.
    pub fn remove(&self, id: SourceId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.sources.remove(&id) {
            Some(source) => {
                source.close();
                info!("removed source {id}");
                true
            }
            None => false,
        }
    }

    /// All sources in id order.
    pub fn list(&self) -> Vec<Arc<Source>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sources.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn config(host: &str) -> SourceConfig {
        SourceConfig {
            url: Url::parse(&format!("https://{host}/products/")).expect("url"),
            username: None,
            password: None,
            max_download: 2,
        }
    }

    #[test]
    fn create_assigns_increasing_stable_ids() {
        let registry = SourceRegistry::new(TransferRules::default());
        let a = registry.create(config("a.example.com"));
        let b = registry.create(config("b.example.com"));
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        let listed: Vec<_> = registry.list().iter().map(|s| s.id()).collect();
        assert_eq!(listed, vec![1, 2]);
    }

    #[test]
    fn update_keeps_id_and_closes_previous() {
        let registry = SourceRegistry::new(TransferRules::default());
        let original = registry.create(config("a.example.com"));
        let transfer = uuid::Uuid::new_v4();
        original.begin_transfer(transfer);

        let updated = registry
            .update(original.id(), config("a2.example.com"))
            .expect("existing id");
        assert_eq!(updated.id(), original.id());
        assert_eq!(updated.url().host_str(), Some("a2.example.com"));
        // Old instance was closed, its transfer state released.
        assert_eq!(original.active_downloads(), 0);
    }

    #[test]
    fn remove_is_terminal() {
        let registry = SourceRegistry::new(TransferRules::default());
        let source = registry.create(config("a.example.com"));
        assert!(registry.remove(source.id()));
        assert!(!registry.remove(source.id()));
        assert!(registry.get(source.id()).is_none());
    }

    #[test]
    fn unknown_ids_are_absent() {
        let registry = SourceRegistry::new(TransferRules::default());
        assert!(registry.get(42).is_none());
        assert!(registry.update(42, config("a.example.com")).is_none());
    }
}
