//! Process-wide set of site adapters, built once at startup.

use crate::descriptor::DescriptorSet;
use crate::error::ScanError;
use crate::request::Fetcher;
use crate::scanlators::{custom, BasicScanlator, Scanlator};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

pub struct ScanlatorRegistry {
    scanlators: BTreeMap<String, Arc<dyn Scanlator>>,
    disabled: RwLock<HashSet<String>>,
}

impl ScanlatorRegistry {
    pub fn new() -> Self {
        Self {
            scanlators: BTreeMap::new(),
            disabled: RwLock::new(HashSet::new()),
        }
    }

    /// Build every adapter in `set`. A source whose request method has no
    /// configured strategy is registered disabled so it can be enabled once
    /// the strategy is available.
    pub fn from_descriptors(set: &DescriptorSet, fetcher: Arc<Fetcher>) -> Result<Self, ScanError> {
        let mut registry = Self::new();
        for (name, site) in &set.basic {
            let scanlator: Arc<dyn Scanlator> =
                Arc::new(BasicScanlator::new(name.as_str(), site.clone(), fetcher.clone()));
            registry.register(scanlator);
        }
        for (name, site) in &set.custom {
            registry.register(custom::build(name, site.clone(), fetcher.clone())?);
        }

        for (name, scanlator) in &registry.scanlators {
            let kind = scanlator.request_kind();
            if !fetcher.supports(kind) {
                log::warn!(
                    "[{}] Requires the {} request strategy, which is not configured; source disabled",
                    name,
                    kind.as_str()
                );
                registry.disable(name);
            }
        }

        log::info!(
            "Registered {} scanlators ({} enabled)",
            registry.len(),
            registry.all_enabled().len()
        );
        Ok(registry)
    }

    pub fn register(&mut self, scanlator: Arc<dyn Scanlator>) {
        self.scanlators.insert(scanlator.name().to_string(), scanlator);
    }

    pub fn len(&self) -> usize {
        self.scanlators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanlators.is_empty()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.scanlators.contains_key(name)
            && !self
                .disabled
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .contains(name)
    }

    /// Returns false for unknown names.
    pub fn disable(&self, name: &str) -> bool {
        if !self.scanlators.contains_key(name) {
            return false;
        }
        self.disabled
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string());
        log::info!("[{}] Disabled", name);
        true
    }

    pub fn enable(&self, name: &str) -> bool {
        if !self.scanlators.contains_key(name) {
            return false;
        }
        let removed = self
            .disabled
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name);
        if removed {
            log::info!("[{}] Enabled", name);
        }
        true
    }

    /// Any registered adapter, enabled or not.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Scanlator>> {
        self.scanlators.get(name).cloned()
    }

    pub fn resolve_by_name(&self, name: &str) -> Result<Arc<dyn Scanlator>, ScanError> {
        match self.scanlators.get(name) {
            Some(scanlator) if self.is_enabled(name) => Ok(scanlator.clone()),
            _ => Err(ScanError::UnknownSource(name.to_string())),
        }
    }

    /// Enabled adapter owning `url`. When several patterns match, the
    /// longest pattern wins; equal lengths fall back to name order.
    pub fn resolve_by_url(&self, url: &str) -> Result<Arc<dyn Scanlator>, ScanError> {
        let mut best: Option<(&String, &Arc<dyn Scanlator>)> = None;
        // BTreeMap iteration is name ordered, so only a strictly longer
        // pattern replaces the current best
        for (name, scanlator) in &self.scanlators {
            if !self.is_enabled(name) || !scanlator.owns_url(url) {
                continue;
            }
            let longer = match best {
                Some((_, current)) => scanlator.url_pattern().len() > current.url_pattern().len(),
                None => true,
            };
            if longer {
                best = Some((name, scanlator));
            }
        }
        best.map(|(_, s)| s.clone())
            .ok_or_else(|| ScanError::UnknownSource(url.to_string()))
    }

    pub fn all_enabled(&self) -> Vec<Arc<dyn Scanlator>> {
        self.scanlators
            .iter()
            .filter(|(name, _)| self.is_enabled(name))
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.scanlators.keys().cloned().collect()
    }
}

impl Default for ScanlatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
