//! Keyed set of independent pipelines
//!
//! Replaces process-wide singletons: every camera (or test) owns its own
//! controller, addressed by key.

use crate::controller::PipelineController;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

pub struct PipelineRegistry<K> {
    pipelines: HashMap<K, PipelineController>,
}

impl<K> Default for PipelineRegistry<K> {
    fn default() -> Self {
        Self {
            pipelines: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Display> PipelineRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `controller` under `key`. A controller already there is
    /// stopped and returned.
    pub fn insert(&mut self, key: K, controller: PipelineController) -> Option<PipelineController> {
        let mut previous = self.pipelines.insert(key.clone(), controller)?;
        if let Err(e) = previous.stop() {
            log::warn!("pipeline {}: replaced controller did not stop cleanly: {}", key, e);
        }
        Some(previous)
    }

    pub fn get(&self, key: &K) -> Option<&PipelineController> {
        self.pipelines.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut PipelineController> {
        self.pipelines.get_mut(key)
    }

    /// Remove and stop the pipeline under `key`
    pub fn remove(&mut self, key: &K) -> Option<PipelineController> {
        let mut controller = self.pipelines.remove(key)?;
        if let Err(e) = controller.stop() {
            log::warn!("pipeline {}: stop on removal failed: {}", key, e);
        }
        Some(controller)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.pipelines.keys()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Stop every pipeline, keeping them registered
    pub fn stop_all(&mut self) {
        for (key, controller) in self.pipelines.iter_mut() {
            if let Err(e) = controller.stop() {
                log::warn!("pipeline {}: stop failed: {}", key, e);
            }
        }
    }
}
