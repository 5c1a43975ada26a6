// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::{
    error::Result,
    tags::tag::{Tag, TagDeclaration},
};

/// Process-wide map of tag path to tag. Built once at startup from the
/// declaration store and shared by the batch engine, the API and the
/// handler registration.
///
/// Lookups go straight to the concurrent map; traversals snapshot into a
/// `Vec` so no shard guard is held across I/O.
#[derive(Debug, Default)]
pub struct TagRegistry {
    tags: DashMap<String, Arc<Tag>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tag from its declaration and registers it. A duplicate
    /// path overwrites the existing tag with a warning; the replaced tag's
    /// consumer is stopped so it does not linger.
    pub async fn create(&self, decl: TagDeclaration) -> Result<Arc<Tag>> {
        decl.validate()?;

        let monitored = decl.config_monitor;
        let path = decl.tag_path.clone();
        let tag = Tag::new(decl);
        if monitored {
            tag.monitor().enable(true).await;
        }

        if let Some(replaced) = self.tags.insert(path.clone(), Arc::clone(&tag)) {
            warn!(tag_path = %path, "tag already exists, overwriting");
            replaced.monitor().enable(false).await;
        } else {
            info!(tag_path = %path, "tag created");
        }
        Ok(tag)
    }

    /// Builds the registry from a list of declarations.
    pub async fn initialize(declarations: Vec<TagDeclaration>) -> Result<Arc<Self>> {
        let registry = Self::new();
        for decl in declarations {
            registry.create(decl).await?;
        }
        info!(count = registry.len(), "tag registry initialised");
        Ok(Arc::new(registry))
    }

    pub fn get(&self, tag_path: &str) -> Option<Arc<Tag>> {
        self.tags.get(tag_path).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, tag_path: &str) -> bool {
        self.tags.contains_key(tag_path)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Snapshot of every registered tag.
    pub fn all(&self) -> Vec<Arc<Tag>> {
        self.tags.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Tags living in one data block.
    pub fn by_db(&self, db_number: u16) -> Vec<Arc<Tag>> {
        self.tags
            .iter()
            .filter(|entry| entry.value().declaration().db_number == db_number)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Tags whose path starts with the given prefix, the grouping scheme of
    /// the declaration store.
    pub fn by_group_prefix(&self, prefix: &str) -> Vec<Arc<Tag>> {
        self.tags
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
