// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Batch engine: coalesces tag addresses into one protocol transaction per
//! data block, on top of the single-tag paths the API uses directly.
//!
//! Sweeps and flushes run on the async lane; request-driven single-tag
//! operations run on the sync lane. Between the two lanes no ordering is
//! guaranteed; callers needing a write-then-read fence must use the sync
//! lane for both.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, error};

use crate::{
    error::{GatewayError, Result},
    session::PlcSession,
    tags::{
        codec,
        registry::TagRegistry,
        tag::Tag,
        value::{DataType, TagValue},
    },
};

/// Groups tags by their data block number.
pub fn group_by_db(tags: Vec<Arc<Tag>>) -> HashMap<u16, Vec<Arc<Tag>>> {
    let mut groups: HashMap<u16, Vec<Arc<Tag>>> = HashMap::new();
    for tag in tags {
        groups.entry(tag.declaration().db_number).or_default().push(tag);
    }
    groups
}

/// Minimal byte range covering every tag of one block: from the lowest
/// start offset to the highest end offset, string headers included.
/// Returns `(start_offset, length)`.
pub fn covering_range(tags: &[Arc<Tag>]) -> Option<(u16, usize)> {
    let start = tags.iter().map(|t| t.declaration().start_offset).min()?;
    let end = tags
        .iter()
        .map(|t| {
            let d = t.declaration();
            d.start_offset + d.effective_size() - 1
        })
        .max()?;
    Some((start, (end - start + 1) as usize))
}

/// Tag I/O engine bound to the two sessions of one PLC.
pub struct TagEngine {
    registry: Arc<TagRegistry>,
    sync_lane: Arc<PlcSession>,
    async_lane: Arc<PlcSession>,
}

impl TagEngine {
    pub fn new(
        registry: Arc<TagRegistry>,
        sync_lane: Arc<PlcSession>,
        async_lane: Arc<PlcSession>,
    ) -> Arc<Self> {
        Arc::new(Self { registry, sync_lane, async_lane })
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    /// Reads one tag live from the PLC over the sync lane and refreshes the
    /// cache on success. The cached value is untouched on failure.
    pub async fn read_tag(&self, tag_path: &str) -> Result<TagValue> {
        let tag = self.lookup(tag_path)?;
        let d = tag.declaration();
        let data = self
            .sync_lane
            .read_range(d.db_number, d.start_offset, d.effective_size() as usize)
            .await?;
        let value = codec::decode(d.data_type, d.bit_index, d.size, &data)?;
        tag.set_current(value.clone());
        Ok(value)
    }

    /// Writes one tag immediately over the sync lane. Bool writes are
    /// read-modify-write on their byte so sibling bits survive.
    pub async fn write_tag(&self, tag_path: &str, value: TagValue) -> Result<()> {
        let tag = self.lookup(tag_path)?;
        let d = tag.declaration();
        if value.data_type() != d.data_type {
            return Err(GatewayError::Encoding(format!(
                "tag {tag_path}: value type {} does not match declared {}",
                value.data_type(),
                d.data_type
            )));
        }

        let mut buf = match d.data_type {
            DataType::Bool => {
                let orig = self.sync_lane.read_range(d.db_number, d.start_offset, 1).await?;
                orig.to_vec()
            },
            _ => vec![0u8; d.effective_size() as usize],
        };
        codec::encode_at(&mut buf, 0, d.bit_index, d.size, &value)?;
        self.sync_lane.write_range(d.db_number, d.start_offset, &buf).await?;

        tag.set_current(value);
        Ok(())
    }

    /// Stages a deferred write for the next flush.
    pub fn stage_write(&self, tag_path: &str, value: TagValue) -> Result<()> {
        let tag = self.lookup(tag_path)?;
        let d = tag.declaration();
        if value.data_type() != d.data_type {
            return Err(GatewayError::Encoding(format!(
                "tag {tag_path}: value type {} does not match declared {}",
                value.data_type(),
                d.data_type
            )));
        }
        tag.stage_write(value);
        Ok(())
    }

    /// Cached values for a set of tag paths, as mirrored by the sweep.
    pub fn cached_values(&self, tag_paths: &[String]) -> HashMap<String, Option<TagValue>> {
        tag_paths
            .iter()
            .map(|path| {
                (
                    path.clone(),
                    self.registry.get(path).and_then(|tag| tag.current_value()),
                )
            })
            .collect()
    }

    /// One read sweep over every registered tag. Each data block costs
    /// exactly one range read; a failed block marks its tags `None` without
    /// touching their cache, and other blocks proceed independently.
    pub async fn read_all(&self) -> HashMap<String, Option<TagValue>> {
        self.read_groups(group_by_db(self.registry.all())).await
    }

    /// Read sweep restricted to one data block.
    pub async fn read_db(&self, db_number: u16) -> HashMap<String, Option<TagValue>> {
        let tags = self.registry.by_db(db_number);
        if tags.is_empty() {
            return HashMap::new();
        }
        self.read_groups(HashMap::from([(db_number, tags)])).await
    }

    async fn read_groups(
        &self,
        groups: HashMap<u16, Vec<Arc<Tag>>>,
    ) -> HashMap<String, Option<TagValue>> {
        let mut results = HashMap::new();
        for (db_number, tags) in groups {
            let Some((start, len)) = covering_range(&tags) else {
                continue;
            };

            let data = match self.async_lane.read_range(db_number, start, len).await {
                Ok(data) => data,
                Err(e) => {
                    error!(db_number, "block read failed: {e}");
                    for tag in &tags {
                        results.insert(tag.declaration().tag_path.clone(), None);
                    }
                    continue;
                },
            };

            for tag in &tags {
                let d = tag.declaration();
                let rel = (d.start_offset - start) as usize;
                let slice = &data[rel..rel + d.effective_size() as usize];
                match codec::decode(d.data_type, d.bit_index, d.size, slice) {
                    Ok(value) => {
                        tag.set_current(value.clone());
                        results.insert(d.tag_path.clone(), Some(value));
                    },
                    Err(e) => {
                        error!(
                            tag_path = %d.tag_path,
                            "decode failed, check the tag declaration: {e}"
                        );
                        results.insert(d.tag_path.clone(), None);
                    },
                }
            }
        }
        results
    }

    /// Applies every staged write as one read-modify-write per data block,
    /// so unrelated bytes and sibling bits are preserved.
    ///
    /// With nothing staged this is a no-op issuing zero I/O. On a failed
    /// block the pending values stay staged and the next flush retries.
    pub async fn flush_pending(&self) -> HashMap<String, bool> {
        let staged: Vec<Arc<Tag>> = self
            .registry
            .all()
            .into_iter()
            .filter(|tag| tag.has_pending())
            .collect();
        if staged.is_empty() {
            return HashMap::new();
        }

        let mut results = HashMap::new();
        for (db_number, mut tags) in group_by_db(staged) {
            // Ascending offset order: for overlapping declarations the tag
            // with the higher start offset wins the shared bytes.
            tags.sort_by_key(|tag| tag.declaration().start_offset);
            let Some((start, len)) = covering_range(&tags) else {
                continue;
            };

            let orig = match self.async_lane.read_range(db_number, start, len).await {
                Ok(data) => data,
                Err(e) => {
                    error!(db_number, "flush: block read failed: {e}");
                    for tag in &tags {
                        results.insert(tag.declaration().tag_path.clone(), false);
                    }
                    continue;
                },
            };

            let mut patched = orig.to_vec();
            let mut encoded: Vec<(Arc<Tag>, TagValue)> = Vec::with_capacity(tags.len());
            for tag in &tags {
                let d = tag.declaration();
                let Some(value) = tag.pending_write() else {
                    continue;
                };
                let rel = (d.start_offset - start) as usize;
                match codec::encode_at(&mut patched, rel, d.bit_index, d.size, &value) {
                    Ok(()) => encoded.push((Arc::clone(tag), value)),
                    Err(e) => {
                        // Pending stays staged so the caller can overwrite it.
                        error!(tag_path = %d.tag_path, "flush: encode failed: {e}");
                        results.insert(d.tag_path.clone(), false);
                    },
                }
            }

            if encoded.is_empty() {
                continue;
            }

            match self.async_lane.write_range(db_number, start, &patched).await {
                Ok(()) => {
                    for (tag, value) in encoded {
                        tag.commit_written(&value);
                        results.insert(tag.declaration().tag_path.clone(), true);
                    }
                    debug!(db_number, "flush: block written");
                },
                Err(e) => {
                    error!(db_number, "flush: block write failed: {e}");
                    for (tag, _) in encoded {
                        results.insert(tag.declaration().tag_path.clone(), false);
                    }
                },
            }
        }
        results
    }

    fn lookup(&self, tag_path: &str) -> Result<Arc<Tag>> {
        self.registry
            .get(tag_path)
            .ok_or_else(|| GatewayError::UnknownTag(tag_path.to_string()))
    }
}
