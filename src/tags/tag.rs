// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    error::{GatewayError, Result},
    tags::{
        monitor::EdgeMonitor,
        value::{DataType, TagValue},
    },
    utils::epoch_secs,
};

/// Immutable description of a tag, loaded once at startup.
#[derive(Debug, Clone)]
pub struct TagDeclaration {
    /// Globally unique identifier; the registry key.
    pub tag_path: String,
    /// Logical groupings, informational and used for filtering.
    pub plc: String,
    pub group: String,
    pub name: String,
    pub description: String,
    pub db_number: u16,
    /// Byte offset within the data block.
    pub start_offset: u16,
    /// Payload size in bytes; excludes the two-byte header of strings.
    pub size: u16,
    pub data_type: DataType,
    /// Required for bool tags, 0..=7.
    pub bit_index: Option<u8>,
    pub default_value: Option<TagValue>,
    /// Whether the edge monitor's consumer starts with the tag.
    pub config_monitor: bool,
}

impl TagDeclaration {
    /// Bytes the tag occupies in its block, string header included.
    pub fn effective_size(&self) -> u16 {
        self.data_type.effective_size(self.size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tag_path.is_empty() {
            return Err(GatewayError::Config("tag_path must not be empty".into()));
        }
        match self.data_type {
            DataType::Bool => {
                let bit = self.bit_index.ok_or_else(|| {
                    GatewayError::Config(format!("bool tag {} needs bit_index", self.tag_path))
                })?;
                if bit > 7 {
                    return Err(GatewayError::Config(format!(
                        "tag {}: bit_index must be 0..=7, got {bit}",
                        self.tag_path
                    )));
                }
                if self.size != 1 {
                    return Err(GatewayError::Config(format!(
                        "tag {}: bool tags have size 1, got {}",
                        self.tag_path, self.size
                    )));
                }
            },
            DataType::Str => {
                if self.size == 0 || self.size > 254 {
                    return Err(GatewayError::Config(format!(
                        "tag {}: string size must be 1..=254, got {}",
                        self.tag_path, self.size
                    )));
                }
            },
            other => {
                let width = other.fixed_width().unwrap_or(self.size);
                if self.size != width {
                    return Err(GatewayError::Config(format!(
                        "tag {}: {other} tags have size {width}, got {}",
                        self.tag_path, self.size
                    )));
                }
            },
        }
        if let Some(default) = &self.default_value
            && default.data_type() != self.data_type
        {
            return Err(GatewayError::Config(format!(
                "tag {}: default value type {} does not match {}",
                self.tag_path,
                default.data_type(),
                self.data_type
            )));
        }
        Ok(())
    }
}

struct TagState {
    current: Option<TagValue>,
    pending: Option<TagValue>,
    last_update: i64,
}

/// A typed, addressed cell: the declaration, the mirrored current value, a
/// pending-write slot and the per-tag edge monitor.
///
/// The value state sits behind its own mutex with short critical sections;
/// the monitor is fed outside the lock.
pub struct Tag {
    decl: TagDeclaration,
    state: Mutex<TagState>,
    monitor: EdgeMonitor,
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tag")
            .field("tag_path", &self.decl.tag_path)
            .field("data_type", &self.decl.data_type)
            .finish_non_exhaustive()
    }
}

impl Tag {
    pub fn new(decl: TagDeclaration) -> Arc<Self> {
        let monitor = EdgeMonitor::new(Arc::from(decl.tag_path.as_str()));
        Arc::new(Self {
            state: Mutex::new(TagState {
                current: decl.default_value.clone(),
                pending: None,
                last_update: 0,
            }),
            monitor,
            decl,
        })
    }

    pub fn declaration(&self) -> &TagDeclaration {
        &self.decl
    }

    pub fn monitor(&self) -> &EdgeMonitor {
        &self.monitor
    }

    pub fn current_value(&self) -> Option<TagValue> {
        self.lock_state().current.clone()
    }

    /// Epoch seconds of the last accepted value, 0 before the first one.
    pub fn last_update(&self) -> i64 {
        self.lock_state().last_update
    }

    /// Accepts a value observed from the PLC (or just written to it),
    /// stamping the update time and driving edge detection.
    pub fn set_current(&self, value: TagValue) {
        let old = {
            let mut state = self.lock_state();
            state.last_update = epoch_secs();
            state.current.replace(value.clone())
        };
        self.monitor.on_assign(old, &value);
    }

    /// Stages a deferred write. The monitor is *not* driven here; only a
    /// successful block write commits the value.
    pub fn stage_write(&self, value: TagValue) {
        self.lock_state().pending = Some(value);
    }

    pub fn pending_write(&self) -> Option<TagValue> {
        self.lock_state().pending.clone()
    }

    pub fn has_pending(&self) -> bool {
        self.lock_state().pending.is_some()
    }

    pub fn clear_pending(&self) {
        self.lock_state().pending = None;
    }

    /// Records that `written` reached the PLC: the current value becomes
    /// `written`, and the pending slot is cleared unless a newer value was
    /// staged while the flush was in flight (that one stays for the next
    /// flush, so no write is lost).
    pub fn commit_written(&self, written: &TagValue) {
        let old = {
            let mut state = self.lock_state();
            if state.pending.as_ref() == Some(written) {
                state.pending = None;
            }
            state.last_update = epoch_secs();
            state.current.replace(written.clone())
        };
        self.monitor.on_assign(old, written);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
