// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod batch;
pub mod codec;
pub mod monitor;
pub mod registry;
pub mod store;
pub mod tag;
pub mod value;

pub use batch::TagEngine;
pub use monitor::{EdgeMonitor, EventKind, TagEvent};
pub use registry::TagRegistry;
pub use tag::{Tag, TagDeclaration};
pub use value::{DataType, TagValue};
