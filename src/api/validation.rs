// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::tags::TagRegistry;

/// Returns the paths that are not present in the registry; unknown tags are
/// rejected at the API boundary before any I/O happens.
pub fn unknown_tag_paths<'a, I>(registry: &TagRegistry, paths: I) -> Vec<String>
where I: IntoIterator<Item = &'a str> {
    paths
        .into_iter()
        .filter(|path| !registry.contains(path))
        .map(str::to_string)
        .collect()
}

/// Splits the `tags` query parameter into trimmed, non-empty paths.
pub fn split_tags_param(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
