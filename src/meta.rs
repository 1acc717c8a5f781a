// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The opaque metadata mapping threaded through events, frames, and reports.

use serde_json::Value;

/// An opaque, dynamically-shaped bag of metadata.
///
/// The core never reads or writes particular keys here (aside from the
/// `runner_time_ms` decoration applied in [`decorate_with_runner_time`]); it
/// is a pass-through value supplied by callers and consumed by callers.
pub type MetaMap = serde_json::Map<String, Value>;

/// Returns a copy of `meta` with a `runner_time_ms` key set to the number of
/// milliseconds since the run started, if not already present.
///
/// The runner calls this when it constructs the `meta` map attached to a
/// frame, per the data model's "adds a `runner_time_ms` key if absent"
/// invariant. An existing `runner_time_ms` key supplied by the engine is
/// left untouched — the key is write-once from the runner's perspective.
pub fn decorate_with_runner_time(mut meta: MetaMap, elapsed_ms: u64) -> MetaMap {
    meta.entry("runner_time_ms".to_string())
        .or_insert_with(|| Value::from(elapsed_ms));
    meta
}
