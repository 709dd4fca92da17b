//! Scores how interested a worker is in an item.
//!
//! Scoring is pure: the same worker and item always produce the same score.

use serde_json::{Map, Value};

use crate::domain::models::{Item, ItemStatus, WorkerDefinition};

/// Item type is one of the worker's interesting types.
pub const ITEM_TYPE_WEIGHT: u32 = 10;
/// Per matching dimension key/value pair.
pub const DIMENSION_WEIGHT: u32 = 2;
/// A keyword or the worker's topic appears in the item.
pub const KEYWORD_WEIGHT: u32 = 5;
/// Item status is one the worker watches.
pub const STATUS_WEIGHT: u32 = 3;

/// A worker together with its score for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredWorker {
    pub worker: WorkerDefinition,
    pub score: u32,
}

/// Interest score of `worker` in `item`.
pub fn score(worker: &WorkerDefinition, item: &Item) -> u32 {
    score_with(worker, item, &item.dimensions.to_map())
}

/// Workers with a positive score, best first; ties keep their input order.
pub fn rank(workers: &[WorkerDefinition], item: &Item) -> Vec<ScoredWorker> {
    let dimensions = item.dimensions.to_map();
    let mut ranked: Vec<ScoredWorker> = workers
        .iter()
        .filter_map(|worker| {
            let score = score_with(worker, item, &dimensions);
            (score > 0).then(|| ScoredWorker {
                worker: worker.clone(),
                score,
            })
        })
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

fn score_with(worker: &WorkerDefinition, item: &Item, dimensions: &Map<String, Value>) -> u32 {
    let interests = &worker.interests;
    let mut total = 0;

    if interests
        .item_types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(item.item_type.as_str()))
    {
        total += ITEM_TYPE_WEIGHT;
    }

    for (key, wanted) in &interests.dimensions {
        if dimensions
            .get(key)
            .is_some_and(|actual| dimension_matches(actual, wanted))
        {
            total += DIMENSION_WEIGHT;
        }
    }

    if mentions_interest(worker, item) {
        total += KEYWORD_WEIGHT;
    }

    if let Some(status) = item.status() {
        if interests
            .statuses
            .iter()
            .any(|s| ItemStatus::from_str(s) == Some(status))
        {
            total += STATUS_WEIGHT;
        }
    }

    total
}

/// Array dimensions match by membership, everything else by equality.
fn dimension_matches(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        (Value::Array(values), wanted) if !wanted.is_array() => values.contains(wanted),
        _ => actual == wanted,
    }
}

fn mentions_interest(worker: &WorkerDefinition, item: &Item) -> bool {
    let haystacks: Vec<String> = std::iter::once(item.summary.as_str())
        .chain(item.dimensions.topic.as_deref())
        .map(str::to_lowercase)
        .collect();

    worker
        .interests
        .keywords
        .iter()
        .map(String::as_str)
        .chain(worker.topic.as_deref())
        .map(str::trim)
        .filter(|needle| !needle.is_empty())
        .any(|needle| {
            let needle = needle.to_lowercase();
            haystacks.iter().any(|h| h.contains(&needle))
        })
}
