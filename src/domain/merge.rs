//! Reconciles two snapshots of a collection.
//!
//! The rule is asymmetric: every item of the authoritative snapshot is kept
//! as-is, and an item of the supplementary snapshot survives only when its key
//! is absent from the authoritative one. There is no field-level merge and no
//! timestamp comparison for keys present on both sides.
//!
//! Known limitation: two devices that change the same existing record between
//! two cycles race on the remote write, and the last completed write wins
//! without notice. Merging cannot detect this because the remote keeps no
//! versions.

use crate::domain::models::{Record, User};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub trait Keyed {
    fn key(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Keyed for Record {
    fn key(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Keyed for User {
    fn key(&self) -> &str {
        &self.username
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

pub fn merge<T>(authoritative: Vec<T>, supplementary: Vec<T>) -> Vec<T>
where
    T: Keyed,
{
    let mut by_key: HashMap<String, T> =
        HashMap::with_capacity(authoritative.len() + supplementary.len());

    for item in authoritative {
        by_key.insert(item.key().to_string(), item);
    }
    for item in supplementary {
        by_key.entry(item.key().to_string()).or_insert(item);
    }

    let mut merged = by_key.into_values().collect::<Vec<_>>();
    sort_newest_first(&mut merged);
    merged
}

/// Newest `created_at` first; equal timestamps fall back to key ascending.
pub fn sort_newest_first<T>(items: &mut [T])
where
    T: Keyed,
{
    items.sort_by(|left, right| {
        right
            .created_at()
            .cmp(&left.created_at())
            .then_with(|| left.key().cmp(right.key()))
    });
}

/// True when both collections hold the same keys with equal values.
pub fn same_contents<T>(left: &[T], right: &[T]) -> bool
where
    T: Keyed + PartialEq,
{
    if left.len() != right.len() {
        return false;
    }
    let index = left
        .iter()
        .map(|item| (item.key(), item))
        .collect::<HashMap<_, _>>();
    right
        .iter()
        .all(|item| index.get(item.key()).is_some_and(|other| *other == item))
}
