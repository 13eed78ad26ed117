use std::sync::Arc;

use anyhow::Result;
use base::{Error, InternalKey, Kind};
use blockcache::BlockCache;
use bloom::BloomPolicy;

use super::helpers::{
    build_table, drain_backward, drain_forward, open_table, render, OneBytePrefixComparer,
};
use crate::{FilterType, IterOptions, Options, Table, WriterOptions};

fn numbered_entries(n: usize) -> Vec<(String, u64, String)> {
    (0..n)
        .map(|i| (format!("key{i:04}"), 1u64, format!("value-{i}")))
        .collect()
}

fn build_numbered(n: usize, block_size: usize) -> Result<Table> {
    let entries = numbered_entries(n);
    let borrowed: Vec<(&str, u64, &str)> = entries
        .iter()
        .map(|(k, s, v)| (k.as_str(), *s, v.as_str()))
        .collect();
    let bytes = build_table(
        &borrowed,
        WriterOptions {
            block_size,
            ..Default::default()
        },
    );
    open_table(bytes, 1, Options::default())
}

// -------------------- Seek then scan --------------------

#[test]
fn seek_ge_then_next_and_seek_lt_then_prev() -> Result<()> {
    // Keys a0@3=v0, a1@3=v1, a2@3=v2.
    let bytes = build_table(
        &[("a0", 3, "v0"), ("a1", 3, "v1"), ("a2", 3, "v2")],
        WriterOptions::default(),
    );
    let table = open_table(bytes, 1, Options::default())?;

    let mut it = table.iter(IterOptions::default());
    it.seek_ge(InternalKey::new(b"a1", 3, Kind::Set));
    assert_eq!(render(&it), "a1:3");
    assert_eq!(it.value(), Some(b"v1".as_slice()));
    it.next();
    assert_eq!(render(&it), "a2:3");
    it.next();
    assert!(!it.valid());
    assert!(it.error().is_none());

    it.seek_lt(InternalKey::new(b"a1", 3, Kind::Set));
    assert_eq!(render(&it), "a0:3");
    assert_eq!(it.value(), Some(b"v0".as_slice()));
    it.prev();
    assert!(!it.valid());
    assert!(it.error().is_none());
    Ok(())
}

#[test]
fn seeks_work_across_block_boundaries() -> Result<()> {
    let table = build_numbered(60, 64)?;
    let mut it = table.iter(IterOptions::default());

    it.seek_ge(InternalKey::search(b"key0031"));
    assert_eq!(render(&it), "key0031:1");

    // Between two keys.
    it.seek_ge(InternalKey::search(b"key0031a"));
    assert_eq!(render(&it), "key0032:1");

    it.seek_lt(InternalKey::search(b"key0031"));
    assert_eq!(render(&it), "key0030:1");

    it.seek_ge(InternalKey::search(b"zzz"));
    assert!(!it.valid());
    it.seek_lt(InternalKey::search(b"zzz"));
    assert_eq!(render(&it), "key0059:1");
    Ok(())
}

// -------------------- Bidirectional consistency --------------------

#[test]
fn forward_and_backward_walks_agree() -> Result<()> {
    let table = build_numbered(75, 96)?;

    let mut it = table.iter(IterOptions::default());
    it.first();
    let forward = drain_forward(&mut it);
    assert_eq!(forward.len(), 75);

    let mut it = table.iter(IterOptions::default());
    it.last();
    let mut backward = drain_backward(&mut it);
    backward.reverse();
    assert_eq!(forward, backward);
    Ok(())
}

#[test]
fn next_prev_roundtrip_returns_to_the_first_key() -> Result<()> {
    let table = build_numbered(20, 64)?;
    let mut it = table.iter(IterOptions::default());
    let k = 13;
    it.first();
    let origin = render(&it);
    for _ in 0..k - 1 {
        it.next();
    }
    for _ in 0..k - 1 {
        it.prev();
    }
    assert_eq!(render(&it), origin);
    Ok(())
}

#[test]
fn prev_after_forward_exhaustion_resumes_at_the_last_key() -> Result<()> {
    let table = build_numbered(10, 64)?;
    let mut it = table.iter(IterOptions::default());
    it.first();
    while it.valid() {
        it.next();
    }
    it.prev();
    assert_eq!(render(&it), "key0009:1");
    Ok(())
}

// -------------------- Bounds --------------------

#[test]
fn bounds_clamp_without_error() -> Result<()> {
    let bytes = build_table(
        &[
            ("a", 1, "1"),
            ("b", 1, "2"),
            ("c", 1, "3"),
            ("d", 1, "4"),
            ("e", 1, "5"),
        ],
        WriterOptions {
            block_size: 32,
            ..Default::default()
        },
    );
    let table = open_table(bytes, 1, Options::default())?;
    let bounds = IterOptions {
        lower: Some(b"b".to_vec()),
        upper: Some(b"e".to_vec()),
    };

    let mut it = table.iter(bounds.clone());
    it.first();
    let forward = drain_forward(&mut it);
    assert_eq!(
        forward,
        vec![("b".into(), 1), ("c".into(), 1), ("d".into(), 1)]
    );
    assert!(it.error().is_none());

    let mut it = table.iter(bounds.clone());
    it.last();
    assert_eq!(render(&it), "d:1");

    // Seeks below the lower bound clamp up; seeks at or past the upper
    // bound come back invalid.
    let mut it = table.iter(bounds);
    it.seek_ge(InternalKey::search(b"a"));
    assert_eq!(render(&it), "b:1");
    it.seek_ge(InternalKey::search(b"e"));
    assert!(!it.valid());
    assert!(it.error().is_none());
    it.seek_lt(InternalKey::search(b"z"));
    assert_eq!(render(&it), "d:1");
    it.prev();
    it.prev();
    assert_eq!(render(&it), "b:1");
    it.prev();
    assert!(!it.valid());
    assert!(it.error().is_none());
    Ok(())
}

#[test]
fn seeks_far_outside_bounds_park_at_the_boundary() -> Result<()> {
    let bytes = build_table(
        &[
            ("a", 1, "1"),
            ("b", 1, "2"),
            ("c", 1, "3"),
            ("m", 1, "4"),
            ("n", 1, "5"),
        ],
        WriterOptions {
            block_size: 32,
            ..Default::default()
        },
    );
    let table = open_table(bytes, 1, Options::default())?;
    let bounds = IterOptions {
        lower: Some(b"b".to_vec()),
        upper: Some(b"c".to_vec()),
    };

    // Seeking way past the upper bound is invalid, and prev resumes at
    // the last in-bounds key, not somewhere beyond the bound.
    let mut it = table.iter(bounds.clone());
    it.seek_ge(InternalKey::search(b"n"));
    assert!(!it.valid());
    it.prev();
    assert_eq!(render(&it), "b:1");

    // Symmetrically for a seek below the lower bound.
    let mut it = table.iter(bounds);
    it.seek_lt(InternalKey::search(b"a"));
    assert!(!it.valid());
    assert!(it.error().is_none());
    it.next();
    assert_eq!(render(&it), "b:1");
    Ok(())
}

#[test]
fn stepping_back_into_bounds_recovers() -> Result<()> {
    let bytes = build_table(
        &[("a", 1, "1"), ("b", 1, "2"), ("c", 1, "3")],
        WriterOptions::default(),
    );
    let table = open_table(bytes, 1, Options::default())?;
    let mut it = table.iter(IterOptions {
        lower: None,
        upper: Some(b"c".to_vec()),
    });
    it.first();
    it.next(); // b
    it.next(); // c: out of bounds, invalid
    assert!(!it.valid());
    it.prev(); // back inside
    assert_eq!(render(&it), "b:1");
    Ok(())
}

// -------------------- Prefix seeks and the filter fast path --------------------

fn prefix_table(cache: Arc<BlockCache>, filter_type: FilterType) -> Result<Table> {
    let policy = Arc::new(BloomPolicy::new(100));
    let comparer = Arc::new(OneBytePrefixComparer);
    let entries = [
        ("apple", 1, "1"),
        ("avocado", 2, "2"),
        ("banana", 3, "3"),
        ("blueberry", 4, "4"),
        ("cherry", 5, "5"),
        ("citron", 6, "6"),
    ];
    let bytes = build_table(
        &entries,
        WriterOptions {
            comparer: comparer.clone(),
            filter_policy: Some(policy.clone()),
            filter_type,
            block_size: 32,
            ..Default::default()
        },
    );
    open_table(
        bytes,
        1,
        Options {
            comparer,
            filter_policy: Some(policy),
            filter_type,
            cache: Some(cache),
        },
    )
}

#[test]
fn seek_prefix_ge_finds_keys_under_a_present_prefix() -> Result<()> {
    let cache = Arc::new(BlockCache::new(16));
    let table = prefix_table(cache, FilterType::Block)?;
    let mut it = table.iter(IterOptions::default());
    it.seek_prefix_ge(b"b", InternalKey::search(b"banana"));
    assert_eq!(render(&it), "banana:3");
    it.next();
    assert_eq!(render(&it), "blueberry:4");
    Ok(())
}

#[test]
fn absent_prefix_returns_invalid_with_zero_data_block_fetches() -> Result<()> {
    let cache = Arc::new(BlockCache::new(16));
    let table = prefix_table(cache.clone(), FilterType::Block)?;
    let fetches_after_open = cache.inserts();
    let misses_after_open = cache.misses();

    let mut it = table.iter(IterOptions::default());
    it.seek_prefix_ge(b"z", InternalKey::search(b"z"));
    assert!(!it.valid());
    assert!(it.error().is_none());
    // The filter answered; no data block was fetched through the cache.
    assert_eq!(cache.inserts(), fetches_after_open);
    assert_eq!(cache.misses(), misses_after_open);
    Ok(())
}

#[test]
fn table_filter_also_short_circuits_prefix_seeks() -> Result<()> {
    let cache = Arc::new(BlockCache::new(16));
    let table = prefix_table(cache.clone(), FilterType::Table)?;
    let fetches_after_open = cache.inserts();

    let mut it = table.iter(IterOptions::default());
    it.seek_prefix_ge(b"z", InternalKey::search(b"z"));
    assert!(!it.valid());
    assert_eq!(cache.inserts(), fetches_after_open);

    // And a present prefix still resolves.
    it.seek_prefix_ge(b"c", InternalKey::search(b"cherry"));
    assert_eq!(render(&it), "cherry:5");
    Ok(())
}

// -------------------- Error latching --------------------

#[test]
fn corruption_mid_scan_latches_and_stays() -> Result<()> {
    let entries = numbered_entries(40);
    let borrowed: Vec<(&str, u64, &str)> = entries
        .iter()
        .map(|(k, s, v)| (k.as_str(), *s, v.as_str()))
        .collect();
    let mut bytes = build_table(
        &borrowed,
        WriterOptions {
            block_size: 64,
            ..Default::default()
        },
    );
    // Poke the first data block; the last block stays intact.
    bytes[10] ^= 0x01;
    let table = open_table(bytes, 1, Options::default())?;

    let mut it = table.iter(IterOptions::default());
    // The last key lives in the last block, which is fine.
    it.seek_ge(InternalKey::search(b"key0039"));
    assert_eq!(render(&it), "key0039:1");

    // Walking backward must hit the damaged block and latch.
    while it.valid() {
        it.prev();
    }
    assert!(matches!(it.error(), Some(Error::Corruption(_))));

    // Positioning calls after the error stay invalid.
    it.next();
    assert!(!it.valid());
    it.first();
    assert!(!it.valid());
    assert!(matches!(it.error(), Some(Error::Corruption(_))));
    Ok(())
}
