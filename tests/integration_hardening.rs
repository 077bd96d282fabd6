//! Public API hardening tests — Priority 3.
//!
//! These tests exercise exact boundary values for every `EngineConfig` field
//! (the smallest valid, smallest invalid, largest valid, largest invalid)
//! and additional edge-case error paths not covered by the base
//! integration suite.
//!
//! ## See also
//! - [`integration`] — basic config rejection, CRUD, concurrency

use tempfile::TempDir;
use veilkv::engine::{Engine, EngineConfig, EngineError};

// ================================================================================================
// EngineConfig — write_buffer_size exact boundaries
// ================================================================================================

/// # Scenario
/// `write_buffer_size` at the exact minimum (1024) should be accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_write_buffer_size_exact_min_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        write_buffer_size: 1024,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `write_buffer_size` one below the minimum (1023) is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn config_write_buffer_size_below_min_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        write_buffer_size: 1023,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::open(dir.path(), config).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

/// # Scenario
/// `write_buffer_size` at the exact maximum (256 MiB = 268435456) is accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_write_buffer_size_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        write_buffer_size: 256 * 1024 * 1024,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `write_buffer_size` one above the maximum is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn config_write_buffer_size_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        write_buffer_size: 256 * 1024 * 1024 + 1,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::open(dir.path(), config).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

// ================================================================================================
// EngineConfig — min_threshold exact boundaries
// ================================================================================================

/// # Scenario
/// `min_threshold` at the exact minimum (2) is accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_min_threshold_exact_min_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        min_threshold: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `min_threshold` at the exact maximum (64) is accepted.
/// `max_threshold` must be >= min, so set it to 64 as well.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_min_threshold_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        min_threshold: 64,
        max_threshold: 64,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `min_threshold` above the maximum (65) is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn config_min_threshold_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        min_threshold: 65,
        max_threshold: 65,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::open(dir.path(), config).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

// ================================================================================================
// EngineConfig — max_threshold exact boundaries
// ================================================================================================

/// # Scenario
/// `max_threshold` at exact max (256) is accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_max_threshold_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        max_threshold: 256,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `max_threshold` above 256 is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn config_max_threshold_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        max_threshold: 257,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::open(dir.path(), config).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

/// # Scenario
/// `max_threshold` exactly equal to `min_threshold` is accepted (tightest
/// valid window).
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_max_equals_min_threshold_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        min_threshold: 10,
        max_threshold: 10,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

// ================================================================================================
// EngineConfig — tombstone_ratio_threshold exact boundaries
// ================================================================================================

/// # Scenario
/// `tombstone_ratio_threshold` at 1.0 (upper bound inclusive) is accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_tombstone_ratio_exact_upper_bound_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        tombstone_ratio_threshold: 1.0,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `tombstone_ratio_threshold` at a very small positive value (0.001)
/// is accepted (lower bound is exclusive 0.0).
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_tombstone_ratio_small_positive_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        tombstone_ratio_threshold: 0.001,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `tombstone_ratio_threshold` at a negative value is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn config_tombstone_ratio_negative_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        tombstone_ratio_threshold: -0.1,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::open(dir.path(), config).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

// ================================================================================================
// EngineConfig — tombstone_compaction_interval exact boundaries
// ================================================================================================

/// # Scenario
/// `tombstone_compaction_interval` at exact max (604800 — 7 days) is accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_tombstone_interval_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        tombstone_compaction_interval: 604_800,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `tombstone_compaction_interval` above max is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn config_tombstone_interval_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        tombstone_compaction_interval: 604_801,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::open(dir.path(), config).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

// ================================================================================================
// EngineConfig — thread_pool_size exact boundaries
// ================================================================================================

/// # Scenario
/// `thread_pool_size` at exact min (1) is accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_thread_pool_size_exact_min_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        thread_pool_size: 1,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `thread_pool_size` at exact max (32) is accepted.
///
/// # Expected behavior
/// `Engine::open` succeeds.
#[test]
fn config_thread_pool_size_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        thread_pool_size: 32,
        ..EngineConfig::default()
    };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `thread_pool_size` above max (33) is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn config_thread_pool_size_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        thread_pool_size: 33,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::open(dir.path(), config).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

// ================================================================================================
// Public API — scan with start == end returns empty
// ================================================================================================

/// # Scenario
/// `scan` with `start == end` returns an empty iterator (not an error).
///
/// # Expected behavior
/// `engine.scan(b"x", b"x")` yields no items.
#[test]
fn scan_start_equals_end_returns_empty() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    engine.put(b"x".to_vec(), b"v".to_vec()).unwrap();

    let results: Vec<_> = engine.scan(b"x", b"x").unwrap().collect();
    assert!(results.is_empty());

    engine.close().unwrap();
}

// ================================================================================================
// Public API — delete_range with empty keys
// ================================================================================================

/// # Scenario
/// `delete_range` with empty start or end key is rejected.
///
/// # Expected behavior
/// Returns `Err(EngineError::InvalidInput(_))`.
#[test]
fn delete_range_empty_keys_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    assert!(matches!(
        engine.delete_range(b"".to_vec(), b"z".to_vec()),
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.delete_range(b"a".to_vec(), b"".to_vec()),
        Err(EngineError::InvalidInput(_))
    ));

    engine.close().unwrap();
}

// ================================================================================================
// Public API — major_compact on empty engine
// ================================================================================================

/// # Scenario
/// `major_compact()` on an engine with no SSTables returns `false`.
///
/// # Expected behavior
/// Returns `Ok(false)` — nothing to compact.
#[test]
fn major_compact_empty_engine_returns_false() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    let compacted = engine.major_compact().unwrap();
    assert!(!compacted);

    engine.close().unwrap();
}

// ================================================================================================
// Public API — reopen after only deletes (no live data)
// ================================================================================================

/// # Scenario
/// Write some keys, delete them all, close, reopen. All gets should
/// return `None`.
///
/// # Expected behavior
/// No data is visible after reopen.
#[test]
fn reopen_after_delete_all_keys() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        engine.delete(b"a".to_vec()).unwrap();
        engine.delete(b"b".to_vec()).unwrap();
        engine.close().unwrap();
    }
    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        assert_eq!(engine.get(b"a".to_vec()).unwrap(), None);
        assert_eq!(engine.get(b"b".to_vec()).unwrap(), None);
        let scan: Vec<_> = engine.scan(b"\x00", b"\xff").unwrap().collect();
        assert!(scan.is_empty());
        engine.close().unwrap();
    }
}
