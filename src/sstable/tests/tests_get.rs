#[cfg(test)]
mod tests {
    use crate::engine::utils::{entry_checksum, NO_EXPIRY};
    use crate::engine::{PointEntry, RangeTombstone};
    use crate::sstable::{GetResult, SSTable, SstWriter};
    use tempfile::TempDir;

    fn put(key: &[u8], value: &[u8], lsn: u64, timestamp: u64) -> PointEntry {
        let checksum = entry_checksum(key, value, timestamp, false, b"n");
        PointEntry::new(key, value, lsn, timestamp, b"n".to_vec(), NO_EXPIRY, 1, checksum)
    }

    fn del(key: &[u8], lsn: u64, timestamp: u64) -> PointEntry {
        let checksum = entry_checksum(key, b"", timestamp, true, b"");
        PointEntry::new_delete(key, lsn, timestamp, checksum)
    }

    fn build(points: Vec<PointEntry>, ranges: Vec<RangeTombstone>) -> (TempDir, SSTable) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.bin");
        SstWriter::new(&path)
            .build(points.clone().into_iter(), points.len(), ranges.clone().into_iter(), ranges.len())
            .unwrap();
        let sst = SSTable::open(&path).unwrap();
        (tmp, sst)
    }

    #[test]
    fn get_returns_latest_version_by_lsn() {
        let (_tmp, sst) = build(
            vec![put(b"k", b"v1", 1, 10), put(b"k", b"v2", 2, 20)],
            vec![],
        );

        match sst.get(b"k").unwrap() {
            GetResult::Put { value, lsn, .. } => {
                assert_eq!(value, b"v2");
                assert_eq!(lsn, 2);
            }
            other => panic!("expected Put, got {other:?}"),
        }
    }

    #[test]
    fn get_missing_key_returns_not_found() {
        let (_tmp, sst) = build(vec![put(b"a", b"1", 1, 10)], vec![]);
        assert_eq!(sst.get(b"zzz").unwrap(), GetResult::NotFound);
    }

    #[test]
    fn get_sees_point_delete() {
        let (_tmp, sst) = build(vec![put(b"a", b"1", 1, 10), del(b"a", 2, 20)], vec![]);
        match sst.get(b"a").unwrap() {
            GetResult::Delete { lsn, .. } => assert_eq!(lsn, 2),
            other => panic!("expected Delete, got {other:?}"),
        }
    }

    #[test]
    fn get_range_delete_overrides_older_point() {
        let (_tmp, sst) = build(
            vec![put(b"b", b"1", 1, 10)],
            vec![RangeTombstone::new(b"a".to_vec(), b"c".to_vec(), 5, 50)],
        );
        match sst.get(b"b").unwrap() {
            GetResult::RangeDelete { lsn, .. } => assert_eq!(lsn, 5),
            other => panic!("expected RangeDelete, got {other:?}"),
        }
    }

    #[test]
    fn get_point_newer_than_range_delete_wins() {
        let (_tmp, sst) = build(
            vec![put(b"b", b"new", 10, 100)],
            vec![RangeTombstone::new(b"a".to_vec(), b"c".to_vec(), 5, 50)],
        );
        match sst.get(b"b").unwrap() {
            GetResult::Put { value, .. } => assert_eq!(value, b"new"),
            other => panic!("expected Put, got {other:?}"),
        }
    }

    #[test]
    fn bloom_may_contain_excludes_absent_keys() {
        let (_tmp, sst) = build(vec![put(b"present", b"1", 1, 10)], vec![]);
        assert!(sst.bloom_may_contain(b"present"));
    }
}
