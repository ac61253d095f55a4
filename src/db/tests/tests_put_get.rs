#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::batch::WriteBatch;
    use crate::db::tests::helpers::{get, init_tracing, open_db, put};
    use crate::db::{DbError, ReadOptions, WriteOptions};

    #[test]
    fn test_put_get_delete_cycle() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        put(&db, b"hello", b"world");
        assert_eq!(get(&db, b"hello"), Some(b"world".to_vec()));

        db.delete(&WriteOptions::default(), b"hello").unwrap();
        assert_eq!(get(&db, b"hello"), None);

        put(&db, b"hello", b"again");
        assert_eq!(get(&db, b"hello"), Some(b"again".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_get_missing_key() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());
        assert_eq!(get(&db, b"never-written"), None);
        db.close().unwrap();
    }

    #[test]
    fn test_overwrite_takes_latest() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        for i in 0..10u32 {
            put(&db, b"counter", format!("{i}").as_bytes());
        }
        assert_eq!(get(&db, b"counter"), Some(b"9".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_empty_value_distinct_from_missing() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        put(&db, b"empty", b"");
        assert_eq!(get(&db, b"empty"), Some(Vec::new()));
        assert_eq!(get(&db, b"missing"), None);
        db.close().unwrap();
    }

    #[test]
    fn test_binary_keys_and_values() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        let key: Vec<u8> = (0..=255).collect();
        let value = vec![0x00, 0xff, 0x80, 0x00];
        put(&db, &key, &value);
        assert_eq!(get(&db, &key), Some(value));
        db.close().unwrap();
    }

    #[test]
    fn test_atomic_batch() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        batch.delete(b"a");
        db.write(&WriteOptions::default(), batch).unwrap();

        assert_eq!(get(&db, b"a"), None);
        assert_eq!(get(&db, b"b"), Some(b"2".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_snapshot_read_options() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        put(&db, b"key", b"v1");
        // Each put consumes one sequence number starting at 1.
        put(&db, b"key", b"v2");

        let ro_old = ReadOptions { snapshot: Some(1) };
        assert_eq!(db.get(&ro_old, b"key").unwrap(), Some(b"v1".to_vec()));
        let ro_new = ReadOptions::default();
        assert_eq!(db.get(&ro_new, b"key").unwrap(), Some(b"v2".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_sync_write_option() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());
        db.put(&WriteOptions { sync: true }, b"durable", b"yes")
            .unwrap();
        assert_eq!(get(&db, b"durable"), Some(b"yes".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_single_delete() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        put(&db, b"once", b"value");
        let mut batch = WriteBatch::new();
        batch.single_delete(b"once");
        db.write(&WriteOptions::default(), batch).unwrap();
        assert_eq!(get(&db, b"once"), None);
        db.close().unwrap();
    }

    #[test]
    fn test_operations_after_close_fail() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());
        db.close().unwrap();

        assert!(matches!(
            db.put(&WriteOptions::default(), b"k", b"v").unwrap_err(),
            DbError::ShutdownInProgress
        ));
        assert!(matches!(
            db.get(&ReadOptions::default(), b"k").unwrap_err(),
            DbError::ShutdownInProgress
        ));
        // close is idempotent.
        db.close().unwrap();
    }

    #[test]
    fn test_large_keys_and_values() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        let big_key = vec![b'k'; 1024 * 1024];
        let big_value = vec![b'v'; 100 * 1024];
        put(&db, &big_key, &big_value);
        assert_eq!(get(&db, &big_key), Some(big_value));
        db.close().unwrap();
    }
}
