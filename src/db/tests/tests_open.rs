#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::db::tests::helpers::{get, init_tracing, open_db, put, test_options};
    use crate::db::{Db, DbError, FlushOptions, Options, ReadOptions, WriteOptions};

    #[test]
    fn test_open_missing_without_create_fails() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let err = Db::open(
            tmp.path().join("nope"),
            Options {
                create_if_missing: false,
                ..test_options()
            },
        )
        .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn test_error_if_exists() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let db = open_db(tmp.path());
            db.close().unwrap();
        }
        let err = Db::open(
            tmp.path(),
            Options {
                error_if_exists: true,
                ..test_options()
            },
        )
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }

    #[test]
    fn test_second_open_is_busy() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        let err = Db::open(tmp.path(), test_options()).unwrap_err();
        assert!(matches!(err, DbError::Busy(_)));

        db.close().unwrap();
        drop(db);
        // The lock dies with the handle; a fresh open succeeds.
        let db = open_db(tmp.path());
        db.close().unwrap();
    }

    #[test]
    fn test_invalid_options_rejected() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        let err = Db::open(
            tmp.path(),
            Options {
                comparator: "my.custom.Comparator".to_string(),
                ..test_options()
            },
        )
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));

        let err = Db::open(
            tmp.path(),
            Options {
                format_version: 2,
                ..test_options()
            },
        )
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }

    #[test]
    fn test_first_open_writes_bookkeeping_files() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());
        db.close().unwrap();

        assert!(tmp.path().join("CURRENT").is_file());
        assert!(tmp.path().join("LOCK").is_file());
        assert!(tmp.path().join("IDENTITY").is_file());

        let current = std::fs::read_to_string(tmp.path().join("CURRENT")).unwrap();
        assert!(current.starts_with("MANIFEST-"));
        assert!(current.ends_with('\n'));

        let identity = std::fs::read_to_string(tmp.path().join("IDENTITY")).unwrap();
        assert_eq!(identity.len(), 36); // uuid shape

        // One OPTIONS snapshot is rendered per open.
        assert!(
            std::fs::read_dir(tmp.path())
                .unwrap()
                .flatten()
                .any(|e| e.file_name().to_string_lossy().starts_with("OPTIONS-"))
        );
    }

    #[test]
    fn test_identity_is_stable_across_reopens() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let db = open_db(tmp.path());
            db.close().unwrap();
        }
        let first = std::fs::read_to_string(tmp.path().join("IDENTITY")).unwrap();
        {
            let db = open_db(tmp.path());
            db.close().unwrap();
        }
        let second = std::fs::read_to_string(tmp.path().join("IDENTITY")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_open_for_read_only() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let db = open_db(tmp.path());
            put(&db, b"flushed", b"table-data");
            db.flush(&FlushOptions::default()).unwrap();
            put(&db, b"unflushed", b"wal-data");
            db.close().unwrap();
        }

        let ro = Db::open_for_read_only(tmp.path(), test_options(), false).unwrap();
        assert_eq!(get(&ro, b"flushed"), Some(b"table-data".to_vec()));

        // Writes are rejected.
        assert!(matches!(
            ro.put(&WriteOptions::default(), b"k", b"v").unwrap_err(),
            DbError::InvalidArgument(_)
        ));
        assert!(matches!(
            ro.flush(&FlushOptions::default()).unwrap_err(),
            DbError::InvalidArgument(_)
        ));

        // A read-only open may coexist with a writer: it takes no lock.
        let rw = open_db(tmp.path());
        assert_eq!(get(&rw, b"flushed"), Some(b"table-data".to_vec()));
        rw.close().unwrap();
        ro.close().unwrap();
    }

    #[test]
    fn test_read_only_replays_wal_unless_told_otherwise() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let db = open_db(tmp.path());
            put(&db, b"in-wal", b"only");
            drop(db); // crash: data only in the WAL
        }

        let ro = Db::open_for_read_only(tmp.path(), test_options(), false).unwrap();
        assert_eq!(get(&ro, b"in-wal"), Some(b"only".to_vec()));
        ro.close().unwrap();

        let err = Db::open_for_read_only(tmp.path(), test_options(), true).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }

    #[test]
    fn test_open_read_only_missing_db_fails() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let err =
            Db::open_for_read_only(tmp.path().join("absent"), test_options(), false).unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn test_iterator_usable_in_read_only_mode() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let db = open_db(tmp.path());
            put(&db, b"a", b"1");
            put(&db, b"b", b"2");
            db.flush(&FlushOptions::default()).unwrap();
            db.close().unwrap();
        }

        let ro = Db::open_for_read_only(tmp.path(), test_options(), false).unwrap();
        let mut iter = ro.new_iterator(&ReadOptions::default()).unwrap();
        iter.seek_to_first();
        assert_eq!(iter.key(), b"a");
        iter.next();
        assert_eq!(iter.key(), b"b");
        iter.next();
        assert!(!iter.valid());
        ro.close().unwrap();
    }
}
