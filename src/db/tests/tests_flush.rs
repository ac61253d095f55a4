#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::db::tests::helpers::{get, init_tracing, open_db, put, test_options};
    use crate::db::{Db, FlushOptions, Options};
    use crate::filenames::{self, FileKind};

    fn count_files(path: &std::path::Path, want: fn(&FileKind) -> bool) -> usize {
        std::fs::read_dir(path)
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(filenames::parse_file_name))
            .filter(want)
            .count()
    }

    #[test]
    fn test_explicit_flush_writes_a_table() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        assert_eq!(count_files(tmp.path(), |k| matches!(k, FileKind::Table(_))), 0);
        put(&db, b"key", b"value");
        db.flush(&FlushOptions::default()).unwrap();
        assert_eq!(count_files(tmp.path(), |k| matches!(k, FileKind::Table(_))), 1);

        // Data still readable from the table.
        assert_eq!(get(&db, b"key"), Some(b"value".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_flush_of_empty_memtable_is_a_no_op() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());
        db.flush(&FlushOptions::default()).unwrap();
        assert_eq!(count_files(tmp.path(), |k| matches!(k, FileKind::Table(_))), 0);
        db.close().unwrap();
    }

    #[test]
    fn test_write_buffer_overflow_triggers_background_flush() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        // 64 KiB write buffer (helpers): ~100 KiB of writes must spill.
        let db = open_db(tmp.path());

        for i in 0..100u32 {
            put(&db, format!("spill-{i:04}").as_bytes(), &vec![b'x'; 1024]);
        }
        // The background worker owns the flush; close() drains it.
        db.close().unwrap();

        assert!(count_files(tmp.path(), |k| matches!(k, FileKind::Table(_))) >= 1);

        let db = open_db(tmp.path());
        for i in 0..100u32 {
            assert!(get(&db, format!("spill-{i:04}").as_bytes()).is_some(), "spill-{i}");
        }
        db.close().unwrap();
    }

    #[test]
    fn test_repeated_flushes_accumulate_level0_tables() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        for round in 0..3u32 {
            put(&db, format!("round-{round}").as_bytes(), b"v");
            db.flush(&FlushOptions::default()).unwrap();
        }
        assert_eq!(count_files(tmp.path(), |k| matches!(k, FileKind::Table(_))), 3);
        for round in 0..3u32 {
            assert_eq!(get(&db, format!("round-{round}").as_bytes()), Some(b"v".to_vec()));
        }
        db.close().unwrap();
    }

    #[test]
    fn test_newest_level0_table_wins() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        put(&db, b"versioned", b"first");
        db.flush(&FlushOptions::default()).unwrap();
        put(&db, b"versioned", b"second");
        db.flush(&FlushOptions::default()).unwrap();

        assert_eq!(get(&db, b"versioned"), Some(b"second".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_flush_drains_wals() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path());

        for i in 0..50u32 {
            put(&db, format!("drain-{i}").as_bytes(), &vec![b'y'; 256]);
        }
        db.flush(&FlushOptions::default()).unwrap();

        // After a waited flush only the live (fresh) WAL remains.
        assert_eq!(count_files(tmp.path(), |k| matches!(k, FileKind::Log(_))), 1);
        db.close().unwrap();
    }

    #[test]
    fn test_obsolete_manifests_cleaned_up() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        for _ in 0..3 {
            let db = open_db(tmp.path());
            put(&db, b"churn", b"v");
            db.flush(&FlushOptions::default()).unwrap();
            db.close().unwrap();
        }

        // Every open writes a fresh manifest; old ones must be gone.
        assert_eq!(
            count_files(tmp.path(), |k| matches!(k, FileKind::Manifest(_))),
            1
        );
    }

    #[test]
    fn test_table_files_format_version_from_options() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let options = Options {
            format_version: 6,
            ..test_options()
        };
        let db = Db::open(tmp.path(), options).unwrap();
        put(&db, b"v6-key", b"v6-value");
        db.flush(&FlushOptions::default()).unwrap();
        assert_eq!(get(&db, b"v6-key"), Some(b"v6-value".to_vec()));
        db.close().unwrap();

        // The written table ends with the block-based magic.
        let table_path = std::fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .find(|e| {
                matches!(
                    e.file_name().to_str().and_then(filenames::parse_file_name),
                    Some(FileKind::Table(_))
                )
            })
            .unwrap()
            .path();
        let bytes = std::fs::read(table_path).unwrap();
        assert_eq!(
            u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap()),
            0x88e2_41b7_85f4_cff7
        );
    }
}
