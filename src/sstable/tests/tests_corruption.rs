#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::sstable::tests::helpers::{build_table, init_tracing, put};
    use crate::sstable::{Table, TableError, TableOptions, reader::TableReadOptions};

    fn build_sample(tmp: &TempDir, name: &str, options: TableOptions) -> std::path::PathBuf {
        let path = tmp.path().join(name);
        let entries: Vec<_> = (0..200u32)
            .map(|i| put(format!("key-{i:05}").as_bytes(), 50, b"some-value-payload"))
            .collect();
        build_table(&path, options, &entries);
        path
    }

    #[test]
    fn test_flipped_data_bit_caught_by_verify_checksums() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = build_sample(&tmp, "flip.sst", TableOptions::default());

        // Flip one bit early in the file: inside the first data block.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[40] ^= 0x10;
        std::fs::write(&path, &bytes).unwrap();

        let table = Table::open(&path, TableReadOptions { verify_checksums: true }).unwrap();
        let mut iter = table.iter();
        iter.seek_to_first();
        // The first data block read must surface the mismatch.
        assert!(!iter.valid());
        assert!(matches!(iter.take_status(), Err(TableError::Checksum(_))));
    }

    #[test]
    fn test_truncated_file_rejected_at_open() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = build_sample(&tmp, "trunc.sst", TableOptions::default());

        let bytes = std::fs::read(&path).unwrap();
        // Drop the footer's final bytes.
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();
        assert!(Table::open(&path, TableReadOptions::default()).is_err());

        // A nearly-empty file is rejected cleanly too.
        std::fs::write(&path, b"tiny").unwrap();
        assert!(matches!(
            Table::open(&path, TableReadOptions::default()).unwrap_err(),
            TableError::Corruption(_)
        ));
    }

    #[test]
    fn test_zeroed_magic_rejected() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = build_sample(&tmp, "magic.sst", TableOptions::default());

        let mut bytes = std::fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 8..].fill(0);
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            Table::open(&path, TableReadOptions::default()).unwrap_err(),
            TableError::Corruption(_)
        ));
    }

    #[test]
    fn test_v6_footer_corruption_rejected_at_open() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let options = TableOptions {
            format_version: 6,
            base_context_checksum: 0x0bad_cafe,
            ..TableOptions::default()
        };
        let path = build_sample(&tmp, "v6.sst", options);

        // Corrupt the metaindex_size field: the footer checksum covers it.
        let mut bytes = std::fs::read(&path).unwrap();
        let footer_start = bytes.len() - 53;
        bytes[footer_start + 13] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        assert!(Table::open(&path, TableReadOptions::default()).is_err());
    }

    #[test]
    fn test_unverified_read_still_decodes_clean_file() {
        // verify_checksums=false must not change results on a good file.
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = build_sample(&tmp, "clean.sst", TableOptions::default());

        let table = Table::open(&path, TableReadOptions { verify_checksums: false }).unwrap();
        let mut iter = table.iter();
        iter.seek_to_first();
        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        iter.take_status().unwrap();
        assert_eq!(count, table.properties.num_entries);
    }
}
