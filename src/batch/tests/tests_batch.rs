#[cfg(test)]
mod tests {
    use crate::batch::{BATCH_HEADER_SIZE, BatchError, BatchRecord, WriteBatch};

    fn collect(batch: &WriteBatch) -> Vec<BatchRecord<'_>> {
        batch.iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_empty_batch() {
        let batch = WriteBatch::new();
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.sequence(), 0);
        assert!(batch.is_empty());
        assert_eq!(batch.byte_size(), BATCH_HEADER_SIZE);
        batch.verify().unwrap();
    }

    #[test]
    fn test_header_layout() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(0x0102_0304_0506_07);
        batch.put(b"k", b"v");
        batch.put(b"k2", b"v2");

        let bytes = batch.as_bytes();
        // Sequence: first 8 bytes little-endian; count: next 4.
        assert_eq!(
            u64::from_le_bytes(bytes[..8].try_into().unwrap()),
            0x0102_0304_0506_07
        );
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 2);
        // First record: tag Value(1), key len 1, "k", value len 1, "v".
        assert_eq!(&bytes[12..17], &[1, 1, b'k', 1, b'v']);
    }

    #[test]
    fn test_all_record_kinds_round_trip() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(500);
        batch.put(b"a", b"1");
        batch.delete(b"b");
        batch.single_delete(b"c");
        batch.merge(b"d", b"2");

        assert_eq!(batch.count(), 4);
        assert_eq!(batch.end_sequence(), 504);

        let records = collect(&batch);
        assert_eq!(
            records,
            vec![
                BatchRecord::Put { cf_id: 0, key: b"a", value: b"1" },
                BatchRecord::Delete { cf_id: 0, key: b"b" },
                BatchRecord::SingleDelete { cf_id: 0, key: b"c" },
                BatchRecord::Merge { cf_id: 0, key: b"d", value: b"2" },
            ]
        );
    }

    #[test]
    fn test_column_family_records() {
        let mut batch = WriteBatch::new();
        batch.put_cf(3, b"cf-key", b"cf-value");
        batch.delete_cf(300, b"gone");
        batch.merge_cf(7, b"m", b"operand");
        batch.single_delete_cf(3, b"once");
        // cf 0 routes through the default tags.
        batch.put_cf(0, b"plain", b"v");

        let bytes = batch.as_bytes();
        // First record must use the CF value tag (5) then varint cf_id 3.
        assert_eq!(bytes[12], 5);
        assert_eq!(bytes[13], 3);

        let records = collect(&batch);
        assert_eq!(records[0].cf_id(), 3);
        assert_eq!(records[1].cf_id(), 300);
        assert_eq!(records[2].cf_id(), 7);
        assert_eq!(records[3].cf_id(), 3);
        assert_eq!(records[4], BatchRecord::Put { cf_id: 0, key: b"plain", value: b"v" });
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(100);
        batch.put(b"key1", b"value1");
        batch.put(b"key2", b"value2");

        let restored = WriteBatch::from_bytes(batch.as_bytes().to_vec()).unwrap();
        assert_eq!(restored, batch);
        assert_eq!(restored.sequence(), 100);
        assert_eq!(restored.count(), 2);
    }

    #[test]
    fn test_from_bytes_too_small_rejected() {
        assert!(matches!(
            WriteBatch::from_bytes(vec![0; 5]).unwrap_err(),
            BatchError::TooSmall(5)
        ));
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        let mut bytes = batch.as_bytes().to_vec();
        // Claim two records while only one is present.
        bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            WriteBatch::from_bytes(bytes).unwrap_err(),
            BatchError::CountMismatch { header: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut bytes = WriteBatch::new().as_bytes().to_vec();
        bytes.push(9); // not a defined tag
        bytes[8..12].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            WriteBatch::from_bytes(bytes).unwrap_err(),
            BatchError::UnknownTag(9)
        ));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        let bytes = batch.as_bytes();
        let truncated = bytes[..bytes.len() - 2].to_vec();
        assert!(WriteBatch::from_bytes(truncated).is_err());
    }

    #[test]
    fn test_empty_value_distinct_from_delete() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"");
        batch.delete(b"k");

        let records = collect(&batch);
        assert_eq!(records[0], BatchRecord::Put { cf_id: 0, key: b"k", value: b"" });
        assert_eq!(records[1], BatchRecord::Delete { cf_id: 0, key: b"k" });
    }

    #[test]
    fn test_clear_keeps_sequence() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(77);
        batch.put(b"a", b"b");
        batch.clear();
        assert_eq!(batch.sequence(), 77);
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.byte_size(), BATCH_HEADER_SIZE);
    }

    #[test]
    fn test_binary_keys_and_values() {
        let key: Vec<u8> = (0..=255).collect();
        let value = vec![0u8, 0xff, 0x80, 0x7f];
        let mut batch = WriteBatch::new();
        batch.put(&key, &value);

        let records = collect(&batch);
        assert_eq!(records[0], BatchRecord::Put { cf_id: 0, key: &key, value: &value });
    }
}
