#[cfg(test)]
mod tests {
    use crate::keys::{ValueType, make_internal_key};
    use crate::manifest::{
        FileMetaData, ManifestError, TAG_SAFE_IGNORE_MASK, VersionEdit,
    };

    fn sample_file(number: u64) -> FileMetaData {
        FileMetaData {
            file_number: number,
            file_size: 4096,
            smallest: make_internal_key(b"aaa", 1, ValueType::Value as u8),
            largest: make_internal_key(b"zzz", 99, ValueType::Value as u8),
            smallest_seqno: 1,
            largest_seqno: 99,
        }
    }

    #[test]
    fn test_empty_edit_round_trip() {
        let edit = VersionEdit::default();
        assert!(edit.encode().is_empty());
        assert_eq!(VersionEdit::decode(&edit.encode()).unwrap(), edit);
    }

    #[test]
    fn test_full_edit_round_trip() {
        let edit = VersionEdit {
            comparator: Some("leveldb.BytewiseComparator".to_string()),
            log_number: Some(12),
            prev_log_number: Some(0),
            next_file_number: Some(44),
            last_sequence: Some(100_000),
            max_column_family: Some(5),
            compact_pointers: vec![(2, make_internal_key(b"cursor", 7, 1))],
            deleted_files: vec![(1, 9), (2, 10)],
            new_files: vec![(0, sample_file(43))],
            column_family: Some(3),
            column_family_add: None,
            column_family_drop: false,
            atomic_group_remaining: None,
            unknown_tags: Vec::new(),
        };
        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);
    }

    #[test]
    fn test_column_family_lifecycle_edits() {
        let add = VersionEdit {
            column_family: Some(4),
            column_family_add: Some("indexes".to_string()),
            ..VersionEdit::default()
        };
        assert_eq!(VersionEdit::decode(&add.encode()).unwrap(), add);

        let drop = VersionEdit {
            column_family: Some(4),
            column_family_drop: true,
            ..VersionEdit::default()
        };
        assert_eq!(VersionEdit::decode(&drop.encode()).unwrap(), drop);
    }

    #[test]
    fn test_atomic_group_field_round_trip() {
        for remaining in [0u32, 1, 7] {
            let edit = VersionEdit {
                last_sequence: Some(5),
                atomic_group_remaining: Some(remaining),
                ..VersionEdit::default()
            };
            assert_eq!(VersionEdit::decode(&edit.encode()).unwrap(), edit);
        }
    }

    #[test]
    fn test_safe_ignore_unknown_tags_preserved_bit_exact() {
        // An edit carrying two future tags: decode must keep them (in
        // order) and re-encode must reproduce identical bytes.
        let edit = VersionEdit {
            comparator: Some("leveldb.BytewiseComparator".to_string()),
            log_number: Some(1),
            next_file_number: Some(2),
            last_sequence: Some(0),
            unknown_tags: vec![
                (TAG_SAFE_IGNORE_MASK | 99, b"future-metadata".to_vec()),
                (TAG_SAFE_IGNORE_MASK | 310, vec![0x00, 0xff, 0x80]),
            ],
            ..VersionEdit::default()
        };

        let bytes = edit.encode();
        let decoded = VersionEdit::decode(&bytes).unwrap();
        assert_eq!(decoded, edit);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_unknown_tag_without_safe_bit_is_fatal() {
        let mut bytes = Vec::new();
        // Tag 50 is unused and has no safe-ignore bit.
        crate::encoding::put_varint32(&mut bytes, 50);
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"payload");

        assert!(matches!(
            VersionEdit::decode(&bytes).unwrap_err(),
            ManifestError::Corruption(_)
        ));
    }

    #[test]
    fn test_new_file4_unknown_custom_field_skipped() {
        // Hand-encode a NewFile4 with an unknown (but ignorable) custom
        // field before the terminator.
        let mut bytes = Vec::new();
        crate::encoding::put_varint32(&mut bytes, 103);
        crate::encoding::put_varint32(&mut bytes, 0); // level
        crate::encoding::put_varint64(&mut bytes, 77); // file number
        crate::encoding::put_varint64(&mut bytes, 1000); // size
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"smallestkey1");
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"largestkey99");
        crate::encoding::put_varint64(&mut bytes, 3);
        crate::encoding::put_varint64(&mut bytes, 9);
        crate::encoding::put_varint32(&mut bytes, 33); // ignorable custom tag
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"custom");
        crate::encoding::put_varint32(&mut bytes, 1); // terminate

        let edit = VersionEdit::decode(&bytes).unwrap();
        assert_eq!(edit.new_files.len(), 1);
        assert_eq!(edit.new_files[0].1.file_number, 77);
        assert_eq!(edit.new_files[0].1.smallest_seqno, 3);
    }

    #[test]
    fn test_new_file4_non_ignorable_custom_field_fatal() {
        let mut bytes = Vec::new();
        crate::encoding::put_varint32(&mut bytes, 103);
        crate::encoding::put_varint32(&mut bytes, 0);
        crate::encoding::put_varint64(&mut bytes, 77);
        crate::encoding::put_varint64(&mut bytes, 1000);
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"a");
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"b");
        crate::encoding::put_varint64(&mut bytes, 3);
        crate::encoding::put_varint64(&mut bytes, 9);
        // Bit 6 set: must not be ignored.
        crate::encoding::put_varint32(&mut bytes, 0x40 | 2);
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"x");
        crate::encoding::put_varint32(&mut bytes, 1);

        assert!(VersionEdit::decode(&bytes).is_err());
    }

    #[test]
    fn test_legacy_new_file_tags_decode() {
        // NewFile (tag 7): no sequence numbers.
        let mut bytes = Vec::new();
        crate::encoding::put_varint32(&mut bytes, 7);
        crate::encoding::put_varint32(&mut bytes, 1);
        crate::encoding::put_varint64(&mut bytes, 5);
        crate::encoding::put_varint64(&mut bytes, 2048);
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"small");
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"large");

        let edit = VersionEdit::decode(&bytes).unwrap();
        assert_eq!(edit.new_files[0].0, 1);
        assert_eq!(edit.new_files[0].1.file_number, 5);
        assert_eq!(edit.new_files[0].1.largest_seqno, 0);

        // NewFile2 (tag 100): with sequence numbers.
        let mut bytes = Vec::new();
        crate::encoding::put_varint32(&mut bytes, 100);
        crate::encoding::put_varint32(&mut bytes, 2);
        crate::encoding::put_varint64(&mut bytes, 6);
        crate::encoding::put_varint64(&mut bytes, 4096);
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"small");
        crate::encoding::put_length_prefixed_slice(&mut bytes, b"large");
        crate::encoding::put_varint64(&mut bytes, 11);
        crate::encoding::put_varint64(&mut bytes, 22);

        let edit = VersionEdit::decode(&bytes).unwrap();
        assert_eq!(edit.new_files[0].1.smallest_seqno, 11);
        assert_eq!(edit.new_files[0].1.largest_seqno, 22);
    }

    #[test]
    fn test_truncated_edit_fails() {
        let edit = VersionEdit {
            new_files: vec![(0, sample_file(1))],
            ..VersionEdit::default()
        };
        let bytes = edit.encode();
        assert!(VersionEdit::decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
