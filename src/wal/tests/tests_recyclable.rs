#[cfg(test)]
mod tests {
    use crate::wal::{
        BLOCK_SIZE, LogReader, LogWriter, RECYCLABLE_HEADER_SIZE, RecoveryMode, WalError,
    };

    fn write_recyclable(log_number: u32, records: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = LogWriter::new_recyclable(&mut buf, log_number);
        for record in records {
            writer.add_record(record).unwrap();
        }
        buf
    }

    #[test]
    fn test_recyclable_round_trip() {
        let bytes = write_recyclable(42, &[b"alpha", b"beta", b"gamma"]);
        let mut reader =
            LogReader::new(bytes.as_slice(), RecoveryMode::TolerateCorruptedTail, Some(42));
        assert_eq!(reader.read_record().unwrap().unwrap(), b"alpha");
        assert_eq!(reader.read_record().unwrap().unwrap(), b"beta");
        assert_eq!(reader.read_record().unwrap().unwrap(), b"gamma");
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_recyclable_header_layout() {
        let bytes = write_recyclable(0x0102_0304, &[b"xyz"]);
        // checksum(4) ‖ length(2) ‖ type(1) ‖ log_number(4) ‖ payload.
        assert_eq!(bytes.len(), RECYCLABLE_HEADER_SIZE + 3);
        assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), 3);
        assert_eq!(bytes[6], 5); // RecyclableFullType
        assert_eq!(
            u32::from_le_bytes(bytes[7..11].try_into().unwrap()),
            0x0102_0304
        );
        assert_eq!(&bytes[11..], b"xyz");
    }

    #[test]
    fn test_recyclable_spanning_blocks() {
        let big = vec![0xcdu8; 3 * BLOCK_SIZE];
        let bytes = write_recyclable(7, &[&big, b"after"]);
        let mut reader =
            LogReader::new(bytes.as_slice(), RecoveryMode::TolerateCorruptedTail, Some(7));
        assert_eq!(reader.read_record().unwrap().unwrap(), big);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"after");
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_old_log_number_ends_replay_tolerantly() {
        // A recycled file: new records for log 10, then leftovers from
        // log 9 beyond them.  Replay must stop cleanly at the leftovers.
        let mut bytes = write_recyclable(10, &[b"new-one", b"new-two"]);
        let old = write_recyclable(9, &[b"stale-record"]);
        bytes.extend_from_slice(&old);

        let mut reader =
            LogReader::new(bytes.as_slice(), RecoveryMode::TolerateCorruptedTail, Some(10));
        assert_eq!(reader.read_record().unwrap().unwrap(), b"new-one");
        assert_eq!(reader.read_record().unwrap().unwrap(), b"new-two");
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_old_log_number_is_fatal_in_strict_mode() {
        let mut bytes = write_recyclable(10, &[b"new-one"]);
        bytes.extend_from_slice(&write_recyclable(9, &[b"stale"]));

        let mut reader = LogReader::new(bytes.as_slice(), RecoveryMode::Strict, Some(10));
        assert_eq!(reader.read_record().unwrap().unwrap(), b"new-one");
        assert!(matches!(
            reader.read_record(),
            Err(WalError::Corruption { .. })
        ));
    }

    #[test]
    fn test_log_number_not_checked_when_unset() {
        let bytes = write_recyclable(33, &[b"whatever"]);
        let mut reader =
            LogReader::new(bytes.as_slice(), RecoveryMode::TolerateCorruptedTail, None);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"whatever");
    }

    #[test]
    fn test_checksum_covers_log_number() {
        let mut bytes = write_recyclable(5, &[b"payload"]);
        // Tamper with the log-number field only: checksum must catch it,
        // so this reads as corruption, not as a clean old record.
        bytes[7] ^= 0x01;
        let mut reader = LogReader::new(bytes.as_slice(), RecoveryMode::Strict, Some(5));
        assert!(matches!(
            reader.read_record(),
            Err(WalError::Corruption { .. })
        ));
    }

    #[test]
    fn test_mixed_framing_in_one_log() {
        // Legacy and recyclable fragments may coexist; the reader
        // dispatches on each fragment's type byte.
        let mut buf = Vec::new();
        {
            let mut legacy = LogWriter::new(&mut buf);
            legacy.add_record(b"legacy-record").unwrap();
        }
        let start = buf.len();
        {
            let mut recyclable = LogWriter::new_recyclable(&mut buf, 3);
            // Keep block accounting consistent with the bytes already
            // written: the test stays within block zero.
            assert!(start + RECYCLABLE_HEADER_SIZE < BLOCK_SIZE);
            recyclable.add_record(b"recyclable-record").unwrap();
        }

        let mut reader =
            LogReader::new(buf.as_slice(), RecoveryMode::TolerateCorruptedTail, Some(3));
        assert_eq!(reader.read_record().unwrap().unwrap(), b"legacy-record");
        assert_eq!(reader.read_record().unwrap().unwrap(), b"recyclable-record");
    }
}
