#[cfg(test)]
mod tests {
    use crate::wal::{BLOCK_SIZE, LogReader, LogWriter, RecoveryMode, WalError};

    fn write_records(records: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = LogWriter::new(&mut buf);
        for record in records {
            writer.add_record(record).unwrap();
        }
        buf
    }

    fn read_tolerant(bytes: &[u8]) -> (Vec<Vec<u8>>, Result<(), WalError>) {
        let mut reader = LogReader::new(bytes, RecoveryMode::TolerateCorruptedTail, None);
        let mut out = Vec::new();
        loop {
            match reader.read_record() {
                Ok(Some(record)) => out.push(record),
                Ok(None) => return (out, Ok(())),
                Err(e) => return (out, Err(e)),
            }
        }
    }

    #[test]
    fn test_stop_after_corruption_returns_prefix() {
        // Three records; flip a payload bit in the second.  The reader
        // must return exactly the first record and then a clean EOF.
        let mut bytes = write_records(&[b"record-one", b"record-two", b"record-three"]);
        let second_payload_at = 7 + 10 + 7 + 2; // header+rec1, header, 2 bytes in
        bytes[second_payload_at] ^= 0x01;

        let (records, status) = read_tolerant(&bytes);
        assert_eq!(records, vec![b"record-one".to_vec()]);
        status.unwrap();
    }

    #[test]
    fn test_corruption_before_any_record_is_an_error() {
        let mut bytes = write_records(&[b"only-record"]);
        bytes[8] ^= 0xff; // inside the first record's payload

        let (records, status) = read_tolerant(&bytes);
        assert!(records.is_empty());
        assert!(matches!(status, Err(WalError::Corruption { .. })));
    }

    #[test]
    fn test_strict_mode_surfaces_corruption() {
        let mut bytes = write_records(&[b"one", b"two"]);
        // Corrupt the second record's checksum field.
        let second_header = 7 + 3;
        bytes[second_header] ^= 0x01;

        let mut reader = LogReader::new(bytes.as_slice(), RecoveryMode::Strict, None);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"one");
        assert!(matches!(
            reader.read_record(),
            Err(WalError::Corruption { .. })
        ));
    }

    #[test]
    fn test_corrupt_large_record_drops_everything_after() {
        // Mirrors the recovery oracle: k01 readable, the 40 KiB k02
        // payload corrupted, k03 intact on disk but unreachable.
        let blob = vec![0x5au8; 40 * 1024];
        let mut bytes = write_records(&[b"k01", &blob, b"k03"]);

        // Flip one bit inside the blob's first fragment payload.
        bytes[7 + 3 + 7 + 1000] ^= 0x10;

        let (records, status) = read_tolerant(&bytes);
        assert_eq!(records, vec![b"k01".to_vec()]);
        status.unwrap();
    }

    #[test]
    fn test_truncated_tail_is_eof_not_error() {
        let bytes = write_records(&[b"keep-me", b"truncated-record-payload"]);
        // Cut the file mid-way through the second record's payload.
        let cut = 7 + 7 + 7 + 5;
        let (records, status) = read_tolerant(&bytes[..cut]);
        assert_eq!(records, vec![b"keep-me".to_vec()]);
        status.unwrap();
    }

    #[test]
    fn test_truncated_header_is_eof() {
        let bytes = write_records(&[b"keep-me", b"lost"]);
        // Cut inside the second record's header.
        let cut = 7 + 7 + 3;
        let (records, status) = read_tolerant(&bytes[..cut]);
        assert_eq!(records, vec![b"keep-me".to_vec()]);
        status.unwrap();
    }

    #[test]
    fn test_partial_multi_block_record_at_tail_is_eof() {
        // A First fragment without its Last: the record never commits.
        let big = vec![0x11u8; 50 * 1024];
        let bytes = write_records(&[b"committed", &big]);
        // Keep block one only: the Last fragment in block two is gone.
        let (records, status) = read_tolerant(&bytes[..BLOCK_SIZE]);
        assert_eq!(records, vec![b"committed".to_vec()]);
        status.unwrap();
    }

    #[test]
    fn test_unknown_record_type_stops_tolerantly() {
        let mut bytes = write_records(&[b"good", b"bad-type"]);
        bytes[7 + 4 + 6] = 99; // type byte of the second header
        let (records, status) = read_tolerant(&bytes);
        assert_eq!(records, vec![b"good".to_vec()]);
        status.unwrap();
    }

    #[test]
    fn test_fragment_length_past_block_end_rejected() {
        let mut bytes = write_records(&[b"first-record", b"second-record"]);
        // Claim an enormous length in the second header; pad the file to
        // a full block so it cannot be mistaken for a truncated tail.
        let second_header = 7 + 12;
        bytes[second_header + 4] = 0xff;
        bytes[second_header + 5] = 0x7f;
        bytes.resize(BLOCK_SIZE, 0);

        let (records, status) = read_tolerant(&bytes);
        assert_eq!(records, vec![b"first-record".to_vec()]);
        status.unwrap();

        let mut strict = LogReader::new(bytes.as_slice(), RecoveryMode::Strict, None);
        assert_eq!(strict.read_record().unwrap().unwrap(), b"first-record");
        assert!(strict.read_record().is_err());
    }

    #[test]
    fn test_reader_is_done_after_stopping() {
        let mut bytes = write_records(&[b"one", b"two"]);
        bytes[7 + 3 + 8] ^= 0x01;

        let mut reader =
            LogReader::new(bytes.as_slice(), RecoveryMode::TolerateCorruptedTail, None);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"one");
        assert!(reader.read_record().unwrap().is_none());
        // Stays done.
        assert!(reader.read_record().unwrap().is_none());
    }
}
