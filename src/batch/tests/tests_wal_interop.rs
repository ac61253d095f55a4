#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::batch::{BatchRecord, WriteBatch};
    use crate::wal::{LogReader, LogWriter, RecoveryMode};

    #[test]
    fn test_batch_through_log_file_round_trip() {
        // One batch with two puts, framed into a fresh .log file, must
        // come back as exactly one record carrying sequence 100 and
        // both puts in order.
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("000005.log");

        let mut batch = WriteBatch::new();
        batch.set_sequence(100);
        batch.put(b"key1", b"value1");
        batch.put(b"key2", b"value2");

        {
            let file = std::fs::File::create(&log_path).unwrap();
            let mut writer = LogWriter::new(file);
            writer.add_record(batch.as_bytes()).unwrap();
            writer.flush().unwrap();
            writer.get_ref().sync_all().unwrap();
        }

        let file = std::fs::File::open(&log_path).unwrap();
        let mut reader = LogReader::new(file, RecoveryMode::Strict, None);

        let record = reader.read_record().unwrap().expect("one record");
        assert!(reader.read_record().unwrap().is_none(), "exactly one record");

        let decoded = WriteBatch::from_bytes(record).unwrap();
        assert_eq!(decoded.sequence(), 100);
        assert_eq!(decoded.count(), 2);

        let records: Vec<_> = decoded.iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            records,
            vec![
                BatchRecord::Put { cf_id: 0, key: b"key1", value: b"value1" },
                BatchRecord::Put { cf_id: 0, key: b"key2", value: b"value2" },
            ]
        );
    }

    #[test]
    fn test_multiple_batches_preserve_order_and_bytes() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("000006.log");

        let mut originals = Vec::new();
        for i in 0..10u64 {
            let mut batch = WriteBatch::new();
            batch.set_sequence(i * 10);
            batch.put(format!("key-{i}").as_bytes(), format!("value-{i}").as_bytes());
            if i % 3 == 0 {
                batch.delete(b"stale");
            }
            originals.push(batch);
        }

        {
            let file = std::fs::File::create(&log_path).unwrap();
            let mut writer = LogWriter::new(file);
            for batch in &originals {
                writer.add_record(batch.as_bytes()).unwrap();
            }
            writer.flush().unwrap();
        }

        let file = std::fs::File::open(&log_path).unwrap();
        let mut reader = LogReader::new(file, RecoveryMode::Strict, None);
        for original in &originals {
            let record = reader.read_record().unwrap().expect("record");
            assert_eq!(&record, original.as_bytes(), "bytes must round-trip exactly");
        }
        assert!(reader.read_record().unwrap().is_none());
    }
}
