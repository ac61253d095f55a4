mod tests_batch;
mod tests_wal_interop;
