//! Block log persistence
//!
//! The log is an append-only file of newline-delimited JSON
//! [`BlockRecord`]s. It is the only durable state: balances and the chain
//! tip are rebuilt by replaying it from the first line.

use crate::blockchain::{Block, BlockRecord};
use crate::error::{ChainError, Result};
use crate::genesis;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Abstraction for block log backends.
pub trait BlockStore: Send {
    /// Returns every intact record in append order.
    fn load(&mut self) -> Result<Vec<BlockRecord>>;
    /// Appends one record. On error the record must not be considered stored.
    fn append(&mut self, record: &BlockRecord) -> Result<()>;
    /// Point-in-time view of the records appended so far. Reading it does
    /// not borrow the store, and later appends are not visible through it.
    fn snapshot(&self) -> Result<Box<dyn BlockSnapshot>>;
    fn close(&mut self) -> Result<()>;
}

/// Read side of a [`BlockStore`], detached from the writer.
pub trait BlockSnapshot: Send {
    /// Every block in the view with `number >= from`, in log order.
    fn blocks_from(&self, from: u64) -> Result<Vec<Block>>;
}

fn filter_from(records: impl IntoIterator<Item = BlockRecord>, from: u64) -> Vec<Block> {
    records
        .into_iter()
        .map(|record| record.block)
        .filter(|block| block.header.number >= from)
        .collect()
}

pub fn database_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("database")
}

pub fn genesis_path(data_dir: &Path) -> PathBuf {
    database_dir(data_dir).join("genesis.json")
}

pub fn blocks_db_path(data_dir: &Path) -> PathBuf {
    database_dir(data_dir).join("block.db")
}

/// Creates `<data_dir>/database/` with the default genesis file and an
/// empty block log, unless a genesis file already exists.
pub fn init_data_dir(data_dir: &Path) -> Result<()> {
    if genesis_path(data_dir).exists() {
        return Ok(());
    }

    fs::create_dir_all(database_dir(data_dir))?;
    genesis::write_default(&genesis_path(data_dir))?;

    let blocks = blocks_db_path(data_dir);
    if !blocks.exists() {
        File::create(blocks)?;
    }
    Ok(())
}

/// Result of scanning a log.
struct ParsedLog {
    records: Vec<BlockRecord>,
    /// Byte length of the intact prefix.
    intact_len: usize,
    /// The intact prefix ends in a record without its trailing newline.
    missing_newline: bool,
}

/// Parses log bytes. The first empty or undecodable line ends the data;
/// if anything other than whitespace follows it, the log is corrupt.
fn parse_log(content: &[u8]) -> Result<ParsedLog> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    for (index, line) in content.split_inclusive(|b| *b == b'\n').enumerate() {
        let body = trim_line(line);
        let decoded = if body.is_empty() {
            Err("empty line".to_string())
        } else {
            serde_json::from_slice::<BlockRecord>(body).map_err(|e| e.to_string())
        };

        match decoded {
            Ok(record) => {
                records.push(record);
                offset += line.len();
            }
            Err(reason) => {
                let rest = &content[offset + line.len()..];
                if rest.iter().any(|b| !b.is_ascii_whitespace()) {
                    return Err(ChainError::LogCorrupt {
                        line: index + 1,
                        reason,
                    });
                }
                break;
            }
        }
    }

    let missing_newline = offset > 0 && content[offset - 1] != b'\n';
    Ok(ParsedLog {
        records,
        intact_len: offset,
        missing_newline,
    })
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn encode_record(record: &BlockRecord) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

/// File-backed block log, opened for read and append.
pub struct FileBlockStore {
    path: PathBuf,
    file: Option<File>,
}

impl FileBlockStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| ChainError::IoError(format!("Failed to open block log {:?}: {}", path, e)))?;
        Ok(FileBlockStore {
            path,
            file: Some(file),
        })
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| ChainError::IoError("Block log is closed".to_string()))
    }
}

impl BlockStore for FileBlockStore {
    fn load(&mut self) -> Result<Vec<BlockRecord>> {
        let content = fs::read(&self.path)?;
        let parsed = parse_log(&content)?;

        if parsed.intact_len < content.len() {
            warn!(
                "Discarding {} trailing bytes of partial write in {:?}",
                content.len() - parsed.intact_len,
                self.path
            );
            self.file()?.set_len(parsed.intact_len as u64)?;
        }
        if parsed.missing_newline {
            let file = self.file()?;
            file.write_all(b"\n")?;
            file.sync_data()?;
        }

        Ok(parsed.records)
    }

    fn append(&mut self, record: &BlockRecord) -> Result<()> {
        let line = encode_record(record)?;
        let file = self.file()?;
        let previous_len = file.metadata()?.len();

        let written = file.write_all(&line).and_then(|_| file.sync_data());
        if let Err(e) = written {
            // Cut back to the last complete line so later appends stay aligned.
            if let Err(truncate_err) = file.set_len(previous_len) {
                warn!("Failed to roll back partial append: {}", truncate_err);
            }
            return Err(ChainError::IoError(format!("Failed to append block: {}", e)));
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Box<dyn BlockSnapshot>> {
        let len = match &self.file {
            Some(file) => file.metadata()?.len(),
            None => fs::metadata(&self.path)?.len(),
        };
        Ok(Box::new(FileSnapshot {
            path: self.path.clone(),
            len,
        }))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// The first `len` bytes of a block log file. Appends only ever add whole
/// lines past `len`, so the prefix stays a complete log.
struct FileSnapshot {
    path: PathBuf,
    len: u64,
}

impl BlockSnapshot for FileSnapshot {
    fn blocks_from(&self, from: u64) -> Result<Vec<Block>> {
        let mut content = Vec::new();
        File::open(&self.path)?
            .take(self.len)
            .read_to_end(&mut content)?;
        Ok(filter_from(parse_log(&content)?.records, from))
    }
}

/// In-memory block log for tests and ephemeral runs. Clones share storage.
#[derive(Clone, Default)]
pub struct InMemoryBlockStore {
    records: Arc<Mutex<Vec<BlockRecord>>>,
    fail_appends: Arc<AtomicBool>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<BlockRecord>) -> Self {
        InMemoryBlockStore {
            records: Arc::new(Mutex::new(records)),
            fail_appends: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn records(&self) -> Vec<BlockRecord> {
        self.records.lock().clone()
    }

    /// Makes every subsequent append fail with an IO error.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl BlockStore for InMemoryBlockStore {
    fn load(&mut self) -> Result<Vec<BlockRecord>> {
        Ok(self.records())
    }

    fn append(&mut self, record: &BlockRecord) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(ChainError::IoError("Injected append failure".to_string()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn snapshot(&self) -> Result<Box<dyn BlockSnapshot>> {
        Ok(Box::new(MemorySnapshot {
            records: self.records.clone(),
            len: self.records.lock().len(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemorySnapshot {
    records: Arc<Mutex<Vec<BlockRecord>>>,
    len: usize,
}

impl BlockSnapshot for MemorySnapshot {
    fn blocks_from(&self, from: u64) -> Result<Vec<Block>> {
        let records = self.records.lock();
        let end = self.len.min(records.len());
        Ok(filter_from(records[..end].iter().cloned(), from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Hash;
    use crate::transaction::{Account, Tx};
    use tempfile::TempDir;

    fn record(number: u64) -> BlockRecord {
        BlockRecord::new(Block::new(
            Hash::ZERO,
            number,
            1_700_000_000 + number,
            Account::from("jrhodes"),
            0,
            vec![Tx::with_time("jrhodes", "meads", number, "", 1)],
        ))
    }

    fn write_lines(path: &Path, records: &[BlockRecord]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for r in records {
            bytes.extend(encode_record(r).unwrap());
        }
        fs::write(path, &bytes).unwrap();
        bytes
    }

    #[test]
    fn test_append_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.db");

        let mut store = FileBlockStore::open(&path).unwrap();
        store.append(&record(0)).unwrap();
        store.append(&record(1)).unwrap();
        store.close().unwrap();

        let mut reopened = FileBlockStore::open(&path).unwrap();
        let records = reopened.load().unwrap();
        assert_eq!(records, vec![record(0), record(1)]);
    }

    #[test]
    fn test_trailing_partial_write_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.db");
        let mut bytes = write_lines(&path, &[record(0)]);
        let intact = bytes.len();
        bytes.extend_from_slice(b"{\"hash\":\"00");
        fs::write(&path, &bytes).unwrap();

        let mut store = FileBlockStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), vec![record(0)]);
        assert_eq!(fs::metadata(&path).unwrap().len() as usize, intact);

        store.append(&record(1)).unwrap();
        let mut reopened = FileBlockStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![record(0), record(1)]);
    }

    #[test]
    fn test_trailing_empty_lines_end_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.db");
        let mut bytes = write_lines(&path, &[record(0)]);
        bytes.extend_from_slice(b"\n\n");
        fs::write(&path, &bytes).unwrap();

        let mut store = FileBlockStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), vec![record(0)]);
    }

    #[test]
    fn test_corrupt_record_before_valid_data_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.db");
        let mut bytes = b"not json\n".to_vec();
        bytes.extend(encode_record(&record(0)).unwrap());
        fs::write(&path, &bytes).unwrap();

        let mut store = FileBlockStore::open(&path).unwrap();
        match store.load() {
            Err(ChainError::LogCorrupt { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected LogCorrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_last_record_without_newline_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.db");
        let mut bytes = write_lines(&path, &[record(0)]);
        bytes.pop();
        fs::write(&path, &bytes).unwrap();

        let mut store = FileBlockStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), vec![record(0)]);
        store.append(&record(1)).unwrap();

        let mut reopened = FileBlockStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![record(0), record(1)]);
    }

    fn numbers(blocks: Vec<Block>) -> Vec<u64> {
        blocks.iter().map(|b| b.header.number).collect()
    }

    #[test]
    fn test_snapshot_filters_by_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.db");
        write_lines(&path, &[record(0), record(1), record(2)]);

        let store = FileBlockStore::open(&path).unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(numbers(snapshot.blocks_from(1).unwrap()), vec![1, 2]);
        assert!(snapshot.blocks_from(3).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_ignores_later_appends() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBlockStore::open(dir.path().join("block.db")).unwrap();
        store.append(&record(0)).unwrap();

        let snapshot = store.snapshot().unwrap();
        store.append(&record(1)).unwrap();
        assert_eq!(numbers(snapshot.blocks_from(0).unwrap()), vec![0]);
        assert_eq!(numbers(store.snapshot().unwrap().blocks_from(0).unwrap()), vec![0, 1]);

        let mut memory = InMemoryBlockStore::new();
        memory.append(&record(0)).unwrap();
        let snapshot = memory.snapshot().unwrap();
        memory.append(&record(1)).unwrap();
        assert_eq!(numbers(snapshot.blocks_from(0).unwrap()), vec![0]);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_appends() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBlockStore::open(dir.path().join("block.db")).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.append(&record(0)).is_err());
    }

    #[test]
    fn test_init_data_dir_writes_genesis_and_log() {
        let dir = TempDir::new().unwrap();
        init_data_dir(dir.path()).unwrap();

        assert!(genesis_path(dir.path()).exists());
        assert_eq!(fs::metadata(blocks_db_path(dir.path())).unwrap().len(), 0);

        let genesis = genesis::load(&genesis_path(dir.path())).unwrap();
        assert_eq!(genesis.balances[&Account::from("jrhodes")], 1_000_000);
    }

    #[test]
    fn test_in_memory_failed_append_stores_nothing() {
        let mut store = InMemoryBlockStore::new();
        store.set_fail_appends(true);
        assert!(store.append(&record(0)).is_err());
        assert!(store.records().is_empty());
    }
}
