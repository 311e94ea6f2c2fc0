use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Event;

/// One WAL entry: every event of one committed transaction.
///
/// The variant is the on-disk schema version. Replay goes through
/// [`Record::into_events`], which is where older layouts get upgraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    V1 { events: Vec<Event> },
}

impl Record {
    pub fn new(events: Vec<Event>) -> Self {
        Record::V1 { events }
    }

    pub fn into_events(self) -> Vec<Event> {
        match self {
            Record::V1 { events } => events,
        }
    }
}

/// Largest bincode payload a frame may carry. Replay stops at a length field above
/// this instead of allocating for it.
pub const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// Encode a single record to [len][bincode][crc32] format.
fn encode_record(writer: &mut impl Write, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// The file operations the log needs beyond `Write`.
pub trait WalFile: Write {
    fn sync(&self) -> io::Result<()>;
    fn size(&self) -> io::Result<u64>;
    fn truncate(&self, len: u64) -> io::Result<()>;
}

impl WalFile for File {
    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Record][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check,
///   which drops the whole transaction it belonged to.
///
/// A frame is encoded in memory and written in one go. If the write or the fsync
/// fails, the file is cut back to its last durable length so a rejected
/// transaction can never be replayed. If even that fails the log refuses further
/// appends.
pub struct Wal<F: WalFile = File> {
    file: F,
    path: PathBuf,
    durable_len: u64,
    poisoned: bool,
    appends_since_compact: u64,
}

impl<F: WalFile> Wal<F> {
    pub fn with_file(file: F, path: PathBuf) -> io::Result<Self> {
        let durable_len = file.size()?;
        Ok(Self {
            file,
            path,
            durable_len,
            poisoned: false,
            appends_since_compact: 0,
        })
    }

    /// Append one record and fsync. On error nothing of the record remains in the file.
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL disabled after a failed rollback"));
        }
        let mut frame = Vec::new();
        encode_record(&mut frame, record)?;

        let written = self.file.write_all(&frame).and_then(|()| self.flush_sync());
        if let Err(e) = written {
            if let Err(cut) = self.file.truncate(self.durable_len) {
                tracing::error!(path = %self.path.display(), "WAL rollback failed, refusing appends: {cut}");
                self.poisoned = true;
            }
            return Err(e);
        }
        self.durable_len += frame.len() as u64;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::with_file(file, path.to_path_buf())
    }

    /// Write compacted records to a temp file and fsync.
    pub fn write_compact_file(path: &Path, records: &[Record]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = file.size()?;
        self.file = file;
        self.poisoned = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replace the WAL with a minimal set of records that recreates the current state.
    pub fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    /// Replay the WAL from disk, returning all valid records.
    /// Truncated/corrupt trailing entries are silently discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Record>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        read_records(BufReader::new(file), path)
    }
}

fn read_records(mut reader: impl Read, path: &Path) -> io::Result<Vec<Record>> {
    let mut records = Vec::new();

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_LEN {
            tracing::warn!(path = %path.display(), len, "WAL entry length out of range, stopping replay");
            break;
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            tracing::warn!(path = %path.display(), "WAL entry failed CRC check, stopping replay");
            break;
        }

        match bincode::deserialize::<Record>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), "undecodable WAL entry, stopping replay: {e}");
                break;
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{User, at, BookingRequest, Recurrence, Span};
    use std::sync::{Arc, Mutex};
    use ulid::Ulid;

    /// In-memory log file that accepts `write_budget` more bytes, then reports a full disk.
    #[derive(Clone, Default)]
    struct FlakyFile {
        disk: Arc<Mutex<FlakyDisk>>,
    }

    #[derive(Default)]
    struct FlakyDisk {
        bytes: Vec<u8>,
        write_budget: Option<usize>,
    }

    impl FlakyFile {
        fn set_budget(&self, budget: Option<usize>) {
            self.disk.lock().unwrap().write_budget = budget;
        }

        fn bytes(&self) -> Vec<u8> {
            self.disk.lock().unwrap().bytes.clone()
        }
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut disk = self.disk.lock().unwrap();
            let n = match disk.write_budget {
                Some(0) => return Err(io::Error::other("no space left on device")),
                Some(budget) => budget.min(buf.len()),
                None => buf.len(),
            };
            disk.bytes.extend_from_slice(&buf[..n]);
            if let Some(budget) = disk.write_budget.as_mut() {
                *budget -= n;
            }
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl WalFile for FlakyFile {
        fn sync(&self) -> io::Result<()> {
            Ok(())
        }

        fn size(&self) -> io::Result<u64> {
            Ok(self.disk.lock().unwrap().bytes.len() as u64)
        }

        fn truncate(&self, len: u64) -> io::Result<()> {
            self.disk.lock().unwrap().bytes.truncate(len as usize);
            Ok(())
        }
    }

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("facilitybook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn user_created(name: &str) -> Event {
        Event::UserCreated(User {
            id: Ulid::new(),
            username: name.into(),
            password_hash: "$2a$10$hash".into(),
            is_admin: false,
        })
    }

    fn request_submitted() -> Event {
        Event::RequestSubmitted(BookingRequest {
            id: Ulid::new(),
            username: "alice".into(),
            name: "Alice".into(),
            unit: "04-12".into(),
            facility: "hall".into(),
            span: Span::new(at("2024-03-04", "08:00"), at("2024-03-04", "10:00")),
            purpose: "birthday".into(),
            recurrence: Recurrence::Weekly { weeks: 4 },
        })
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let records = vec![
            Record::new(vec![user_created("alice")]),
            Record::new(vec![request_submitted(), user_created("bob")]),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, records);
        let events: Vec<Event> = replayed.into_iter().flat_map(Record::into_events).collect();
        assert_eq!(events.len(), 3);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_truncated_transaction() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let record = Record::new(vec![user_created("alice")]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }

        // Simulate a crash halfway through writing a second record
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x40, 0, 0, 0, 1, 2]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![record]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        {
            let payload = bincode::serialize(&Record::new(vec![user_created("eve")])).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let compacted = vec![Record::new(vec![user_created("alice")])];
        let after = Record::new(vec![request_submitted()]);

        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..10 {
                wal.append(&Record::new(vec![user_created("churn")])).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);
            wal.append(&after).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], compacted[0]);
        assert_eq!(replayed[1], after);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_append_leaves_nothing_behind() {
        let file = FlakyFile::default();
        let mut wal = Wal::with_file(file.clone(), PathBuf::from("flaky.wal")).unwrap();

        let first = Record::new(vec![user_created("alice")]);
        wal.append(&first).unwrap();
        let durable = file.bytes();

        // Disk fills up partway through the next frame.
        file.set_budget(Some(10));
        let rejected = Record::new(vec![request_submitted()]);
        assert!(wal.append(&rejected).is_err());
        assert_eq!(file.bytes(), durable);
        assert_eq!(wal.appends_since_compact(), 1);

        file.set_budget(None);
        let next = Record::new(vec![user_created("bob")]);
        wal.append(&next).unwrap();

        let replayed = read_records(&file.bytes()[..], Path::new("flaky.wal")).unwrap();
        assert_eq!(replayed, vec![first, next]);
    }

    #[test]
    fn replay_stops_at_oversized_length() {
        let path = tmp_path("oversized_len.wal");
        let _ = fs::remove_file(&path);

        let record = Record::new(vec![user_created("alice")]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![record]);

        let _ = fs::remove_file(&path);
    }
}
