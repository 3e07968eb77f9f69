use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Durable event log backing one tenant's engine.
///
/// Each record is framed as `[u32 len][bincode payload][u32 crc32]`, both
/// integers little-endian, `len` counting only the payload. The frame makes
/// a crash mid-write detectable: a short or checksum-failing tail is dropped
/// on replay and everything before it survives.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    pending: u64,
}

fn frame(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let mut buf = Vec::with_capacity(payload.len() + 8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Decode the next record from `reader`. `Ok(None)` means a clean end of
/// log, a truncated frame, or a corrupt one; replay treats all three as
/// the end of usable history.
fn next_event(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut word = [0u8; 4];
    match reader.read_exact(&mut word) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(word) as usize;

    let mut payload = vec![0u8; len];
    if read_fully(reader, &mut payload)?.is_none() {
        return Ok(None);
    }
    if read_fully(reader, &mut word)?.is_none() {
        return Ok(None);
    }

    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: open_for_append(path)?,
            path: path.to_path_buf(),
            pending: 0,
        })
    }

    /// Buffer one record. Nothing is durable until `sync` returns; the
    /// group-commit writer pushes a whole batch and then syncs once.
    pub fn push(&mut self, event: &Event) -> io::Result<()> {
        self.out.write_all(&frame(event)?)?;
        self.pending += 1;
        Ok(())
    }

    /// Flush buffered records and fsync the file.
    pub fn sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records pushed since the last snapshot swap. The compactor uses this
    /// to decide when a rewrite pays off.
    pub fn entries_since_compact(&self) -> u64 {
        self.pending
    }

    /// Phase one of compaction: write the replacement log to a sibling
    /// temp file and fsync it. Pure I/O, safe to run while appends continue.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp = path.with_extension("wal.tmp");
        let mut out = BufWriter::new(File::create(&tmp)?);
        for event in events {
            out.write_all(&frame(event)?)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Phase two: rename the temp file over the live log and reopen. Must
    /// run with appends paused; the rename itself is atomic.
    pub fn swap_in_snapshot(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        self.out = open_for_append(&self.path)?;
        self.pending = 0;
        Ok(())
    }

    /// Read every intact record from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = next_event(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayRange, Span};
    use ulid::Ulid;

    fn wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn write_all(path: &Path, events: &[Event]) {
        let mut wal = Wal::open(path).unwrap();
        for e in events {
            wal.push(e).unwrap();
        }
        wal.sync().unwrap();
    }

    fn haircut() -> Event {
        Event::ServiceCreated {
            id: Ulid::new(),
            name: Some("Haircut".into()),
            duration: 1_800_000,
            buffer_before: 0,
            buffer_after: 600_000,
            home_visit: false,
            max_concurrent: 1,
        }
    }

    #[test]
    fn roundtrip() {
        let path = wal_path("roundtrip.wal");
        let events = vec![
            haircut(),
            Event::BusinessHoursAdded {
                weekday: 0,
                range: DayRange { open_min: 540, close_min: 1020 },
            },
        ];
        write_all(&path, &events);
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn missing_file_is_empty_log() {
        assert!(Wal::replay(&wal_path("never_written.wal")).unwrap().is_empty());
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let path = wal_path("truncated.wal");
        let first = haircut();
        write_all(&path, std::slice::from_ref(&first));

        // Half a frame, as a crash mid-append would leave it
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[7, 0, 0, 0, 0xAA, 0xBB]).unwrap();
        drop(f);

        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
    }

    #[test]
    fn checksum_mismatch_ends_replay() {
        let path = wal_path("bad_crc.wal");
        let payload = bincode::serialize(&Event::ServiceDeleted { id: Ulid::new() }).unwrap();
        let mut f = File::create(&path).unwrap();
        f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
        f.write_all(&payload).unwrap();
        f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        drop(f);

        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn pending_counts_pushes_until_swap() {
        let path = wal_path("pending.wal");
        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..5 {
            wal.push(&haircut()).unwrap();
        }
        assert_eq!(wal.entries_since_compact(), 5);
        wal.sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap().len(), 5);
    }

    #[test]
    fn snapshot_shrinks_log_and_resets_counter() {
        let path = wal_path("snapshot.wal");
        let staff_id = Ulid::new();
        let keep = Event::StaffCreated { id: staff_id, name: Some("Alice".into()) };

        let mut wal = Wal::open(&path).unwrap();
        wal.push(&keep).unwrap();
        for _ in 0..10 {
            let off = Ulid::new();
            wal.push(&Event::TimeOffAdded { id: off, staff_id, span: Span::new(0, 1000) })
                .unwrap();
            wal.push(&Event::TimeOffRemoved { id: off, staff_id }).unwrap();
        }
        wal.sync().unwrap();
        let churned = fs::metadata(&path).unwrap().len();

        Wal::write_snapshot(&path, std::slice::from_ref(&keep)).unwrap();
        wal.swap_in_snapshot().unwrap();

        assert!(fs::metadata(&path).unwrap().len() < churned);
        assert_eq!(wal.entries_since_compact(), 0);
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep.clone()]);

        // The reopened handle keeps appending where the snapshot left off
        let tail = Event::TimeOffAdded {
            id: Ulid::new(),
            staff_id,
            span: Span::new(1000, 2000),
        };
        wal.push(&tail).unwrap();
        wal.sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep, tail]);
    }
}
