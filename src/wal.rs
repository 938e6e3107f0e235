use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
/// Returns the frame's size in bytes.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only log of committed transitions for the slot and booking stores.
///
/// A crash can leave a torn last frame; replay stops at the first frame that is
/// short or fails its CRC and everything before it is kept. `open` cuts such a
/// tail off so later appends stay readable.
///
/// The file never holds more than `durable_len` bytes of acknowledged frames.
/// A failed flush is undone with `rollback`; if that fails too the log refuses
/// further appends until the next compaction rewrites it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    durable_len: u64,
    unflushed_bytes: u64,
    unflushed_frames: u64,
    appends_since_compact: u64,
    poisoned: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, intact) = Self::scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > intact {
            tracing::warn!(path = %path.display(), intact, "wal: truncating torn tail");
            file.set_len(intact)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len: intact,
            unflushed_bytes: 0,
            unflushed_frames: 0,
            appends_since_compact: 0,
            poisoned: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one frame. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        self.unflushed_bytes += write_frame(&mut self.writer, event)?;
        self.unflushed_frames += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.unflushed_bytes;
        self.appends_since_compact += self.unflushed_frames;
        self.unflushed_bytes = 0;
        self.unflushed_frames = 0;
        Ok(())
    }

    /// Throw away everything since the last successful `flush_sync`: frames
    /// still in the buffer and any bytes that reached the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        let result = self.truncate_to_durable();
        self.poisoned = result.is_err();
        result
    }

    fn truncate_to_durable(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it on drop.
        let _ = stale.into_parts();
        self.unflushed_bytes = 0;
        self.unflushed_frames = 0;
        let file = self.writer.get_ref();
        file.set_len(self.durable_len)?;
        file.sync_all()
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("wal unusable after a failed rollback"));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot to the side file and fsync it. The live log is untouched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();
        self.unflushed_bytes = 0;
        self.unflushed_frames = 0;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Every intact event in the log, oldest first. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::scan(path).map(|(events, _)| events)
    }

    /// Intact events plus the byte length of the prefix they occupy.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut intact = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            if !read_full(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), "wal: checksum mismatch, dropping tail");
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "wal: undecodable frame ({e}), dropping tail");
                    break;
                }
            }
            intact += payload.len() as u64 + 8;
        }

        Ok((events, intact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tutorslot_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn slot_created() -> Event {
        Event::SlotCreated {
            slot: TeachingSlot::new(
                Ulid::new(),
                "tutor".into(),
                "room".into(),
                DayOfWeek::Wednesday,
                600,
                660,
            ),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![slot_created(), Event::SlotDeleted { id: Ulid::new() }];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn missing_file_replays_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = tmp_path("torn_tail.wal");
        let first = slot_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
            wal.append(&slot_created()).unwrap();
        }
        // Chop the last frame in half.
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        let first = slot_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
            wal.append(&slot_created()).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
    }

    #[test]
    fn rollback_discards_unflushed_and_torn_bytes() {
        let path = tmp_path("rollback.wal");
        let kept = slot_created();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        let durable = fs::metadata(&path).unwrap().len();

        // One frame still buffered, plus half a frame that reached the file.
        wal.append_buffered(&slot_created()).unwrap();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[0x2a; 11])
            .unwrap();

        wal.rollback().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), durable);
        assert_eq!(wal.appends_since_compact(), 1);

        let after = slot_created();
        wal.append(&after).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, after]);
    }

    #[test]
    fn reopen_cuts_torn_tail_before_appending() {
        let path = tmp_path("reopen_torn.wal");
        let first = slot_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
            wal.append(&slot_created()).unwrap();
        }
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let after = slot_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&after).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, after]);
    }

    #[test]
    fn compaction_replaces_contents() {
        let path = tmp_path("compaction.wal");
        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..5 {
            wal.append(&slot_created()).unwrap();
        }
        let kept = vec![slot_created()];
        Wal::write_compact_file(wal.path(), &kept).unwrap();
        wal.swap_compact_file().unwrap();
        assert_eq!(wal.appends_since_compact(), 0);

        let after = slot_created();
        wal.append(&after).unwrap();

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![kept[0].clone(), after]);
    }
}
