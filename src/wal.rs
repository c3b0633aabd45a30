use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Upper bound on one encoded event. A larger length prefix means the tail is garbage.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Record {
    /// An intact event and the bytes it occupied on disk.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Torn or corrupt tail; everything from here on is dropped.
    Damaged(&'static str),
}

/// `read_exact` that reports a short read as `Ok(false)` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    match reader.read(&mut len_buf[..1])? {
        0 => return Ok(Record::End),
        _ => {
            if !read_full(reader, &mut len_buf[1..])? {
                return Ok(Record::Damaged("truncated length"));
            }
        }
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Damaged("implausible length"));
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(Record::Damaged("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(Record::Damaged("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Damaged("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event, (len + 8) as u64)),
        Err(_) => Ok(Record::Damaged("undecodable event")),
    }
}

/// Append-only write-ahead log of reservation-book events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` counts the payload only. A torn last entry from a crash is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(Self::open_append(path)?),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Append and fsync one event. Production code batches with
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing; durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted event list to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        // Anything still buffered belongs to the old file.
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        self.writer = BufWriter::new(Self::open_append(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.events)
    }

    /// Replay, then cut a damaged tail off the file so later appends land
    /// right after the last intact record.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let scan = Self::scan(path)?;
        if scan.damaged {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.intact_len)?;
            file.sync_all()?;
            warn!("WAL {}: truncated to {} bytes", path.display(), scan.intact_len);
        }
        Ok(scan.events)
    }

    fn scan(path: &Path) -> io::Result<Scan> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Scan {
                    events: Vec::new(),
                    intact_len: 0,
                    damaged: false,
                });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut intact_len = 0u64;
        loop {
            match read_record(&mut reader)? {
                Record::Event(event, size) => {
                    events.push(event);
                    intact_len += size;
                }
                Record::End => {
                    return Ok(Scan {
                        events,
                        intact_len,
                        damaged: false,
                    });
                }
                Record::Damaged(why) => {
                    warn!(
                        "WAL {}: {why} after {} events, discarding tail",
                        path.display(),
                        events.len()
                    );
                    return Ok(Scan {
                        events,
                        intact_len,
                        damaged: true,
                    });
                }
            }
        }
    }
}

struct Scan {
    events: Vec<Event>,
    /// Byte length of the intact prefix.
    intact_len: u64,
    damaged: bool,
}
