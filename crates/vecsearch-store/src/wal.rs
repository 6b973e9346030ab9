//! Append-only write-ahead log.
//!
//! Every record is framed as
//!
//! ```text
//! magic u8 (0xA5) | payload_len u32 LE | crc32(payload) u32 LE | payload
//! ```
//!
//! Replay stops at the first torn or corrupt frame and truncates the file to
//! the end of the last good one, so a crash mid-append loses at most the
//! record being written.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use vecsearch_core::{NodeId, VecFloat};

const MAGIC: u8 = 0xA5;
const HEADER_LEN: usize = 9;

const OP_INSERT: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_CHECKPOINT: u8 = 3;

/// Hard cap on one payload, well above any sane record; a larger length in a
/// header is treated as corruption.
const MAX_PAYLOAD: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalSyncMode {
    /// `fsync` after every append.
    Strict,
    /// Flush to the OS only; the kernel decides when it hits disk.
    #[default]
    Async,
}

/// A fully planned insert: the document plus the level and neighbour lists the
/// graph assigned to it. Replaying these in order rebuilds the same graph.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRecord {
    pub node: NodeId,
    pub id: String,
    pub text: String,
    pub level: u32,
    pub vector: Vec<VecFloat>,
    pub attributes: HashMap<String, String>,
    /// `layers[l]` is the node's own neighbour list on layer `l`.
    pub layers: Vec<Vec<NodeId>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalEntry {
    Insert(InsertRecord),
    Delete { id: String },
    /// Written just before snapshot `generation` is saved. Everything up to
    /// the marker is contained in that snapshot.
    Checkpoint { generation: u64 },
}

#[derive(Debug)]
pub struct Wal {
    file: File,
    // End of the last committed frame
    committed: u64,
    mode: WalSyncMode,
    #[cfg(test)]
    short_write: Option<usize>,
}

impl Wal {
    pub fn new(path: &Path, mode: WalSyncMode) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed = file.metadata()?.len();
        Ok(Self {
            file,
            committed,
            mode,
            #[cfg(test)]
            short_write: None,
        })
    }

    /// Appends one record. On error the file is cut back to the last
    /// committed frame, so a failed append never reappears on replay.
    pub fn append(&mut self, entry: &WalEntry) -> io::Result<()> {
        let mut frames = Vec::new();
        push_frame(&mut frames, &encode(entry)?)?;
        self.commit(&frames)
    }

    /// Appends all records or none of them.
    pub fn append_batch(&mut self, entries: &[WalEntry]) -> io::Result<()> {
        let mut frames = Vec::new();
        for entry in entries {
            push_frame(&mut frames, &encode(entry)?)?;
        }
        self.commit(&frames)
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Drops every record. Called after a checkpoint has made them redundant.
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.committed = 0;
        Ok(())
    }

    fn commit(&mut self, frames: &[u8]) -> io::Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let written = self.write_frames(frames).and_then(|()| match self.mode {
            WalSyncMode::Strict => self.file.sync_data(),
            WalSyncMode::Async => Ok(()),
        });
        match written {
            Ok(()) => {
                self.committed += frames.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.file.set_len(self.committed) {
                    tracing::error!(error = %rollback, "could not roll back failed log append");
                }
                Err(e)
            }
        }
    }

    fn write_frames(&mut self, frames: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(cut) = self.short_write.take() {
            self.file.write_all(&frames[..cut.min(frames.len())])?;
            return Err(io::Error::other("short write"));
        }
        self.file.write_all(frames)
    }

    /// Replays every intact record in order and returns how many were applied.
    pub fn replay<F>(path: &Path, mut callback: F) -> io::Result<usize>
    where
        F: FnMut(WalEntry),
    {
        if !path.exists() {
            return Ok(0);
        }
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        let mut offset = 0usize;
        let mut applied = 0usize;
        while offset < data.len() {
            match next_frame(&data[offset..]) {
                Frame::Entry(entry, consumed) => {
                    callback(entry);
                    applied += 1;
                    offset += consumed;
                }
                Frame::Broken(reason) => {
                    tracing::warn!(
                        path = %path.display(),
                        offset,
                        reason,
                        "truncating write-ahead log at damaged record"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }
        Ok(applied)
    }
}

enum Frame {
    Entry(WalEntry, usize),
    Broken(&'static str),
}

fn next_frame(buf: &[u8]) -> Frame {
    if buf.len() < HEADER_LEN {
        return Frame::Broken("torn header");
    }
    if buf[0] != MAGIC {
        return Frame::Broken("bad magic");
    }
    let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let crc = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
    if len > MAX_PAYLOAD {
        return Frame::Broken("oversized payload");
    }
    let Some(payload) = buf.get(HEADER_LEN..HEADER_LEN + len) else {
        return Frame::Broken("torn payload");
    };
    if crc32fast::hash(payload) != crc {
        return Frame::Broken("checksum mismatch");
    }
    match decode(payload) {
        Ok(entry) => Frame::Entry(entry, HEADER_LEN + len),
        Err(_) => Frame::Broken("undecodable payload"),
    }
}

fn push_frame(out: &mut Vec<u8>, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "WAL record too large"))?;
    out.write_u8(MAGIC)?;
    out.write_u32::<LittleEndian>(len)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(payload))?;
    out.extend_from_slice(payload);
    Ok(())
}

fn encode(entry: &WalEntry) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    match entry {
        WalEntry::Insert(rec) => {
            buf.write_u8(OP_INSERT)?;
            buf.write_u32::<LittleEndian>(rec.node)?;
            write_str(&mut buf, &rec.id)?;
            write_str(&mut buf, &rec.text)?;
            buf.write_u32::<LittleEndian>(rec.level)?;

            write_len(&mut buf, rec.vector.len())?;
            for &val in &rec.vector {
                buf.write_f64::<LittleEndian>(val)?;
            }

            write_len(&mut buf, rec.attributes.len())?;
            for (k, v) in &rec.attributes {
                write_str(&mut buf, k)?;
                write_str(&mut buf, v)?;
            }

            write_len(&mut buf, rec.layers.len())?;
            for layer in &rec.layers {
                write_len(&mut buf, layer.len())?;
                for &n in layer {
                    buf.write_u32::<LittleEndian>(n)?;
                }
            }
        }
        WalEntry::Delete { id } => {
            buf.write_u8(OP_DELETE)?;
            write_str(&mut buf, id)?;
        }
        WalEntry::Checkpoint { generation } => {
            buf.write_u8(OP_CHECKPOINT)?;
            buf.write_u64::<LittleEndian>(*generation)?;
        }
    }
    Ok(buf)
}

fn decode(payload: &[u8]) -> io::Result<WalEntry> {
    let mut r = Cursor::new(payload);
    let entry = match r.read_u8()? {
        OP_INSERT => {
            let node = r.read_u32::<LittleEndian>()?;
            let id = read_str(&mut r)?;
            let text = read_str(&mut r)?;
            let level = r.read_u32::<LittleEndian>()?;

            let vec_len = read_len(&mut r)?;
            let mut vector = Vec::with_capacity(vec_len);
            for _ in 0..vec_len {
                vector.push(r.read_f64::<LittleEndian>()?);
            }

            let attr_len = read_len(&mut r)?;
            let mut attributes = HashMap::with_capacity(attr_len);
            for _ in 0..attr_len {
                let k = read_str(&mut r)?;
                let v = read_str(&mut r)?;
                attributes.insert(k, v);
            }

            let layer_count = read_len(&mut r)?;
            let mut layers = Vec::with_capacity(layer_count);
            for _ in 0..layer_count {
                let n = read_len(&mut r)?;
                let mut layer = Vec::with_capacity(n);
                for _ in 0..n {
                    layer.push(r.read_u32::<LittleEndian>()?);
                }
                layers.push(layer);
            }

            WalEntry::Insert(InsertRecord {
                node,
                id,
                text,
                level,
                vector,
                attributes,
                layers,
            })
        }
        OP_DELETE => WalEntry::Delete {
            id: read_str(&mut r)?,
        },
        OP_CHECKPOINT => WalEntry::Checkpoint {
            generation: r.read_u64::<LittleEndian>()?,
        },
        _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "unknown opcode")),
    };
    if (r.position() as usize) != payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "trailing bytes in record",
        ));
    }
    Ok(entry)
}

fn write_len(buf: &mut Vec<u8>, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length overflows u32"))?;
    buf.write_u32::<LittleEndian>(len)
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
    write_len(buf, s.len())?;
    buf.write_all(s.as_bytes())
}

fn read_len(r: &mut Cursor<&[u8]>) -> io::Result<usize> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    // A length can never exceed the bytes left in the payload.
    let remaining = r.get_ref().len() - r.position() as usize;
    if len > remaining {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "length exceeds payload",
        ));
    }
    Ok(len)
}

fn read_str(r: &mut Cursor<&[u8]>) -> io::Result<String> {
    let len = read_len(r)?;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(node: NodeId) -> WalEntry {
        WalEntry::Insert(InsertRecord {
            node,
            id: format!("doc-{node}"),
            text: "bank transit number".into(),
            level: 1,
            vector: vec![0.25, -0.5, 1.0],
            attributes: HashMap::from([("lang".to_string(), "en".to_string())]),
            layers: vec![vec![0, 2], vec![0]],
        })
    }

    #[test]
    fn test_append_and_replay_mixed_ops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::new(&path, WalSyncMode::Strict).unwrap();
            wal.append(&record(0)).unwrap();
            wal.append(&WalEntry::Delete { id: "doc-0".into() }).unwrap();
            wal.append_batch(&[record(1), record(2)]).unwrap();
            wal.append(&WalEntry::Checkpoint { generation: 7 }).unwrap();
        }

        let mut seen = Vec::new();
        let n = Wal::replay(&path, |e| seen.push(e)).unwrap();
        assert_eq!(n, 5);
        assert_eq!(seen[4], WalEntry::Checkpoint { generation: 7 });
        assert_eq!(seen[0], record(0));
        assert_eq!(seen[1], WalEntry::Delete { id: "doc-0".into() });
        assert_eq!(seen[3], record(2));
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::new(&path, WalSyncMode::Async).unwrap();
            wal.append(&record(0)).unwrap();
            let good_len = std::fs::metadata(&path).unwrap().len();

            wal.short_write = Some(7);
            assert!(wal.append(&record(1)).is_err());
            assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

            wal.short_write = Some(40);
            assert!(wal.append_batch(&[record(1), record(2)]).is_err());
            assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

            wal.append(&record(3)).unwrap();
        }

        let mut seen = Vec::new();
        Wal::replay(&path, |e| seen.push(e)).unwrap();
        assert_eq!(seen, vec![record(0), record(3)]);
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let n = Wal::replay(&dir.path().join("absent.log"), |_| {
            panic!("no entries expected")
        })
        .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_truncate_drops_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut wal = Wal::new(&path, WalSyncMode::Async).unwrap();
        wal.append(&record(0)).unwrap();
        wal.truncate().unwrap();
        wal.append(&record(7)).unwrap();
        drop(wal);

        let mut seen = Vec::new();
        Wal::replay(&path, |e| seen.push(e)).unwrap();
        assert_eq!(seen, vec![record(7)]);
    }
}
