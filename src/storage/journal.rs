//! Expiration Journal
//!
//! Write-ahead append-only log of set/remove operations.
//!
//! File format:
//! - Magic: 4 bytes "LPSJ"
//! - Version: 1 byte
//! - Records: [len (4) + op (1) + id_len (4) + id + expires_at (8, set only)]*
//!
//! All integers little-endian. `len` counts the bytes after itself.

use bytes::{Buf, BufMut, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{error, info, warn};

use super::ExpirationRecord;
use crate::error::{StoreError, StoreResult};

const JOURNAL_MAGIC: &[u8; 4] = b"LPSJ";
const JOURNAL_VERSION: u8 = 1;
const HEADER_LEN: usize = 5;

const OP_SET: u8 = 1;
const OP_REMOVE: u8 = 2;

/// How hard each append is pushed to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalSync {
    /// Flush to the OS after every write
    #[default]
    Flush,
    /// fdatasync after every write
    Fsync,
}

/// Journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Set { workspace_id: String, expires_at: u64 },
    Remove { workspace_id: String },
}

impl JournalEntry {
    pub fn set(workspace_id: &str, expires_at: u64) -> Self {
        JournalEntry::Set {
            workspace_id: workspace_id.to_owned(),
            expires_at,
        }
    }

    pub fn remove(workspace_id: &str) -> Self {
        JournalEntry::Remove {
            workspace_id: workspace_id.to_owned(),
        }
    }
}

/// Length-prefixed codec for journal records
#[derive(Debug, Default, Clone, Copy)]
pub struct JournalCodec;

impl Decoder for JournalCodec {
    type Item = JournalEntry;
    type Error = StoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if src.len() < 4 + len {
            return Ok(None);
        }

        src.advance(4);
        let mut record = src.split_to(len).freeze();

        if record.remaining() < 5 {
            return Err(StoreError::Corrupt(format!("record too short: {} bytes", len)));
        }
        let op = record.get_u8();
        let id_len = record.get_u32_le() as usize;
        if record.remaining() < id_len {
            return Err(StoreError::Corrupt("workspace id overruns record".into()));
        }
        let id = record.split_to(id_len);
        let workspace_id = String::from_utf8(id.to_vec())
            .map_err(|e| StoreError::Corrupt(format!("workspace id is not UTF-8: {}", e)))?;

        match op {
            OP_SET => {
                if record.remaining() < 8 {
                    return Err(StoreError::Corrupt("set record missing deadline".into()));
                }
                Ok(Some(JournalEntry::Set {
                    workspace_id,
                    expires_at: record.get_u64_le(),
                }))
            }
            OP_REMOVE => Ok(Some(JournalEntry::Remove { workspace_id })),
            other => Err(StoreError::Corrupt(format!("unknown op {:#04x}", other))),
        }
    }
}

impl Encoder<&JournalEntry> for JournalCodec {
    type Error = StoreError;

    fn encode(&mut self, item: &JournalEntry, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (op, workspace_id, expires_at) = match item {
            JournalEntry::Set {
                workspace_id,
                expires_at,
            } => (OP_SET, workspace_id, Some(*expires_at)),
            JournalEntry::Remove { workspace_id } => (OP_REMOVE, workspace_id, None),
        };

        let len = 1 + 4 + workspace_id.len() + if expires_at.is_some() { 8 } else { 0 };
        dst.reserve(4 + len);
        dst.put_u32_le(len as u32);
        dst.put_u8(op);
        dst.put_u32_le(workspace_id.len() as u32);
        dst.put_slice(workspace_id.as_bytes());
        if let Some(at) = expires_at {
            dst.put_u64_le(at);
        }
        Ok(())
    }
}

/// Open journal file
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    sync: JournalSync,
    file: File,
    /// File length up to the last acknowledged record
    len: u64,
    entry_count: usize,
    /// Appends made while a rewrite is being staged
    capture: Option<Vec<JournalEntry>>,
    /// Set when a failed append could not be cut back off the file
    broken: bool,
    codec: JournalCodec,
    buf: BytesMut,
}

/// Compacted journal written next to the live one, not yet swapped in
#[derive(Debug)]
pub(crate) struct StagedRewrite {
    path: PathBuf,
    file: File,
    len: u64,
    entry_count: usize,
}

impl Journal {
    /// Open or create the journal and return every intact record in it.
    /// A torn trailing record is cut off.
    pub(crate) fn open(path: &Path, sync: JournalSync) -> StoreResult<(Self, Vec<JournalEntry>)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut entries = Vec::new();
        let len = if data.is_empty() {
            file.write_all(&header())?;
            HEADER_LEN as u64
        } else {
            if data.len() < HEADER_LEN || &data[..4] != JOURNAL_MAGIC {
                return Err(StoreError::Corrupt(format!(
                    "{} is not an expiration journal",
                    path.display()
                )));
            }
            if data[4] != JOURNAL_VERSION {
                return Err(StoreError::Corrupt(format!(
                    "unsupported journal version: {}",
                    data[4]
                )));
            }

            let mut buf = BytesMut::from(&data[HEADER_LEN..]);
            let mut codec = JournalCodec;
            while let Some(entry) = codec.decode(&mut buf)? {
                entries.push(entry);
            }

            let intact = (data.len() - buf.len()) as u64;
            if !buf.is_empty() {
                warn!(
                    path = %path.display(),
                    dropped = buf.len(),
                    "Truncating torn journal tail"
                );
                file.set_len(intact)?;
            }
            intact
        };

        info!(path = %path.display(), records = entries.len(), "Journal opened");

        let journal = Self {
            path: path.to_path_buf(),
            sync,
            file,
            len,
            entry_count: entries.len(),
            capture: None,
            broken: false,
            codec: JournalCodec,
            buf: BytesMut::with_capacity(256),
        };
        Ok((journal, entries))
    }

    /// Append one record and push it to disk. On failure the file is cut
    /// back so the record never resurfaces on replay.
    pub(crate) fn append(&mut self, entry: &JournalEntry) -> StoreResult<()> {
        if self.broken {
            return Err(StoreError::Corrupt(format!(
                "{} is unusable after a failed rollback",
                self.path.display()
            )));
        }

        self.buf.clear();
        self.codec.encode(entry, &mut self.buf)?;
        if let Err(e) = self.write_buf() {
            self.rollback();
            return Err(e.into());
        }

        self.len += self.buf.len() as u64;
        self.entry_count += 1;
        if let Some(delta) = self.capture.as_mut() {
            delta.push(entry.clone());
        }
        Ok(())
    }

    fn write_buf(&mut self) -> io::Result<()> {
        self.file.write_all(&self.buf)?;
        if self.sync == JournalSync::Fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Drop any bytes past the last acknowledged record
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            error!(path = %self.path.display(), error = %e, "Journal rollback failed");
            self.broken = true;
        }
    }

    /// Start recording appends for a rewrite. Returns where to stage it.
    pub(crate) fn begin_rewrite(&mut self) -> PathBuf {
        self.capture = Some(Vec::new());
        self.rewrite_path()
    }

    /// Write a journal holding one set-record per live workspace. Needs no
    /// access to the live journal, so callers run it unlocked.
    pub(crate) fn stage(path: &Path, records: &[ExpirationRecord]) -> StoreResult<StagedRewrite> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + records.len() * 32);
        buf.put_slice(&header());
        let mut codec = JournalCodec;
        for record in records {
            codec.encode(
                &JournalEntry::set(&record.workspace_id, record.expires_at),
                &mut buf,
            )?;
        }

        {
            let mut tmp = File::create(path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        let file = OpenOptions::new().append(true).open(path)?;

        Ok(StagedRewrite {
            path: path.to_path_buf(),
            file,
            len: buf.len() as u64,
            entry_count: records.len(),
        })
    }

    /// Copy the appends recorded since `begin_rewrite` into the staged file
    /// and swap it in. On error the live journal stays in use.
    pub(crate) fn commit_rewrite(&mut self, mut staged: StagedRewrite) -> StoreResult<usize> {
        let delta = self.capture.take().unwrap_or_default();

        let mut buf = BytesMut::new();
        for entry in &delta {
            self.codec.encode(entry, &mut buf)?;
        }
        staged.file.write_all(&buf)?;
        staged.file.sync_all()?;

        // The staged handle stays valid across the rename
        fs::rename(&staged.path, &self.path)?;

        self.file = staged.file;
        self.len = staged.len + buf.len() as u64;
        self.entry_count = staged.entry_count + delta.len();
        Ok(self.entry_count)
    }

    /// Forget a rewrite that failed part way
    pub(crate) fn abort_rewrite(&mut self) {
        self.capture = None;
        if let Err(e) = fs::remove_file(self.rewrite_path()) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, "Could not remove staged journal");
            }
        }
    }

    fn rewrite_path(&self) -> PathBuf {
        self.path.with_extension("rewrite")
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entry_count
    }
}

fn header() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(JOURNAL_MAGIC);
    header[4] = JOURNAL_VERSION;
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_codec_partial_decode() {
        let mut codec = JournalCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(&JournalEntry::set("ws-1", 60_000), &mut buf)
            .unwrap();

        let mut partial = buf.clone();
        partial.truncate(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, JournalEntry::set("ws-1", 60_000));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_rejects_unknown_op() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(5);
        buf.put_u8(0x7f);
        buf.put_u32_le(0);
        assert!(matches!(
            JournalCodec.decode(&mut buf),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_journal_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("expirations.journal");

        {
            let (mut journal, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
            assert!(entries.is_empty());
            journal.append(&JournalEntry::set("ws-1", 10)).unwrap();
            journal.append(&JournalEntry::remove("ws-1")).unwrap();
            assert_eq!(journal.entry_count(), 2);
        }

        let (journal, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
        assert_eq!(journal.entry_count(), 2);
        assert_eq!(
            entries,
            vec![JournalEntry::set("ws-1", 10), JournalEntry::remove("ws-1")]
        );
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.journal");

        {
            let (mut journal, _) = Journal::open(&path, JournalSync::Fsync).unwrap();
            journal.append(&JournalEntry::set("ws-1", 10)).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();

        // Half-written second record
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[20, 0, 0, 0, OP_SET, 4]).unwrap();
        drop(file);

        let (mut journal, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
        assert_eq!(entries, vec![JournalEntry::set("ws-1", 10)]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        journal.append(&JournalEntry::set("ws-2", 20)).unwrap();
        drop(journal);
        let (_, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.file");
        fs::write(&path, b"NOPE\x01").unwrap();
        assert!(matches!(
            Journal::open(&path, JournalSync::Flush),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rw.journal");
        let (mut journal, _) = Journal::open(&path, JournalSync::Flush).unwrap();
        for i in 0..10 {
            journal.append(&JournalEntry::set("ws", i)).unwrap();
        }

        let live = vec![ExpirationRecord {
            workspace_id: "ws".into(),
            expires_at: 9,
        }];
        let tmp = journal.begin_rewrite();
        let staged = Journal::stage(&tmp, &live).unwrap();
        assert_eq!(journal.commit_rewrite(staged).unwrap(), 1);
        assert!(!tmp.exists());

        journal.append(&JournalEntry::set("other", 3)).unwrap();
        drop(journal);

        let (_, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
        assert_eq!(
            entries,
            vec![JournalEntry::set("ws", 9), JournalEntry::set("other", 3)]
        );
    }

    #[test]
    fn test_rewrite_keeps_appends_made_while_staging() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rw.journal");
        let (mut journal, _) = Journal::open(&path, JournalSync::Flush).unwrap();
        journal.append(&JournalEntry::set("a", 1)).unwrap();
        journal.append(&JournalEntry::set("b", 2)).unwrap();

        let tmp = journal.begin_rewrite();
        let snapshot = vec![
            ExpirationRecord {
                workspace_id: "a".into(),
                expires_at: 1,
            },
            ExpirationRecord {
                workspace_id: "b".into(),
                expires_at: 2,
            },
        ];
        journal.append(&JournalEntry::set("c", 3)).unwrap();
        journal.append(&JournalEntry::remove("a")).unwrap();

        let staged = Journal::stage(&tmp, &snapshot).unwrap();
        assert_eq!(journal.commit_rewrite(staged).unwrap(), 4);
        drop(journal);

        let (_, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
        assert_eq!(
            entries,
            vec![
                JournalEntry::set("a", 1),
                JournalEntry::set("b", 2),
                JournalEntry::set("c", 3),
                JournalEntry::remove("a"),
            ]
        );
    }

    #[test]
    fn test_failed_rewrite_keeps_live_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rw.journal");
        let (mut journal, _) = Journal::open(&path, JournalSync::Flush).unwrap();
        journal.append(&JournalEntry::set("ws", 1)).unwrap();

        let tmp = journal.begin_rewrite();
        let staged = Journal::stage(&tmp, &[]).unwrap();
        // Rename has nothing to move
        fs::remove_file(&tmp).unwrap();
        assert!(journal.commit_rewrite(staged).is_err());
        journal.abort_rewrite();

        journal.append(&JournalEntry::set("after", 2)).unwrap();
        assert_eq!(journal.entry_count(), 2);
        drop(journal);

        let (_, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
        assert_eq!(
            entries,
            vec![JournalEntry::set("ws", 1), JournalEntry::set("after", 2)]
        );
    }

    #[test]
    fn test_rollback_discards_unacknowledged_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rb.journal");
        let (mut journal, _) = Journal::open(&path, JournalSync::Flush).unwrap();
        journal.append(&JournalEntry::set("kept", 1)).unwrap();

        // Bytes of a record whose write reported an error
        let mut buf = BytesMut::new();
        JournalCodec
            .encode(&JournalEntry::set("failed", 2), &mut buf)
            .unwrap();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&buf)
            .unwrap();

        journal.rollback();
        journal.append(&JournalEntry::remove("kept")).unwrap();
        drop(journal);

        let (_, entries) = Journal::open(&path, JournalSync::Flush).unwrap();
        assert_eq!(
            entries,
            vec![JournalEntry::set("kept", 1), JournalEntry::remove("kept")]
        );
    }
}
