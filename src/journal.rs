use crate::archive;
use crate::record::{EditHistoryEntry, MessageKey, MessageRecord};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const JOURNAL_FILE: &str = "journal.jsonl";
pub(crate) const ARCHIVE_FILE: &str = "archive.jsonl.zst";

/// One durable journal line: every effect of one event on one key.
///
/// Because a line is either fully present (newline-terminated) or skipped on
/// recovery, a commit is the unit of per-key atomicity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Commit {
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<MessageRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<EditHistoryEntry>,
    /// Wall-clock seconds when the commit was written. Diagnostic only.
    pub committed_at: u64,
}

impl Commit {
    pub fn new(
        key: MessageKey,
        record: Option<MessageRecord>,
        history: Vec<EditHistoryEntry>,
    ) -> Self {
        let committed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Commit {
            key,
            record,
            history,
            committed_at,
        }
    }
}

/// Whether the journal takes an exclusive advisory lock on open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    Flock,
    None,
}

/// Position information returned by [`Journal::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppendResult {
    pub end_offset: u64,
    pub line_hash: String,
}

/// Compute xxh64 hash of raw line bytes (without trailing newline), hex-encoded.
pub(crate) fn line_hash(line: &[u8]) -> String {
    let hash = xxhash_rust::xxh64::xxh64(line, 0);
    format!("{:016x}", hash)
}

/// Append-only JSONL journal backing a [`JournalStore`](crate::JournalStore).
pub(crate) struct Journal {
    path: PathBuf,
    archive_path: PathBuf,
    file: File,
    /// Set when a failed append could not be rolled back, so the file may
    /// end in a partial line.
    needs_repair: bool,
    #[cfg(test)]
    faults: Faults,
}

/// Failures injected into the next append.
#[cfg(test)]
#[derive(Debug, Default)]
struct Faults {
    torn_write: bool,
    failed_rollback: bool,
}

impl Journal {
    /// Open or create the journal in the given directory.
    ///
    /// With [`LockMode::Flock`] a second open on the same directory fails
    /// with [`io::ErrorKind::AlreadyExists`] until the first handle is dropped.
    pub fn open(dir: &Path, lock_mode: LockMode) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let archive_path = dir.join(ARCHIVE_FILE);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        if lock_mode == LockMode::Flock && file.try_lock_exclusive().is_err() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("another writer holds the lock on {}", path.display()),
            ));
        }

        Ok(Journal {
            path,
            archive_path,
            file,
            needs_repair: false,
            #[cfg(test)]
            faults: Faults::default(),
        })
    }

    /// Append a commit and sync it to disk before returning.
    ///
    /// A failed write is cut back to where it started. If that cut fails
    /// too, the partial line is removed before the next append is written.
    pub fn append(&mut self, commit: &Commit) -> io::Result<AppendResult> {
        if self.needs_repair {
            self.repair_tail()?;
            self.needs_repair = false;
        }

        let start_offset = self.file.seek(SeekFrom::End(0))?;
        let json = serde_json::to_string(commit)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut line = Vec::with_capacity(json.len() + 1);
        line.extend_from_slice(json.as_bytes());
        line.push(b'\n');

        if let Err(e) = self.write_line(&line) {
            if let Err(rollback) = self.rollback(start_offset) {
                log::error!(
                    "mirrorfold: could not cut failed append from {}: {rollback}",
                    self.path.display()
                );
                self.needs_repair = true;
            }
            return Err(e);
        }
        Ok(AppendResult {
            end_offset: start_offset + line.len() as u64,
            line_hash: line_hash(json.as_bytes()),
        })
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.faults.torn_write) {
            self.file.write_all(&line[..line.len() / 2])?;
            return Err(io::Error::other("injected torn write"));
        }
        self.file.write_all(line)?;
        self.file.sync_data()
    }

    fn rollback(&mut self, offset: u64) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.faults.failed_rollback) {
            return Err(io::Error::other("injected rollback failure"));
        }
        self.file.set_len(offset)
    }

    /// Read commits from the active journal starting at the given byte offset.
    ///
    /// Yields `(commit, next_byte_offset, line_hash)` for each complete line.
    /// Empty lines are skipped. A partial trailing line (crash mid-append)
    /// ends the iteration.
    pub fn read_from(
        &self,
        offset: u64,
    ) -> io::Result<impl Iterator<Item = io::Result<(Commit, u64, String)>> + use<>> {
        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(offset))?;

        Ok(CommitLines {
            reader: BufReader::new(file),
            pos: offset,
            file_len,
        })
    }

    /// Read every commit ever written: archived segments first, then the
    /// active journal. Yields `(commit, line_hash)`.
    pub fn read_full(
        &self,
    ) -> io::Result<Box<dyn Iterator<Item = io::Result<(Commit, String)>>>> {
        let active = self
            .read_from(0)?
            .map(|r| r.map(|(commit, _, hash)| (commit, hash)));

        match archive::open_reader(&self.archive_path)? {
            Some(reader) => {
                let archived = reader.lines().filter_map(|line| match line {
                    Ok(line) if line.is_empty() => None,
                    Ok(line) => Some(parse_line(&line).map(|c| (c, line_hash(line.as_bytes())))),
                    Err(e) => Some(Err(e)),
                });
                Ok(Box::new(archived.chain(active)))
            }
            None => Ok(Box::new(active)),
        }
    }

    /// Copy every complete line of the active journal into the compressed
    /// archive. Returns the number of bytes archived.
    pub fn archive_active(&self) -> io::Result<u64> {
        let mut contents = Vec::new();
        File::open(&self.path)?.read_to_end(&mut contents)?;

        let complete = contents
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if complete > 0 {
            archive::append_frame(&self.archive_path, &contents[..complete])?;
        }
        Ok(complete as u64)
    }

    /// Truncate the active journal. The lock is held on the same file
    /// descriptor and survives.
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()
    }

    /// Cut a partial trailing line left by a crash mid-append, so the next
    /// append starts on a fresh line. Returns the number of bytes removed.
    pub fn repair_tail(&mut self) -> io::Result<u64> {
        let len = self.file.metadata()?.len();
        if len == 0 {
            return Ok(0);
        }

        let mut file = File::open(&self.path)?;
        let mut end = len;
        let keep = loop {
            let start = end.saturating_sub(8192);
            file.seek(SeekFrom::Start(start))?;
            let mut buf = vec![0u8; (end - start) as usize];
            file.read_exact(&mut buf)?;

            if let Some(pos) = buf.iter().rposition(|&b| b == b'\n') {
                break start + pos as u64 + 1;
            }
            if start == 0 {
                break 0;
            }
            end = start;
        };

        if keep < len {
            self.file.set_len(keep)?;
            self.file.sync_all()?;
        }
        Ok(len - keep)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Current size in bytes of the active journal.
    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Hash of the line ending just before `offset`, or `None` at offset 0
    /// or past EOF.
    pub fn read_line_hash_before(&self, offset: u64) -> io::Result<Option<String>> {
        if offset == 0 {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();

        if offset > file_len {
            return Ok(None);
        }

        // offset - 1 is the '\n' terminating the line we want
        let newline_pos = offset - 1;
        let mut start = 0u64;

        if newline_pos > 0 {
            let scan_start = newline_pos.saturating_sub(64 * 1024);
            file.seek(SeekFrom::Start(scan_start))?;
            let mut buf = vec![0u8; (newline_pos - scan_start) as usize];
            file.read_exact(&mut buf)?;

            start = match buf.iter().rposition(|&b| b == b'\n') {
                Some(pos) => scan_start + pos as u64 + 1,
                None => scan_start,
            };
        }

        file.seek(SeekFrom::Start(start))?;
        let mut line_buf = vec![0u8; (newline_pos - start) as usize];
        file.read_exact(&mut line_buf)?;

        Ok(Some(line_hash(&line_buf)))
    }
}

fn parse_line(line: &str) -> io::Result<Commit> {
    serde_json::from_str(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

struct CommitLines {
    reader: BufReader<File>,
    pos: u64,
    file_len: u64,
}

impl Iterator for CommitLines {
    type Item = io::Result<(Commit, u64, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut buf = Vec::new();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }

            // No trailing newline: the writer crashed mid-line.
            if buf.last() != Some(&b'\n') || self.pos + buf.len() as u64 > self.file_len {
                return None;
            }

            let next_pos = self.pos + buf.len() as u64;
            buf.pop();
            self.pos = next_pos;

            if buf.is_empty() {
                continue;
            }

            let hash = line_hash(&buf);
            let commit = match std::str::from_utf8(&buf) {
                Ok(line) => parse_line(line),
                Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            };
            return Some(commit.map(|c| (c, next_pos, hash)));
        }
    }
}
