//! JSONL file helpers shared by the file-backed stores.
//!
//! A line is committed once its trailing newline is on disk. Readers ignore
//! an unterminated tail, and writers cut it off before appending.

use crate::StoreError;
use log::warn;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// Append one value as a single line and flush it to disk.
pub(crate) fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    drop_partial_tail(&mut file, path)?;
    commit_line(&mut file, line.as_bytes()).inspect_err(|err| {
        warn!("append failed, write rolled back (path={}): {}", path.display(), err)
    })?;
    Ok(())
}

/// Append target that can be synced and cut back to an earlier length.
pub(crate) trait AppendTarget: Write {
    fn committed_len(&mut self) -> std::io::Result<u64>;
    fn sync(&mut self) -> std::io::Result<()>;
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

impl AppendTarget for File {
    fn committed_len(&mut self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)?;
        self.sync_data()
    }
}

/// Write and sync one line. On any failure the target is cut back to its
/// length before the write, so a failed append never leaves a visible line.
pub(crate) fn commit_line(target: &mut impl AppendTarget, line: &[u8]) -> std::io::Result<()> {
    let start = target.committed_len()?;
    let result = target.write_all(line).and_then(|()| target.sync());
    if let Err(err) = result {
        if let Err(rollback) = target.truncate(start) {
            warn!("rollback to {start} bytes failed: {rollback}");
        }
        return Err(err);
    }
    Ok(())
}

/// Read every committed line of a file. A missing file reads as empty.
pub(crate) fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    let committed = match bytes.iter().rposition(|byte| *byte == b'\n') {
        Some(end) => &bytes[..=end],
        None => &bytes[..0],
    };
    if committed.len() < bytes.len() {
        warn!(
            "ignoring unterminated trailing line (path={}, bytes={})",
            path.display(),
            bytes.len() - committed.len()
        );
    }
    let text = std::str::from_utf8(committed)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let mut values = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        values.push(value);
    }
    Ok(values)
}

fn drop_partial_tail(file: &mut File, path: &Path) -> Result<(), StoreError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map(|idx| idx + 1)
        .unwrap_or(0);
    warn!(
        "truncating unterminated trailing line (path={}, bytes={})",
        path.display(),
        contents.len() - keep
    );
    file.set_len(keep as u64)?;
    Ok(())
}

/// Encode a scope name as a portable file stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`, so distinct scopes never share a file.
pub(crate) fn file_stem(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Lazily created write lock per key.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn get(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    #[test]
    fn unterminated_tail_is_ignored_then_replaced() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("log.jsonl");
        append_line(&path, &json!({ "n": 1 })).expect("append");
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(b"{\"n\":").expect("partial");

        let values: Vec<Value> = read_lines(&path).expect("read");
        assert_eq!(values, vec![json!({ "n": 1 })]);

        append_line(&path, &json!({ "n": 2 })).expect("append");
        let values: Vec<Value> = read_lines(&path).expect("read");
        assert_eq!(values, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    }

    /// In-memory target whose sync can be made to fail.
    struct FlakyTarget {
        bytes: Vec<u8>,
        fail_sync: bool,
    }

    impl Write for FlakyTarget {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl AppendTarget for FlakyTarget {
        fn committed_len(&mut self) -> std::io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn sync(&mut self) -> std::io::Result<()> {
            if self.fail_sync {
                return Err(std::io::Error::other("sync failed"));
            }
            Ok(())
        }

        fn truncate(&mut self, len: u64) -> std::io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_sync_rolls_the_line_back() {
        let mut target = FlakyTarget {
            bytes: b"{\"n\":1}\n".to_vec(),
            fail_sync: true,
        };
        assert!(commit_line(&mut target, b"{\"n\":2}\n").is_err());
        assert_eq!(target.bytes, b"{\"n\":1}\n".to_vec());

        target.fail_sync = false;
        commit_line(&mut target, b"{\"n\":2}\n").expect("commit");
        assert_eq!(target.bytes, b"{\"n\":1}\n{\"n\":2}\n".to_vec());
    }

    #[test]
    fn corrupt_committed_line_is_reported() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("log.jsonl");
        fs::write(&path, "{\"n\":1}\nnot json\n").expect("write");
        let err = read_lines::<Value>(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }));
    }

    #[test]
    fn file_stems_are_distinct_and_portable() {
        assert_eq!(file_stem("tenant-a_1"), "tenant-a_1");
        assert_eq!(file_stem("a/b"), "a%2Fb");
        assert_eq!(file_stem("a%2Fb"), "a%252Fb");
        assert_eq!(file_stem("../x"), "%2E%2E%2Fx");
    }
}
