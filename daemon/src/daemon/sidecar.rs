// Annotation sidecar persistence
// Annotations for `/docs/report.md` live in `/docs/report.kdl`, rewritten atomically on every upsert
//
// One node per annotation, file order is annotation order:
//
//   annotation id="ann-1" user="alice" timestamp=123456789 {
//       context_hash "sha256:abc"
//       target_text "Hello"
//       body "World"
//   }
//
// Written as KDL 2. KDL 1 files are still read. Unknown nodes, properties and
// children are ignored.

use crate::daemon::protocol::AnnotationData;
use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sidecar file extension
pub const SIDECAR_EXTENSION: &str = "kdl";

/// Top-level node name for one annotation
pub const ANNOTATION_NODE: &str = "annotation";

/// One persisted annotation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationRecord {
    pub id: String,
    pub user: Option<String>,
    pub timestamp: Option<i64>,
    pub context_hash: String,
    pub target_text: String,
    pub body: String,
}

impl AnnotationRecord {
    /// Reject records that `load` would refuse to read back
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("annotation id is empty".to_string()));
        }
        Ok(())
    }
}

impl From<&AnnotationData> for AnnotationRecord {
    fn from(data: &AnnotationData) -> Self {
        Self {
            id: data.id.clone(),
            user: None,
            timestamp: (data.timestamp != 0).then_some(data.timestamp),
            context_hash: data.context_hash.clone(),
            target_text: data.target_text.clone(),
            body: data.body.clone(),
        }
    }
}

/// Sidecar text that is not valid KDL or not a valid annotation list
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based
    pub line: usize,
    pub message: String,
}

/// Whether an upsert replaced an existing record or appended a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Sidecar path for a source document: same directory and stem, `.kdl` extension
pub fn sidecar_path(source: &Path) -> PathBuf {
    source.with_extension(SIDECAR_EXTENSION)
}

/// Load all annotations from a sidecar file
///
/// A missing file is an empty list.
pub fn load(path: &Path) -> Result<Vec<AnnotationRecord>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    parse_annotations(&contents)
        .map_err(|e| Error::Decode(format!("{}:{}: {}", path.display(), e.line, e.message)))
}

/// Overwrite a sidecar file with the given annotations
pub fn save(path: &Path, records: &[AnnotationRecord]) -> Result<()> {
    for record in records {
        record.validate()?;
    }
    atomic_write(path, &render_annotations(records))
}

/// Replace the record with the same id in place, or append
pub fn merge_record(records: &mut Vec<AnnotationRecord>, record: AnnotationRecord) -> UpsertOutcome {
    match records.iter_mut().find(|existing| existing.id == record.id) {
        Some(existing) => {
            *existing = record;
            UpsertOutcome::Updated
        }
        None => {
            records.push(record);
            UpsertOutcome::Inserted
        }
    }
}

/// Render annotations as a KDL document
pub fn render_annotations(records: &[AnnotationRecord]) -> String {
    let mut doc = KdlDocument::new();

    for record in records {
        let mut node = KdlNode::new(ANNOTATION_NODE);
        let entries = node.entries_mut();
        entries.push(KdlEntry::new_prop("id", KdlValue::String(record.id.clone())));
        if let Some(user) = &record.user {
            entries.push(KdlEntry::new_prop("user", KdlValue::String(user.clone())));
        }
        if let Some(timestamp) = record.timestamp {
            entries.push(KdlEntry::new_prop(
                "timestamp",
                KdlValue::Integer(i128::from(timestamp)),
            ));
        }

        let mut children = KdlDocument::new();
        for (name, value) in [
            ("context_hash", &record.context_hash),
            ("target_text", &record.target_text),
            ("body", &record.body),
        ] {
            let mut child = KdlNode::new(name);
            child
                .entries_mut()
                .push(KdlEntry::new(KdlValue::String(value.clone())));
            children.nodes_mut().push(child);
        }
        node.set_children(children);

        doc.nodes_mut().push(node);
    }

    doc.autoformat();
    doc.to_string()
}

/// Parse sidecar text into annotation records, in file order
pub fn parse_annotations(text: &str) -> std::result::Result<Vec<AnnotationRecord>, ParseError> {
    let doc = KdlDocument::parse(text).map_err(|e| match e.diagnostics.first() {
        Some(diagnostic) => ParseError {
            line: line_at(text, diagnostic.span.offset()),
            message: diagnostic
                .message
                .clone()
                .unwrap_or_else(|| "invalid KDL".to_string()),
        },
        None => ParseError {
            line: 1,
            message: e.to_string(),
        },
    })?;

    doc.nodes()
        .iter()
        .filter(|node| node.name().value() == ANNOTATION_NODE)
        .map(|node| {
            annotation_from_node(node).map_err(|message| ParseError {
                line: node_line(text, node),
                message,
            })
        })
        .collect()
}

fn annotation_from_node(node: &KdlNode) -> std::result::Result<AnnotationRecord, String> {
    let id = match prop(node, "id") {
        Some(KdlValue::String(id)) if !id.is_empty() => id.clone(),
        Some(KdlValue::String(_)) => return Err("annotation id is empty".to_string()),
        Some(other) => return Err(format!("annotation id must be a string, got {}", other)),
        None => return Err("annotation is missing id".to_string()),
    };

    let user = match prop(node, "user") {
        None | Some(KdlValue::Null) => None,
        Some(KdlValue::String(user)) => Some(user.clone()),
        Some(other) => return Err(format!("annotation user must be a string, got {}", other)),
    };

    let timestamp = match prop(node, "timestamp") {
        None | Some(KdlValue::Null) => None,
        Some(KdlValue::Integer(ts)) => Some(
            i64::try_from(*ts).map_err(|_| format!("annotation timestamp {} is out of range", ts))?,
        ),
        Some(other) => {
            return Err(format!(
                "annotation timestamp must be an integer, got {}",
                other
            ))
        }
    };

    Ok(AnnotationRecord {
        id,
        user,
        timestamp,
        context_hash: child_string(node, "context_hash")?.unwrap_or_default(),
        target_text: child_string(node, "target_text")?.unwrap_or_default(),
        body: child_string(node, "body")?.unwrap_or_default(),
    })
}

/// Last occurrence wins, as in KDL
fn prop<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .rev()
        .find(|entry| entry.name().is_some_and(|name| name.value() == key))
        .map(|entry| entry.value())
}

fn child_string(node: &KdlNode, name: &str) -> std::result::Result<Option<String>, String> {
    let Some(child) = node
        .children()
        .and_then(|children| children.nodes().iter().rev().find(|c| c.name().value() == name))
    else {
        return Ok(None);
    };

    match child.entries().iter().find(|entry| entry.name().is_none()) {
        Some(entry) => match entry.value() {
            KdlValue::String(s) => Ok(Some(s.clone())),
            other => Err(format!("'{}' must be a string, got {}", name, other)),
        },
        None => Ok(Some(String::new())),
    }
}

fn line_at(text: &str, offset: usize) -> usize {
    text.get(..offset)
        .unwrap_or(text)
        .matches('\n')
        .count()
        + 1
}

/// Line of the node's name; the span may start at leading trivia
fn node_line(text: &str, node: &KdlNode) -> usize {
    let offset = node.span().offset();
    let name_offset = text
        .get(offset..)
        .and_then(|rest| rest.find(node.name().value()))
        .map_or(offset, |found| offset + found);
    line_at(text, name_offset)
}

/// Atomically write a file using temp file + rename
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let parent = parent_dir(path)?;

    // Same directory so the rename stays on one filesystem; the name is unique per call
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(contents.as_bytes())?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;

    Ok(())
}

fn parent_dir(path: &Path) -> Result<&Path> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent),
        Some(_) => Ok(Path::new(".")),
        None => Err(Error::Validation(format!(
            "Invalid path: {}",
            path.display()
        ))),
    }
}

/// One key per file however the path is spelled
///
/// The parent directory is resolved; the file itself may not exist yet.
pub fn lock_key(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        Error::Validation(format!("Invalid path: {}", path.display()))
    })?;
    Ok(fs::canonicalize(parent_dir(path)?)?.join(file_name))
}

/// Serializes load/modify/save cycles per sidecar file
#[derive(Debug, Default)]
pub struct SidecarStore {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SidecarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `record` in the sidecar at `path`
    pub fn upsert(&self, path: &Path, record: AnnotationRecord) -> Result<UpsertOutcome> {
        record.validate()?;
        let key = lock_key(path)?;

        let lock = self.lock_for(&key);
        let result = (|| {
            let _guard = lock.lock();
            let mut records = load(&key)?;
            let outcome = merge_record(&mut records, record);
            save(&key, &records).map(|()| outcome)
        })();
        drop(lock);
        self.release(&key);
        result
    }

    /// Upsert on the blocking pool
    pub async fn upsert_blocking(
        self: &Arc<Self>,
        path: PathBuf,
        record: AnnotationRecord,
    ) -> Result<UpsertOutcome> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.upsert(&path, record))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Number of paths with an upsert in flight
    pub fn active_paths(&self) -> usize {
        self.locks.lock().len()
    }

    fn lock_for(&self, key: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.to_path_buf()).or_default())
    }

    fn release(&self, key: &Path) {
        let mut locks = self.locks.lock();
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }
}
