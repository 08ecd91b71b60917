//! File-based local store for notesync.
//!
//! Stores one JSON file per note, named by its local ID:
//!
//! ```text
//! .notesync/
//!   .lock                    # Lock file for atomic operations
//!   notes/
//!     6f1c...e2.json
//!     9a40...7b.json
//! ```

use chrono::{DateTime, Utc};
use fs2::FileExt;
use notesync_core::{Error, LocalId, LocalStore, Note, Pending, ServerId};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A note as stored on disk (without its local ID, which is the file name).
#[derive(Debug, Serialize, Deserialize)]
struct NoteFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_id: Option<ServerId>,
    title: String,
    #[serde(default)]
    tags: Vec<String>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    #[serde(default)]
    pending_delete: Pending,
    #[serde(default)]
    pending_edit: Pending,
}

impl NoteFile {
    fn from_note(note: &Note) -> Self {
        Self {
            server_id: note.server_id.clone(),
            title: note.title.clone(),
            tags: note.tags.clone(),
            created: note.created_at,
            modified: note.updated_at,
            pending_delete: note.pending_delete,
            pending_edit: note.pending_edit,
        }
    }

    fn into_note(self, local_id: LocalId) -> Note {
        Note {
            local_id,
            server_id: self.server_id,
            title: self.title,
            tags: self.tags,
            created_at: self.created,
            updated_at: self.modified,
            pending_delete: self.pending_delete,
            pending_edit: self.pending_edit,
        }
    }
}

/// File-based local store.
pub struct FilesStore {
    root: PathBuf,
}

impl FilesStore {
    /// Open a file-based store at the given directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("notes"))
            .map_err(|e| Error::Store(format!("Failed to create notes dir: {}", e)))?;

        Ok(Self { root })
    }

    /// Acquire an exclusive lock on the store.
    fn lock(&self) -> Result<FileLock, Error> {
        let lock_path = self.root.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| Error::Store(format!("Failed to open lock file: {}", e)))?;

        file.lock_exclusive()
            .map_err(|e| Error::Store(format!("Failed to acquire lock: {}", e)))?;

        Ok(FileLock { file })
    }

    fn notes_dir(&self) -> PathBuf {
        self.root.join("notes")
    }

    fn note_path(&self, local_id: &LocalId) -> PathBuf {
        self.notes_dir().join(format!("{}.json", local_id))
    }

    /// Read a note file from disk.
    fn read_note(&self, local_id: &LocalId) -> Result<Option<Note>, Error> {
        let path = self.note_path(local_id);

        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)
            .map_err(|e| Error::Store(format!("Failed to open note: {}", e)))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| Error::Store(format!("Failed to read note: {}", e)))?;

        let note: NoteFile = serde_json::from_str(&contents)
            .map_err(|e| Error::Store(format!("Failed to parse note {}: {}", local_id, e)))?;

        Ok(Some(note.into_note(*local_id)))
    }

    /// Write a note file to disk atomically.
    fn write_note(&self, note: &Note) -> Result<(), Error> {
        let path = self.note_path(&note.local_id);
        let temp_path = self
            .notes_dir()
            .join(format!("{}.json.tmp", note.local_id));

        let contents = serde_json::to_string_pretty(&NoteFile::from_note(note))
            .map_err(|e| Error::Store(format!("Failed to serialize note: {}", e)))?;

        let mut file = File::create(&temp_path)
            .map_err(|e| Error::Store(format!("Failed to create temp file: {}", e)))?;

        file.write_all(contents.as_bytes())
            .map_err(|e| Error::Store(format!("Failed to write temp file: {}", e)))?;

        file.sync_all()
            .map_err(|e| Error::Store(format!("Failed to sync temp file: {}", e)))?;

        // Atomic rename
        fs::rename(&temp_path, &path)
            .map_err(|e| Error::Store(format!("Failed to rename temp file: {}", e)))?;

        self.sync_notes_dir()
    }

    /// Flush the notes directory so renames and removals survive a crash.
    #[cfg(unix)]
    fn sync_notes_dir(&self) -> Result<(), Error> {
        File::open(self.notes_dir())
            .and_then(|dir| dir.sync_all())
            .map_err(|e| Error::Store(format!("Failed to sync notes dir: {}", e)))
    }

    // Directories cannot be opened as files on Windows.
    #[cfg(not(unix))]
    fn sync_notes_dir(&self) -> Result<(), Error> {
        Ok(())
    }

    /// List all local IDs in the notes directory. Leftover temp files are ignored.
    fn list_local_ids(&self) -> Result<Vec<LocalId>, Error> {
        let mut ids = Vec::new();

        let entries = fs::read_dir(self.notes_dir())
            .map_err(|e| Error::Store(format!("Failed to read notes dir: {}", e)))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| Error::Store(format!("Failed to read dir entry: {}", e)))?;
            let path = entry.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<LocalId>().ok())
                {
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }
}

/// RAII guard for file locking.
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[async_trait::async_trait(?Send)]
impl LocalStore for FilesStore {
    async fn get(&self, local_id: &LocalId) -> Result<Option<Note>, Error> {
        let _lock = self.lock()?;
        self.read_note(local_id)
    }

    async fn list(&self) -> Result<Vec<Note>, Error> {
        let _lock = self.lock()?;

        let mut notes = Vec::new();
        for id in self.list_local_ids()? {
            if let Some(note) = self.read_note(&id)? {
                notes.push(note);
            }
        }
        notes.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        Ok(notes)
    }

    async fn put(&self, note: &Note) -> Result<(), Error> {
        let _lock = self.lock()?;
        self.write_note(note)
    }

    async fn delete(&self, local_id: &LocalId) -> Result<bool, Error> {
        let _lock = self.lock()?;

        let path = self.note_path(local_id);
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path)
            .map_err(|e| Error::Store(format!("Failed to delete note: {}", e)))?;
        self.sync_notes_dir()?;

        Ok(true)
    }
}
