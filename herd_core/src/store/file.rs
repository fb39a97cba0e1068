//! File-backed store with file locking.
//!
//! Layout under the data directory:
//!
//! ```text
//! owner-<id>/
//!     settings.json
//!     animals/<animal_id>.json
//!     pharmacy/<year>.json
//!     prescriptions.jsonl
//! ```
//!
//! JSON documents are replaced atomically (temp file, fsync, rename) and read
//! under a shared lock. Prescriptions are an append-only JSON-lines ledger.

use super::HerdStore;
use crate::{
    Animal, AnimalId, Error, OwnerId, OwnerSettings, PharmacyYearSummary, Prescription, Result,
};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

const SETTINGS_FILE: &str = "settings.json";
const PRESCRIPTIONS_FILE: &str = "prescriptions.jsonl";
const ANIMALS_DIR: &str = "animals";
const PHARMACY_DIR: &str = "pharmacy";

/// Stores each owner's records in its own directory
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn owner_dir(&self, owner_id: OwnerId) -> PathBuf {
        self.root.join(format!("owner-{}", owner_id))
    }

    fn animal_path(&self, owner_id: OwnerId, animal_id: AnimalId) -> PathBuf {
        self.owner_dir(owner_id)
            .join(ANIMALS_DIR)
            .join(format!("{}.json", animal_id))
    }

    fn summary_path(&self, owner_id: OwnerId, year: i32) -> PathBuf {
        self.owner_dir(owner_id)
            .join(PHARMACY_DIR)
            .join(format!("{}.json", year))
    }
}

impl HerdStore for FileStore {
    fn get_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<Option<Animal>> {
        read_document(&self.animal_path(owner_id, animal_id))
    }

    fn list_animals(&self, owner_id: OwnerId) -> Result<Vec<Animal>> {
        let dir = self.owner_dir(owner_id).join(ANIMALS_DIR);
        let mut animals = Vec::new();
        for (_, path) in keyed_documents::<AnimalId>(&dir)? {
            if let Some(animal) = read_document(&path)? {
                animals.push(animal);
            }
        }
        Ok(animals)
    }

    fn save_animal(&self, animal: &Animal) -> Result<()> {
        write_document(&self.animal_path(animal.owner_id, animal.animal_id), animal)
    }

    fn delete_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<bool> {
        let path = self.animal_path(owner_id, animal_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Deleted {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn get_settings(&self, owner_id: OwnerId) -> Result<Option<OwnerSettings>> {
        read_document(&self.owner_dir(owner_id).join(SETTINGS_FILE))
    }

    fn save_settings(&self, settings: &OwnerSettings) -> Result<()> {
        write_document(
            &self.owner_dir(settings.owner_id).join(SETTINGS_FILE),
            settings,
        )
    }

    fn append_prescription(&self, prescription: &Prescription) -> Result<()> {
        let path = self.owner_dir(prescription.owner_id).join(PRESCRIPTIONS_FILE);
        append_line(&path, prescription)?;
        tracing::debug!("Appended prescription {} to {:?}", prescription.id, path);
        Ok(())
    }

    fn list_prescriptions(&self, owner_id: OwnerId) -> Result<Vec<Prescription>> {
        read_lines(&self.owner_dir(owner_id).join(PRESCRIPTIONS_FILE))
    }

    fn get_year_summary(
        &self,
        owner_id: OwnerId,
        year: i32,
    ) -> Result<Option<PharmacyYearSummary>> {
        read_document(&self.summary_path(owner_id, year))
    }

    fn list_year_summaries(&self, owner_id: OwnerId) -> Result<Vec<PharmacyYearSummary>> {
        let dir = self.owner_dir(owner_id).join(PHARMACY_DIR);
        let mut summaries = Vec::new();
        for (_, path) in keyed_documents::<i32>(&dir)? {
            if let Some(summary) = read_document(&path)? {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    fn save_year_summary(&self, summary: &PharmacyYearSummary) -> Result<()> {
        write_document(&self.summary_path(summary.owner_id, summary.year), summary)
    }
}

/// `<key>.json` files of a directory, ordered by key
///
/// Anything else (stray temp files, editor backups) is ignored.
fn keyed_documents<K: FromStr + Ord>(dir: &Path) -> Result<Vec<(K, PathBuf)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut keyed = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let key = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<K>().ok());
        if let Some(key) = key {
            keyed.push((key, path));
        }
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed)
}

/// Read a JSON document under a shared lock; a missing file is `None`
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    file.lock_shared()?;
    let mut contents = String::new();
    let read = BufReader::new(&file).read_to_string(&mut contents);
    file.unlock()?;
    read?;

    match serde_json::from_str(&contents) {
        Ok(value) => {
            tracing::debug!("Loaded {:?}", path);
            Ok(Some(value))
        }
        Err(e) => {
            tracing::warn!("Failed to parse {:?}: {}", path, e);
            Err(e.into())
        }
    }
}

/// Atomically replace a JSON document
fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "document path missing parent",
        ))
    })?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!("Saved {:?}", path);
    Ok(())
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;

    let mut writer = std::io::BufWriter::new(&file);
    let line = serde_json::to_string(value)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    drop(writer);

    file.unlock()?;
    Ok(())
}

/// Read every parseable line of a JSON-lines file; a missing file is empty
fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    file.lock_shared()?;

    let mut values = Vec::new();
    for (line_num, line_result) in BufReader::new(&file).lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(value) => values.push(value),
            Err(e) => {
                tracing::warn!("Skipping line {} of {:?}: {}", line_num + 1, path, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} entries from {:?}", values.len(), path);
    Ok(values)
}
