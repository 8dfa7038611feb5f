//! Export containers.
//!
//! A container is anything that yields named members as byte streams: an
//! unpacked export folder on disk, or members held in memory. Unpacking a
//! compressed download is left to whoever hands us the members.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Folder every member of a standard export lives under
pub const EXPORT_PREFIX: &str = "apple_health_export/";
pub const MAIN_DOCUMENT: &str = "apple_health_export/export.xml";
pub const CLINICAL_SUFFIX: &str = "export_cda.xml";
pub const WAVEFORM_FOLDER: &str = "electrocardiograms/";
pub const ROUTE_FOLDER: &str = "workout-routes/";

/// One named member of a container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Path inside the container, `/`-separated
    pub path: String,
    pub size: u64,
}

/// Source of named members
pub trait Archive: Sync {
    /// Every member, sorted by path
    fn members(&self) -> Result<Vec<ArchiveMember>>;

    /// Open a member for streaming
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send + '_>>;

    /// Read a whole (small) member, replacing invalid UTF-8
    fn read_text(&self, path: &str) -> Result<String> {
        let mut bytes = Vec::new();
        self.open(path)?.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// An unpacked export folder
#[derive(Clone, Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Archive(format!(
                "{:?} is not a readable export folder",
                root
            )));
        }
        Ok(Self { root })
    }

    fn collect(&self, dir: &Path, members: &mut Vec<ArchiveMember>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                self.collect(&path, members)?;
            } else if file_type.is_file() {
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                members.push(ArchiveMember {
                    path: name,
                    size: entry.metadata()?.len(),
                });
            }
        }
        Ok(())
    }
}

impl Archive for DirectoryArchive {
    fn members(&self) -> Result<Vec<ArchiveMember>> {
        let mut members = Vec::new();
        self.collect(&self.root, &mut members)?;
        members.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!("Found {} members under {:?}", members.len(), self.root);
        Ok(members)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send + '_>> {
        if path.split('/').any(|part| part == "..") {
            return Err(Error::Archive(format!("Member path {:?} escapes the export", path)));
        }
        let file = File::open(self.root.join(path))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Members held in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryArchive {
    members: BTreeMap<String, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.members.insert(path.into(), bytes.into());
    }

    /// Builder-style [`MemoryArchive::insert`]
    pub fn with(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }
}

impl Archive for MemoryArchive {
    fn members(&self) -> Result<Vec<ArchiveMember>> {
        Ok(self
            .members
            .iter()
            .map(|(path, bytes)| ArchiveMember {
                path: path.clone(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send + '_>> {
        let bytes = self
            .members
            .get(path)
            .ok_or_else(|| Error::Archive(format!("No member named {:?}", path)))?;
        Ok(Box::new(bytes.as_slice()))
    }
}

/// Where each kind of member lives in one container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportLayout {
    pub main: ArchiveMember,
    pub clinical: Option<ArchiveMember>,
    pub waveforms: Vec<ArchiveMember>,
    pub routes: Vec<ArchiveMember>,
}

impl ExportLayout {
    /// Classify the members of `archive`.
    ///
    /// The main document is looked up at its conventional path first; failing
    /// that, any other `.xml` member whose path mentions "export" or "health"
    /// is accepted.
    pub fn discover(archive: &dyn Archive) -> Result<Self> {
        let members = archive.members()?;

        let main = members
            .iter()
            .find(|m| m.path == MAIN_DOCUMENT)
            .or_else(|| {
                members.iter().find(|m| {
                    let lower = m.path.to_lowercase();
                    lower.ends_with(".xml")
                        && (lower.contains("export") || lower.contains("health"))
                        && !is_clinical(m)
                        && !is_waveform(m)
                        && !is_route(m)
                })
            })
            .cloned()
            .ok_or(Error::MissingMainDocument)?;

        if main.path != MAIN_DOCUMENT {
            tracing::info!("Using {:?} as the main export document", main.path);
        }

        let clinical = members
            .iter()
            .filter(|m| is_clinical(m))
            .min_by_key(|m| !m.path.starts_with(EXPORT_PREFIX))
            .cloned();

        Ok(Self {
            main,
            clinical,
            waveforms: members.iter().filter(|m| is_waveform(m)).cloned().collect(),
            routes: members.iter().filter(|m| is_route(m)).cloned().collect(),
        })
    }
}

fn is_clinical(member: &ArchiveMember) -> bool {
    member.path.ends_with(CLINICAL_SUFFIX)
}

fn is_waveform(member: &ArchiveMember) -> bool {
    member.path.contains(WAVEFORM_FOLDER) && member.path.ends_with(".xml")
}

fn is_route(member: &ArchiveMember) -> bool {
    member.path.contains(ROUTE_FOLDER)
        && (member.path.ends_with(".gpx") || member.path.ends_with(".xml"))
}
