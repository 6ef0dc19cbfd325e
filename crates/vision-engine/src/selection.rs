use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

pub const DEFAULT_IMAGE_NAME: &str = "image.jpg";

/// Revocable reference to a selected image's bytes, for rendering.
///
/// Not `Clone`: a handle is handed back to its [`PreviewStore`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct PreviewHandle {
    id: u64,
    path: Option<PathBuf>,
}

impl PreviewHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// File a viewer can open, when the store backs previews with files.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn uri(&self) -> String {
        match &self.path {
            Some(path) => format!("file://{}", path.display()),
            None => format!("preview:{}", self.id),
        }
    }
}

pub trait PreviewStore: Send {
    /// Never fails; a store that cannot materialize the preview still hands
    /// out a tracked handle.
    fn allocate(&mut self, bytes: &[u8], name: &str) -> PreviewHandle;
    fn release(&mut self, handle: PreviewHandle);
    fn is_live(&self, handle: &PreviewHandle) -> bool;
    fn outstanding(&self) -> usize;
}

impl<P: PreviewStore + ?Sized> PreviewStore for Box<P> {
    fn allocate(&mut self, bytes: &[u8], name: &str) -> PreviewHandle {
        (**self).allocate(bytes, name)
    }

    fn release(&mut self, handle: PreviewHandle) {
        (**self).release(handle)
    }

    fn is_live(&self, handle: &PreviewHandle) -> bool {
        (**self).is_live(handle)
    }

    fn outstanding(&self) -> usize {
        (**self).outstanding()
    }
}

/// Opaque in-process handles, `preview:<n>`.
#[derive(Debug, Default)]
pub struct MemoryPreviews {
    next_id: u64,
    live: BTreeSet<u64>,
    allocated: u64,
    released: u64,
}

impl MemoryPreviews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    /// Drops a handle behind the owner's back, like a browser revoking an
    /// object URL.
    pub fn revoke(&mut self, id: u64) -> bool {
        self.live.remove(&id)
    }
}

impl PreviewStore for MemoryPreviews {
    fn allocate(&mut self, _bytes: &[u8], _name: &str) -> PreviewHandle {
        self.next_id += 1;
        self.allocated += 1;
        self.live.insert(self.next_id);
        PreviewHandle {
            id: self.next_id,
            path: None,
        }
    }

    fn release(&mut self, handle: PreviewHandle) {
        if self.live.remove(&handle.id) {
            self.released += 1;
        } else {
            tracing::debug!(id = handle.id, "released preview was already gone");
        }
    }

    fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.live.contains(&handle.id)
    }

    fn outstanding(&self) -> usize {
        self.live.len()
    }
}

/// Writes each preview to a temp file that is deleted on release.
#[derive(Debug)]
pub struct TempFilePreviews {
    dir: PathBuf,
    next_id: u64,
    // `None` marks a preview whose file could not be written.
    live: BTreeMap<u64, Option<NamedTempFile>>,
}

impl TempFilePreviews {
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: 0,
            live: BTreeMap::new(),
        }
    }

    fn write_preview(&self, bytes: &[u8], name: &str) -> std::io::Result<NamedTempFile> {
        let suffix = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("svc-preview-")
            .suffix(&suffix)
            .tempfile_in(&self.dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file)
    }
}

impl Default for TempFilePreviews {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewStore for TempFilePreviews {
    fn allocate(&mut self, bytes: &[u8], name: &str) -> PreviewHandle {
        self.next_id += 1;
        let file = match self.write_preview(bytes, name) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "preview file not written");
                None
            }
        };
        let path = file.as_ref().map(|file| file.path().to_path_buf());
        self.live.insert(self.next_id, file);
        PreviewHandle {
            id: self.next_id,
            path,
        }
    }

    fn release(&mut self, handle: PreviewHandle) {
        // Dropping the NamedTempFile deletes it.
        if let Some(Some(file)) = self.live.remove(&handle.id) {
            if let Err(err) = file.close() {
                tracing::debug!(id = handle.id, error = %err, "preview file already removed");
            }
        }
    }

    fn is_live(&self, handle: &PreviewHandle) -> bool {
        match self.live.get(&handle.id) {
            Some(Some(file)) => file.path().exists(),
            Some(None) => true,
            None => false,
        }
    }

    fn outstanding(&self) -> usize {
        self.live.len()
    }
}

pub struct SelectedImage {
    bytes: Vec<u8>,
    display_name: String,
    // Only `None` transiently while the handle is being swapped.
    preview: Option<PreviewHandle>,
}

impl SelectedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.preview.as_ref()
    }

    pub fn mime_type(&self) -> &'static str {
        image_mime_type(&self.bytes)
    }

    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl std::fmt::Debug for SelectedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedImage")
            .field("display_name", &self.display_name)
            .field("len", &self.bytes.len())
            .field("preview", &self.preview)
            .finish()
    }
}

/// Sniffed MIME type, `application/octet-stream` when the format is unknown.
pub fn image_mime_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// Ticket for an asynchronous selection; only the newest one may land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SelectionToken(u64);

/// Single-slot holder of the currently selected image.
///
/// Every mutation bumps a generation counter. Loads that finish after a
/// newer selection, load or clear carry an old token and are ignored.
pub struct ImageSelection<P: PreviewStore = MemoryPreviews> {
    previews: P,
    current: Option<SelectedImage>,
    generation: u64,
}

impl<P: PreviewStore> ImageSelection<P> {
    pub fn new(previews: P) -> Self {
        Self {
            previews,
            current: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&SelectedImage> {
        self.current.as_ref()
    }

    pub fn previews(&self) -> &P {
        &self.previews
    }

    pub fn previews_mut(&mut self) -> &mut P {
        &mut self.previews
    }

    pub fn select_from_bytes(&mut self, bytes: Vec<u8>, name: &str) -> &SelectedImage {
        self.generation += 1;
        self.replace(bytes, name)
    }

    /// Starts an asynchronous selection, superseding any in flight.
    pub fn begin_load(&mut self) -> SelectionToken {
        self.generation += 1;
        SelectionToken(self.generation)
    }

    pub fn is_current(&self, token: SelectionToken) -> bool {
        token.0 == self.generation
    }

    pub fn complete_load(
        &mut self,
        token: SelectionToken,
        bytes: Vec<u8>,
        name: &str,
    ) -> Option<&SelectedImage> {
        if !self.is_current(token) {
            tracing::debug!(?token, generation = self.generation, "dropping stale image load");
            return None;
        }
        Some(self.replace(bytes, name))
    }

    /// A failed load that is still current leaves nothing selected.
    pub fn fail_load(&mut self, token: SelectionToken) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.release_current();
        true
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.release_current();
    }

    /// Re-creates the preview if the store no longer considers it live.
    pub fn refresh_preview(&mut self) -> bool {
        let Some(image) = self.current.as_mut() else {
            return false;
        };
        if let Some(handle) = image.preview.as_ref() {
            if self.previews.is_live(handle) {
                return false;
            }
        }
        if let Some(stale) = image.preview.take() {
            self.previews.release(stale);
        }
        image.preview = Some(self.previews.allocate(&image.bytes, &image.display_name));
        true
    }

    fn replace(&mut self, bytes: Vec<u8>, name: &str) -> &SelectedImage {
        self.release_current();
        let display_name = match name.trim() {
            "" => DEFAULT_IMAGE_NAME.to_string(),
            trimmed => trimmed.to_string(),
        };
        let preview = self.previews.allocate(&bytes, &display_name);
        self.current.insert(SelectedImage {
            bytes,
            display_name,
            preview: Some(preview),
        })
    }

    fn release_current(&mut self) {
        if let Some(mut image) = self.current.take() {
            if let Some(handle) = image.preview.take() {
                self.previews.release(handle);
            }
        }
    }
}

impl Default for ImageSelection<MemoryPreviews> {
    fn default() -> Self {
        Self::new(MemoryPreviews::new())
    }
}

impl<P: PreviewStore> Drop for ImageSelection<P> {
    fn drop(&mut self) {
        self.release_current();
    }
}
