//! Destinations for received camera images.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Receives each complete image frame from a link.
pub trait ImageSink: Send {
    fn store(&mut self, image: &[u8]) -> io::Result<()>;
}

impl<F> ImageSink for F
where
    F: FnMut(&[u8]) -> io::Result<()> + Send,
{
    fn store(&mut self, image: &[u8]) -> io::Result<()> {
        self(image)
    }
}

/// Drops every image.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardImages;

impl ImageSink for DiscardImages {
    fn store(&mut self, _image: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Writes images to the filesystem.
///
/// In the default mode every image truncates and replaces one file. In
/// numbered mode each image gets its own file: `capture.jpeg` becomes
/// `capture-0001.jpeg`, `capture-0002.jpeg`, and so on.
#[derive(Debug)]
pub struct FileImageSink {
    path: PathBuf,
    numbered: bool,
    next_index: u32,
}

impl FileImageSink {
    /// Overwrite `path` with every image.
    pub fn overwrite(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            numbered: false,
            next_index: 1,
        }
    }

    /// Write each image to a new numbered file derived from `path`.
    pub fn numbered(path: impl Into<PathBuf>) -> Self {
        Self {
            numbered: true,
            ..Self::overwrite(path)
        }
    }

    /// The path the next image will be written to.
    pub fn next_path(&self) -> PathBuf {
        if !self.numbered {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let name = match self.path.extension() {
            Some(ext) => format!("{stem}-{:04}.{}", self.next_index, ext.to_string_lossy()),
            None => format!("{stem}-{:04}", self.next_index),
        };
        self.path.with_file_name(name)
    }

    pub fn base_path(&self) -> &Path {
        &self.path
    }
}

impl ImageSink for FileImageSink {
    fn store(&mut self, image: &[u8]) -> io::Result<()> {
        let target = self.next_path();
        let mut file = File::create(&target)?;
        file.write_all(image)?;
        file.sync_all()?;
        if self.numbered {
            self.next_index += 1;
        }
        debug!(path = %target.display(), bytes = image.len(), "image stored");
        Ok(())
    }
}
