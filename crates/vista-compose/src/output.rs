//! Generated images and writing them to disk

use chrono::{Local, NaiveDate};
use std::io::Write;
use std::path::{Path, PathBuf};
use vista_core::{Result, VistaError};

/// Highest file index used inside one day's directory
pub const MAX_FILE_INDEX: u32 = 99_999;

/// One image returned by a finished job
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Position in the job's output sequence
    pub index: usize,
    pub url: String,
    pub seed: Option<u64>,
    pub bytes: Vec<u8>,
    /// Format sniffed from the bytes
    pub format: Option<image::ImageFormat>,
}

impl GeneratedImage {
    pub fn new(index: usize, url: String, seed: Option<u64>, bytes: Vec<u8>) -> Self {
        let format = image::guess_format(&bytes).ok();
        Self {
            index,
            url,
            seed,
            bytes,
            format,
        }
    }

    /// File extension matching the sniffed format, `png` when unknown
    pub fn extension(&self) -> &'static str {
        self.format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("png")
    }

    /// Pixel dimensions, when the bytes decode
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        image::ImageReader::new(std::io::Cursor::new(&self.bytes))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

/// Writes images as `<root>/<YYYY-MM-DD>/<prefix>_<NNNNN>.<ext>`, taking the
/// next free index.
#[derive(Debug, Clone)]
pub struct ImageWriter {
    root: PathBuf,
    prefix: String,
}

impl ImageWriter {
    pub fn new<P: AsRef<Path>>(root: P, prefix: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            prefix: prefix.into(),
        }
    }

    /// Save under today's directory
    pub fn save(&self, image: &GeneratedImage) -> Result<PathBuf> {
        self.save_on(image, Local::now().date_naive())
    }

    pub fn save_all(&self, images: &[GeneratedImage]) -> Result<Vec<PathBuf>> {
        images.iter().map(|img| self.save(img)).collect()
    }

    /// Save under the directory for `date`
    pub fn save_on(&self, image: &GeneratedImage, date: NaiveDate) -> Result<PathBuf> {
        let dir = self.root.join(date.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&dir)?;

        for index in 1..=MAX_FILE_INDEX {
            let path = dir.join(format!(
                "{}_{:05}.{}",
                self.prefix,
                index,
                image.extension()
            ));
            // create_new makes the claim atomic across concurrent writers
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path);
            match file {
                Ok(mut f) => {
                    f.write_all(&image.bytes)?;
                    log::info!("Saved image at {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(VistaError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "Cannot save the image because the output directory ({}) is full.",
                dir.display()
            ),
        )))
    }
}
