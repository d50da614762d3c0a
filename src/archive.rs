use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use anyhow::{Context, Result};
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Archive prefix for single-selfie searches.
pub const MATCHED_PREFIX: &str = "matched_photos";
/// Archive prefix for multi-person searches.
pub const FRIENDS_PREFIX: &str = "friends_matched";

/// Entry name of the `index`-th (zero-based) photo.
pub fn entry_name(prefix: &str, index: usize) -> String {
    format!("{}_photo_{}.jpg", prefix, index + 1)
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(img)
        .context("encoding jpeg")?;
    Ok(buf)
}

/// Write every photo as a JPEG entry, in order.
pub fn write_archive<'a, W, I>(writer: W, photos: I, prefix: &str, quality: u8) -> Result<W>
where
    W: Write + Seek,
    I: IntoIterator<Item = &'a RgbImage>,
{
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (i, photo) in photos.into_iter().enumerate() {
        let name = entry_name(prefix, i);
        let jpeg = encode_jpeg(photo, quality)?;
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("starting entry {}", name))?;
        zip.write_all(&jpeg)
            .with_context(|| format!("writing entry {}", name))?;
        log::debug!("archived {} ({} bytes)", name, jpeg.len());
    }

    zip.finish().context("finishing archive")
}

pub fn archive_bytes<'a, I>(photos: I, prefix: &str, quality: u8) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a RgbImage>,
{
    Ok(write_archive(Cursor::new(Vec::new()), photos, prefix, quality)?.into_inner())
}

/// Write the photos to a ZIP at `path`. Nothing is created when there are no
/// photos; returns whether the archive was written.
pub fn save_archive<'a, I>(path: &Path, photos: I, prefix: &str, quality: u8) -> Result<bool>
where
    I: IntoIterator<Item = &'a RgbImage>,
{
    let photos: Vec<&RgbImage> = photos.into_iter().collect();
    if photos.is_empty() {
        return Ok(false);
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_archive(file, photos, prefix, quality)?;
    Ok(true)
}
