//! Intermediate-to-final artifact conversion.
//!
//! A backend's PNG output is re-encoded as JPEG with provenance EXIF tags.
//! The final file is written next to its destination as `<name>.part` and
//! renamed into place, so a finalized artifact is never partially written
//! and never overwritten. The intermediate is removed only on success.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;

use crate::error::FinalizeError;
use crate::exif::{self, ExifTags};

/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 88;

/// Extension of the temporary file written before the final rename.
const PART_EXTENSION: &str = "part";

/// Provenance recorded in every finalized artifact.
#[derive(Debug, Clone)]
pub struct Provenance {
    /// The backend invocation, rendered as one line.
    pub command_line: String,
    pub device_name: String,
    pub elapsed: Duration,
}

impl Provenance {
    pub fn software_tag(&self) -> String {
        format!("AI Art (generated in {})", format_elapsed(self.elapsed))
    }

    fn exif_tags(&self) -> ExifTags {
        ExifTags {
            software: self.software_tag(),
            comment: self.command_line.clone(),
            author: self.device_name.clone(),
        }
    }
}

/// Format a duration rounded to whole seconds as `H:MM:SS`, or
/// `N day(s), H:MM:SS` past 24 hours.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64().round() as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let clock = format!("{hours}:{minutes:02}:{seconds:02}");
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

/// Decode `intermediate` and encode it as a tagged JPEG in memory.
pub fn encode_tagged_jpeg(
    intermediate: &Path,
    provenance: &Provenance,
    quality: u8,
) -> Result<Vec<u8>, FinalizeError> {
    let decoded = image::open(intermediate).map_err(|source| FinalizeError::Decode {
        path: intermediate.to_path_buf(),
        source,
    })?;
    let rgb = decoded.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&rgb)
        .map_err(FinalizeError::Encode)?;

    Ok(exif::embed(&jpeg, &provenance.exif_tags())?)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PART_EXTENSION);
    dest.with_file_name(name)
}

/// Finalize `intermediate` into `dest`, which must not exist yet.
///
/// On failure any `.part` file is removed and the intermediate is left in
/// place for inspection.
pub fn finalize(
    intermediate: &Path,
    dest: &Path,
    provenance: &Provenance,
    quality: u8,
) -> Result<(), FinalizeError> {
    if dest.exists() {
        return Err(FinalizeError::DestinationExists(dest.to_path_buf()));
    }

    let bytes = encode_tagged_jpeg(intermediate, provenance, quality)?;

    let part = part_path(dest);
    let written = std::fs::write(&part, &bytes).and_then(|()| std::fs::rename(&part, dest));
    if let Err(source) = written {
        let _ = std::fs::remove_file(&part);
        return Err(FinalizeError::Write {
            path: dest.to_path_buf(),
            source,
        });
    }

    if let Err(e) = std::fs::remove_file(intermediate) {
        tracing::warn!(
            path = %intermediate.display(),
            error = %e,
            "Failed to remove intermediate image",
        );
    }

    tracing::debug!(
        from = %intermediate.display(),
        to = %dest.display(),
        bytes = bytes.len(),
        "Finalized artifact",
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn provenance() -> Provenance {
        Provenance {
            command_line: "python vqgan.py -sd 1".into(),
            device_name: "unknown device".into(),
            elapsed: Duration::from_secs(303),
        }
    }

    fn write_png(path: &Path) {
        let img = image::RgbaImage::from_pixel(8, 6, image::Rgba([200, 30, 90, 255]));
        img.save(path).unwrap();
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(303)), "0:05:03");
        assert_eq!(format_elapsed(Duration::from_millis(59_600)), "0:01:00");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7)), "3:00:07");
        assert_eq!(format_elapsed(Duration::from_secs(86_400 + 61)), "1 day, 0:01:01");
        assert_eq!(format_elapsed(Duration::from_secs(2 * 86_400)), "2 days, 0:00:00");
    }

    #[test]
    fn software_tag_includes_elapsed() {
        assert_eq!(provenance().software_tag(), "AI Art (generated in 0:05:03)");
    }

    #[test]
    fn finalize_replaces_intermediate_with_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a-cat.png");
        let jpg = dir.path().join("a-cat.jpg");
        write_png(&png);

        finalize(&png, &jpg, &provenance(), DEFAULT_JPEG_QUALITY).unwrap();

        assert!(!png.exists());
        assert!(!dir.path().join("a-cat.jpg.part").exists());
        let bytes = std::fs::read(&jpg).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(bytes.windows(6).any(|w| w == b"Exif\0\0"));

        let decoded = image::open(&jpg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn decode_failure_keeps_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("broken.png");
        let jpg = dir.path().join("broken.jpg");
        std::fs::write(&png, b"not an image").unwrap();

        assert_matches!(
            finalize(&png, &jpg, &provenance(), DEFAULT_JPEG_QUALITY),
            Err(FinalizeError::Decode { .. })
        );
        assert!(png.exists());
        assert!(!jpg.exists());
    }

    #[test]
    fn write_failure_cleans_up_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a.png");
        write_png(&png);
        let jpg = dir.path().join("missing-dir").join("a.jpg");

        assert_matches!(
            finalize(&png, &jpg, &provenance(), DEFAULT_JPEG_QUALITY),
            Err(FinalizeError::Write { .. })
        );
        assert!(png.exists());
    }

    #[test]
    fn existing_artifact_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a.png");
        let jpg = dir.path().join("a.jpg");
        write_png(&png);
        std::fs::write(&jpg, b"earlier artifact").unwrap();

        assert_matches!(
            finalize(&png, &jpg, &provenance(), DEFAULT_JPEG_QUALITY),
            Err(FinalizeError::DestinationExists(_))
        );
        assert_eq!(std::fs::read(&jpg).unwrap(), b"earlier artifact");
        assert!(png.exists());
    }

    #[test]
    fn part_path_appends_extension() {
        assert_eq!(part_path(Path::new("/x/a.jpg")), PathBuf::from("/x/a.jpg.part"));
    }
}
