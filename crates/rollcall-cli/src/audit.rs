//! Audit photo archive for authorized attempts.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rollcall_core::Identity;
use std::path::{Path, PathBuf};

/// Re-encode the captured image as RGB JPEG into
/// `dir/<identity>_<YYYYmmdd_HHMMSS>.jpg`.
pub fn archive(image: &Path, dir: &Path, identity: &Identity, at: NaiveDateTime) -> Result<PathBuf> {
    let decoded = image::open(image)
        .with_context(|| format!("failed to decode capture {}", image.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create audit directory {}", dir.display()))?;
    let dest = dir.join(format!("{}_{}.jpg", identity, at.format("%Y%m%d_%H%M%S")));

    decoded
        .to_rgb8()
        .save(&dest)
        .with_context(|| format!("failed to write audit photo {}", dest.display()))?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{ImageBuffer, Rgba};

    #[test]
    fn test_archive_converts_to_rgb_jpeg() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("snapshot.png");
        ImageBuffer::from_pixel(4, 4, Rgba([200u8, 10, 10, 128]))
            .save(&src)
            .unwrap();

        let at = NaiveDate::from_ymd_opt(2024, 3, 6)
            .unwrap()
            .and_hms_opt(15, 4, 5)
            .unwrap();
        let out_dir = dir.path().join("recognized_faces");
        let dest = archive(&src, &out_dir, &Identity::new("Areeba").unwrap(), at).unwrap();

        assert_eq!(dest, out_dir.join("Areeba_20240306_150405.jpg"));
        let reread = image::open(&dest).unwrap();
        assert_eq!(reread.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_archive_rejects_non_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("snapshot.jpg");
        std::fs::write(&src, b"not an image").unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 3, 6)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap();
        assert!(archive(&src, dir.path(), &Identity::new("Kiran").unwrap(), at).is_err());
    }
}
