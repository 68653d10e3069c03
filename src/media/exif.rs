/// EXIF image description lookup for JPEG photos
///
/// The drones store the provenance JSON of a photo in the EXIF
/// ImageDescription tag. The JPEG decoder hands us the raw EXIF block and
/// `kamadak-exif` parses its TIFF structure.
use ::exif::{In, Reader, Tag, Value};
use image::codecs::jpeg::JpegDecoder;
use image::ImageDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::debug;

/// Read the ImageDescription of a JPEG file.
/// Returns `None` when the file is not a readable JPEG or carries no description.
pub fn read_image_description(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut decoder = match JpegDecoder::new(BufReader::new(file)) {
        Ok(decoder) => decoder,
        Err(e) => {
            debug!("not a readable JPEG {}: {}", path.display(), e);
            return None;
        }
    };

    let exif = decoder.exif_metadata().ok().flatten()?;
    image_description(&exif)
}

/// Extract ImageDescription from a raw EXIF block (TIFF structure,
/// optionally still prefixed with the `Exif\0\0` APP1 marker).
pub fn image_description(exif: &[u8]) -> Option<String> {
    let tiff = exif.strip_prefix(b"Exif\0\0").unwrap_or(exif);
    let parsed = match Reader::new().read_raw(tiff.to_vec()) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("unreadable EXIF block: {}", e);
            return None;
        }
    };

    let field = parsed.get_field(Tag::ImageDescription, In::PRIMARY)?;
    // Some writers store the text as UNDEFINED instead of ASCII
    let raw = match &field.value {
        Value::Ascii(parts) => parts.first()?.as_slice(),
        Value::Undefined(bytes, _) => bytes.as_slice(),
        _ => return None,
    };

    let text = raw.split(|b| *b == 0).next().unwrap_or_default();
    String::from_utf8(text.to_vec()).ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    const IMAGE_DESCRIPTION: u16 = 0x010E;
    const TYPE_ASCII: u16 = 2;

    /// A small real JPEG whose APP1 segment carries `description`
    pub(crate) fn jpeg_with_description(description: &str) -> Vec<u8> {
        let pixels = vec![128u8; 16 * 16 * 3];
        let mut jpeg = Vec::new();
        JpegEncoder::new(&mut jpeg)
            .encode(&pixels, 16, 16, ExtendedColorType::Rgb8)
            .unwrap();

        let mut payload = b"Exif\0\0".to_vec();
        payload.extend(tiff_with_description(description, false));
        let mut app1 = vec![0xFF, 0xE1];
        app1.extend(u16::try_from(payload.len() + 2).unwrap().to_be_bytes());
        app1.extend(payload);

        // Right after SOI
        assert_eq!(&jpeg[..2], [0xFF, 0xD8]);
        let mut out = jpeg[..2].to_vec();
        out.extend(app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    /// Build a minimal TIFF block with a single ImageDescription entry
    fn tiff_with_description(description: &str, big_endian: bool) -> Vec<u8> {
        let u16b = |v: u16| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        let u32b = |v: u32| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };

        let mut text = description.as_bytes().to_vec();
        text.push(0);

        let mut out = Vec::new();
        out.extend(if big_endian { b"MM" } else { b"II" });
        out.extend(u16b(42));
        out.extend(u32b(8));
        // IFD0 with one entry, value stored right after the IFD
        out.extend(u16b(1));
        out.extend(u16b(IMAGE_DESCRIPTION));
        out.extend(u16b(TYPE_ASCII));
        out.extend(u32b(text.len() as u32));
        out.extend(u32b(8 + 2 + 12 + 4));
        out.extend(u32b(0)); // next IFD
        out.extend(text);
        out
    }

    #[test]
    fn test_description_little_endian() {
        let json = r#"{"product_id":"0914","media_date":"2013-07-25T160101+0100"}"#;
        let tiff = tiff_with_description(json, false);
        assert_eq!(image_description(&tiff).as_deref(), Some(json));
    }

    #[test]
    fn test_description_big_endian_with_app1_prefix() {
        let mut exif = b"Exif\0\0".to_vec();
        exif.extend(tiff_with_description(r#"{"product_id":"0901"}"#, true));
        assert_eq!(
            image_description(&exif).as_deref(),
            Some(r#"{"product_id":"0901"}"#)
        );
    }

    #[test]
    fn test_short_description_stored_inline() {
        let tiff = tiff_with_description("ab", true);
        // Rewrite the entry so the value sits in the offset field
        let mut inline = tiff[..14].to_vec();
        inline.extend(u32::to_be_bytes(3));
        inline.extend(b"ab\0\0");
        inline.extend(u32::to_be_bytes(0));
        assert_eq!(image_description(&inline).as_deref(), Some("ab"));
    }

    #[test]
    fn test_garbage_has_no_description() {
        assert!(image_description(b"").is_none());
        assert!(image_description(b"XX\0*\0\0\0\x08").is_none());
        let mut truncated = tiff_with_description("cut off", false);
        truncated.truncate(20);
        assert!(image_description(&truncated).is_none());
    }

    #[test]
    fn test_reads_description_from_jpeg_file() {
        let json = r#"{"product_id":"0914","media_date":"2015-03-01T101010+0100"}"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bebop_2015-03-01.jpg");
        std::fs::write(&path, jpeg_with_description(json)).unwrap();

        assert_eq!(read_image_description(&path).as_deref(), Some(json));
    }

    #[test]
    fn test_jpeg_without_exif_yields_none() {
        let mut jpeg = Vec::new();
        JpegEncoder::new(&mut jpeg)
            .encode(&[0u8; 8 * 8 * 3], 8, 8, ExtendedColorType::Rgb8)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, jpeg).unwrap();

        assert!(read_image_description(&path).is_none());
    }

    #[test]
    fn test_non_jpeg_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        assert!(read_image_description(&path).is_none());
        assert!(read_image_description(&dir.path().join("missing.jpg")).is_none());
    }
}
