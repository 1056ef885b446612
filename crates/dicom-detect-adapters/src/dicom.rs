//! DICOM decoding adapter.

use std::collections::HashMap;

use anyhow::{Context, Result};
use dicom_dictionary_std::tags;
use dicom_object::DefaultDicomObject;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use image::DynamicImage;
use tracing::debug;

use dicom_detect_core::domain::{TAG_SERIES_UID, TAG_SOP_UID, TAG_STUDY_UID};
use dicom_detect_core::InstanceDecoder;

/// Length of the optional file preamble before the `DICM` magic code.
const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// Identifier tags read from the dataset, keyed by keyword.
const IDENTIFIER_TAGS: [(&str, dicom_core::Tag); 3] = [
    (TAG_STUDY_UID, tags::STUDY_INSTANCE_UID),
    (TAG_SERIES_UID, tags::SERIES_INSTANCE_UID),
    (TAG_SOP_UID, tags::SOP_INSTANCE_UID),
];

/// Decodes DICOM Part 10 payloads with `dicom-rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomDecoder;

impl DicomDecoder {
    /// Creates a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl InstanceDecoder for DicomDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        let obj = parse_dicom(bytes)?;

        let pixels = obj
            .decode_pixel_data()
            .context("Failed to decode pixel data")?;
        debug!(
            "Decoded {}x{} pixels, {} sample(s) per pixel",
            pixels.columns(),
            pixels.rows(),
            pixels.samples_per_pixel()
        );

        // Stored values, without rescale or windowing
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        pixels
            .to_dynamic_image_with_options(0, &options)
            .context("Failed to convert first frame to an image")
    }
}

/// Parses a DICOM file, with or without its 128-byte preamble.
///
/// # Errors
///
/// Returns an error if the `DICM` magic code is missing or the file meta
/// group or dataset is malformed.
pub fn parse_dicom(bytes: &[u8]) -> Result<DefaultDicomObject> {
    let body = if bytes.get(PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()) == Some(MAGIC.as_slice()) {
        &bytes[PREAMBLE_LEN..]
    } else if bytes.starts_with(MAGIC) {
        bytes
    } else {
        anyhow::bail!("Not a DICOM file: missing DICM magic code");
    };

    dicom_object::from_reader(body).context("Failed to parse DICOM file")
}

/// Reads the identifier tags a host would supply alongside `bytes`.
///
/// Absent tags are left out of the map.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or a present tag is not a
/// string.
pub fn read_identifiers(bytes: &[u8]) -> Result<HashMap<String, String>> {
    let obj = parse_dicom(bytes)?;
    let mut identifiers = HashMap::new();

    for (keyword, tag) in IDENTIFIER_TAGS {
        let Ok(element) = obj.element(tag) else {
            debug!("Tag {keyword} not present");
            continue;
        };
        let value = element
            .to_str()
            .with_context(|| format!("Tag {keyword} is not a string"))?;
        identifiers.insert(
            keyword.to_string(),
            value.trim_end_matches(['\0', ' ']).to_string(),
        );
    }

    Ok(identifiers)
}
