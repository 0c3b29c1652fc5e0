//! Image alignment descriptors from the `MATCHED` directory
//!
//! Each descriptor is a small JSON document saying where an externally
//! produced image sits relative to the context image of one PMC:
//!
//! ```json
//! {
//!   "aligned-beam-pmc": 97,
//!   "matched-image": "PCW_0125_0678031418_000RCM_N00518120097012340760000J01.png",
//!   "x-offset": 11.5, "y-offset": -3.2,
//!   "x-scale": 2.13, "y-scale": 2.24
//! }
//! ```

use pixlise_common::{PixliseError, Result};
use serde::Deserialize;

use super::{DecodeContext, Decoder};
use crate::model::{BeamLocationByPmc, MatchedImage};

/// Largest offset, in pixels, either way
pub const MAX_OFFSET: f32 = 10000.0;

/// Largest scale factor; the smallest is its reciprocal
pub const MAX_SCALE: f32 = 100.0;

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "aligned-beam-pmc")]
    aligned_beam_pmc: i32,
    #[serde(rename = "matched-image")]
    matched_image: String,
    #[serde(rename = "x-offset")]
    x_offset: f32,
    #[serde(rename = "y-offset")]
    y_offset: f32,
    #[serde(rename = "x-scale")]
    x_scale: f32,
    #[serde(rename = "y-scale")]
    y_scale: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchedImageDecoder;

impl Decoder for MatchedImageDecoder {
    type Output = MatchedImage;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output> {
        let d: Descriptor = serde_json::from_slice(data)
            .map_err(|e| ctx.invalid(format!("bad alignment descriptor: {e}")))?;

        let offset_ok = |v: f32| (-MAX_OFFSET..=MAX_OFFSET).contains(&v);
        if !offset_ok(d.x_offset) || !offset_ok(d.y_offset) {
            return Err(ctx.invalid("x/y offsets invalid"));
        }
        let scale_ok = |v: f32| (1.0 / MAX_SCALE..=MAX_SCALE).contains(&v);
        if !scale_ok(d.x_scale) || !scale_ok(d.y_scale) {
            return Err(ctx.invalid("x/y scales invalid"));
        }
        if d.matched_image.is_empty() {
            return Err(ctx.invalid("no matched image named"));
        }

        Ok(MatchedImage {
            image_name: d.matched_image,
            aligned_beam_pmc: d.aligned_beam_pmc,
            x_offset: d.x_offset,
            y_offset: d.y_offset,
            x_scale: d.x_scale,
            y_scale: d.y_scale,
        })
    }
}

/// Checks a decoded descriptor against the rest of the archive.
///
/// `image_exists` answers whether the named image is present next to the
/// descriptor. The beam check is skipped when the dataset has no beam
/// locations at all (image-only datasets).
pub fn check_references(
    descriptor_path: &str,
    matched: &MatchedImage,
    beams: &BeamLocationByPmc,
    image_exists: impl Fn(&str) -> bool,
) -> Result<()> {
    if !beams.is_empty() && !beams.contains_key(&matched.aligned_beam_pmc) {
        return Err(PixliseError::CrossReference(format!(
            "matched image {descriptor_path} references beam locations for PMC which cannot be found: {}",
            matched.aligned_beam_pmc
        )));
    }
    if !image_exists(&matched.image_name) {
        return Err(PixliseError::CrossReference(format!(
            "matched image {descriptor_path} references image which cannot be found: {}",
            matched.image_name
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::BeamLocation;

    fn descriptor(x_offset: f32, x_scale: f32) -> String {
        format!(
            r#"{{"aligned-beam-pmc":97,"matched-image":"watson.png","x-offset":{x_offset},"y-offset":-3.5,"x-scale":{x_scale},"y-scale":2.24}}"#
        )
    }

    fn decode(json: &str) -> Result<MatchedImage> {
        MatchedImageDecoder.decode(json.as_bytes(), &DecodeContext::new("MATCHED/watson.json"))
    }

    #[test]
    fn test_decode_descriptor() {
        let m = decode(&descriptor(11.5, 2.13)).unwrap();
        assert_eq!(m.image_name, "watson.png");
        assert_eq!(m.aligned_beam_pmc, 97);
        assert_eq!(m.x_offset, 11.5);
        assert_eq!(m.y_offset, -3.5);
        assert_eq!(m.x_scale, 2.13);
    }

    #[test]
    fn test_range_limits() {
        assert!(decode(&descriptor(10000.0, 100.0)).is_ok());
        assert!(decode(&descriptor(-10000.0, 0.01)).is_ok());

        let err = decode(&descriptor(10000.5, 1.0)).unwrap_err();
        assert!(err.to_string().contains("offsets invalid"));
        let err = decode(&descriptor(0.0, 0.005)).unwrap_err();
        assert!(err.to_string().contains("scales invalid"));
        let err = decode(&descriptor(0.0, 101.0)).unwrap_err();
        assert!(err.to_string().contains("scales invalid"));
    }

    #[test]
    fn test_missing_field_is_invalid_format() {
        let err = decode(r#"{"aligned-beam-pmc":97}"#).unwrap_err();
        assert!(matches!(err, PixliseError::InvalidFormat { .. }));
    }

    #[test]
    fn test_check_references() {
        let m = decode(&descriptor(0.0, 1.0)).unwrap();
        let mut beams = BeamLocationByPmc::new();

        // No beams at all: only the image matters
        assert!(check_references("d.json", &m, &beams, |n| n == "watson.png").is_ok());

        beams.insert(12, BeamLocation::default());
        let err = check_references("d.json", &m, &beams, |_| true).unwrap_err();
        assert!(matches!(err, PixliseError::CrossReference(_)));

        beams.insert(97, BeamLocation::default());
        assert!(check_references("d.json", &m, &beams, |_| true).is_ok());
        let err = check_references("d.json", &m, &beams, |_| false).unwrap_err();
        assert!(err.to_string().contains("watson.png"));
    }
}
