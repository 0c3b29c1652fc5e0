//! Breadboard deliveries
//!
//! Lab breadboard runs carry no product identifiers. The archive holds a
//! flat directory of MSA files, one per PMC, numbered by a trailing
//! sequence number:
//!
//! ```text
//! import.json                          (optional)
//! spectra/Normal_A_0612673072_000001C5_000013.msa
//! spectra/Normal_A_0612673072_000001C5_000014.msa
//! context/scan_overview_1.tif
//! ```
//!
//! Beam locations are usually derived from each spectrum's X/Y/Z position,
//! and bulk sum/max value spectra are generated since none are delivered.

use pixlise_common::{PixliseError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::archive::ArchiveTree;
use crate::assemble::ImportParams;
use crate::decode::{
    BeamDecoder, DecodeContext, Decoder, HousekeepingDecoder, MsaDecoder, PseudoIntensityDecoder,
    PseudoIntensityRangeDecoder,
};
use crate::layout::{has_extension, read_matched_images, ClassifiedArchive};
use crate::model::{
    BeamLocation, BeamLocationByPmc, ImageProjection, MetaValue, ReadType, SpectraByPmc, META_PMC,
    META_READTYPE, META_SOURCEFILE,
};
use crate::paths::PSEUDO_INTENSITY_RANGES;
use crate::product_id::base_name;

pub const DEFAULT_MSA_DIR: &str = "spectra";
/// `xscale,xbias,yscale,ybias` used when nothing else is given
pub const DEFAULT_BEAM_PARAMS: &str = "10,0,10,0";
pub const DETECTOR_BREADBOARD: &str = "Breadboard";
pub const GROUP_BREADBOARD: &str = "JPL Breadboard";

const IMAGE_EXTENSIONS: [&str; 4] = ["tif", "png", "jpg", "jpeg"];

/// Breadboard specific entries of the parameter file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BreadboardParams {
    #[serde(rename = "msadir")]
    pub msa_dir: String,
    #[serde(rename = "beamparams")]
    pub beam_params: String,
    #[serde(rename = "beamfile")]
    pub beam_file: String,
    pub housekeeping: String,
    #[serde(rename = "contextimgdir")]
    pub context_img_dir: String,
    #[serde(rename = "pseudointensitycsv")]
    pub pseudo_intensity_csv: String,
    #[serde(rename = "singledetectormsa")]
    pub single_detector_msa: bool,
    /// Number PMCs by file order, for files written without a PMC
    #[serde(rename = "genpmcs")]
    pub gen_pmcs: bool,
    #[serde(rename = "readtype")]
    pub read_type: String,
    #[serde(rename = "detaduplicate")]
    pub detector_a_duplicate: bool,
}

impl BreadboardParams {
    /// Settings for an archive without a parameter file
    pub fn unconfigured() -> Self {
        Self {
            msa_dir: DEFAULT_MSA_DIR.to_string(),
            beam_params: DEFAULT_BEAM_PARAMS.to_string(),
            gen_pmcs: true,
            read_type: ReadType::Normal.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn from_param_file(data: &[u8], path: &str) -> Result<Self> {
        let mut params: Self = serde_json::from_slice(data)
            .map_err(|e| PixliseError::invalid_format(path, e.to_string()))?;
        if params.msa_dir.trim().is_empty() {
            params.msa_dir = DEFAULT_MSA_DIR.to_string();
        }
        Ok(params)
    }

    fn read_type_override(&self) -> Result<Option<ReadType>> {
        if self.read_type.is_empty() {
            return Ok(None);
        }
        self.read_type
            .parse()
            .map(Some)
            .map_err(|e: String| PixliseError::invalid_format("readtype", e))
    }

    fn msa_decoder(&self) -> MsaDecoder {
        if self.single_detector_msa {
            MsaDecoder::single_detector(!self.gen_pmcs)
        } else {
            MsaDecoder::multi_detector(!self.gen_pmcs).with_detector_a_duplicate(self.detector_a_duplicate)
        }
    }
}

/// Dataset level parameters for an archive without a parameter file
pub fn unconfigured_import_params(dataset_id: &str) -> ImportParams {
    ImportParams {
        dataset_id: dataset_id.to_string(),
        title: dataset_id.to_string(),
        target_id: "0".to_string(),
        group: GROUP_BREADBOARD.to_string(),
        detector_config: DETECTOR_BREADBOARD.to_string(),
        gen_bulk_max: true,
        ..Default::default()
    }
}

/// Linear map from stage position to context image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamParams {
    pub x_scale: f32,
    pub x_bias: f32,
    pub y_scale: f32,
    pub y_bias: f32,
}

impl std::str::FromStr for BeamParams {
    type Err = PixliseError;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PixliseError::invalid_format("beamparams", format!("{s}: {e}")))?;
        match values.as_slice() {
            [x_scale, x_bias, y_scale, y_bias] => Ok(Self {
                x_scale: *x_scale,
                x_bias: *x_bias,
                y_scale: *y_scale,
                y_bias: *y_bias,
            }),
            _ => Err(PixliseError::invalid_format(
                "beamparams",
                format!("expected 4 comma separated values, got \"{s}\""),
            )),
        }
    }
}

/// Trailing `_<n>` of an MSA file name
pub fn sequence_number(path: &str) -> Option<i32> {
    let stem = base_name(path).rsplit_once('.')?.0;
    let (_, seq) = stem.rsplit_once('_')?;
    seq.parse().ok().filter(|n| *n > 0)
}

/// Read type from a name like `Normal_A_0612673072_000001C5_000013.msa`
pub fn read_type_from_name(path: &str) -> Option<ReadType> {
    let name = base_name(path);
    let bits: Vec<&str> = name.split('_').collect();
    if bits.len() != 5 {
        return None;
    }
    bits[0].parse().ok()
}

/// MSA files to read, ordered by sequence number. Notes files and other
/// strays without one are skipped.
fn spectrum_files<'t>(tree: &'t ArchiveTree, params: &BreadboardParams, verify_read_type: bool) -> Vec<&'t str> {
    let mut files: Vec<(i32, &str)> = tree
        .files_in(&params.msa_dir)
        .into_iter()
        .filter(|p| has_extension(p, "msa"))
        .filter(|p| {
            let ok = !verify_read_type || read_type_from_name(p).is_some();
            if !ok {
                info!(path = %p, "Ignoring spectrum file, no read type in name");
            }
            ok
        })
        .filter_map(|p| match sequence_number(p) {
            Some(seq) => Some((seq, p)),
            None => {
                warn!(path = %p, "Ignoring spectrum file, no sequence number in name");
                None
            },
        })
        .collect();
    files.sort_by_key(|(seq, _)| *seq);
    files.into_iter().map(|(_, p)| p).collect()
}

fn read_spectra(tree: &ArchiveTree, params: &BreadboardParams) -> Result<SpectraByPmc> {
    let read_type_override = params.read_type_override()?;
    let files = spectrum_files(tree, params, read_type_override.is_none());
    info!(dir = %params.msa_dir, files = files.len(), "Reading breadboard spectra");

    let decoder = params.msa_decoder();
    let mut spectra = SpectraByPmc::new();
    for (idx, path) in files.iter().enumerate() {
        let data = file(tree, path)?;
        let ctx = DecodeContext::new(path);
        let read_type = match read_type_override {
            Some(rt) => rt,
            None => read_type_from_name(path).ok_or_else(|| ctx.invalid("no read type in file name"))?,
        };

        for mut sample in decoder.decode(data, &ctx)? {
            if params.gen_pmcs {
                sample.set(META_PMC, MetaValue::Int(idx as i32 + 1));
            }
            if sample.meta.contains_key(META_SOURCEFILE) {
                return Err(ctx.invalid("unexpected SOURCEFILE metadata"));
            }
            sample.set(META_SOURCEFILE, base_name(path).into());
            sample.set(META_READTYPE, read_type.as_str().into());

            let pmc = sample
                .meta
                .get(META_PMC)
                .and_then(MetaValue::as_int)
                .ok_or_else(|| ctx.invalid("no PMC for spectrum"))?;
            spectra.entry(pmc).or_default().push(sample);
        }
        debug!(path = %path, "Read spectrum file");
    }
    Ok(spectra)
}

/// Beam location per PMC from its first spectrum's stage position
pub fn beams_from_spectra(
    spectra: &SpectraByPmc,
    params: BeamParams,
    context_pmc: i32,
) -> Result<BeamLocationByPmc> {
    let mut beams = BeamLocationByPmc::new();
    for (pmc, samples) in spectra {
        let Some(first) = samples.first() else {
            continue;
        };
        let position = |key: &str| match first.meta.get(key) {
            Some(MetaValue::Float(v)) => Ok(*v),
            _ => Err(PixliseError::invalid_format(
                format!("PMC {pmc}"),
                format!("cannot generate beam location, {key} is not a float"),
            )),
        };
        let (x, y, z) = (position("XPOSITION")?, position("YPOSITION")?, position("ZPOSITION")?);
        beams.insert(
            *pmc,
            BeamLocation {
                x,
                y,
                z,
                geom_corr: None,
                ij: BTreeMap::from([(
                    context_pmc,
                    ImageProjection {
                        i: x * params.x_scale + params.x_bias,
                        j: y * params.y_scale + params.y_bias,
                    },
                )]),
            },
        );
    }
    Ok(beams)
}

/// Context images keyed by the sequence number in their name. Images
/// without one go to PMC 1.
fn read_context_images(tree: &ArchiveTree, dir: &str) -> BTreeMap<i32, String> {
    let mut images = BTreeMap::new();
    for path in tree.files_in(dir) {
        if !IMAGE_EXTENSIONS.iter().any(|ext| has_extension(path, ext)) {
            continue;
        }
        let pmc = sequence_number(path).unwrap_or(1);
        match images.entry(pmc) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(path.to_string());
            },
            std::collections::btree_map::Entry::Occupied(_) => {
                warn!(path = %path, pmc, "Second context image for PMC, ignoring");
            },
        }
    }
    images
}

fn file<'t>(tree: &'t ArchiveTree, path: &str) -> Result<&'t [u8]> {
    tree.get(path).ok_or_else(|| PixliseError::not_found("archive", path))
}

/// Reads a breadboard archive. `ranges` is the pseudo-intensity range
/// descriptor, needed only when the parameters name a pseudo-intensity file.
pub fn classify(tree: &ArchiveTree, params: &BreadboardParams, ranges: Option<&[u8]>) -> Result<ClassifiedArchive> {
    let mut out = ClassifiedArchive {
        meta_from_params: true,
        ..Default::default()
    };

    if !params.context_img_dir.is_empty() {
        out.context_images = read_context_images(tree, &params.context_img_dir);
    }
    let context_pmc = out.context_images.keys().next().copied().unwrap_or(1);

    if !params.housekeeping.is_empty() {
        info!(path = %params.housekeeping, "Reading housekeeping");
        let decoder = HousekeepingDecoder { header_lines: 0 };
        let ctx = DecodeContext::new(&params.housekeeping);
        out.housekeeping = Some(decoder.decode(file(tree, &params.housekeeping)?, &ctx)?);
    }

    if !params.pseudo_intensity_csv.is_empty() {
        let ranges = ranges.ok_or_else(|| {
            PixliseError::invalid_format(
                params.pseudo_intensity_csv.as_str(),
                "pseudo-intensity CSV given, but no pseudo-intensity ranges file is available",
            )
        })?;
        out.pseudo_intensity_ranges =
            PseudoIntensityRangeDecoder.decode(ranges, &DecodeContext::new(PSEUDO_INTENSITY_RANGES))?;
        out.pseudo_intensities = PseudoIntensityDecoder.decode(
            file(tree, &params.pseudo_intensity_csv)?,
            &DecodeContext::new(&params.pseudo_intensity_csv),
        )?;
    }

    out.spectra = read_spectra(tree, params)?;

    if !params.beam_params.is_empty() {
        let beam_params: BeamParams = params.beam_params.parse()?;
        out.beams = beams_from_spectra(&out.spectra, beam_params, context_pmc)?;
    } else if !params.beam_file.is_empty() {
        info!(path = %params.beam_file, context_pmc, "Reading beam locations");
        out.beams = BeamDecoder::single_image(context_pmc)
            .decode(file(tree, &params.beam_file)?, &DecodeContext::new(&params.beam_file))?;
    }

    out.matched_images = read_matched_images(tree, &out.beams)?;
    info!(
        pmcs = out.spectra.len(),
        beams = out.beams.len(),
        images = out.context_images.len(),
        "Read breadboard archive"
    );
    Ok(out)
}
