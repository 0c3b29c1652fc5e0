//! Turns a classified archive into the canonical dataset bundle

use pixlise_common::{PixliseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::breadboard::DETECTOR_BREADBOARD;
use crate::layout::{ClassifiedArchive, MATCHED_DIR};
use crate::model::{
    BeamLocation, ColumnType, DetectorSample, FileMeta, ImageMeta, MatchedImage, MetaData,
    MetaValue, PseudoIntensityRange, ReadType, META_DETECTOR_ID, META_LIVETIME, META_OFFSET,
    META_PMC, META_READTYPE, META_SOURCEFILE, META_XPERCHAN,
};
use crate::product_id::{base_name, FileNameMeta};

pub const DETECTOR_FM: &str = "PIXL";
pub const DETECTOR_EM: &str = "PIXL-EM-E2E";
pub const GROUP_FM: &str = "PIXL-FM";
pub const GROUP_EM: &str = "PIXL-EM";

/// `SOURCEFILE` of spectra synthesized during assembly
pub const GENERATED_SOURCE: &str = "GeneratedByPIXLISEConverter";

/// RTTs the engineering model writes into every dataset
const EM_RTTS: [&str; 2] = ["000000453", "000000454"];

/// Dataset level inputs besides the archive contents.
///
/// Serialized names match the parameter files written by the upload
/// tooling; every field may be omitted there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportParams {
    #[serde(rename = "datasetid")]
    pub dataset_id: String,
    pub title: String,
    #[serde(rename = "targetid")]
    pub target_id: String,
    pub target: String,
    #[serde(rename = "siteid")]
    pub site_id: i32,
    pub site: String,
    pub group: String,
    #[serde(rename = "detectorconfig")]
    pub detector_config: String,
    #[serde(rename = "bulkquantfile")]
    pub bulk_quant_file: String,
    #[serde(rename = "ev_xperchan_a")]
    pub xperchan_a: f32,
    #[serde(rename = "ev_offset_a")]
    pub offset_a: f32,
    #[serde(rename = "ev_xperchan_b")]
    pub xperchan_b: f32,
    #[serde(rename = "ev_offset_b")]
    pub offset_b: f32,
    #[serde(rename = "genbulkmax")]
    pub gen_bulk_max: bool,
    pub exclude_normal_dwell: bool,
    pub sol: String,
    /// Default context image file name, from the dataset customisation
    #[serde(rename = "defaultcontextimage")]
    pub default_context_image: String,
}

impl ImportParams {
    /// Reads a parameter file; `datasetid` and `group` are required there
    pub fn from_param_file(data: &[u8], path: &str) -> Result<Self> {
        let params: Self = serde_json::from_slice(data)
            .map_err(|e| PixliseError::invalid_format(path, e.to_string()))?;
        if params.dataset_id.is_empty() {
            return Err(PixliseError::invalid_format(path, "missing datasetid"));
        }
        if params.group.is_empty() {
            return Err(PixliseError::invalid_format(path, "missing group"));
        }
        Ok(params)
    }

    fn has_calibration(&self) -> bool {
        [self.xperchan_a, self.offset_a, self.xperchan_b, self.offset_b]
            .iter()
            .any(|v| *v != 0.0)
    }
}

/// Everything known about one PMC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmcBundle {
    pub spectra: Vec<DetectorSample>,
    pub beam: Option<BeamLocation>,
    pub housekeeping: Option<Vec<MetaValue>>,
    /// Output file name of this PMC's context image
    pub context_image: Option<String>,
    pub pseudo_intensities: Option<Vec<f32>>,
}

impl PmcBundle {
    pub fn is_valid(&self) -> bool {
        !self.spectra.is_empty() || self.beam.is_some() || self.context_image.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedImage {
    pub pmc: i32,
    pub image: String,
}

/// The canonical dataset, written as `dataset.bin`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetBundle {
    pub dataset_id: String,
    pub group: String,
    pub detector_config: String,
    pub bulk_quant_file: String,
    pub meta: FileMeta,
    pub housekeeping_columns: Vec<String>,
    pub housekeeping_types: Vec<ColumnType>,
    pub pseudo_intensity_ranges: Vec<PseudoIntensityRange>,
    pub pmcs: BTreeMap<i32, PmcBundle>,
    pub aligned_images: Vec<AlignedImage>,
    pub unaligned_images: Vec<String>,
    pub rgbu_images: Vec<ImageMeta>,
    pub disco_images: Vec<ImageMeta>,
    pub matched_images: Vec<MatchedImage>,
    pub default_context_image: String,
}

impl DatasetBundle {
    pub fn spectra_count(&self, read_type: ReadType) -> usize {
        self.pmcs
            .values()
            .flat_map(|b| &b.spectra)
            .filter(|s| s.read_type() == Some(read_type))
            .count()
    }

    /// Output names of every copied image
    pub fn image_names(&self) -> impl Iterator<Item = &str> {
        self.aligned_images
            .iter()
            .map(|a| a.image.as_str())
            .chain(self.unaligned_images.iter().map(String::as_str))
            .chain(self.matched_images.iter().map(|m| m.image_name.as_str()))
    }
}

/// An image to copy verbatim from the archive tree to the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    /// Path inside the archive tree
    pub source: String,
    /// File name under the dataset's image directory
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledDataset {
    pub bundle: DatasetBundle,
    pub images: Vec<ImageFile>,
}

/// Dataset metadata from the housekeeping product name
pub fn file_meta_from_product(meta: &FileNameMeta) -> FileMeta {
    let rtt = meta.rtt().to_string();
    FileMeta {
        sclk: meta.sclk().unwrap_or_else(|e| {
            info!(error = %e, "Dataset metadata did not contain SCLK");
            0
        }),
        sol: meta.sol().to_string(),
        site_id: meta.site_id().unwrap_or_else(|e| {
            info!(error = %e, "Dataset metadata did not contain a site");
            0
        }),
        drive_id: meta.drive_id().unwrap_or_else(|e| {
            info!(error = %e, "Dataset metadata did not contain a drive");
            0
        }),
        target_id: "?".to_string(),
        title: rtt.clone(),
        rtt,
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetAssembler;

impl DatasetAssembler {
    pub fn assemble(&self, archive: ClassifiedArchive, params: &ImportParams) -> Result<AssembledDataset> {
        let (meta, detector_config, group) = if archive.meta_from_params {
            params_only_meta(params)?
        } else {
            let mut meta = archive
                .housekeeping_meta
                .as_ref()
                .map(file_meta_from_product)
                .unwrap_or_default();
            let (detector_config, group) = select_detector(&mut meta, params)?;
            apply_param_meta(&mut meta, params);

            let rtt: i32 = meta.rtt.trim().parse().unwrap_or(0);
            if rtt <= 0 {
                return Err(PixliseError::invalid_format(
                    params.dataset_id.as_str(),
                    format!("failed to determine dataset RTT, read \"{}\"", meta.rtt),
                ));
            }
            (meta, detector_config, group)
        };

        let ClassifiedArchive {
            beams,
            mut spectra,
            bulk_max_spectra,
            context_images,
            housekeeping,
            pseudo_intensities,
            pseudo_intensity_ranges,
            rgbu_images,
            disco_images,
            white_disco_image,
            matched_images,
            ..
        } = archive;

        for (pmc, samples) in bulk_max_spectra {
            spectra.entry(pmc).or_default().extend(samples);
        }

        let mut bundle = DatasetBundle {
            dataset_id: params.dataset_id.clone(),
            group,
            detector_config,
            bulk_quant_file: params.bulk_quant_file.clone(),
            meta,
            pseudo_intensity_ranges,
            ..Default::default()
        };
        let mut images = Vec::new();

        // Per PMC bundles over the union of every input
        let mut pmcs: BTreeMap<i32, PmcBundle> = BTreeMap::new();
        for (pmc, beam) in beams {
            pmcs.entry(pmc).or_default().beam = Some(beam);
        }
        if let Some(hk) = housekeeping {
            bundle.housekeeping_columns = hk.column_names;
            bundle.housekeeping_types = hk.column_types;
            for (pmc, row) in hk.rows {
                pmcs.entry(pmc).or_default().housekeeping = Some(row);
            }
        }
        for (pmc, samples) in spectra {
            pmcs.entry(pmc).or_default().spectra = samples;
        }
        for (pmc, path) in &context_images {
            let name = base_name(path).to_string();
            pmcs.entry(*pmc).or_default().context_image = Some(name.clone());
            images.push(ImageFile {
                source: path.clone(),
                name,
            });
        }
        for (pmc, values) in pseudo_intensities {
            pmcs.entry(pmc).or_default().pseudo_intensities = Some(values);
        }

        if params.has_calibration() {
            apply_calibration(&mut pmcs, params)?;
        }
        if params.gen_bulk_max {
            synthesize_bulk_max(&mut pmcs, params)?;
        }

        pmcs.retain(|pmc, b| {
            let valid = b.is_valid();
            if !valid {
                warn!(pmc, "Dropping PMC with no spectra, beam location or context image");
            }
            valid
        });
        bundle.pmcs = pmcs;

        // Context images are aligned when a beam location projects onto them
        let projected: BTreeSet<i32> = bundle
            .pmcs
            .values()
            .filter_map(|b| b.beam.as_ref())
            .flat_map(|beam| beam.ij.keys().copied())
            .collect();
        for (pmc, path) in &context_images {
            let name = base_name(path).to_string();
            if projected.contains(pmc) {
                bundle.aligned_images.push(AlignedImage { pmc: *pmc, image: name });
            } else {
                bundle.unaligned_images.push(name);
            }
        }

        for (images_out, found) in [
            (&mut bundle.rgbu_images, rgbu_images),
            (&mut bundle.disco_images, disco_images),
        ] {
            for mut image in found {
                let name = base_name(&image.file_name).to_string();
                images.push(ImageFile {
                    source: std::mem::replace(&mut image.file_name, name.clone()),
                    name: name.clone(),
                });
                bundle.unaligned_images.push(name);
                images_out.push(image);
            }
        }

        let aligned_pmcs: BTreeSet<i32> = bundle.aligned_images.iter().map(|a| a.pmc).collect();
        for matched in &matched_images {
            if !aligned_pmcs.contains(&matched.aligned_beam_pmc) {
                return Err(PixliseError::CrossReference(format!(
                    "matched image {} references PMC {} which has no aligned image",
                    matched.image_name, matched.aligned_beam_pmc
                )));
            }
            images.push(ImageFile {
                source: format!("{MATCHED_DIR}/{}", matched.image_name),
                name: matched.image_name.clone(),
            });
        }
        bundle.matched_images = matched_images;

        bundle.default_context_image = choose_default_image(
            &params.default_context_image,
            &context_images,
            white_disco_image.as_deref(),
            &bundle.disco_images,
        );
        if !bundle.default_context_image.is_empty()
            && !bundle.image_names().any(|n| n == bundle.default_context_image)
        {
            return Err(PixliseError::CrossReference(format!(
                "default context image {} is not among the dataset's images",
                bundle.default_context_image
            )));
        }

        info!(
            dataset_id = %bundle.dataset_id,
            pmcs = bundle.pmcs.len(),
            images = images.len(),
            default_image = %bundle.default_context_image,
            "Assembled dataset"
        );
        Ok(AssembledDataset { bundle, images })
    }
}

/// Metadata for layouts without product names. The dataset id stands in
/// for the RTT, and a group must be given.
fn params_only_meta(params: &ImportParams) -> Result<(FileMeta, String, String)> {
    if params.group.is_empty() {
        return Err(PixliseError::invalid_format(
            params.dataset_id.as_str(),
            "no group given for a dataset without product names",
        ));
    }
    let mut meta = FileMeta {
        rtt: params.dataset_id.clone(),
        title: params.dataset_id.clone(),
        ..Default::default()
    };
    apply_param_meta(&mut meta, params);
    let detector_config = if params.detector_config.is_empty() {
        DETECTOR_BREADBOARD.to_string()
    } else {
        params.detector_config.clone()
    };
    Ok((meta, detector_config, params.group.clone()))
}

/// Picks detector config and group, checking the RTT against the dataset
/// id when nothing is overridden.
fn select_detector(meta: &mut FileMeta, params: &ImportParams) -> Result<(String, String)> {
    if !params.detector_config.is_empty() {
        let group = if !params.group.is_empty() {
            params.group.clone()
        } else if params.detector_config == DETECTOR_EM {
            GROUP_EM.to_string()
        } else {
            GROUP_FM.to_string()
        };
        return Ok((params.detector_config.clone(), group));
    }

    let mut is_em = false;
    if EM_RTTS.contains(&meta.rtt.as_str()) {
        is_em = true;
        if params.dataset_id == meta.rtt {
            return Err(PixliseError::invalid_format(
                params.dataset_id.as_str(),
                format!("read engineering RTT {}, dataset id must differ", meta.rtt),
            ));
        }
        meta.rtt = params.dataset_id.clone();
    } else if !params.dataset_id.is_empty()
        && meta.rtt != params.dataset_id
        && meta.rtt != format!("0{}", params.dataset_id)
    {
        return Err(PixliseError::invalid_format(
            params.dataset_id.as_str(),
            format!("expected dataset id {}, read RTT {}", params.dataset_id, meta.rtt),
        ));
    }

    is_em |= meta.sol.starts_with(['D', 'C']);
    let (detector, default_group) = if is_em {
        (DETECTOR_EM, GROUP_EM)
    } else {
        (DETECTOR_FM, GROUP_FM)
    };
    let group = if params.group.is_empty() {
        default_group.to_string()
    } else {
        params.group.clone()
    };
    Ok((detector.to_string(), group))
}

fn apply_param_meta(meta: &mut FileMeta, params: &ImportParams) {
    let set = |field: &mut String, value: &str| {
        if !value.trim().is_empty() {
            *field = value.to_string();
        }
    };
    set(&mut meta.title, &params.title);
    set(&mut meta.target, &params.target);
    set(&mut meta.target_id, &params.target_id);
    set(&mut meta.site, &params.site);
    set(&mut meta.sol, &params.sol);
    if params.site_id != 0 {
        meta.site_id = params.site_id;
    }
}

fn apply_calibration(pmcs: &mut BTreeMap<i32, PmcBundle>, params: &ImportParams) -> Result<()> {
    for (pmc, bundle) in pmcs.iter_mut() {
        for sample in &mut bundle.spectra {
            let (xperchan, offset) = match sample.detector_id() {
                Some("A") => (params.xperchan_a, params.offset_a),
                Some("B") => (params.xperchan_b, params.offset_b),
                other => {
                    return Err(PixliseError::invalid_format(
                        format!("PMC {pmc}"),
                        format!("cannot calibrate spectrum with detector id {other:?}"),
                    ))
                },
            };
            if xperchan != 0.0 {
                sample.set(META_XPERCHAN, MetaValue::Float(xperchan));
            }
            if offset != 0.0 {
                sample.set(META_OFFSET, MetaValue::Float(offset));
            }
        }
    }
    Ok(())
}

/// Running totals for one detector's synthesized spectra
#[derive(Default)]
struct Accumulator {
    sum: Vec<i64>,
    max: Vec<i64>,
    contributors: usize,
    live_time: (f32, usize),
    xperchan: (f32, usize),
    offset: (f32, usize),
}

fn average((total, count): (f32, usize)) -> Option<f32> {
    (count > 0).then(|| total / count as f32)
}

fn synthesize_bulk_max(pmcs: &mut BTreeMap<i32, PmcBundle>, params: &ImportParams) -> Result<()> {
    // One past the highest PMC any input mentions
    let synthetic_pmc = pmcs.keys().next_back().map_or(1, |max| max + 1);
    let mut detectors: BTreeMap<String, Accumulator> = BTreeMap::new();

    for sample in pmcs
        .values()
        .flat_map(|b| &b.spectra)
        .filter(|s| s.read_type() == Some(ReadType::Normal))
    {
        let Some(detector) = sample.detector_id() else {
            continue;
        };
        let acc = detectors.entry(detector.to_string()).or_default();
        if acc.contributors == 0 {
            acc.sum = vec![0; sample.counts.len()];
            acc.max = vec![0; sample.counts.len()];
        } else if acc.sum.len() != sample.counts.len() {
            return Err(PixliseError::invalid_format(
                format!("detector {detector}"),
                format!(
                    "channel count differs between spectra: {} vs {}",
                    acc.sum.len(),
                    sample.counts.len()
                ),
            ));
        }
        for (i, v) in sample.counts.iter().enumerate() {
            acc.sum[i] = acc.sum[i].saturating_add(*v);
            acc.max[i] = acc.max[i].max(*v);
        }
        acc.contributors += 1;

        for (key, slot) in [
            (META_LIVETIME, &mut acc.live_time),
            (META_XPERCHAN, &mut acc.xperchan),
            (META_OFFSET, &mut acc.offset),
        ] {
            if let Some(v) = sample.float_meta(key) {
                slot.0 += v;
                slot.1 += 1;
            }
        }
    }

    if detectors.is_empty() {
        warn!("No normal spectra to generate bulk sum and max value spectra from");
        return Ok(());
    }

    let mut generated = Vec::new();
    for read_type in [ReadType::BulkSum, ReadType::MaxValue] {
        for (detector, acc) in &detectors {
            let mut meta = MetaData::new();
            meta.insert(META_PMC.into(), MetaValue::Int(synthetic_pmc));
            meta.insert(META_DETECTOR_ID.into(), detector.as_str().into());
            meta.insert(META_READTYPE.into(), read_type.as_str().into());
            meta.insert(META_SOURCEFILE.into(), GENERATED_SOURCE.into());

            let live_time = match read_type {
                ReadType::BulkSum => (acc.live_time.1 > 0).then_some(acc.live_time.0),
                _ => average(acc.live_time),
            };
            let fallback = |v: f32| (v != 0.0).then_some(v);
            let (xperchan_override, offset_override) = match detector.as_str() {
                "A" => (params.xperchan_a, params.offset_a),
                _ => (params.xperchan_b, params.offset_b),
            };
            for (key, value) in [
                (META_LIVETIME, live_time),
                (META_XPERCHAN, average(acc.xperchan).or_else(|| fallback(xperchan_override))),
                (META_OFFSET, average(acc.offset).or_else(|| fallback(offset_override))),
            ] {
                if let Some(v) = value {
                    meta.insert(key.into(), MetaValue::Float(v));
                }
            }

            let counts = match read_type {
                ReadType::BulkSum => acc.sum.clone(),
                _ => acc.max.clone(),
            };
            generated.push(DetectorSample::new(meta, counts));
        }
    }

    if params.exclude_normal_dwell {
        for bundle in pmcs.values_mut() {
            bundle.spectra.clear();
        }
    }
    info!(pmc = synthetic_pmc, spectra = generated.len(), "Generated bulk sum and max value spectra");
    pmcs.entry(synthetic_pmc).or_default().spectra = generated;
    Ok(())
}

fn choose_default_image(
    explicit: &str,
    context_images: &BTreeMap<i32, String>,
    white_disco: Option<&str>,
    disco_images: &[ImageMeta],
) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    if let Some(path) = context_images.values().next() {
        return base_name(path).to_string();
    }
    if let Some(white) = white_disco {
        info!(image = white, "Using white DISCO image as context image");
        return base_name(white).to_string();
    }
    disco_images
        .first()
        .map(|d| d.file_name.clone())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{HousekeepingData, ImageProjection, META_SCLK};

    const HK_NAME: &str = "RSI/PE__D077T0637741109_000RSI_N001003600098356100660__J01.CSV";

    fn sample(detector: &str, read_type: ReadType, counts: Vec<i64>, live: f32, xperchan: f32) -> DetectorSample {
        let mut meta = MetaData::new();
        meta.insert(META_DETECTOR_ID.into(), detector.into());
        meta.insert(META_READTYPE.into(), read_type.as_str().into());
        meta.insert(META_LIVETIME.into(), MetaValue::Float(live));
        meta.insert(META_XPERCHAN.into(), MetaValue::Float(xperchan));
        meta.insert(META_SCLK.into(), MetaValue::Int(1));
        DetectorSample::new(meta, counts)
    }

    fn params() -> ImportParams {
        ImportParams {
            dataset_id: "000983561".into(),
            ..Default::default()
        }
    }

    fn archive() -> ClassifiedArchive {
        let mut beam = BeamLocation::default();
        beam.ij.insert(10, ImageProjection { i: 1.0, j: 2.0 });

        let mut archive = ClassifiedArchive {
            housekeeping_meta: Some(FileNameMeta::parse(HK_NAME).unwrap()),
            housekeeping: Some(HousekeepingData {
                column_names: vec!["temp".into()],
                column_types: vec![ColumnType::Float],
                rows: BTreeMap::from([(10, vec![MetaValue::Float(1.5)]), (99, vec![MetaValue::Float(2.5)])]),
            }),
            ..Default::default()
        };
        archive.beams.insert(11, beam);
        archive.spectra.insert(
            10,
            vec![
                sample("A", ReadType::Normal, vec![1, 5, 0], 10.0, 8.0),
                sample("B", ReadType::Normal, vec![2, 2, 2], 10.0, 8.0),
            ],
        );
        archive.spectra.insert(
            11,
            vec![
                sample("A", ReadType::Normal, vec![3, 1, 4], 20.0, 10.0),
                sample("B", ReadType::Normal, vec![0, 9, 1], 30.0, 10.0),
            ],
        );
        archive.context_images.insert(
            10,
            "RCM/PCW_D077T0637741109_000RCM_N001003600098356100100__J01.TIF".into(),
        );
        archive
    }

    #[test]
    fn test_assemble_bundles_and_metadata() {
        let out = DatasetAssembler.assemble(archive(), &params()).unwrap();
        let bundle = &out.bundle;

        assert_eq!(bundle.meta.rtt, "000983561");
        assert_eq!(bundle.meta.title, "000983561");
        assert_eq!(bundle.meta.target_id, "?");
        assert_eq!(bundle.detector_config, DETECTOR_EM);
        assert_eq!(bundle.group, GROUP_EM);

        // PMC 99 only has housekeeping
        assert_eq!(bundle.pmcs.keys().copied().collect::<Vec<_>>(), vec![10, 11]);
        assert!(bundle.pmcs[&10].housekeeping.is_some());

        assert_eq!(bundle.aligned_images.len(), 1);
        assert_eq!(bundle.aligned_images[0].pmc, 10);
        assert_eq!(
            bundle.default_context_image,
            "PCW_D077T0637741109_000RCM_N001003600098356100100__J01.TIF"
        );
        assert_eq!(out.images.len(), 1);
        assert_eq!(bundle.spectra_count(ReadType::Normal), 4);
    }

    #[test]
    fn test_rtt_must_match_dataset_id() {
        let mut p = params();
        p.dataset_id = "123".into();
        let err = DatasetAssembler.assemble(archive(), &p).unwrap_err();
        assert!(err.to_string().contains("expected dataset id 123"));

        p.dataset_id = "00983561".into();
        assert!(DatasetAssembler.assemble(archive(), &p).is_ok());
    }

    #[test]
    fn test_missing_rtt_fails() {
        let mut a = archive();
        a.housekeeping_meta = None;
        let mut p = params();
        p.detector_config = DETECTOR_FM.into();
        let err = DatasetAssembler.assemble(a, &p).unwrap_err();
        assert!(err.to_string().contains("failed to determine dataset RTT"));
    }

    #[test]
    fn test_detector_override_picks_group() {
        let mut p = params();
        p.detector_config = DETECTOR_EM.into();
        p.title = "Cal target".into();
        let out = DatasetAssembler.assemble(archive(), &p).unwrap();
        assert_eq!(out.bundle.group, GROUP_EM);
        assert_eq!(out.bundle.meta.title, "Cal target");

        p.detector_config = "PIXL-breadboard".into();
        let out = DatasetAssembler.assemble(archive(), &p).unwrap();
        assert_eq!(out.bundle.group, GROUP_FM);
    }

    #[test]
    fn test_bulk_max_synthesis() {
        let mut p = params();
        p.gen_bulk_max = true;
        let out = DatasetAssembler.assemble(archive(), &p).unwrap();

        // PMC 99 carries housekeeping only, the generated spectra go after it
        let generated = &out.bundle.pmcs[&100].spectra;
        assert_eq!(generated.len(), 4);
        assert!(out.bundle.pmcs[&100].housekeeping.is_none());
        assert!(!out.bundle.pmcs.contains_key(&12));

        let bulk_a = &generated[0];
        assert_eq!(bulk_a.read_type(), Some(ReadType::BulkSum));
        assert_eq!(bulk_a.counts, vec![4, 6, 4]);
        assert_eq!(bulk_a.float_meta(META_LIVETIME), Some(30.0));
        assert_eq!(bulk_a.float_meta(META_XPERCHAN), Some(9.0));
        assert_eq!(bulk_a.meta[META_SOURCEFILE], MetaValue::Str(GENERATED_SOURCE.into()));

        let max_b = &generated[3];
        assert_eq!(max_b.read_type(), Some(ReadType::MaxValue));
        assert_eq!(max_b.detector_id(), Some("B"));
        assert_eq!(max_b.counts, vec![2, 9, 2]);
        assert_eq!(max_b.float_meta(META_LIVETIME), Some(20.0));

        assert_eq!(out.bundle.spectra_count(ReadType::Normal), 4);
    }

    #[test]
    fn test_meta_from_params_skips_rtt() {
        let mut a = archive();
        a.housekeeping_meta = None;
        a.meta_from_params = true;
        let mut p = crate::breadboard::unconfigured_import_params("lab-scan-7");
        p.title = String::new();

        let out = DatasetAssembler.assemble(a.clone(), &p).unwrap();
        assert_eq!(out.bundle.meta.rtt, "lab-scan-7");
        assert_eq!(out.bundle.meta.title, "lab-scan-7");
        assert_eq!(out.bundle.meta.target_id, "0");
        assert_eq!(out.bundle.detector_config, DETECTOR_BREADBOARD);
        assert_eq!(out.bundle.group, crate::breadboard::GROUP_BREADBOARD);
        assert_eq!(out.bundle.spectra_count(ReadType::BulkSum), 2);

        p.group = String::new();
        assert!(DatasetAssembler.assemble(a, &p).is_err());
    }

    #[test]
    fn test_generated_spectra_skip_housekeeping_only_pmc() {
        let mut a = archive();
        let hk = a.housekeeping.as_mut().unwrap();
        hk.rows.remove(&99);
        hk.rows.insert(12, vec![MetaValue::Float(9.9)]);
        let mut p = params();
        p.gen_bulk_max = true;
        let out = DatasetAssembler.assemble(a, &p).unwrap();

        assert_eq!(out.bundle.pmcs.keys().copied().collect::<Vec<_>>(), vec![10, 11, 13]);
        assert!(out.bundle.pmcs[&13].housekeeping.is_none());
        assert_eq!(out.bundle.pmcs[&13].spectra.len(), 4);
    }

    #[test]
    fn test_bulk_sum_saturates() {
        let mut a = archive();
        a.spectra.get_mut(&10).unwrap()[0].counts = vec![i64::MAX, 1, 1];
        let mut p = params();
        p.gen_bulk_max = true;
        let out = DatasetAssembler.assemble(a, &p).unwrap();
        assert_eq!(out.bundle.pmcs[&100].spectra[0].counts, vec![i64::MAX, 2, 5]);
    }

    #[test]
    fn test_exclude_normal_dwell_keeps_only_generated() {
        let mut p = params();
        p.gen_bulk_max = true;
        p.exclude_normal_dwell = true;
        let out = DatasetAssembler.assemble(archive(), &p).unwrap();
        assert_eq!(out.bundle.spectra_count(ReadType::Normal), 0);
        assert_eq!(out.bundle.spectra_count(ReadType::BulkSum), 2);
        // PMC 10 survives on its context image, 11 on its beam
        assert!(out.bundle.pmcs.contains_key(&10));
        assert!(out.bundle.pmcs.contains_key(&11));
    }

    #[test]
    fn test_calibration_override() {
        let mut p = params();
        p.xperchan_b = 7.5;
        let out = DatasetAssembler.assemble(archive(), &p).unwrap();
        let spectra = &out.bundle.pmcs[&10].spectra;
        assert_eq!(spectra[0].float_meta(META_XPERCHAN), Some(8.0));
        assert_eq!(spectra[1].float_meta(META_XPERCHAN), Some(7.5));

        let mut a = archive();
        a.spectra.get_mut(&10).unwrap()[0].meta.remove(META_DETECTOR_ID);
        assert!(DatasetAssembler.assemble(a, &p).is_err());
    }

    #[test]
    fn test_default_image_falls_back_to_disco() {
        let mut a = archive();
        a.context_images.clear();
        a.disco_images = vec![
            ImageMeta {
                file_name: "DISCO/red.png".into(),
                pmc: 1,
                leds: "R".into(),
                prod_type: "RCM".into(),
            },
            ImageMeta {
                file_name: "DISCO/white.png".into(),
                pmc: 1,
                leds: "W".into(),
                prod_type: "RCM".into(),
            },
        ];
        a.white_disco_image = Some("DISCO/white.png".into());
        let out = DatasetAssembler.assemble(a.clone(), &params()).unwrap();
        assert_eq!(out.bundle.default_context_image, "white.png");
        assert_eq!(out.bundle.disco_images.len(), 2);
        assert_eq!(out.bundle.unaligned_images.len(), 2);

        a.white_disco_image = None;
        let out = DatasetAssembler.assemble(a, &params()).unwrap();
        assert_eq!(out.bundle.default_context_image, "red.png");
    }

    #[test]
    fn test_explicit_default_image_must_exist() {
        let mut p = params();
        p.default_context_image = "nope.png".into();
        let err = DatasetAssembler.assemble(archive(), &p).unwrap_err();
        assert!(matches!(err, PixliseError::CrossReference(_)));
    }

    #[test]
    fn test_matched_image_needs_aligned_pmc() {
        let mut a = archive();
        a.matched_images.push(MatchedImage {
            image_name: "watson.png".into(),
            aligned_beam_pmc: 11,
            x_offset: 0.0,
            y_offset: 0.0,
            x_scale: 1.0,
            y_scale: 1.0,
        });
        let err = DatasetAssembler.assemble(a.clone(), &params()).unwrap_err();
        assert!(matches!(err, PixliseError::CrossReference(_)));

        a.matched_images[0].aligned_beam_pmc = 10;
        let out = DatasetAssembler.assemble(a, &params()).unwrap();
        assert_eq!(out.images.last().unwrap().source, "MATCHED/watson.png");
    }

    #[test]
    fn test_param_file_requires_id_and_group() {
        let ok = br#"{"datasetid":"123","group":"JPL Breadboard","ev_xperchan_a":7.9,"genbulkmax":true}"#;
        let p = ImportParams::from_param_file(ok, "import.json").unwrap();
        assert_eq!(p.xperchan_a, 7.9);
        assert!(p.gen_bulk_max);

        let err = ImportParams::from_param_file(br#"{"datasetid":"123"}"#, "import.json").unwrap_err();
        assert!(err.to_string().contains("missing group"));
    }
}
