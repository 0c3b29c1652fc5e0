//! Archive layout detection and per-product decoding
//!
//! Two instrument directory layouts are delivered. The older "pipeline" one
//! names each directory after what it holds; the "data-drive" one names
//! directories by product type. Both are described as a table of
//! [`ProductDir`]s, each mapped to the decoder for its role. Lab breadboard
//! deliveries have no product names and are read by [`crate::breadboard`].

use pixlise_common::{PixliseError, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::archive::ArchiveTree;
use crate::breadboard::{self, BreadboardParams, DEFAULT_MSA_DIR};
use crate::decode::matched_images::check_references;
use crate::decode::{
    BeamDecoder, DecodeContext, Decoder, HousekeepingDecoder, MatchedImageDecoder, MsaDecoder,
    PseudoIntensityDecoder, PseudoIntensityRangeDecoder, SpectraCsvDecoder,
};
use crate::model::{
    BeamLocationByPmc, HousekeepingData, ImageMeta, MatchedImage, MetaValue, PseudoIntensities,
    PseudoIntensityRange, ReadType, SpectraByPmc, META_DETECTOR_ID, META_PMC, META_READTYPE,
};
use crate::orchestrator::PARAM_FILE;
use crate::paths::PSEUDO_INTENSITY_RANGES;
use crate::product_id::{latest_versions, FileNameMeta};

/// Directory holding image alignment descriptors
pub const MATCHED_DIR: &str = "MATCHED";

/// Colour filter of a white-light DISCO image
const WHITE_FILTER: &str = "W";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Pipeline,
    DataDrive,
    Breadboard,
}

impl Layout {
    /// Picks the layout by its marker directory at the archive root
    pub fn detect(tree: &ArchiveTree) -> Option<Self> {
        let dirs = tree.root_dirs();
        if dirs.contains("drift_corr_x_ray_beam_location") {
            Some(Layout::Pipeline)
        } else if dirs.contains("RSI") {
            Some(Layout::DataDrive)
        } else if dirs.contains(DEFAULT_MSA_DIR) || tree.contains(PARAM_FILE) {
            Some(Layout::Breadboard)
        } else {
            None
        }
    }

    pub fn product_dirs(self) -> &'static [ProductDir] {
        match self {
            Layout::Pipeline => &PIPELINE_DIRS,
            Layout::DataDrive => &DATA_DRIVE_DIRS,
            Layout::Breadboard => &[],
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layout::Pipeline => write!(f, "pipeline"),
            Layout::DataDrive => write!(f, "data-drive"),
            Layout::Breadboard => write!(f, "breadboard"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProductRole {
    Beam,
    Spectra,
    BulkMax,
    ContextImage,
    Housekeeping,
    PseudoIntensity,
    Rgbu,
    Disco,
}

impl ProductRole {
    pub fn decoder(self) -> ProductDecoder {
        match self {
            ProductRole::Beam => ProductDecoder::Beam(BeamDecoder::multi_image()),
            ProductRole::Spectra => ProductDecoder::Spectra(SpectraCsvDecoder),
            ProductRole::BulkMax => ProductDecoder::BulkMax(MsaDecoder::multi_detector(false)),
            ProductRole::Housekeeping => ProductDecoder::Housekeeping(HousekeepingDecoder::default()),
            ProductRole::PseudoIntensity => ProductDecoder::PseudoIntensity(PseudoIntensityDecoder),
            ProductRole::ContextImage | ProductRole::Rgbu | ProductRole::Disco => ProductDecoder::Image,
        }
    }
}

/// One product directory of a layout
#[derive(Debug, Clone, Copy)]
pub struct ProductDir {
    pub role: ProductRole,
    pub dirs: &'static [&'static str],
    /// Compared case-insensitively
    pub extension: &'static str,
    /// How many current files are normal; only used for warnings
    pub expected: Option<usize>,
}

const fn dir(
    role: ProductRole,
    dirs: &'static [&'static str],
    extension: &'static str,
    expected: Option<usize>,
) -> ProductDir {
    ProductDir {
        role,
        dirs,
        extension,
        expected,
    }
}

const PIPELINE_DIRS: [ProductDir; 6] = [
    dir(ProductRole::Beam, &["drift_corr_x_ray_beam_location"], "csv", Some(2)),
    dir(ProductRole::Spectra, &["localized_full_spectra"], "csv", Some(1)),
    dir(ProductRole::BulkMax, &["bulk_histogram_inputs"], "msa", Some(2)),
    dir(ProductRole::ContextImage, &["image_mark_up"], "tif", None),
    dir(ProductRole::Housekeeping, &["spatial_inputs"], "csv", Some(1)),
    dir(ProductRole::PseudoIntensity, &["pseudointensity_maps"], "csv", Some(1)),
];

const DATA_DRIVE_DIRS: [ProductDir; 8] = [
    dir(ProductRole::Beam, &["RXL"], "csv", Some(1)),
    dir(ProductRole::Spectra, &["RFS"], "csv", Some(1)),
    dir(ProductRole::BulkMax, &["RBS", "RMS"], "msa", Some(2)),
    dir(ProductRole::ContextImage, &["RCM"], "tif", None),
    dir(ProductRole::Housekeeping, &["RSI"], "csv", Some(1)),
    dir(ProductRole::PseudoIntensity, &["RPM"], "csv", Some(1)),
    dir(ProductRole::Rgbu, &["RGBU"], "tif", None),
    dir(ProductRole::Disco, &["DISCO"], "png", None),
];

/// Decoder per product role
#[derive(Debug, Clone, Copy)]
pub enum ProductDecoder {
    Beam(BeamDecoder),
    Spectra(SpectraCsvDecoder),
    /// Dual detector MSA, tagged by product type
    BulkMax(MsaDecoder),
    Housekeeping(HousekeepingDecoder),
    PseudoIntensity(PseudoIntensityDecoder),
    /// Images are not read, only described from their names
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedProduct {
    Beams(BeamLocationByPmc),
    Spectra(SpectraByPmc),
    Housekeeping(HousekeepingData),
    PseudoIntensities(PseudoIntensities),
    Image(ImageMeta),
}

impl ProductDecoder {
    pub fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<DecodedProduct> {
        Ok(match self {
            ProductDecoder::Beam(d) => DecodedProduct::Beams(d.decode(data, ctx)?),
            ProductDecoder::Spectra(d) => DecodedProduct::Spectra(d.decode(data, ctx)?),
            ProductDecoder::BulkMax(d) => DecodedProduct::Spectra(decode_bulk_max(d, data, ctx)?),
            ProductDecoder::Housekeeping(d) => DecodedProduct::Housekeeping(d.decode(data, ctx)?),
            ProductDecoder::PseudoIntensity(d) => {
                DecodedProduct::PseudoIntensities(d.decode(data, ctx)?)
            },
            ProductDecoder::Image => DecodedProduct::Image(image_meta(ctx)?),
        })
    }
}

/// Bulk sum (`RBS`) and max value (`RMS`) spectra carry no PMC in the file;
/// it comes from the file name.
fn decode_bulk_max(decoder: &MsaDecoder, data: &[u8], ctx: &DecodeContext<'_>) -> Result<SpectraByPmc> {
    let meta = ctx.product_meta()?;
    let read_type = match meta.prod_type.as_str() {
        "RBS" => ReadType::BulkSum,
        "RMS" => ReadType::MaxValue,
        other => return Err(ctx.invalid(format!("unexpected bulk/max MSA product type: {other}"))),
    };
    let pmc = meta.pmc()?;

    let mut samples = decoder.decode(data, ctx)?;
    for (idx, sample) in samples.iter_mut().enumerate() {
        sample.set(META_READTYPE, read_type.as_str().into());
        sample.set(META_DETECTOR_ID, if idx == 0 { "A" } else { "B" }.into());
        sample.set(META_PMC, MetaValue::Int(pmc));
    }
    info!(path = %ctx.path, %read_type, pmc, "Read bulk/max MSA");
    Ok(SpectraByPmc::from([(pmc, samples)]))
}

fn image_meta(ctx: &DecodeContext<'_>) -> Result<ImageMeta> {
    let meta = ctx.product_meta()?;
    let pmc = meta.pmc().unwrap_or_else(|e| {
        info!(path = %ctx.path, error = %e, "Image file name did not contain PMC");
        0
    });
    Ok(ImageMeta {
        file_name: ctx.path.to_string(),
        pmc,
        leds: meta.colour_filter.clone(),
        prod_type: meta.prod_type.clone(),
    })
}

/// Everything read out of one archive tree. Image names are paths inside
/// the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedArchive {
    pub beams: BeamLocationByPmc,
    pub spectra: SpectraByPmc,
    pub bulk_max_spectra: SpectraByPmc,
    /// PMC to context image path
    pub context_images: BTreeMap<i32, String>,
    pub housekeeping: Option<HousekeepingData>,
    /// Name of the housekeeping file, the source of dataset metadata
    pub housekeeping_meta: Option<FileNameMeta>,
    pub pseudo_intensities: PseudoIntensities,
    pub pseudo_intensity_ranges: Vec<PseudoIntensityRange>,
    pub rgbu_images: Vec<ImageMeta>,
    pub disco_images: Vec<ImageMeta>,
    pub white_disco_image: Option<String>,
    pub matched_images: Vec<MatchedImage>,
    /// No product names to read dataset metadata from; the import
    /// parameters supply it
    pub meta_from_params: bool,
}

/// Reads the files of a recognized layout out of an archive tree
#[derive(Debug, Clone, Copy)]
pub struct LayoutClassifier<'a> {
    /// Contents of the pseudo-intensity range descriptor, if there is one
    pub ranges: Option<&'a [u8]>,
}

impl<'a> LayoutClassifier<'a> {
    pub fn new(ranges: Option<&'a [u8]>) -> Self {
        Self { ranges }
    }

    pub fn classify(&self, tree: &ArchiveTree) -> Result<(Layout, ClassifiedArchive)> {
        let layout = Layout::detect(tree).ok_or_else(|| {
            PixliseError::invalid_format(
                "archive",
                "unrecognized layout, expected drift_corr_x_ray_beam_location, RSI or spectra directory",
            )
        })?;
        Ok((layout, self.classify_as(layout, tree)?))
    }

    pub fn classify_as(&self, layout: Layout, tree: &ArchiveTree) -> Result<ClassifiedArchive> {
        info!(%layout, files = tree.len(), "Classifying archive");
        if layout == Layout::Breadboard {
            let params = match tree.get(PARAM_FILE) {
                Some(data) => BreadboardParams::from_param_file(data, PARAM_FILE)?,
                None => BreadboardParams::unconfigured(),
            };
            return breadboard::classify(tree, &params, self.ranges);
        }

        let mut out = ClassifiedArchive::default();
        for product in layout.product_dirs() {
            let files = current_files(tree, product);
            self.read_product(tree, product, &files, &mut out)?;
        }

        if out.beams.is_empty() {
            info!("No beam location found, continuing as an image-only dataset");
        }

        out.matched_images = read_matched_images(tree, &out.beams)?;
        Ok(out)
    }

    fn read_product(
        &self,
        tree: &ArchiveTree,
        product: &ProductDir,
        files: &BTreeMap<String, FileNameMeta>,
        out: &mut ClassifiedArchive,
    ) -> Result<()> {
        let decoder = product.role.decoder();
        let decode = |path: &str, meta: &FileNameMeta| -> Result<DecodedProduct> {
            let data = tree
                .get(path)
                .ok_or_else(|| PixliseError::not_found("archive", path))?;
            decoder.decode(data, &DecodeContext::with_meta(path, meta))
        };

        match product.role {
            ProductRole::Beam => {
                if let Some((path, meta)) = files.iter().find(|(_, m)| m.prod_type == "RXL") {
                    if let DecodedProduct::Beams(beams) = decode(path, meta)? {
                        out.beams = beams;
                    }
                }
            },
            ProductRole::Spectra => {
                if let Some((path, meta)) = files.iter().next() {
                    if let DecodedProduct::Spectra(spectra) = decode(path, meta)? {
                        out.spectra = spectra;
                    }
                }
            },
            ProductRole::BulkMax => {
                for (path, meta) in files {
                    if let DecodedProduct::Spectra(spectra) = decode(path, meta)? {
                        for (pmc, samples) in spectra {
                            out.bulk_max_spectra.entry(pmc).or_default().extend(samples);
                        }
                    }
                }
            },
            ProductRole::Housekeeping => {
                if let Some((path, meta)) = files.iter().next() {
                    if let DecodedProduct::Housekeeping(hk) = decode(path, meta)? {
                        out.housekeeping = Some(hk);
                        out.housekeeping_meta = Some(meta.clone());
                    }
                }
            },
            ProductRole::PseudoIntensity => {
                if let Some((path, meta)) = files.iter().next() {
                    let ranges = self.ranges.ok_or_else(|| {
                        PixliseError::invalid_format(
                            path.as_str(),
                            "dataset contains pseudo-intensity CSV file, but no pseudo-intensity ranges file is available",
                        )
                    })?;
                    out.pseudo_intensity_ranges = PseudoIntensityRangeDecoder
                        .decode(ranges, &DecodeContext::new(PSEUDO_INTENSITY_RANGES))?;
                    if let DecodedProduct::PseudoIntensities(pi) = decode(path, meta)? {
                        out.pseudo_intensities = pi;
                    }
                }
            },
            ProductRole::ContextImage => {
                for (path, meta) in files {
                    match meta.pmc() {
                        Ok(pmc) => {
                            out.context_images.insert(pmc, path.clone());
                        },
                        Err(_) => warn!(path = %path, "No PMC in context image file name"),
                    }
                }
            },
            ProductRole::Rgbu => {
                for (path, meta) in files {
                    if let DecodedProduct::Image(image) = decode(path, meta)? {
                        out.rgbu_images.push(image);
                    }
                }
            },
            ProductRole::Disco => {
                for (path, meta) in files {
                    if let DecodedProduct::Image(image) = decode(path, meta)? {
                        if image.leds == WHITE_FILTER {
                            out.white_disco_image = Some(image.file_name.clone());
                        }
                        out.disco_images.push(image);
                    }
                }
            },
        }
        Ok(())
    }
}

pub(crate) fn has_extension(path: &str, extension: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
}

/// Lists a product's files, keeps the latest version of each, and narrows
/// single-file products to the lowest SCLK.
fn current_files(tree: &ArchiveTree, product: &ProductDir) -> BTreeMap<String, FileNameMeta> {
    let found: Vec<&str> = product
        .dirs
        .iter()
        .flat_map(|d| tree.files_in(d))
        .filter(|p| has_extension(p, product.extension))
        .collect();

    if found.is_empty() {
        info!(dirs = %product.dirs.join(","), "No files found, skipping");
        return BTreeMap::new();
    }

    let mut latest = latest_versions(&found);
    for path in &found {
        if !latest.contains_key(*path) {
            info!(path = %path, "Ignored, older version");
        }
    }

    if let Some(expected) = product.expected {
        if latest.len() < expected {
            warn!(
                dirs = %product.dirs.join(","),
                found = latest.len(),
                expected,
                "Not enough {} files found",
                product.extension
            );
        } else if latest.len() > expected {
            warn!(
                dirs = %product.dirs.join(","),
                found = latest.len(),
                expected,
                "Unexpected {} file count, check the right one is read",
                product.extension
            );
        }

        // Later downlinks can rename a product, the lowest SCLK holds every point
        if expected == 1 && latest.len() > 1 {
            let chosen = latest
                .iter()
                .min_by_key(|(path, meta)| (meta.sclk().unwrap_or(i32::MAX), (*path).clone()))
                .map(|(path, _)| path.clone());
            if let Some(chosen) = chosen {
                info!(path = %chosen, "Choosing lowest SCLK file");
                latest.retain(|path, _| *path == chosen);
            }
        }
    }

    for path in latest.keys() {
        info!(path = %path, "Found");
    }
    latest
}

pub(crate) fn read_matched_images(tree: &ArchiveTree, beams: &BeamLocationByPmc) -> Result<Vec<MatchedImage>> {
    let descriptors: Vec<&str> = tree
        .files_in(MATCHED_DIR)
        .into_iter()
        .filter(|p| has_extension(p, "json"))
        .collect();
    if descriptors.is_empty() {
        return Ok(Vec::new());
    }

    let mut result = Vec::with_capacity(descriptors.len());
    for path in descriptors {
        let data = tree
            .get(path)
            .ok_or_else(|| PixliseError::not_found("archive", path))?;
        let matched = MatchedImageDecoder.decode(data, &DecodeContext::new(path))?;
        check_references(path, &matched, beams, |name| {
            tree.contains(&format!("{MATCHED_DIR}/{name}"))
        })?;
        result.push(matched);
    }
    info!(count = result.len(), "Read matched image descriptors");
    Ok(result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const HK: &str = "RSI/PE__D077T0637741109_000RSI_N001003600098356100660__J01.CSV";
    const HK_V2: &str = "RSI/PE__D077T0637741109_000RSI_N001003600098356100660__J02.CSV";
    const BULK: &str = "RBS/PS__D077T0637746318_000RBS_N001003600098356103760__J01.MSA";
    const DISCO_W: &str = "DISCO/PCW_0125_0678031418_000RCM_N00518120097012340760000J01.PNG";

    const HOUSEKEEPING: &str = "header line\nPMC,temp\n10,1.5\n11,2.5\n";
    const BULK_MSA: &str = "#FORMAT : EMSA/MAS Spectral Data File\n#NPOINTS : 2\n#NCOLUMNS : 2\n#DATATYPE : YY\n#XPERCHAN : 10.0, 10.1\n#OFFSET : 0.5, 0.6\n#LIVETIME : 25.09, 25.08\n#REALTIME : 26.0, 26.1\n#SPECTRUM :\n1, 2\n3, 4\n#ENDOFDATA :\n";

    #[test]
    fn test_detect_layout() {
        let mut tree = ArchiveTree::new();
        assert_eq!(Layout::detect(&tree), None);
        tree.insert(HK, vec![]);
        assert_eq!(Layout::detect(&tree), Some(Layout::DataDrive));

        let mut pipeline = ArchiveTree::new();
        pipeline.insert("drift_corr_x_ray_beam_location/a.csv", vec![]);
        assert_eq!(Layout::detect(&pipeline), Some(Layout::Pipeline));

        let mut lab = ArchiveTree::new();
        lab.insert("import.json", vec![]);
        assert_eq!(Layout::detect(&lab), Some(Layout::Breadboard));
        let mut lab = ArchiveTree::new();
        lab.insert("spectra/Normal_A_0612673072_000001C5_000001.msa", vec![]);
        assert_eq!(Layout::detect(&lab), Some(Layout::Breadboard));
    }

    #[test]
    fn test_unrecognized_layout_fails() {
        let mut tree = ArchiveTree::new();
        tree.insert("misc/readme.txt", vec![]);
        assert!(LayoutClassifier::new(None).classify(&tree).is_err());
    }

    #[test]
    fn test_classify_picks_latest_housekeeping_and_tags_bulk() {
        let mut tree = ArchiveTree::new();
        tree.insert(HK, b"junk that would not parse".to_vec());
        tree.insert(HK_V2, HOUSEKEEPING.as_bytes().to_vec());
        tree.insert(BULK, BULK_MSA.as_bytes().to_vec());
        tree.insert(DISCO_W, vec![1, 2, 3]);

        let (layout, out) = LayoutClassifier::new(None).classify(&tree).unwrap();
        assert_eq!(layout, Layout::DataDrive);

        let hk = out.housekeeping.unwrap();
        assert_eq!(hk.rows.len(), 2);
        assert_eq!(out.housekeeping_meta.unwrap().version, "02");

        let bulk = &out.bulk_max_spectra[&376];
        assert_eq!(bulk.len(), 2);
        assert_eq!(bulk[0].read_type(), Some(ReadType::BulkSum));
        assert_eq!(bulk[1].detector_id(), Some("B"));
        assert_eq!(bulk[1].counts, vec![2, 4]);

        assert_eq!(out.disco_images.len(), 1);
        assert_eq!(out.white_disco_image.as_deref(), Some(DISCO_W));
        assert!(out.beams.is_empty());
    }

    #[test]
    fn test_pseudo_intensity_without_ranges_fails() {
        let mut tree = ArchiveTree::new();
        tree.insert(HK, HOUSEKEEPING.as_bytes().to_vec());
        tree.insert(
            "RPM/PS__D077T0637741109_000RPM_N001003600098356100640__J01.CSV",
            b"PMC,x\n10,1\npi1,pi2,pi3,pi4\n1,2,3,4\n".to_vec(),
        );
        let err = LayoutClassifier::new(None).classify(&tree).unwrap_err();
        assert!(err.to_string().contains("no pseudo-intensity ranges"));

        let ranges = b"Name,StartChannel,EndChannel\nNa,1,2\nMg,3,4\nAl,5,6\nSi,7,8\n";
        let (_, out) = LayoutClassifier::new(Some(ranges)).classify(&tree).unwrap();
        assert_eq!(out.pseudo_intensity_ranges.len(), 4);
        assert_eq!(out.pseudo_intensities[&10], vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matched_image_must_exist() {
        let mut tree = ArchiveTree::new();
        tree.insert(HK, HOUSEKEEPING.as_bytes().to_vec());
        tree.insert(
            "MATCHED/watson.json",
            br#"{"aligned-beam-pmc":97,"matched-image":"watson.png","x-offset":1,"y-offset":2,"x-scale":1.5,"y-scale":1.5}"#.to_vec(),
        );
        let err = LayoutClassifier::new(None).classify(&tree).unwrap_err();
        assert!(matches!(err, PixliseError::CrossReference(_)));

        tree.insert("MATCHED/watson.png", vec![0]);
        let (_, out) = LayoutClassifier::new(None).classify(&tree).unwrap();
        assert_eq!(out.matched_images.len(), 1);
    }

    #[test]
    fn test_has_extension_ignores_case() {
        assert!(has_extension("RCM/a.TIF", "tif"));
        assert!(!has_extension("RCM/a.tiff", "tif"));
        assert!(!has_extension("RCM/noext", "tif"));
    }
}
