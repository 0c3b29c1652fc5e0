//! Canonical dataset output: `dataset.bin`, `summary.json` and image copies

use flate2::write::GzEncoder;
use flate2::Compression;
use pixlise_common::{PixliseError, Result};
use std::io::Write;
use tracing::{info, instrument};

use crate::archive::ArchiveTree;
use crate::assemble::{AssembledDataset, DatasetBundle};
use crate::model::ReadType;
use crate::paths;
use crate::storage::ObjectStore;
use crate::summary::SummaryFile;

/// Every object one import writes, built in memory before anything is stored
#[derive(Debug, Clone)]
pub struct DatasetOutput {
    pub summary: SummaryFile,
    /// Key and contents, in write order
    pub objects: Vec<(String, Vec<u8>)>,
}

/// `dataset.bin` is gzipped JSON of the bundle
pub fn encode_bundle(bundle: &DatasetBundle) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(bundle)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode_bundle(data: &[u8]) -> Result<DatasetBundle> {
    let decoder = flate2::read::GzDecoder::new(data);
    Ok(serde_json::from_reader(decoder)?)
}

/// Headline record for a bundle
pub fn summarize(bundle: &DatasetBundle, data_file_size: usize, now_unix_sec: i64) -> SummaryFile {
    let meta = &bundle.meta;
    let images: Vec<&str> = bundle.image_names().collect();
    SummaryFile {
        dataset_id: bundle.dataset_id.clone(),
        group: bundle.group.clone(),
        drive_id: meta.drive_id,
        site_id: meta.site_id,
        target_id: meta.target_id.clone(),
        site: meta.site.clone(),
        target: meta.target.clone(),
        title: meta.title.clone(),
        sol: meta.sol.clone(),
        rtt: meta.rtt.trim().parse().unwrap_or(0),
        sclk: meta.sclk,
        context_image: bundle.default_context_image.clone(),
        location_count: bundle.pmcs.len(),
        data_file_size,
        context_images: images.len(),
        tiff_context_images: images
            .iter()
            .filter(|name| name.to_ascii_lowercase().ends_with(".tif"))
            .count(),
        normal_spectra: bundle.spectra_count(ReadType::Normal),
        dwell_spectra: bundle.spectra_count(ReadType::Dwell),
        bulk_spectra: bundle.spectra_count(ReadType::BulkSum),
        max_spectra: bundle.spectra_count(ReadType::MaxValue),
        pseudo_intensities: bundle
            .pmcs
            .values()
            .filter(|b| b.pseudo_intensities.is_some())
            .count(),
        detector_config: bundle.detector_config.clone(),
        create_unix_time_sec: now_unix_sec,
    }
}

impl DatasetOutput {
    /// Encodes the bundle and gathers image bytes from the archive tree
    pub fn build(dataset: &AssembledDataset, tree: &ArchiveTree, now_unix_sec: i64) -> Result<Self> {
        let id = &dataset.bundle.dataset_id;
        let encoded = encode_bundle(&dataset.bundle)?;
        let summary = summarize(&dataset.bundle, encoded.len(), now_unix_sec);

        let mut objects = vec![(paths::dataset_file(id), encoded)];
        for image in &dataset.images {
            let data = tree
                .get(&image.source)
                .ok_or_else(|| PixliseError::CrossReference(format!("image {} is not in the archive", image.source)))?;
            objects.push((paths::context_image(id, &image.name), data.to_vec()));
        }
        objects.push((paths::dataset_summary(id), serde_json::to_vec_pretty(&summary)?));

        Ok(Self { summary, objects })
    }

    /// Writes every object; the summary goes last so indexers never see a
    /// summary without its dataset.
    #[instrument(skip(self, store), fields(dataset_id = %self.summary.dataset_id, objects = self.objects.len()))]
    pub async fn write(&self, store: &dyn ObjectStore, container: &str) -> Result<()> {
        for (key, data) in &self.objects {
            store.put(container, key, data.clone()).await?;
        }
        info!(
            dataset_id = %self.summary.dataset_id,
            bytes = self.summary.data_file_size,
            "Wrote dataset"
        );
        Ok(())
    }
}
