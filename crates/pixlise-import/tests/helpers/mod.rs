//! Test helpers for importer integration tests
//!
//! Builds a small but complete data-drive delivery: housekeeping, beam
//! locations, spectra, bulk and max spectra and one context image. A lab
//! breadboard delivery of two MSA files is also available.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use pixlise_common::Result;
use pixlise_import::config::BucketConfig;
use pixlise_import::notify::{Notification, NotificationSink};
use std::io::{Cursor, Write};
use std::sync::Mutex;
use zip::write::SimpleFileOptions;

pub const DATASET_ID: &str = "000983561";
pub const ARCHIVE_NAME: &str = "000983561-12-06-2022-06-41-00.zip";
pub const LATER_ARCHIVE_NAME: &str = "000983561-13-06-2022-01-00-00.zip";
pub const RAW_BUCKET: &str = "raw";

pub const HOUSEKEEPING_FILE: &str = "RSI/PE__D077T0637741109_000RSI_N001003600098356100660__J01.CSV";
pub const BEAM_FILE: &str = "RXL/PS__D077T0637741109_000RXL_N001003600098356100660__J01.CSV";
pub const SPECTRA_FILE: &str = "RFS/PS__D077T0637741109_000RFS_N001003600098356100660__J01.CSV";
pub const BULK_FILE: &str = "RBS/PS__D077T0637746318_000RBS_N001003600098356100120__J01.MSA";
pub const MAX_FILE: &str = "RMS/PS__D077T0637746318_000RMS_N001003600098356100120__J01.MSA";
pub const CONTEXT_IMAGE_FILE: &str = "RCM/PCW_D077T0637741109_000RCM_N001003600098356100100__J01.TIF";
pub const CONTEXT_IMAGE_NAME: &str = "PCW_D077T0637741109_000RCM_N001003600098356100100__J01.TIF";

pub const HOUSEKEEPING: &str = "Spatial inputs\nPMC,temp,mode\n10,21.5,1\n11,21.75,1\n";

pub const BEAM: &str = "SCLK=637741109\nPMC,x,y,z,geom_corr,PMC_10_MCC_i,PMC_10_MCC_j\n\
                        10,0.01,0.02,0.25,1.0,100.5,200.5\n\
                        11,0.03,0.04,0.26,1.0,110.5,210.5\n";

pub const SPECTRA: &str = "SCLK_A,SCLK_B,PMC,real_time_A,real_time_B,live_time_A,live_time_B,XPERCHAN_A,XPERCHAN_B,OFFSET_A,OFFSET_B\n\
                           100,101,10,9.5,9.6,8.5,8.4,10.1,10.2,-1.5,-1.25\n\
                           102,103,11,9.7,9.8,8.6,8.7,10.3,10.4,0.5,0.25\n\
                           A_1,A_2,A_3,A_4,A_5,A_6\n\
                           1,2,3,4,5,6\n\
                           7,8,9,10,11,12\n\
                           B_1,B_2,B_3,B_4,B_5,B_6\n\
                           0,0,0,0,0,1\n\
                           0,0,0,0,0,2\n";

pub fn msa(counts: &[(i64, i64)]) -> String {
    let mut text = format!(
        "#FORMAT : EMSA/MAS Spectral Data File\n#NPOINTS : {}\n#NCOLUMNS : 2\n#DATATYPE : YY\n\
         #XPERCHAN : 10.0, 10.1\n#OFFSET : 0.5, 0.6\n#LIVETIME : 25.09, 25.08\n#REALTIME : 26.0, 26.1\n#SPECTRUM :\n",
        counts.len()
    );
    for (a, b) in counts {
        text.push_str(&format!("{a}, {b}\n"));
    }
    text.push_str("#ENDOFDATA :\n");
    text
}

pub const BREADBOARD_ID: &str = "000777001";
pub const BREADBOARD_ARCHIVE_NAME: &str = "000777001-02-03-2023-10-00-00.zip";

/// Dual detector breadboard MSA with a stage position and no PMC
pub fn breadboard_msa(x: f32, counts: &[(i64, i64)]) -> String {
    let mut text = format!(
        "#FORMAT : EMSA/MAS Spectral Data File\n#NPOINTS : {}\n#NCOLUMNS : 2\n#DATATYPE : YY\n\
         #XPERCHAN : 10.0, 10.0\n#LIVETIME : 20.0, 22.0\n#XPOSITION : {x}\n#YPOSITION : 0.5\n#ZPOSITION : 1.5\n#SPECTRUM :\n",
        counts.len()
    );
    for (a, b) in counts {
        text.push_str(&format!("{a}, {b}\n"));
    }
    text.push_str("#ENDOFDATA :\n");
    text
}

/// Two numbered spectra and a notes file, without a parameter file
pub fn breadboard_zip() -> Vec<u8> {
    let first = breadboard_msa(1.0, &[(1, 2), (3, 4)]);
    let second = breadboard_msa(2.0, &[(5, 0), (0, 6)]);
    make_zip(&[
        ("spectra/Normal_A_0612673072_000001C5_000002.msa", second.as_bytes()),
        ("spectra/Normal_A_0612673072_000001C5_000001.msa", first.as_bytes()),
        ("spectra/rock_28V_230uA_notes_08-16-22-18-04-58.msa", b"free text".as_slice()),
    ])
}

pub fn make_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// The full delivery, as one zip
pub fn delivery_zip() -> Vec<u8> {
    delivery_zip_with(&[])
}

/// The full delivery plus extra root files
pub fn delivery_zip_with(extra: &[(&str, &[u8])]) -> Vec<u8> {
    let bulk = msa(&[(1, 2), (3, 4), (5, 6), (7, 8), (9, 10), (11, 12)]);
    let max = msa(&[(1, 1), (1, 1), (1, 1), (1, 1), (1, 1), (1, 1)]);
    let mut files: Vec<(&str, &[u8])> = vec![
        (HOUSEKEEPING_FILE, HOUSEKEEPING.as_bytes()),
        (BEAM_FILE, BEAM.as_bytes()),
        (SPECTRA_FILE, SPECTRA.as_bytes()),
        (BULK_FILE, bulk.as_bytes()),
        (MAX_FILE, max.as_bytes()),
        (CONTEXT_IMAGE_FILE, b"II*\0 not really a tiff"),
    ];
    files.extend_from_slice(extra);
    make_zip(&files)
}

pub fn buckets() -> BucketConfig {
    BucketConfig {
        datasets: "datasets".into(),
        config: "config".into(),
        manual: "manual".into(),
        jobs: "jobs".into(),
    }
}

/// Storage-change envelope for a new object
pub fn storage_event(bucket: &str, key: &str) -> Vec<u8> {
    serde_json::json!({
        "Records": [{
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "s3": {
                "bucket": {"name": bucket},
                "object": {"key": key, "size": 1024}
            }
        }]
    })
    .to_string()
    .into_bytes()
}

pub fn reimport_request(dir: &str, log: &str) -> Vec<u8> {
    serde_json::json!({"datasetaddons": {"dir": dir, "log": log}})
        .to_string()
        .into_bytes()
}

/// Keeps every notification it is handed
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn topics(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.topic.clone()).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
