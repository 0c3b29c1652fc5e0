//! Product identifier file names
//!
//! Every instrument product is named by a fixed width 58 character
//! identifier. The name carries the product type used to route the file to a
//! decoder, the version used to pick the newest delivery, and the PMC, RTT
//! and site/drive ids that end up in the dataset metadata.
//!
//! # Format
//!
//! ```text
//! PS__D077T0637741109_000RPM_N001003600098356100640__J01.CSV
//!
//! [0..2]   instrument          PS
//! [2..3]   colour filter       _
//! [3..4]   special             _
//! [4..8]   primary timestamp   D077 (sol)
//! [8..9]   venue               T
//! [9..19]  secondary timestamp 0637741109 (SCLK)
//! [19]     separator           _
//! [20..23] ternary timestamp   000
//! [23..26] product type        RPM
//! [26..27] geometry            _
//! [27..28] thumbnail           N
//! [28..31] site                001
//! [31..35] drive               0036
//! [35..44] seq or RTT          000983561
//! [44..48] cam specific / PMC  0064
//! [48..49] downsample          0
//! [49..51] compression         __
//! [51..52] producer            J
//! [52..54] version             01
//! [54]     '.'
//! [55..58] extension           CSV
//! ```

mod codes;
mod versions;

pub use codes::{drive_code, site_code, version_code};
pub use versions::latest_versions;

use pixlise_common::{PixliseError, Result};
use serde::{Deserialize, Serialize};

/// Length of a full product file name, extension included
pub const PRODUCT_ID_LEN: usize = 58;

/// Length of the rendered identifier, without `.` and extension
pub const PRODUCT_ID_STEM_LEN: usize = 54;

/// Parsed fields of a product identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNameMeta {
    /// PC = PIXL MCC, PE = PIXL engineering, PS = PIXL spectrometer
    pub instrument: String,
    pub colour_filter: String,
    pub special: String,
    pub primary_timestamp: String,
    pub venue: String,
    pub secondary_timestamp: String,
    pub ternary_timestamp: String,
    pub prod_type: String,
    pub geometry: String,
    pub thumbnail: String,
    pub site: String,
    pub drive: String,
    pub seq_rtt: String,
    pub cam_specific: String,
    pub downsample: String,
    pub compression: String,
    pub producer: String,
    pub version: String,
    pub extension: String,
}

fn invalid(name: &str, reason: impl Into<String>) -> PixliseError {
    PixliseError::InvalidProductId {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Returns the last `/` separated component of a key or path
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl FileNameMeta {
    /// Parses a product file name. Directory components are ignored.
    pub fn parse(file_name: &str) -> Result<Self> {
        let name = base_name(file_name);

        if name.len() != PRODUCT_ID_LEN {
            return Err(invalid(
                name,
                format!("expected {} characters, got {}", PRODUCT_ID_LEN, name.len()),
            ));
        }
        if !name.is_ascii() {
            return Err(invalid(name, "non-ASCII characters"));
        }
        if &name[19..20] != "_" {
            return Err(invalid(name, "missing separator at position 19"));
        }
        if &name[54..55] != "." {
            return Err(invalid(name, "missing '.' before extension"));
        }

        let field = |from: usize, to: usize| name[from..to].to_string();

        Ok(Self {
            instrument: field(0, 2),
            colour_filter: field(2, 3),
            special: field(3, 4),
            primary_timestamp: field(4, 8),
            venue: field(8, 9),
            secondary_timestamp: field(9, 19),
            ternary_timestamp: field(20, 23),
            prod_type: field(23, 26),
            geometry: field(26, 27),
            thumbnail: field(27, 28),
            site: field(28, 31),
            drive: field(31, 35),
            seq_rtt: field(35, 44),
            cam_specific: field(44, 48),
            downsample: field(48, 49),
            compression: field(49, 51),
            producer: field(51, 52),
            version: field(52, 54),
            extension: field(55, 58),
        })
    }

    /// Renders the 54 character identifier, without extension
    pub fn render(&self) -> String {
        let mut s = String::with_capacity(PRODUCT_ID_STEM_LEN);
        for part in [
            &self.instrument,
            &self.colour_filter,
            &self.special,
            &self.primary_timestamp,
            &self.venue,
            &self.secondary_timestamp,
        ] {
            s.push_str(part);
        }
        s.push('_');
        for part in [
            &self.ternary_timestamp,
            &self.prod_type,
            &self.geometry,
            &self.thumbnail,
            &self.site,
            &self.drive,
            &self.seq_rtt,
            &self.cam_specific,
            &self.downsample,
            &self.compression,
            &self.producer,
            &self.version,
        ] {
            s.push_str(part);
        }
        s
    }

    pub fn is_pixl(&self) -> bool {
        matches!(self.instrument.as_str(), "PC" | "PE" | "PS")
    }

    /// PMC from the cam-specific field, only stored by PIXL instruments
    pub fn pmc(&self) -> Result<i32> {
        if !self.is_pixl() {
            return Err(invalid(&self.render(), "PMC only stored for PIXL files"));
        }
        self.cam_specific
            .parse()
            .map_err(|_| invalid(&self.render(), format!("bad PMC: {}", self.cam_specific)))
    }

    /// Mission clock seconds
    pub fn sclk(&self) -> Result<i32> {
        self.secondary_timestamp.parse().map_err(|_| {
            invalid(
                &self.render(),
                format!("bad SCLK: {}", self.secondary_timestamp),
            )
        })
    }

    /// Sequence id or RTT. Instrument specific and possibly alphanumeric, so kept as text.
    pub fn rtt(&self) -> &str {
        &self.seq_rtt
    }

    pub fn sol(&self) -> &str {
        &self.primary_timestamp
    }

    pub fn site_id(&self) -> Result<i32> {
        site_code(&self.site).ok_or_else(|| invalid(&self.render(), format!("bad site: {}", self.site)))
    }

    pub fn drive_id(&self) -> Result<i32> {
        drive_code(&self.drive)
            .ok_or_else(|| invalid(&self.render(), format!("bad drive: {}", self.drive)))
    }

    pub fn version_number(&self) -> Result<i32> {
        version_code(&self.version)
            .ok_or_else(|| invalid(&self.render(), format!("bad version: {}", self.version)))
    }
}

impl std::str::FromStr for FileNameMeta {
    type Err = PixliseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pseudo_intensity_name() {
        let m = FileNameMeta::parse("PS__D077T0637741109_000RPM_N001003600098356100640__J01.CSV")
            .unwrap();
        assert_eq!(m.instrument, "PS");
        assert_eq!(m.prod_type, "RPM");
        assert_eq!(m.pmc().unwrap(), 64);
        assert_eq!(m.rtt(), "000983561");
        assert_eq!(m.sclk().unwrap(), 637741109);
        assert_eq!(m.sol(), "D077");
        assert_eq!(m.site_id().unwrap(), 1);
        assert_eq!(m.drive_id().unwrap(), 36);
        assert_eq!(m.version_number().unwrap(), 1);
        assert_eq!(m.extension, "CSV");
    }

    #[test]
    fn test_parse_ignores_directories() {
        let m = FileNameMeta::parse(
            "archive/RCM/PCR_D077T0637741562_000EDR_N00100360009835610066000J01.PNG",
        )
        .unwrap();
        assert_eq!(m.colour_filter, "R");
        assert_eq!(m.compression, "00");
        assert_eq!(m.pmc().unwrap(), 66);
    }

    #[test]
    fn test_render_reproduces_stem() {
        for name in [
            "PS__D077T0637746318_000RBS_N001003600098356103760__J01.MSA",
            "PE__D077T0637741109_000RSI_N001003600098356100660__J01.CSV",
            "PS__1033_0012345678_000RFS_N001003600098356100640__J01.CSV",
            "INCSPRIMVSECONDARYT_TERPROGTSITDRIVSEQNUMRTTCAMSDCOPVE.EXT",
        ] {
            let m = FileNameMeta::parse(name).unwrap();
            assert_eq!(m.render(), &name[..PRODUCT_ID_STEM_LEN]);
        }
    }

    #[test]
    fn test_non_numeric_fields_fail_on_access() {
        let m = FileNameMeta::parse("INCSPRIMVSECONDARYT_TERPROGTSITDRIVSEQNUMRTTCAMSDCOPVE.EXT")
            .unwrap();
        assert!(m.pmc().is_err());
        assert!(m.sclk().is_err());
        assert_eq!(m.rtt(), "SEQNUMRTT");
        assert_eq!(m.sol(), "PRIM");
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let err = FileNameMeta::parse("hello.txt").unwrap_err();
        assert!(matches!(err, PixliseError::InvalidProductId { .. }));
    }

    #[test]
    fn test_pmc_requires_pixl_instrument() {
        let m = FileNameMeta::parse("SI__D077T0637741109_000RPM_N001003600098356100640__J01.CSV")
            .unwrap();
        assert!(m.pmc().is_err());
    }
}
