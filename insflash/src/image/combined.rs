//! Combined firmware image.
//!
//! A combined image is a flat concatenation of sections, each introduced
//! by an ASCII marker and a little-endian length:
//!
//! ```text
//! +----------------+---------+-------------------+----------------+ ...
//! | "rtk_start:"   | len u32 | content (len B)   | "ins_start:"   |
//! +----------------+---------+-------------------+----------------+ ...
//! ```
//!
//! Sections appear in a fixed order per model. Each marker is matched at
//! the position where the previous section ended; a model may omit any
//! section, in which case the cursor stays put for the next marker.

use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::debug;

use crate::error::{Error, Result};

/// Width of the section length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Alignment of section content in built images.
pub const SECTION_ALIGN: usize = 16;

/// One kind of section a model's images may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRule {
    /// Target name ("rtk", "ins", ...).
    pub name: &'static str,
    /// ASCII marker preceding the length prefix.
    pub marker: &'static str,
}

impl SectionRule {
    /// Rule whose marker is `<name>_start:`.
    pub const fn new(name: &'static str, marker: &'static str) -> Self {
        Self { name, marker }
    }
}

/// The default rule order: rtk, ins, sdk, imu_boot, imu.
pub const DEFAULT_RULES: &[SectionRule] = &[
    SectionRule::new("rtk", "rtk_start:"),
    SectionRule::new("ins", "ins_start:"),
    SectionRule::new("sdk", "sdk_start:"),
    SectionRule::new("imu_boot", "imu_boot_start:"),
    SectionRule::new("imu", "imu_start:"),
];

/// A section extracted from an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeSection {
    /// Target name.
    pub name: String,
    /// Offset of the content within the image.
    pub offset: usize,
    /// Section content as stored.
    pub content: Vec<u8>,
}

impl UpgradeSection {
    /// Content length.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the section is empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A parsed combined image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareImage {
    sections: Vec<UpgradeSection>,
}

impl FirmwareImage {
    /// Parse `data` with `rules`, keeping only non-empty sections.
    pub fn parse(data: &[u8], rules: &[SectionRule]) -> Result<Self> {
        let mut cursor = 0;
        let mut sections = Vec::new();

        for rule in rules {
            let marker = rule.marker.as_bytes();
            if !data[cursor..].starts_with(marker) {
                debug!("No {} section at offset {cursor}", rule.name);
                continue;
            }
            let len_at = cursor + marker.len();
            let content_at = len_at + LENGTH_PREFIX;
            if data.len() < content_at {
                return Err(Error::InvalidImage(format!(
                    "{} section truncated before its length",
                    rule.name
                )));
            }
            let len = LittleEndian::read_u32(&data[len_at..content_at]) as usize;
            let end = content_at
                .checked_add(len)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    Error::InvalidImage(format!(
                        "{} section declares {len} bytes but only {} remain",
                        rule.name,
                        data.len() - content_at
                    ))
                })?;

            debug!("{} section: {len} bytes at 0x{content_at:08X}", rule.name);
            if len > 0 {
                sections.push(UpgradeSection {
                    name: rule.name.to_string(),
                    offset: content_at,
                    content: data[content_at..end].to_vec(),
                });
            }
            cursor = end;
        }

        Ok(Self { sections })
    }

    /// Load and parse an image file.
    pub fn from_file<P: AsRef<Path>>(path: P, rules: &[SectionRule]) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware image from: {}", path.display());
        let data = fs::read(path)?;
        Self::parse(&data, rules)
    }

    /// Non-empty sections in image order.
    pub fn sections(&self) -> &[UpgradeSection] {
        &self.sections
    }

    /// Section by target name.
    pub fn section(&self, name: &str) -> Option<&UpgradeSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Whether no section carries content.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Pad `content` to `align` bytes with `fill`.
pub fn pad_to(content: &[u8], align: usize, fill: u8) -> Vec<u8> {
    let mut padded = content.to_vec();
    let remainder = padded.len() % align;
    if remainder != 0 {
        padded.resize(padded.len() + align - remainder, fill);
    }
    padded
}

/// Build a combined image from `(marker name, content)` pairs in order.
///
/// Content is padded to [`SECTION_ALIGN`] with `0xFF`.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn combine<'a, I>(sections: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut out = Vec::new();
    for (name, content) in sections {
        let padded = pad_to(content, SECTION_ALIGN, 0xFF);
        let len = u32::try_from(padded.len())
            .map_err(|_| Error::InvalidImage(format!("{name} section exceeds 4 GiB")))?;
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b"_start:");
        out.write_u32::<LittleEndian>(len).unwrap();
        out.extend_from_slice(&padded);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(marker: &str, content: &[u8]) -> Vec<u8> {
        let mut out = marker.as_bytes().to_vec();
        out.extend_from_slice(&(content.len() as u32).to_le_bytes());
        out.extend_from_slice(content);
        out
    }

    #[test]
    fn test_parse_in_rule_order() {
        let mut data = section("rtk_start:", &[1; 32]);
        data.extend(section("ins_start:", &[2; 48]));
        data.extend(section("imu_start:", &[3; 16]));
        let image = FirmwareImage::parse(&data, DEFAULT_RULES).unwrap();
        let names: Vec<_> = image.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["rtk", "ins", "imu"]);
        assert_eq!(image.section("ins").unwrap().content, vec![2; 48]);
        assert_eq!(image.section("rtk").unwrap().offset, "rtk_start:".len() + 4);
    }

    #[test]
    fn test_zero_length_section_dropped() {
        let mut data = section("rtk_start:", &[]);
        data.extend(section("ins_start:", &[7; 16]));
        let image = FirmwareImage::parse(&data, DEFAULT_RULES).unwrap();
        assert!(image.section("rtk").is_none());
        assert_eq!(image.sections().len(), 1);
    }

    #[test]
    fn test_out_of_order_section_not_found() {
        let mut data = section("ins_start:", &[1; 16]);
        data.extend(section("rtk_start:", &[2; 16]));
        let image = FirmwareImage::parse(&data, DEFAULT_RULES).unwrap();
        let names: Vec<_> = image.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["ins"]);
    }

    #[test]
    fn test_overrun_is_invalid() {
        let mut data = b"ins_start:".to_vec();
        data.extend_from_slice(&1000u32.to_le_bytes());
        data.extend_from_slice(&[0; 10]);
        assert!(matches!(
            FirmwareImage::parse(&data, DEFAULT_RULES),
            Err(Error::InvalidImage(_))
        ));
        assert!(matches!(
            FirmwareImage::parse(b"ins_start:\x01", DEFAULT_RULES),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_unmarked_data_is_empty_image() {
        let image = FirmwareImage::parse(b"not an image", DEFAULT_RULES).unwrap();
        assert!(image.is_empty());
        assert!(FirmwareImage::parse(&[], DEFAULT_RULES).unwrap().is_empty());
    }

    #[test]
    fn test_combine_pads_and_parses_back() {
        let data = combine([("ins", &[0xAB; 20][..]), ("imu", &[0xCD; 32][..])]).unwrap();
        let image = FirmwareImage::parse(&data, DEFAULT_RULES).unwrap();
        let ins = image.section("ins").unwrap();
        assert_eq!(ins.len(), 32);
        assert_eq!(&ins.content[..20], &[0xAB; 20]);
        assert!(ins.content[20..].iter().all(|b| *b == 0xFF));
        assert_eq!(image.section("imu").unwrap().len(), 32);
    }

    #[test]
    fn test_pad_to() {
        assert_eq!(pad_to(&[1, 2, 3], 4, 0), vec![1, 2, 3, 0]);
        assert_eq!(pad_to(&[1; 16], 16, 0), vec![1; 16]);
        assert!(pad_to(&[], 16, 0).is_empty());
    }
}
