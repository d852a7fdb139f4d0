//! Firmware image formats.

pub mod combined;

pub use combined::{
    DEFAULT_RULES, FirmwareImage, SECTION_ALIGN, SectionRule, UpgradeSection, combine, pad_to,
};
