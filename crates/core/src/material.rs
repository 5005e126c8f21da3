//! Material categories and the bins they end up in.

use serde::{Deserialize, Serialize};

/// The material category assigned to an item by the classifier.
///
/// `Unknown` is a first-class value: it travels through the item cycle and
/// drives the retry/rejection branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Material {
    PlasticBottle,
    MetalCan,
    Glass,
    Unknown,
}

impl Material {
    pub fn is_known(self) -> bool {
        self != Material::Unknown
    }

    /// The bin the sorter drops this material into.
    ///
    /// The sorter only has a metal and a plastic chute, so glass shares the
    /// plastic path. `None` for unknown items, which are never routed.
    pub fn bin(self) -> Option<BinKind> {
        match self {
            Material::MetalCan => Some(BinKind::Metal),
            Material::PlasticBottle | Material::Glass => Some(BinKind::Plastic),
            Material::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Material::PlasticBottle => "PLASTIC_BOTTLE",
            Material::MetalCan => "METAL_CAN",
            Material::Glass => "GLASS",
            Material::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical collection bin, identified on the event feed by a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinKind {
    /// Code 0, left bin (PET).
    Plastic,
    /// Code 1, middle bin.
    Metal,
    /// Code 2, right bin.
    Secondary,
    /// Code 3.
    Glass,
}

impl BinKind {
    pub const ALL: [BinKind; 4] = [
        BinKind::Plastic,
        BinKind::Metal,
        BinKind::Secondary,
        BinKind::Glass,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BinKind::Plastic),
            1 => Some(BinKind::Metal),
            2 => Some(BinKind::Secondary),
            3 => Some(BinKind::Glass),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            BinKind::Plastic => 0,
            BinKind::Metal => 1,
            BinKind::Secondary => 2,
            BinKind::Glass => 3,
        }
    }

    /// Human-readable name used in screen hints.
    pub fn display_name(self) -> &'static str {
        match self {
            BinKind::Plastic => "Plastic (PET)",
            BinKind::Metal => "Metal Can",
            BinKind::Secondary => "Right Bin",
            BinKind::Glass => "Glass",
        }
    }

    /// A full critical bin ends the session if it is the one in play.
    pub fn is_critical(self) -> bool {
        matches!(self, BinKind::Plastic | BinKind::Metal)
    }
}

impl std::fmt::Display for BinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinKind::Plastic => "plastic",
            BinKind::Metal => "metal",
            BinKind::Secondary => "secondary",
            BinKind::Glass => "glass",
        };
        f.write_str(s)
    }
}
