//! Target part definitions: page geometry and signature.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MCU Family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    pub description: String,
    pub variants: Vec<Chip>,
}

/// Represents an MCU chip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chip {
    pub name: String,
    #[serde(deserialize_with = "parse_signature")]
    pub signature: [u8; 3],
    #[serde(deserialize_with = "parse_size")]
    pub flash_size: u32,
    /// Flash page size in bytes.
    pub page_size: usize,
}

impl ::std::fmt::Display for Chip {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "{}({})", self.name, hex::encode(self.signature))
    }
}

pub struct ChipDB {
    families: Vec<Family>,
}

impl ChipDB {
    pub fn load() -> Result<Self> {
        Ok(ChipDB {
            families: vec![serde_yaml::from_str(include_str!("../devices/avr.yaml"))?],
        })
    }

    pub fn chips(&self) -> impl Iterator<Item = &Chip> {
        self.families.iter().flat_map(|f| f.variants.iter())
    }

    pub fn find_by_name(&self, name: &str) -> Result<Chip> {
        self.chips()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| Error::UnknownChip(name.to_string()))
    }

    pub fn find_by_signature(&self, signature: [u8; 3]) -> Result<Chip> {
        self.chips()
            .find(|c| c.signature == signature)
            .cloned()
            .ok_or_else(|| Error::UnknownChip(format!("signature {}", hex::encode(signature))))
    }
}

fn parse_signature<'de, D>(deserializer: D) -> std::result::Result<[u8; 3], D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(&s);
    let mut sig = [0u8; 3];
    hex::decode_to_slice(digits, &mut sig)
        .map_err(|e| serde::de::Error::custom(format!("bad signature {:?}: {}", s, e)))?;
    Ok(sig)
}

fn parse_size<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    let parsed = if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(digits, 16).ok()
    } else if let Some(kib) = s
        .strip_suffix("KiB")
        .or_else(|| s.strip_suffix("KB"))
        .or_else(|| s.strip_suffix('K'))
    {
        kib.parse::<u32>().ok().map(|n| n * 1024)
    } else {
        s.parse().ok()
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("error while parsing {:?}", s)))
}
