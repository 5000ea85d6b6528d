//! clap value parsers.

use ll_api_types::{EmergencyType, Sector};
use ll_format::{FormatError, emergency_type_label, parse_crisis_id, parse_numeric, sector_label};

/// `law-enforcement`, `Law Enforcement` and `1` all name the same sector.
pub fn sector(raw: &str) -> Result<Sector, String> {
    if let Ok(code) = parse_numeric(raw) {
        return match u8::try_from(code).map(Sector::from_code) {
            Ok(Sector::Other(_)) | Err(_) => Err(format!("unknown sector code {raw}")),
            Ok(sector) => Ok(sector),
        };
    }
    Sector::ALL
        .into_iter()
        .find(|sector| same_label(sector_label(*sector), raw))
        .ok_or_else(|| format!("unknown sector '{raw}'"))
}

pub fn emergency_type(raw: &str) -> Result<EmergencyType, String> {
    if let Ok(code) = parse_numeric(raw) {
        return match u8::try_from(code).map(EmergencyType::from_code) {
            Ok(EmergencyType::Other(_)) | Err(_) => Err(format!("unknown emergency type code {raw}")),
            Ok(kind) => Ok(kind),
        };
    }
    EmergencyType::ALL
        .into_iter()
        .find(|kind| same_label(emergency_type_label(*kind), raw))
        .ok_or_else(|| format!("unknown emergency type '{raw}'"))
}

pub fn crisis_id(raw: &str) -> Result<u64, FormatError> {
    parse_crisis_id(raw)
}

fn same_label(label: &str, raw: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect()
    };
    normalize(label) == normalize(raw)
}
