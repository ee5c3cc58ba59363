//! Akamai HTTP/2 fingerprint text handling
//!
//! The Akamai format captures client-side HTTP/2 behaviour at connection
//! start: `SETTINGS|WINDOW_UPDATE|PRIORITY|PSEUDO_HEADER_ORDER`, e.g.
//! `1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p`. The order of the
//! SETTINGS entries is part of the fingerprint and is preserved verbatim.

use crate::error::{EngineError, Result};

/// HTTP/2 SETTINGS identifiers (RFC 9113 §6.5.2).
pub mod setting_ids {
    pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 1;
    pub const SETTINGS_ENABLE_PUSH: u16 = 2;
    pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 3;
    pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 4;
    pub const SETTINGS_MAX_FRAME_SIZE: u16 = 5;
    pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 6;
}

/// One of the four request pseudo-headers, in Akamai letter notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoHeader {
    Method,
    Authority,
    Scheme,
    Path,
}

impl PseudoHeader {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudoHeader::Method => ":method",
            PseudoHeader::Authority => ":authority",
            PseudoHeader::Scheme => ":scheme",
            PseudoHeader::Path => ":path",
        }
    }

    fn letter(&self) -> char {
        match self {
            PseudoHeader::Method => 'm',
            PseudoHeader::Authority => 'a',
            PseudoHeader::Scheme => 's',
            PseudoHeader::Path => 'p',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'm' => Some(PseudoHeader::Method),
            'a' => Some(PseudoHeader::Authority),
            's' => Some(PseudoHeader::Scheme),
            'p' => Some(PseudoHeader::Path),
            _ => None,
        }
    }
}

/// Default pseudo-header order when the section is absent or unparseable.
pub fn default_pseudo_header_order() -> Vec<PseudoHeader> {
    vec![
        PseudoHeader::Method,
        PseudoHeader::Authority,
        PseudoHeader::Scheme,
        PseudoHeader::Path,
    ]
}

/// A parsed Akamai HTTP/2 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkamaiSpec {
    /// SETTINGS parameters in emission order.
    pub settings: Vec<(u16, u32)>,
    /// Connection-level WINDOW_UPDATE increment; 0 means no frame is sent.
    pub window_update: u32,
    /// Priority section, kept verbatim (`0` or a comma list).
    pub priority: String,
    /// Emission order of the four request pseudo-headers.
    pub pseudo_header_order: Vec<PseudoHeader>,
}

impl AkamaiSpec {
    /// Parse an Akamai text. Empty sections are tolerated; a missing
    /// WINDOW_UPDATE defaults to 0 and a missing or unparseable header
    /// order falls back to `m,a,s,p`.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split('|').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(EngineError::Config(format!(
                "akamai: expected up to 4 |-separated sections, got {}",
                parts.len()
            )));
        }

        let settings = parse_settings(parts[0])?;

        let window_update = match parts.get(1).map(|s| s.trim()) {
            None | Some("") => 0,
            Some(s) => s.parse::<u32>().map_err(|_| {
                EngineError::Config(format!("akamai: bad window update {:?}", s))
            })?,
        };

        let priority = parts
            .get(2)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "0".to_string());

        let pseudo_header_order = parts
            .get(3)
            .and_then(|s| parse_pseudo_order(s))
            .unwrap_or_else(default_pseudo_header_order);

        Ok(Self {
            settings,
            window_update,
            priority,
            pseudo_header_order,
        })
    }

    /// Re-emit the canonical four-section text.
    pub fn to_text(&self) -> String {
        let settings = self
            .settings
            .iter()
            .map(|(id, value)| format!("{}:{}", id, value))
            .collect::<Vec<_>>()
            .join(";");
        let order = self
            .pseudo_header_order
            .iter()
            .map(|p| p.letter().to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}|{}|{}|{}",
            settings, self.window_update, self.priority, order
        )
    }

    /// Look up a setting by id, first occurrence wins.
    pub fn setting(&self, id: u16) -> Option<u32> {
        self.settings
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, v)| *v)
    }
}

fn parse_settings(section: &str) -> Result<Vec<(u16, u32)>> {
    let section = section.trim();
    if section.is_empty() {
        return Ok(Vec::new());
    }
    let mut settings = Vec::new();
    for pair in section.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (id, value) = pair.split_once(':').ok_or_else(|| {
            EngineError::Config(format!("akamai: bad settings pair {:?}", pair))
        })?;
        let id = id
            .trim()
            .parse::<u16>()
            .map_err(|_| EngineError::Config(format!("akamai: bad setting id {:?}", id)))?;
        let value = value
            .trim()
            .parse::<u32>()
            .map_err(|_| EngineError::Config(format!("akamai: bad setting value {:?}", value)))?;
        settings.push((id, value));
    }
    Ok(settings)
}

fn parse_pseudo_order(section: &str) -> Option<Vec<PseudoHeader>> {
    let section = section.trim();
    if section.is_empty() {
        return None;
    }
    let mut order = Vec::with_capacity(4);
    for item in section.split(',') {
        let mut chars = item.trim().chars();
        let letter = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        let pseudo = PseudoHeader::from_letter(letter)?;
        if order.contains(&pseudo) {
            return None;
        }
        order.push(pseudo);
    }
    if order.len() == 4 {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_AKAMAI: &str = "1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p";

    #[test]
    fn test_parse_chrome() {
        let spec = AkamaiSpec::parse(CHROME_AKAMAI).unwrap();
        assert_eq!(
            spec.settings,
            vec![(1, 65536), (2, 0), (4, 6291456), (6, 262144)]
        );
        assert_eq!(spec.window_update, 15663105);
        assert_eq!(spec.priority, "0");
        assert_eq!(
            spec.pseudo_header_order,
            vec![
                PseudoHeader::Method,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
                PseudoHeader::Path
            ]
        );
    }

    #[test]
    fn test_settings_order_preserved() {
        let spec = AkamaiSpec::parse("4:131072;1:65536;2:0|0|0|m,p,a,s").unwrap();
        assert_eq!(spec.settings[0], (4, 131072));
        assert_eq!(spec.settings[1], (1, 65536));
        assert_eq!(spec.pseudo_header_order[1], PseudoHeader::Path);
    }

    #[test]
    fn test_missing_sections_default() {
        let spec = AkamaiSpec::parse("1:65536").unwrap();
        assert_eq!(spec.window_update, 0);
        assert_eq!(spec.priority, "0");
        assert_eq!(spec.pseudo_header_order, default_pseudo_header_order());
    }

    #[test]
    fn test_unparseable_order_falls_back() {
        let spec = AkamaiSpec::parse("1:65536|0|0|m,a,x,p").unwrap();
        assert_eq!(spec.pseudo_header_order, default_pseudo_header_order());
        let spec = AkamaiSpec::parse("1:65536|0|0|m,a,s").unwrap();
        assert_eq!(spec.pseudo_header_order, default_pseudo_header_order());
    }

    #[test]
    fn test_round_trip() {
        let spec = AkamaiSpec::parse(CHROME_AKAMAI).unwrap();
        let again = AkamaiSpec::parse(&spec.to_text()).unwrap();
        assert_eq!(spec, again);
    }

    #[test]
    fn test_rejects_bad_pairs() {
        assert!(AkamaiSpec::parse("1=65536|0|0|m,a,s,p").is_err());
        assert!(AkamaiSpec::parse("1:banana").is_err());
        assert!(AkamaiSpec::parse("1:65536|banana").is_err());
    }
}
