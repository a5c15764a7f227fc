//! Strict parsing of identifier-bearing descriptors
//!
//! Accepted forms:
//!
//! ```text
//! descriptor = magnet / bare-id
//! magnet     = "magnet:?" param *( "&" param )
//! param      = "xt=urn:btih:" bare-id / "dn=" text / "tr=" url / other
//! bare-id    = 40 HEXDIG
//! ```
//!
//! A magnet must carry exactly one `urn:btih:` topic with a 40 hex digit
//! hash. Base32 hashes and anything that is not one of the two forms are
//! rejected rather than guessed at.

use url::Url;

use super::{CONTENT_ID_HEX_LEN, ContentId};

const MAGNET_SCHEME: &str = "magnet";
const BTIH_PREFIX: &str = "urn:btih:";

/// Errors produced while parsing a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor is empty")]
    Empty,

    #[error("Unsupported descriptor: {descriptor}")]
    Unsupported { descriptor: String },

    #[error("Malformed magnet URI: {reason}")]
    MalformedUri { reason: String },

    #[error("Magnet URI has no urn:btih topic")]
    MissingTopic,

    #[error("Magnet URI has more than one urn:btih topic")]
    DuplicateTopic,

    #[error("Invalid identifier length: {length} (expected 40)")]
    InvalidLength { length: usize },

    #[error("Invalid hex in identifier: {value}")]
    InvalidHex { value: String },
}

/// Parsed descriptor: the identifier plus whatever hints came with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    pub id: ContentId,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

impl ContentDescriptor {
    /// Descriptor carrying only an identifier.
    pub fn from_id(id: ContentId) -> Self {
        Self {
            id,
            display_name: None,
            trackers: Vec::new(),
        }
    }

    /// Parses a magnet URI or a bare 40-character identifier.
    ///
    /// # Errors
    /// - `DescriptorError::Empty` - Blank input
    /// - `DescriptorError::Unsupported` - Neither a magnet URI nor a bare id
    /// - `DescriptorError::MissingTopic` / `DuplicateTopic` - Bad `xt` count
    /// - `DescriptorError::InvalidLength` / `InvalidHex` - Bad identifier
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DescriptorError::Empty);
        }

        if input.len() == CONTENT_ID_HEX_LEN && !input.contains(':') {
            return ContentId::from_hex(input).map(Self::from_id);
        }

        let is_magnet = input
            .get(..MAGNET_SCHEME.len() + 1)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("magnet:"));
        if !is_magnet {
            return Err(DescriptorError::Unsupported {
                descriptor: input.to_string(),
            });
        }

        Self::parse_magnet(input)
    }

    fn parse_magnet(input: &str) -> Result<Self, DescriptorError> {
        let url = Url::parse(input).map_err(|e| DescriptorError::MalformedUri {
            reason: e.to_string(),
        })?;

        let mut id = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let Some(hash) = strip_prefix_ignore_case(&value, BTIH_PREFIX) else {
                        // Other topics (e.g. v2 btmh) may accompany the btih one.
                        continue;
                    };
                    if id.is_some() {
                        return Err(DescriptorError::DuplicateTopic);
                    }
                    id = Some(ContentId::from_hex(hash)?);
                }
                "dn" if !value.is_empty() => display_name = Some(value.into_owned()),
                "tr" if !value.is_empty() => {
                    let tracker = value.into_owned();
                    if !trackers.contains(&tracker) {
                        trackers.push(tracker);
                    }
                }
                _ => {}
            }
        }

        let id = id.ok_or(DescriptorError::MissingTopic)?;
        Ok(Self {
            id,
            display_name,
            trackers,
        })
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_parse_bare_identifier() {
        let descriptor = ContentDescriptor::parse(HASH).unwrap();
        assert_eq!(descriptor.id.to_string(), HASH);
        assert!(descriptor.display_name.is_none());
        assert!(descriptor.trackers.is_empty());
    }

    #[test]
    fn test_parse_magnet_with_name_and_trackers() {
        let magnet = format!(
            "magnet:?xt=urn:btih:{}&dn=Big%20Buck%20Bunny&tr=udp%3A%2F%2Ftracker.example.org%3A1337&tr=http://t.example.com/announce",
            HASH.to_uppercase()
        );
        let descriptor = ContentDescriptor::parse(&magnet).unwrap();

        assert_eq!(descriptor.id.to_string(), HASH);
        assert_eq!(descriptor.display_name.as_deref(), Some("Big Buck Bunny"));
        assert_eq!(
            descriptor.trackers,
            vec![
                "udp://tracker.example.org:1337".to_string(),
                "http://t.example.com/announce".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let magnet = format!("  magnet:?xt=urn:btih:{HASH}\n");
        assert!(ContentDescriptor::parse(&magnet).is_ok());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(
            ContentDescriptor::parse("   "),
            Err(DescriptorError::Empty)
        );
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let result = ContentDescriptor::parse("http://example.com/file.torrent");
        assert!(matches!(result, Err(DescriptorError::Unsupported { .. })));
    }

    #[test]
    fn test_parse_rejects_missing_topic() {
        let result = ContentDescriptor::parse("magnet:?dn=nothing");
        assert_eq!(result, Err(DescriptorError::MissingTopic));
    }

    #[test]
    fn test_parse_rejects_base32_hash() {
        let result = ContentDescriptor::parse("magnet:?xt=urn:btih:MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43U");
        assert!(matches!(
            result,
            Err(DescriptorError::InvalidLength { length: 32 })
        ));
    }

    #[test]
    fn test_parse_rejects_duplicate_topic() {
        let magnet = format!("magnet:?xt=urn:btih:{HASH}&xt=urn:btih:{HASH}");
        assert_eq!(
            ContentDescriptor::parse(&magnet),
            Err(DescriptorError::DuplicateTopic)
        );
    }

    #[test]
    fn test_parse_ignores_non_btih_topics() {
        let magnet = format!("magnet:?xt=urn:btmh:1220abcdef&xt=urn:btih:{HASH}");
        let descriptor = ContentDescriptor::parse(&magnet).unwrap();
        assert_eq!(descriptor.id.to_string(), HASH);
    }

    #[test]
    fn test_parse_rejects_hash_with_trailing_garbage() {
        let magnet = format!("magnet:?xt=urn:btih:{HASH}ff");
        assert!(matches!(
            ContentDescriptor::parse(&magnet),
            Err(DescriptorError::InvalidLength { length: 42 })
        ));
    }
}
