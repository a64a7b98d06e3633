use base64::Engine;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

use crate::error::{BridgeError, Result};

/// Base64 engines tried in order for `-bin` metadata values.
///
/// Peers are inconsistent about padding and the URL-safe alphabet, so
/// decoding is lenient: the first engine that accepts the value wins.
const BASE64_ENGINES: [base64::engine::GeneralPurpose; 4] = [
    base64::engine::general_purpose::STANDARD,
    base64::engine::general_purpose::URL_SAFE,
    base64::engine::general_purpose::STANDARD_NO_PAD,
    base64::engine::general_purpose::URL_SAFE_NO_PAD,
];

/// Build a gRPC MetadataMap from a flat, ordered list of alternating
/// keys and values.
///
/// An odd-length list is a configuration error: every key must have a
/// value. Rules for each pair:
/// - key is lowercased
/// - keys ending in `-bin` carry binary values; the value is decoded
///   from base64 (several codecs tried) and falls back to the raw
///   bytes of the string
/// - a key or value the transport cannot represent is a configuration
///   error (nothing is silently dropped)
///
/// Insertion order is preserved on the wire.
pub fn metadata_from_flat(items: &[String]) -> Result<MetadataMap> {
    if items.len() % 2 != 0 {
        return Err(BridgeError::Config(format!(
            "metadata list must have an even number of entries, got {}",
            items.len()
        )));
    }

    let mut map = MetadataMap::new();
    for pair in items.chunks_exact(2) {
        append_pair(&mut map, &pair[0], &pair[1])?;
    }
    Ok(map)
}

/// Build a MetadataMap from `(key, value)` pairs. Same rules as
/// [`metadata_from_flat`] without the even-length precondition.
pub fn metadata_from_pairs<K, V>(pairs: &[(K, V)]) -> Result<MetadataMap>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut map = MetadataMap::new();
    for (key, value) in pairs {
        append_pair(&mut map, key.as_ref(), value.as_ref())?;
    }
    Ok(map)
}

fn append_pair(map: &mut MetadataMap, key: &str, value: &str) -> Result<()> {
    let name = key.trim().to_lowercase();
    if name.is_empty() {
        return Err(BridgeError::Config("empty metadata key".into()));
    }

    if name.ends_with("-bin") {
        let key = tonic::metadata::BinaryMetadataKey::from_bytes(name.as_bytes())
            .map_err(|_| BridgeError::Config(format!("invalid binary metadata key '{name}'")))?;
        let bytes =
            try_base64_decode(value).unwrap_or_else(|| value.as_bytes().to_vec());
        map.append_bin(
            key,
            tonic::metadata::BinaryMetadataValue::from_bytes(&bytes),
        );
    } else {
        let key = tonic::metadata::AsciiMetadataKey::from_bytes(name.as_bytes())
            .map_err(|_| BridgeError::Config(format!("invalid metadata key '{name}'")))?;
        let value = value.parse::<AsciiMetadataValue>().map_err(|_| {
            BridgeError::Config(format!("invalid metadata value for key '{name}'"))
        })?;
        map.append(key, value);
    }
    Ok(())
}

/// Try to decode a base64 string using multiple codecs.
///
/// Returns the first successful decode, or None if all fail.
fn try_base64_decode(value: &str) -> Option<Vec<u8>> {
    for engine in &BASE64_ENGINES {
        if let Ok(decoded) = engine.decode(value.trim()) {
            return Some(decoded);
        }
    }
    None
}

/// Format a MetadataMap as a human-readable string, one `key: value`
/// line per entry, sorted by key. Binary values are base64-encoded.
pub fn metadata_to_string(md: &MetadataMap) -> String {
    if md.is_empty() {
        return "(empty)".to_string();
    }

    let mut lines: Vec<String> = Vec::new();
    for entry in md.iter() {
        match entry {
            tonic::metadata::KeyAndValueRef::Ascii(key, value) => {
                let val_str = value.to_str().unwrap_or("<non-utf8>");
                lines.push(format!("{key}: {val_str}"));
            }
            tonic::metadata::KeyAndValueRef::Binary(key, value) => {
                let bytes = value.to_bytes().unwrap_or_default();
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                lines.push(format!("{key}: {encoded}"));
            }
        }
    }

    lines.sort();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_list_builds_map() {
        let items = vec![
            "x-trace".to_string(),
            "abc".to_string(),
            "X-Tenant".to_string(),
            "acme".to_string(),
        ];
        let md = metadata_from_flat(&items).unwrap();
        assert_eq!(md.get("x-trace").unwrap().to_str().unwrap(), "abc");
        assert_eq!(md.get("x-tenant").unwrap().to_str().unwrap(), "acme");
    }

    #[test]
    fn odd_length_is_configuration_error() {
        let items = vec!["x-trace".to_string()];
        let err = metadata_from_flat(&items).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn empty_list_is_empty_map() {
        let md = metadata_from_flat(&[]).unwrap();
        assert!(md.is_empty());
    }

    #[test]
    fn keys_are_lowercased() {
        let md = metadata_from_pairs(&[("X-Trace", "abc")]).unwrap();
        assert!(md.get("x-trace").is_some());
    }

    #[test]
    fn binary_key_decodes_base64() {
        // "hello" in standard base64
        let md = metadata_from_pairs(&[("x-data-bin", "aGVsbG8=")]).unwrap();
        let val = md.get_bin("x-data-bin").expect("binary key present");
        assert_eq!(val.to_bytes().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn binary_key_accepts_unpadded_base64() {
        let md = metadata_from_pairs(&[("x-data-bin", "aGVsbG8")]).unwrap();
        let val = md.get_bin("x-data-bin").expect("binary key present");
        assert_eq!(val.to_bytes().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn invalid_value_is_configuration_error() {
        let err = metadata_from_pairs(&[("x-key", "bad\u{7f}value")]).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn empty_key_rejected() {
        let err = metadata_from_pairs(&[("  ", "v")]).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn to_string_is_sorted() {
        let md = metadata_from_pairs(&[("x-beta", "two"), ("x-alpha", "one")]).unwrap();
        let output = metadata_to_string(&md);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines, vec!["x-alpha: one", "x-beta: two"]);
    }

    #[test]
    fn to_string_empty() {
        assert_eq!(metadata_to_string(&MetadataMap::new()), "(empty)");
    }
}
