use uuid::Uuid;

pub const CONTEXT_ID_BIN_LENGTH: usize = 16;

/// Sentinel stored for legacy identifiers that parse as neither
/// supported encoding. Distinct from NULL, which means "no identifier".
pub const UNKNOWN_CONTEXT_ID: [u8; CONTEXT_ID_BIN_LENGTH] = [0; CONTEXT_ID_BIN_LENGTH];

const LEGACY_UUID_LENGTH: usize = 32;
const LEGACY_ULID_LENGTH: usize = 26;

/// Decode a textual context identifier into its 16 raw bytes.
///
/// Two historical encodings exist side by side in old databases: a
/// 32-hex UUID and a 26-character sortable identifier. Anything else
/// is unparseable and yields `None`.
pub fn context_id_to_bytes(value: &str) -> Option<[u8; CONTEXT_ID_BIN_LENGTH]> {
    match value.len() {
        LEGACY_UUID_LENGTH => Uuid::try_parse(value).ok().map(|uuid| *uuid.as_bytes()),
        LEGACY_ULID_LENGTH => ulid::Ulid::from_string(value)
            .ok()
            .map(|ulid| ulid.to_bytes()),
        _ => None,
    }
}

/// Encode an optional textual identifier for a binary context column.
///
/// A missing identifier stays NULL; a present but unparseable one maps
/// to [`UNKNOWN_CONTEXT_ID`] so it is never left unresolved.
pub fn encode_context_id(value: Option<&str>) -> Option<[u8; CONTEXT_ID_BIN_LENGTH]> {
    let value = value?;
    Some(context_id_to_bytes(value).unwrap_or(UNKNOWN_CONTEXT_ID))
}

#[cfg(test)]
mod tests {
    use super::{UNKNOWN_CONTEXT_ID, context_id_to_bytes, encode_context_id};
    use uuid::Uuid;

    #[test]
    fn decodes_hex_uuid_form() {
        let uuid = Uuid::new_v4();
        let hex = uuid.simple().to_string();
        assert_eq!(context_id_to_bytes(&hex), Some(*uuid.as_bytes()));
    }

    #[test]
    fn decodes_sortable_form() {
        let text = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
        let bytes = context_id_to_bytes(text).expect("decode");
        assert_eq!(ulid::Ulid::from_bytes(bytes).to_string(), text);
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(context_id_to_bytes("invalid"), None);
        assert_eq!(context_id_to_bytes(""), None);
        let hyphenated = Uuid::new_v4().to_string();
        assert_eq!(context_id_to_bytes(&hyphenated), None);
    }

    #[test]
    fn encode_maps_null_and_garbage_differently() {
        assert_eq!(encode_context_id(None), None);
        assert_eq!(encode_context_id(Some("invalid")), Some(UNKNOWN_CONTEXT_ID));
        let uuid = Uuid::new_v4();
        let hex = uuid.simple().to_string();
        assert_eq!(encode_context_id(Some(&hex)), Some(*uuid.as_bytes()));
    }
}
