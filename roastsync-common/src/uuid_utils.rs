//! UUID utilities
//!
//! The desktop client sends identifiers either in dashed form or as 32 raw
//! hex characters; both name the same entity.

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse a client identifier: dashed UUID or 32 hex chars (any case)
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    let compact: String = s.trim().chars().filter(|c| *c != '-').collect();
    if compact.len() == 32 && compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return Uuid::parse_str(&compact.to_ascii_lowercase());
    }
    Uuid::parse_str(s.trim())
}

/// Lenient variant used for optional links (schedule, template)
pub fn parse_opt(s: Option<&str>) -> Option<Uuid> {
    s.filter(|v| !v.trim().is_empty()).and_then(|v| parse(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dashed_and_hex_forms_agree() {
        let dashed = parse("3f2b8c1e-9a4d-4e6f-8b1a-2c3d4e5f6a7b").unwrap();
        let hex = parse("3F2B8C1E9A4D4E6F8B1A2C3D4E5F6A7B").unwrap();
        assert_eq!(dashed, hex);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("not-a-roast").is_err());
        assert!(parse("").is_err());
        assert!(parse("3f2b8c1e9a4d4e6f8b1a2c3d4e5f6a7").is_err()); // 31 chars
    }

    #[test]
    fn test_parse_opt_ignores_blank_and_invalid() {
        assert!(parse_opt(None).is_none());
        assert!(parse_opt(Some("  ")).is_none());
        assert!(parse_opt(Some("xyz")).is_none());
        assert!(parse_opt(Some("3f2b8c1e9a4d4e6f8b1a2c3d4e5f6a7b")).is_some());
    }
}
