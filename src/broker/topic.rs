//! Topic layout and filter matching.
//!
//! ```text
//! device/status/<device>/<channel>/<parameter>
//! sysvar/status/<id>
//! program/status/<id>
//! ```

/// Topic of a device parameter value.
pub fn device_status(device: &str, channel: &str, parameter: &str) -> String {
    format!("device/status/{device}/{channel}/{parameter}")
}

/// Topic mirroring a resource model path, for the collections that are
/// published. `None` for everything else.
pub fn model_status(path: &str) -> Option<String> {
    let (collection, id) = path.split_once('/')?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    match collection {
        "sysvar" | "program" => Some(format!("{collection}/status/{id}")),
        _ => None,
    }
}

/// Match a topic against a filter with `+` (one level) and `#` (rest)
/// wildcards.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topics carry identifiers verbatim, so a level must not contain the
/// separator or a wildcard.
pub fn is_valid_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_topic_layout() {
        assert_eq!(
            device_status("000A1B2C3D", "1", "STATE"),
            "device/status/000A1B2C3D/1/STATE"
        );
    }

    #[test]
    fn only_variables_and_programs_are_mirrored() {
        assert_eq!(model_status("sysvar/1234").as_deref(), Some("sysvar/status/1234"));
        assert_eq!(model_status("program/77").as_deref(), Some("program/status/77"));
        assert_eq!(model_status("device/ABC/1/STATE"), None);
        assert_eq!(model_status("sysvar"), None);
        assert_eq!(model_status("room/5"), None);
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches("device/status/#", "device/status/A/1/STATE"));
        assert!(matches("device/status/+/1/STATE", "device/status/A/1/STATE"));
        assert!(!matches("device/status/+/2/STATE", "device/status/A/1/STATE"));
        assert!(!matches("device/status", "device/status/A"));
        assert!(matches("#", "sysvar/status/1"));
    }

    #[test]
    fn level_validation() {
        assert!(is_valid_level("STATE"));
        assert!(!is_valid_level(""));
        assert!(!is_valid_level("a/b"));
        assert!(!is_valid_level("x#"));
    }
}
