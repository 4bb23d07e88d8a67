//! `widget://` deep-link handling.
//!
//! The only supported action is `widget://install/{pluginId}`. The plugin
//! id is validated against the id charset before any I/O happens; a hostile
//! link cannot reach the registry or the filesystem with a malformed id.

use crate::error::{HostError, HostResult};
use widgetry_types::PluginId;

const SCHEME_PREFIX: &str = "widget://";
const INSTALL_ACTION: &str = "install";

/// Parses a `widget://install/{pluginId}` URL into a validated plugin id.
pub fn parse_install_link(link: &str) -> HostResult<PluginId> {
    let rest = link
        .strip_prefix(SCHEME_PREFIX)
        .ok_or_else(|| HostError::InvalidConfig(format!("not a widget:// link: {link}")))?;

    let (action, id) = rest
        .split_once('/')
        .ok_or_else(|| HostError::InvalidConfig(format!("malformed widget link: {link}")))?;
    if action != INSTALL_ACTION {
        return Err(HostError::InvalidConfig(format!(
            "unsupported widget action '{action}'"
        )));
    }

    // PluginId::new rejects path separators, dots, whitespace, and control
    // characters, so traversal payloads die here.
    Ok(PluginId::new(id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_valid_install_link() {
        let id = parse_install_link("widget://install/clock").unwrap();
        assert_eq!(id.as_str(), "clock");

        let id = parse_install_link("widget://install/weather-widget_2").unwrap();
        assert_eq!(id.as_str(), "weather-widget_2");
    }

    #[test]
    fn rejects_traversal_before_any_io() {
        assert!(parse_install_link("widget://install/../../etc").is_err());
        assert!(parse_install_link("widget://install/a/b").is_err());
        assert!(parse_install_link("widget://install/..").is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(parse_install_link("widget://install/my.widget").is_err());
        assert!(parse_install_link("widget://install/my widget").is_err());
        assert!(parse_install_link("widget://install/").is_err());
        assert!(parse_install_link(&format!("widget://install/{}", "a".repeat(101))).is_err());
    }

    #[test]
    fn rejects_other_schemes_and_actions() {
        assert!(parse_install_link("https://install/clock").is_err());
        assert!(parse_install_link("WIDGET://install/clock").is_err());
        assert!(parse_install_link("widget://uninstall/clock").is_err());
        assert!(parse_install_link("widget://install").is_err());
    }
}
