//! Built-in tools: web search, system introspection, and shell commands.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dasi::config::DasiConfig;
//! use dasi::sidechannel::WebSearchResolver;
//! use dasi::tools::builtin::default_registry;
//!
//! let registry = default_registry(&DasiConfig::default(), WebSearchResolver::unconfigured())?;
//! assert_eq!(registry.len(), 3);
//! # Ok::<(), dasi::error::DasiError>(())
//! ```

pub mod system_info;
pub mod terminal;
pub mod web_search;

use std::sync::Arc;

use crate::config::DasiConfig;
use crate::error::Result;
use crate::sidechannel::WebSearchResolver;

use super::registry::ToolRegistry;

pub use system_info::SystemInfoTool;
pub use terminal::TerminalCommandTool;
pub use web_search::WebSearchTool;

/// Registry holding every built-in tool enabled in `config`.
pub fn default_registry(config: &DasiConfig, web: WebSearchResolver) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    if config.tool_enabled(web_search::NAME) {
        registry.register(Arc::new(WebSearchTool::new(web)));
    }
    if config.tool_enabled(system_info::NAME) {
        registry.register(Arc::new(SystemInfoTool::new()));
    }
    if config.tool_enabled(terminal::NAME) {
        registry.register(Arc::new(TerminalCommandTool::new(&config.tools.terminal)?));
    }
    Ok(registry)
}

/// Truncate to at most `max_bytes` without splitting a code point.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_utf8_never_splits_codepoints() {
        let s = "ab😀cd";
        assert_eq!(truncate_utf8(s, 0), "");
        assert_eq!(truncate_utf8(s, 2), "ab");
        assert_eq!(truncate_utf8(s, 3), "ab");
        assert_eq!(truncate_utf8(s, 5), "ab");
        assert_eq!(truncate_utf8(s, 6), "ab😀");
    }

    #[test]
    fn registry_follows_enabled_list() {
        let mut config = DasiConfig::default();
        config.tools.enabled = vec!["system_info".into()];
        let registry = default_registry(&config, WebSearchResolver::unconfigured()).unwrap();
        assert_eq!(registry.names(), vec!["system_info"]);

        let all = default_registry(&DasiConfig::default(), WebSearchResolver::unconfigured()).unwrap();
        assert_eq!(all.names(), vec!["web_search", "system_info", "terminal_command"]);
    }

    #[test]
    fn invalid_deny_pattern_is_a_configuration_error() {
        let mut config = DasiConfig::default();
        config.tools.terminal.deny_patterns = vec!["(unclosed".into()];
        assert!(default_registry(&config, WebSearchResolver::unconfigured()).is_err());
    }
}
