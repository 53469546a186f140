//! Resolves a manifest's `entry` field to a trusted plugin factory (spec §4.H
//! `EntryResolver`). Sandboxed plugins never reach this — the sandbox worker binary
//! resolves its own entry inside the child process.
//!
//! This binary only ships the reference `calc`/`flaky` entries (spec §8 scenarios).
//! A real deployment would extend this match with its own compiled-in trusted plugins.

use plugin_core::demo::{CalcPlugin, FlakyPlugin};
use plugin_core::reload::EntryResolver;
use plugin_core::supervisor::TrustedFactory;

pub struct BuiltinEntryResolver;

impl EntryResolver for BuiltinEntryResolver {
    fn resolve_trusted(&self, entry: &str) -> Option<TrustedFactory> {
        match entry {
            "calc::entry" => Some(std::sync::Arc::new(|| Box::new(CalcPlugin) as Box<dyn plugin_core::traits::Plugin>)),
            "flaky::entry" => {
                Some(std::sync::Arc::new(|| Box::new(FlakyPlugin::new(2)) as Box<dyn plugin_core::traits::Plugin>))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_known_entries() {
        let resolver = BuiltinEntryResolver;
        assert!(resolver.resolve_trusted("calc::entry").is_some());
        assert!(resolver.resolve_trusted("flaky::entry").is_some());
    }

    #[test]
    fn test_unknown_entry_resolves_to_none() {
        let resolver = BuiltinEntryResolver;
        assert!(resolver.resolve_trusted("unknown::entry").is_none());
    }
}
