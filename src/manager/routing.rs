// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool name to provider routing.

use std::collections::HashMap;

use crate::transport::ToolDescriptor;

/// Maps each tool name to the provider that serves it.
///
/// Built from providers in configuration order; when two providers offer
/// the same tool name, the later one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: HashMap<String, String>,
}

impl RoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from each provider's tools, in configuration order.
    pub fn build<'a, I>(providers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [ToolDescriptor])>,
    {
        let mut table = Self::new();
        for (provider, tools) in providers {
            for tool in tools {
                table.insert(&tool.name, provider);
            }
        }
        table
    }

    /// Route `tool` to `provider`, returning the provider it replaced.
    pub fn insert(&mut self, tool: &str, provider: &str) -> Option<String> {
        let previous = self.routes.insert(tool.to_string(), provider.to_string());
        if let Some(previous) = previous.as_deref().filter(|p| *p != provider) {
            tracing::warn!(
                tool = %tool,
                previous = %previous,
                provider = %provider,
                "tool name collision, later provider wins"
            );
        }
        previous
    }

    /// Provider serving `tool`.
    pub fn resolve(&self, tool: &str) -> Option<&str> {
        self.routes.get(tool).map(String::as_str)
    }

    /// Number of routed tools.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no tools are routed.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Remove every route.
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Tools routed to `provider`, sorted.
    pub fn tools_for(&self, provider: &str) -> Vec<&str> {
        let mut tools: Vec<&str> = self
            .routes
            .iter()
            .filter(|(_, p)| p.as_str() == provider)
            .map(|(t, _)| t.as_str())
            .collect();
        tools.sort_unstable();
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(provider: &str, names: &[&str]) -> Vec<ToolDescriptor> {
        names.iter().map(|n| ToolDescriptor::new(*n, provider)).collect()
    }

    #[test]
    fn test_build_routes_every_tool() {
        let a = tools("a", &["read", "write"]);
        let b = tools("b", &["search"]);
        let table = RoutingTable::build([("a", a.as_slice()), ("b", b.as_slice())]);

        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve("read"), Some("a"));
        assert_eq!(table.resolve("search"), Some("b"));
        assert_eq!(table.resolve("missing"), None);
        assert_eq!(table.tools_for("a"), vec!["read", "write"]);
    }

    #[test]
    fn test_later_provider_wins_collision() {
        let a = tools("a", &["echo", "only_a"]);
        let b = tools("b", &["echo"]);
        let table = RoutingTable::build([("a", a.as_slice()), ("b", b.as_slice())]);
        assert_eq!(table.resolve("echo"), Some("b"));
        assert_eq!(table.resolve("only_a"), Some("a"));

        let table = RoutingTable::build([("b", b.as_slice()), ("a", a.as_slice())]);
        assert_eq!(table.resolve("echo"), Some("a"));
    }

    #[test]
    fn test_insert_reports_previous() {
        let mut table = RoutingTable::new();
        assert_eq!(table.insert("echo", "a"), None);
        assert_eq!(table.insert("echo", "b").as_deref(), Some("a"));
        table.clear();
        assert!(table.is_empty());
    }
}
