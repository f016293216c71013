//! Helper library namespace
//!
//! The helper library is JavaScript that registers capabilities through a
//! `declare(name, value)` callback. Each injected unit runs the library
//! against a private object and freezes it as `$lib`, so separate units in
//! the same page never share helper state.

use std::fmt::Write;

/// Name user scripts reach the helpers through.
pub const NAMESPACE: &str = "$lib";

/// Helper library source plus the capability names it declares.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HelperLibrary {
    source: String,
    capabilities: Vec<String>,
}

/// Registration callback handed to [`HelperLibrary::build`].
#[derive(Debug, Default)]
pub struct Declare {
    entries: Vec<(String, String)>,
}

impl Declare {
    /// Register `name` with a JavaScript expression as its value.
    /// A later registration of the same name replaces the earlier one.
    pub fn declare(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        if !is_identifier(name) {
            log::warn!("Ignoring helper with invalid name {:?}", name);
            return self;
        }
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
        self
    }
}

impl HelperLibrary {
    /// Wrap an existing library source. Capabilities are discovered from its
    /// `declare("name", ...)` calls.
    pub fn from_source(source: impl Into<String>) -> Self {
        let source = source.into();
        let capabilities = scan_declarations(&source);
        Self { source, capabilities }
    }

    /// Build a library from registrations.
    ///
    /// ```
    /// use inj_core::HelperLibrary;
    ///
    /// let lib = HelperLibrary::build(|d| {
    ///     d.declare("q", "(s) => document.querySelector(s)");
    /// });
    /// assert_eq!(lib.capabilities(), ["q"]);
    /// ```
    pub fn build<F: FnOnce(&mut Declare)>(register: F) -> Self {
        let mut declare = Declare::default();
        register(&mut declare);

        let mut source = String::new();
        for (name, value) in &declare.entries {
            let _ = writeln!(source, "declare({:?}, {});", name, value);
        }

        Self {
            source,
            capabilities: declare.entries.into_iter().map(|(name, _)| name).collect(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty()
    }

    /// JavaScript statement defining the frozen `$lib` namespace.
    pub fn namespace_source(&self) -> String {
        format!(
            "const {ns} = (() => {{\n\
             const capabilities = Object.create(null);\n\
             (declare => {{\n{src}\n}})((name, value) => {{ capabilities[name] = value; }});\n\
             return Object.freeze(capabilities);\n\
             }})();\n",
            ns = NAMESPACE,
            src = self.source,
        )
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Collect `name` from every `declare("name"` / `declare('name'` call.
fn scan_declarations(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    for (pos, _) in source.match_indices("declare(") {
        // Skip identifiers that merely end in "declare"
        let preceded_by_ident = source[..pos]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
        if preceded_by_ident {
            continue;
        }

        let rest = source[pos + "declare(".len()..].trim_start();
        let Some(quote) = rest.chars().next().filter(|c| matches!(c, '"' | '\'' | '`')) else {
            continue;
        };
        let Some(end) = rest[1..].find(quote) else {
            continue;
        };
        let name = &rest[1..1 + end];
        if is_identifier(name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_declarations() {
        let src = r#"
            declare("q", (s) => document.querySelector(s))
            declare( 'qa', (s) => [])
            declare(`loc`, window.location)
            undeclare("nope", 1)
            obj.declare("nope2", 1)
            declare("q", 2)
        "#;
        assert_eq!(HelperLibrary::from_source(src).capabilities(), ["q", "qa", "loc"]);
    }

    #[test]
    fn test_build_registers_in_order() {
        let lib = HelperLibrary::build(|d| {
            d.declare("q", "(s) => document.querySelector(s)")
                .declare("hide", "(s) => {}")
                .declare("bad name", "1")
                .declare("q", "(s) => null");
        });
        assert_eq!(lib.capabilities(), ["q", "hide"]);
        assert_eq!(
            lib.source(),
            "declare(\"q\", (s) => null);\ndeclare(\"hide\", (s) => {});\n"
        );
    }

    #[test]
    fn test_namespace_is_private_and_frozen() {
        let lib = HelperLibrary::build(|d| {
            d.declare("one", "1");
        });
        let ns = lib.namespace_source();
        assert!(ns.starts_with("const $lib = (() => {"));
        assert!(ns.contains("capabilities[name] = value;"));
        assert!(ns.contains("return Object.freeze(capabilities);"));
        assert!(ns.contains("declare(\"one\", 1);"));
        assert!(!ns.contains("window."));
    }

    #[test]
    fn test_builtin_library_surface() {
        let lib = HelperLibrary::from_source(include_str!("../assets/lib.js"));
        for name in ["q", "qa", "waitFor", "hide", "remove", "removeAll", "loop", "domReady", "pageReady"] {
            assert!(lib.capabilities().iter().any(|c| c == name), "missing capability {}", name);
        }
    }
}
