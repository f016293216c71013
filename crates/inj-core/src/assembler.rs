//! Code unit assembly
//!
//! Wraps one resolved body into a self-contained IIFE the host can execute in
//! a page. The layout is fixed:
//!
//! ```text
//! ;(function injector_<slot>(__tab) {
//!   <run-once guard>
//!   <$lib namespace>
//!   try { <prelude> ; <body> } catch (e) { console.error(...) }
//! })(Object.freeze(<tab metadata>));
//! ```
//!
//! The guard flag lives on `globalThis`, so a unit delivered twice to the same
//! page runs its body once.

use std::fmt::Write;

use serde::Serialize;

use crate::helper::HelperLibrary;
use crate::resolver::ResolvedScript;
use crate::types::{RunAt, Slot, TabSnapshot};

/// Prefix of every console line emitted by injected code.
pub const LOG_PREFIX: &str = "[Injector]";

/// A unit ready for the host's script execution primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUnit {
    pub code: String,
    pub run_at: RunAt,
}

/// Assemble the code unit for one slot.
pub fn assemble(prelude: &str, script: &ResolvedScript, helper: &HelperLibrary, tab: &TabSnapshot) -> CodeUnit {
    CodeUnit {
        code: assemble_code(prelude, &script.body, helper, tab, script.slot),
        run_at: script.timing.run_at(),
    }
}

fn assemble_code(prelude: &str, body: &str, helper: &HelperLibrary, tab: &TabSnapshot, slot: Slot) -> String {
    let flag = slot.guard_flag();
    let tab_json = serde_json::to_string(tab.raw()).unwrap_or_else(|_| "{}".to_string());

    let mut code = String::with_capacity(prelude.len() + body.len() + helper.source().len() + tab_json.len() + 512);

    let _ = writeln!(code, ";(function injector_{}(__tab) {{", slot.var_name());

    // Run-once guard
    let _ = writeln!(code, "if ({:?} in globalThis) return;", flag);
    let _ = writeln!(code, "globalThis[{:?}] = true;", flag);

    code.push_str(&helper.namespace_source());

    let _ = writeln!(
        code,
        "console.debug(\"{} Running {}: \" + __tab.url);",
        LOG_PREFIX,
        slot.display_name()
    );

    code.push_str("try {\n");
    code.push_str(prelude);
    // The prelude may end mid-statement or in a line comment
    code.push_str("\n;\n");
    code.push_str(body);
    code.push('\n');
    let _ = writeln!(
        code,
        "}} catch (e) {{ console.error(\"{} Error in {}:\", e); }}",
        LOG_PREFIX,
        slot.display_name()
    );

    let _ = writeln!(code, "}})(Object.freeze({}));", tab_json);
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ScriptSource;
    use crate::types::Timing;

    fn script(slot: Slot, body: &str, timing: Timing) -> ResolvedScript {
        ResolvedScript {
            slot,
            body: body.to_string(),
            timing,
            source: ScriptSource::Stored,
        }
    }

    fn helper() -> HelperLibrary {
        HelperLibrary::build(|d| {
            d.declare("q", "(s) => document.querySelector(s)");
        })
    }

    fn tab() -> TabSnapshot {
        TabSnapshot::new(7, "https://example.com/page", "complete")
    }

    #[test]
    fn test_fixed_order() {
        let unit = assemble(
            "const q=$lib.q;",
            &script(Slot::DomainScript, "console.log(1)", Timing::Deferred),
            &helper(),
            &tab(),
        );
        let code = &unit.code;

        let guard = code.find("in globalThis) return;").unwrap();
        let set_flag = code.find("globalThis[\"$injector_domainScript_run\"] = true;").unwrap();
        let namespace = code.find("const $lib = ").unwrap();
        let prelude = code.find("const q=$lib.q;").unwrap();
        let body = code.find("console.log(1)").unwrap();
        let tab_binding = code.find("})(Object.freeze(").unwrap();

        assert!(guard < set_flag);
        assert!(set_flag < namespace);
        assert!(namespace < prelude);
        assert!(prelude < body);
        assert!(body < tab_binding);
        assert_eq!(unit.run_at, RunAt::DocumentIdle);
    }

    #[test]
    fn test_guard_runs_body_once() {
        let unit = assemble(
            "",
            &script(Slot::Generic, "g()", Timing::Deferred),
            &helper(),
            &tab(),
        );
        let code = &unit.code;

        // The guard check is the first statement of the IIFE and returns
        // before the flag, the namespace or any user code.
        let first_statement = code.lines().nth(1).unwrap();
        assert_eq!(first_statement, "if (\"$injector_generic_run\" in globalThis) return;");
        assert_eq!(code.matches("$injector_generic_run").count(), 2);
        assert!(code.starts_with(";(function injector_generic(__tab) {"));
    }

    #[test]
    fn test_redelivered_unit_is_guarded() {
        // No JS engine here: check that each copy of a doubled delivery
        // checks the shared flag before anything else it does.
        let unit = assemble("p()", &script(Slot::DomainScript, "b()", Timing::Deferred), &helper(), &tab());
        let doubled = format!("{}{}", unit.code, unit.code);

        let copies: Vec<&str> = doubled
            .split(";(function injector_")
            .filter(|c| !c.is_empty())
            .collect();
        assert_eq!(copies.len(), 2);
        for copy in copies {
            let check = copy.find("if (\"$injector_domainScript_run\" in globalThis) return;").unwrap();
            let set_flag = copy.find("globalThis[\"$injector_domainScript_run\"] = true;").unwrap();
            assert!(check < set_flag);
            assert!(check < copy.find("const $lib = ").unwrap());
            assert!(check < copy.find("p()").unwrap());
            assert!(check < copy.find("b()").unwrap());
            assert_eq!(copy.lines().nth(1), Some("if (\"$injector_domainScript_run\" in globalThis) return;"));
        }
    }

    #[test]
    fn test_prelude_statement_is_terminated() {
        let unit = assemble(
            "const { q } = $lib",
            &script(Slot::Generic, "(function () {})()", Timing::Deferred),
            &helper(),
            &tab(),
        );
        assert!(unit.code.contains("const { q } = $lib\n;\n(function () {})()"));

        let commented = assemble("p() // trailing", &script(Slot::Generic, "b()", Timing::Deferred), &helper(), &tab());
        assert!(commented.code.contains("p() // trailing\n;\nb()"));
    }

    #[test]
    fn test_slots_have_distinct_guards() {
        let generic = assemble("", &script(Slot::Generic, "a()", Timing::Deferred), &helper(), &tab());
        let domain = assemble("", &script(Slot::DomainScript, "a()", Timing::Deferred), &helper(), &tab());
        assert!(generic.code.contains("$injector_generic_run"));
        assert!(!generic.code.contains("$injector_domainScript_run"));
        assert!(domain.code.contains("$injector_domainScript_run"));
    }

    #[test]
    fn test_user_code_is_inside_try() {
        let unit = assemble("p()", &script(Slot::Generic, "b()", Timing::Deferred), &helper(), &tab());
        let code = &unit.code;
        let open = code.find("try {\n").unwrap();
        let close = code.find("} catch (e) { console.error(\"[Injector] Error in generic:\", e); }").unwrap();
        assert!(open < code.find("p()").unwrap());
        assert!(code.find("b()").unwrap() < close);
    }

    #[test]
    fn test_immediate_runs_at_document_start() {
        let unit = assemble(
            "",
            &script(Slot::DomainScript, "// #immediate\nalert(1)", Timing::Immediate),
            &helper(),
            &tab(),
        );
        assert_eq!(unit.run_at, RunAt::DocumentStart);
        // The directive comment stays on its own line
        assert!(unit.code.contains("\n// #immediate\nalert(1)\n"));
    }

    #[test]
    fn test_tab_metadata_is_frozen_argument() {
        let unit = assemble("", &script(Slot::Generic, "x()", Timing::Deferred), &helper(), &tab());
        let last = unit.code.trim_end().lines().last().unwrap();
        assert!(last.starts_with("})(Object.freeze({"));
        assert!(last.contains("\"url\":\"https://example.com/page\""));
        assert!(last.contains("\"id\":7"));
    }

    #[test]
    fn test_wire_form() {
        let unit = CodeUnit {
            code: "x".to_string(),
            run_at: RunAt::DocumentStart,
        };
        assert_eq!(
            serde_json::to_string(&unit).unwrap(),
            r#"{"code":"x","runAt":"document_start"}"#
        );
    }
}
