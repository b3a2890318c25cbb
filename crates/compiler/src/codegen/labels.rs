//! Label management: lexical scopes, control-flow targets, and fixups.
//!
//! Each scope kind mints its own labels from one monotonic counter when
//! pushed. Control-flow statements ask for the innermost relevant label:
//! RESULTIS finds the nearest VALOF, LOOP the nearest loop's back-edge,
//! ENDCASE the nearest SWITCHON, RETURN the nearest function. Labels defined
//! twice in the same scope, or twice globally, are fatal.

use std::collections::{HashMap, HashSet};

use crate::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Function,
    Valof,
    Loop,
    Switchon,
    Compound,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    /// Function return / loop exit / switch end / valof end.
    end_label: String,
    /// RESULTIS target (valof scopes).
    resultis_label: Option<String>,
    /// Back-edge target (loop scopes).
    repeat_label: Option<String>,
    /// ENDCASE target (switchon scopes).
    endcase_label: Option<String>,
    locals: HashMap<String, u64>,
}

/// A branch recorded for later patching: instruction address and the label
/// it must reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixup {
    pub instruction_address: u64,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct LabelManager {
    counter: u64,
    scopes: Vec<Scope>,
    globals: HashMap<String, u64>,
    fixups: Vec<Fixup>,
    /// Every label ever defined, surviving scope pops, for end-of-compile
    /// fixup validation.
    defined: HashSet<String>,
}

impl LabelManager {
    pub fn new() -> Self {
        LabelManager::default()
    }

    pub fn generate_label(&mut self, prefix: &str) -> String {
        let label = format!("{}_{}", prefix, self.counter);
        self.counter += 1;
        label
    }

    pub fn push_scope(&mut self, kind: ScopeKind) {
        let (end_label, resultis_label, repeat_label, endcase_label) = match kind {
            ScopeKind::Function => (self.generate_label("return"), None, None, None),
            ScopeKind::Valof => (
                self.generate_label("valof_end"),
                Some(self.generate_label("resultis")),
                None,
                None,
            ),
            ScopeKind::Loop => (
                self.generate_label("loop_end"),
                None,
                Some(self.generate_label("repeat")),
                None,
            ),
            ScopeKind::Switchon => (
                self.generate_label("switch_end"),
                None,
                None,
                Some(self.generate_label("endcase")),
            ),
            ScopeKind::Compound => (self.generate_label("block_end"), None, None, None),
        };
        self.scopes.push(Scope {
            kind,
            end_label,
            resultis_label,
            repeat_label,
            endcase_label,
            locals: HashMap::new(),
        });
    }

    pub fn pop_scope(&mut self) -> Result<(), CompileError> {
        if self.scopes.pop().is_none() {
            return Err(CompileError::Semantic(
                "label scope stack underflow".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Define `label` at `position`: locally in the current scope, globally
    /// when no scope is open. Redefinition is fatal either way.
    pub fn define_label(&mut self, label: &str, position: u64) -> Result<(), CompileError> {
        if self.globals.contains_key(label) {
            return Err(CompileError::Semantic(format!(
                "label already defined globally: {}",
                label
            )));
        }
        match self.scopes.last_mut() {
            Some(scope) => {
                if scope.locals.contains_key(label) {
                    return Err(CompileError::Semantic(format!(
                        "label already defined in this scope: {}",
                        label
                    )));
                }
                scope.locals.insert(label.to_string(), position);
            }
            None => {
                self.globals.insert(label.to_string(), position);
            }
        }
        self.defined.insert(label.to_string());
        Ok(())
    }

    /// Whether `label` was defined at any point of the compilation.
    pub fn is_defined(&self, label: &str) -> bool {
        self.defined.contains(label)
    }

    /// Define a cross-function callable name (function entry points).
    pub fn define_global_label(&mut self, label: &str, position: u64) -> Result<(), CompileError> {
        if self.globals.contains_key(label) {
            return Err(CompileError::Semantic(format!(
                "label already defined globally: {}",
                label
            )));
        }
        self.globals.insert(label.to_string(), position);
        self.defined.insert(label.to_string());
        Ok(())
    }

    pub fn label_position(&self, label: &str) -> Option<u64> {
        if let Some(&position) = self.globals.get(label) {
            return Some(position);
        }
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.locals.get(label).copied())
    }

    pub fn request_fixup(&mut self, label: &str, instruction_address: u64) {
        self.fixups.push(Fixup {
            instruction_address,
            label: label.to_string(),
        });
    }

    /// Drain the recorded fixups.
    pub fn take_fixups(&mut self) -> Vec<Fixup> {
        std::mem::take(&mut self.fixups)
    }

    /// RESULTIS target of the innermost VALOF.
    pub fn current_resultis_label(&self) -> Result<&str, CompileError> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.kind == ScopeKind::Valof)
            .and_then(|s| s.resultis_label.as_deref())
            .ok_or_else(|| {
                CompileError::Semantic("RESULTIS outside of any VALOF".to_string())
            })
    }

    /// Back-edge target of the innermost loop.
    pub fn current_repeat_label(&self) -> Result<&str, CompileError> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.kind == ScopeKind::Loop)
            .and_then(|s| s.repeat_label.as_deref())
            .ok_or_else(|| CompileError::Semantic("LOOP outside of any loop".to_string()))
    }

    /// ENDCASE target of the innermost SWITCHON.
    pub fn current_endcase_label(&self) -> Result<&str, CompileError> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.kind == ScopeKind::Switchon)
            .and_then(|s| s.endcase_label.as_deref())
            .ok_or_else(|| {
                CompileError::Semantic("ENDCASE outside of any SWITCHON".to_string())
            })
    }

    /// Exit label of the innermost loop or switch, for BREAK.
    pub fn current_break_label(&self) -> Result<&str, CompileError> {
        self.scopes
            .iter()
            .rev()
            .find(|s| matches!(s.kind, ScopeKind::Loop | ScopeKind::Switchon))
            .map(|s| s.end_label.as_str())
            .ok_or_else(|| {
                CompileError::Semantic("BREAK outside of any loop or SWITCHON".to_string())
            })
    }

    /// Return label of the nearest enclosing function.
    pub fn current_return_label(&self) -> Result<&str, CompileError> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.kind == ScopeKind::Function)
            .map(|s| s.end_label.as_str())
            .ok_or_else(|| CompileError::Semantic("not inside a function".to_string()))
    }

    /// End label of the innermost scope of any kind.
    pub fn current_end_label(&self) -> Result<&str, CompileError> {
        self.scopes
            .last()
            .map(|s| s.end_label.as_str())
            .ok_or_else(|| CompileError::Semantic("no open scope".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_unique_and_monotonic() {
        let mut manager = LabelManager::new();
        let a = manager.generate_label("case");
        let b = manager.generate_label("case");
        assert_ne!(a, b);
        assert_eq!(a, "case_0");
        assert_eq!(b, "case_1");
    }

    #[test]
    fn test_scope_kinds_mint_their_labels() {
        let mut manager = LabelManager::new();
        manager.push_scope(ScopeKind::Function);
        assert!(manager.current_return_label().unwrap().starts_with("return"));

        manager.push_scope(ScopeKind::Valof);
        assert!(manager
            .current_resultis_label()
            .unwrap()
            .starts_with("resultis"));

        manager.push_scope(ScopeKind::Loop);
        assert!(manager.current_repeat_label().unwrap().starts_with("repeat"));
        assert!(manager.current_break_label().unwrap().starts_with("loop_end"));

        manager.push_scope(ScopeKind::Switchon);
        assert!(manager
            .current_endcase_label()
            .unwrap()
            .starts_with("endcase"));
        // BREAK now binds to the switch, not the loop.
        assert!(manager
            .current_break_label()
            .unwrap()
            .starts_with("switch_end"));
        // RETURN still reaches through to the function scope.
        assert!(manager.current_return_label().unwrap().starts_with("return"));
    }

    #[test]
    fn test_control_queries_fail_outside_their_scopes() {
        let manager = LabelManager::new();
        assert!(manager.current_resultis_label().is_err());
        assert!(manager.current_repeat_label().is_err());
        assert!(manager.current_endcase_label().is_err());
        assert!(manager.current_return_label().is_err());
    }

    #[test]
    fn test_local_redefinition_is_fatal() {
        let mut manager = LabelManager::new();
        manager.push_scope(ScopeKind::Function);
        manager.define_label("spot", 0).unwrap();
        assert!(manager.define_label("spot", 4).is_err());
    }

    #[test]
    fn test_global_redefinition_is_fatal() {
        let mut manager = LabelManager::new();
        manager.define_global_label("START", 0).unwrap();
        assert!(manager.define_global_label("START", 8).is_err());
    }

    #[test]
    fn test_shadowing_in_nested_scopes_is_allowed() {
        let mut manager = LabelManager::new();
        manager.push_scope(ScopeKind::Function);
        manager.define_label("spot", 0).unwrap();
        manager.push_scope(ScopeKind::Compound);
        manager.define_label("spot", 8).unwrap();
        assert_eq!(manager.label_position("spot"), Some(8));
        manager.pop_scope().unwrap();
        assert_eq!(manager.label_position("spot"), Some(0));
    }

    #[test]
    fn test_fixups_accumulate_and_drain() {
        let mut manager = LabelManager::new();
        manager.request_fixup("exit", 0x10);
        manager.request_fixup("exit", 0x20);
        let fixups = manager.take_fixups();
        assert_eq!(fixups.len(), 2);
        assert_eq!(fixups[0].instruction_address, 0x10);
        assert!(manager.take_fixups().is_empty());
    }

    #[test]
    fn test_pop_on_empty_stack_is_an_error() {
        let mut manager = LabelManager::new();
        assert!(manager.pop_scope().is_err());
    }
}
