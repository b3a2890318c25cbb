//! Compiler configuration.
//!
//! A `CompilerConfig` selects the optimization pipeline and codegen
//! thresholds. It can be built programmatically with the `with_*` methods or
//! loaded from a TOML file:
//!
//! ```toml
//! [optimize]
//! cse = true
//! licm = true
//! inline-budget = 48
//!
//! [codegen]
//! jump-table-slack = 8
//! ```

use serde::Deserialize;

use crate::CompileError;

/// Default inlining budget, in AST nodes.
pub const DEFAULT_INLINE_BUDGET: usize = 48;

/// Default slack term of the jump-table density predicate: a SWITCHON is
/// table-dispatched when `max - min <= 4 * cases + slack`.
pub const DEFAULT_JUMP_TABLE_SLACK: i64 = 8;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Run the optimization pipeline at all.
    pub optimize: bool,
    pub cse: bool,
    pub licm: bool,
    pub loop_specialization: bool,
    pub inlining: bool,
    pub dce: bool,
    pub inline_budget: usize,
    pub jump_table_slack: i64,
    /// Print the token stream and AST.
    pub debug: bool,
    /// Print the generated assembly listing.
    pub print_asm: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            optimize: false,
            cse: true,
            licm: true,
            loop_specialization: true,
            inlining: true,
            dce: true,
            inline_budget: DEFAULT_INLINE_BUDGET,
            jump_table_slack: DEFAULT_JUMP_TABLE_SLACK,
            debug: false,
            print_asm: false,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_optimization(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    pub fn with_inline_budget(mut self, budget: usize) -> Self {
        self.inline_budget = budget;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn with_asm_listing(mut self, enabled: bool) -> Self {
        self.print_asm = enabled;
        self
    }

    /// Parse a configuration file and merge it over the defaults.
    pub fn from_toml(text: &str) -> Result<Self, CompileError> {
        let file: ConfigFile = toml::from_str(text)
            .map_err(|e| CompileError::Io(format!("invalid configuration: {}", e)))?;
        let mut config = CompilerConfig::default();

        if let Some(optimize) = file.optimize {
            if let Some(v) = optimize.cse {
                config.cse = v;
            }
            if let Some(v) = optimize.licm {
                config.licm = v;
            }
            if let Some(v) = optimize.loop_specialization {
                config.loop_specialization = v;
            }
            if let Some(v) = optimize.inlining {
                config.inlining = v;
            }
            if let Some(v) = optimize.dce {
                config.dce = v;
            }
            if let Some(v) = optimize.inline_budget {
                config.inline_budget = v;
            }
        }
        if let Some(codegen) = file.codegen {
            if let Some(v) = codegen.jump_table_slack {
                config.jump_table_slack = v;
            }
        }
        Ok(config)
    }
}

/// On-disk form. Every field is optional; absent fields keep their default.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    optimize: Option<OptimizeSection>,
    codegen: Option<CodegenSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OptimizeSection {
    cse: Option<bool>,
    licm: Option<bool>,
    loop_specialization: Option<bool>,
    inlining: Option<bool>,
    dce: Option<bool>,
    inline_budget: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CodegenSection {
    jump_table_slack: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert!(!config.optimize);
        assert!(config.cse);
        assert_eq!(config.inline_budget, DEFAULT_INLINE_BUDGET);
    }

    #[test]
    fn test_from_toml_overrides_selected_fields() {
        let config = CompilerConfig::from_toml(
            r#"
            [optimize]
            cse = false
            inline-budget = 16

            [codegen]
            jump-table-slack = 4
            "#,
        )
        .unwrap();
        assert!(!config.cse);
        assert!(config.licm);
        assert_eq!(config.inline_budget, 16);
        assert_eq!(config.jump_table_slack, 4);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(CompilerConfig::from_toml("optimize = 3").is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = CompilerConfig::new()
            .with_optimization(true)
            .with_inline_budget(10)
            .with_asm_listing(true);
        assert!(config.optimize);
        assert_eq!(config.inline_budget, 10);
        assert!(config.print_asm);
    }
}
