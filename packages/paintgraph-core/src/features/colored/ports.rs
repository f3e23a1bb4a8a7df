/*
 * Rule-Provider Protocol
 *
 * The seam to the external source/sink knowledge base. Consulted by the
 * initial brushes only: parameter and result colors for methods, colors for
 * fields. Parameter indices are receiver-inclusive — index 0 is the
 * receiver of instance methods.
 */

use crate::features::colored::domain::ColorKind;

/// Declared colors of one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodColorRules {
    /// One entry per parameter position, receiver first for instance methods
    pub param_colors: Vec<Option<ColorKind>>,
    pub result_color: Option<ColorKind>,
}

impl MethodColorRules {
    pub fn is_empty(&self) -> bool {
        self.result_color.is_none() && self.param_colors.iter().all(Option::is_none)
    }
}

/// Rule/data provider protocol.
pub trait RuleProvider: Send + Sync {
    /// Declared colors of a method, if any rule mentions it.
    fn method_rules(&self, class: &str, name: &str, descriptor: &str)
        -> Option<MethodColorRules>;

    /// Declared color of a field, if any rule mentions it.
    fn field_rules(&self, class: &str, name: &str) -> Option<ColorKind>;
}
