use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::token::Token;

/// Name of the implicit variadic parameter
pub const VA_ARGS: &str = "__VA_ARGS__";

/// A preprocessor macro definition
#[derive(Clone, Debug)]
pub struct Macro {
    /// Macro name
    pub name: String,
    /// Parameters of a function-like macro, in order. A variadic macro
    /// declared with `...` has `__VA_ARGS__` as its last parameter.
    pub params: Vec<String>,
    /// Replacement list
    pub body: Arc<[Token]>,
    /// Declared with a parameter list
    pub is_function_like: bool,
    /// Last parameter collects all trailing arguments
    pub is_variadic: bool,
    /// Set while the macro's own replacement is rescanned
    pub(crate) disabled: bool,
    /// Predefined or configured rather than `#define`d in the unit
    pub is_builtin: bool,
    /// File and line of the `#define`
    pub definition_location: Option<(String, usize)>,
}

impl Macro {
    /// Object-like macro
    #[must_use]
    pub fn object(name: impl Into<String>, body: Vec<Token>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            body: body.into(),
            is_function_like: false,
            is_variadic: false,
            disabled: false,
            is_builtin: false,
            definition_location: None,
        }
    }

    /// Function-like macro
    #[must_use]
    pub fn function(
        name: impl Into<String>,
        params: Vec<String>,
        is_variadic: bool,
        body: Vec<Token>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            body: body.into(),
            is_function_like: true,
            is_variadic,
            disabled: false,
            is_builtin: false,
            definition_location: None,
        }
    }

    /// Index of a parameter by name
    #[must_use]
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p == name)
    }

    /// Index of the parameter collecting variadic arguments
    #[must_use]
    pub fn variadic_index(&self) -> Option<usize> {
        if self.is_variadic {
            self.params.len().checked_sub(1)
        } else {
            None
        }
    }

    /// Whether the macro is currently being rescanned
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Replacement list spelled out, for diagnostics and listings
    #[must_use]
    pub fn body_text(&self) -> String {
        let mut out = String::new();
        for (i, token) in self.body.iter().enumerate() {
            if i > 0 && !self.body[i - 1].is_adjacent_to(token) {
                out.push(' ');
            }
            out.push_str(&token.value);
        }
        out
    }
}

/// Macro definitions of one translation unit
#[derive(Clone, Debug, Default)]
pub struct MacroTable {
    macros: FxHashMap<String, Macro>,
}

impl MacroTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition
    pub fn define(&mut self, mac: Macro) {
        self.macros.insert(mac.name.clone(), mac);
    }

    /// Remove a definition, returning it
    pub fn undef(&mut self, name: &str) -> Option<Macro> {
        self.macros.remove(name)
    }

    /// Look a macro up
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    /// Check if a macro is defined
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Look a macro up for expansion: present and not disabled
    #[must_use]
    pub fn expandable(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name).filter(|m| !m.disabled)
    }

    /// Check whether a macro exists but is being rescanned
    #[must_use]
    pub fn is_disabled(&self, name: &str) -> bool {
        self.macros.get(name).is_some_and(|m| m.disabled)
    }

    /// Mark a macro as being rescanned. Must be paired with [`MacroTable::enable`].
    pub(crate) fn disable(&mut self, name: &str) {
        if let Some(m) = self.macros.get_mut(name) {
            m.disabled = true;
        }
    }

    /// Clear the rescanning mark set by [`MacroTable::disable`]
    pub(crate) fn enable(&mut self, name: &str) {
        if let Some(m) = self.macros.get_mut(name) {
            m.disabled = false;
        }
    }

    /// Check that no macro is left disabled
    #[must_use]
    pub fn all_enabled(&self) -> bool {
        self.macros.values().all(|m| !m.disabled)
    }

    /// Number of definitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.macros.len()
    }

    /// Check whether there are no definitions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Iterate over all definitions
    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.macros.values()
    }
}
