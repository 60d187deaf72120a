//! Capture-time masking of sensitive form fields
//!
//! Masking happens before a record ever enters the queue; nothing downstream
//! (bridge, delivery, collector) can observe an unmasked sensitive value.

use crate::host::FormField;

/// Fixed sentinel replacing masked values.
pub const MASK_SENTINEL: &str = "***";

/// Field-name fragments that always indicate a sensitive field.
const SENSITIVE_NAME_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "card",
    "cc-number",
    "ccnumber",
    "cvv",
    "cvc",
    "ssn",
    "secret",
    "token",
];

/// Input types whose values are never captured in the clear.
const SENSITIVE_INPUT_TYPES: &[&str] = &["password", "hidden"];

/// Decides which field values get the sentinel.
#[derive(Debug, Clone, Default)]
pub struct MaskPolicy {
    selectors: Vec<String>,
}

impl MaskPolicy {
    /// Build a policy from the configured selector list.
    pub fn new(mask_selectors: &[String]) -> Self {
        Self {
            selectors: mask_selectors.to_vec(),
        }
    }

    /// Whether this field's value must be masked.
    pub fn is_sensitive(&self, field: &FormField) -> bool {
        let input_type = field.input_type.to_lowercase();
        if SENSITIVE_INPUT_TYPES.contains(&input_type.as_str()) {
            return true;
        }

        let name = field.name.to_lowercase();
        if SENSITIVE_NAME_FRAGMENTS.iter().any(|f| name.contains(f)) {
            return true;
        }

        self.selectors.iter().any(|s| s == &field.selector)
    }

    /// Return the value to record for this field.
    pub fn apply<'a>(&self, field: &FormField, value: &'a str) -> &'a str {
        if self.is_sensitive(field) {
            MASK_SENTINEL
        } else {
            value
        }
    }
}
