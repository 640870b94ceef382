//! Value matchers.
//!
//! [`ValueMatcher`] is the declarative form used by builders, YAML stub files
//! and the admin API. It is compiled once at registration into a
//! [`CompiledMatcher`], whose [`CompiledMatcher::matches`] is a pure predicate
//! over a string. Matchers nest: JSON path and XPath matchers apply an
//! optional sub-matcher to each extracted value.

use crate::error::RegistrationError;
use crate::json::{self, JsonCompareOptions};
use crate::xml;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A predicate over a single string value (header, cookie, query parameter,
/// or request body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueMatcher {
    /// Byte-for-byte equality
    EqualTo { value: String },
    /// Equality after case folding
    EqualToIgnoreCase { value: String },
    /// Case-sensitive substring
    Contains { value: String },
    /// Full-string regex match
    Matches { pattern: String },
    /// Negated full-string regex match
    DoesNotMatch { pattern: String },
    /// Structural JSON equality.
    ///
    /// A string `value` is parsed as JSON text; any other value is the
    /// expected document itself.
    EqualToJson {
        value: serde_json::Value,
        #[serde(default)]
        ignore_array_order: bool,
        #[serde(default)]
        ignore_extra_elements: bool,
    },
    /// JSON path existence, or a sub-matcher applied to the selected values
    MatchesJsonPath {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        matcher: Option<Box<ValueMatcher>>,
    },
    /// Structural XML equality
    EqualToXml { value: String },
    /// XPath existence, or a sub-matcher applied to the selected values
    #[serde(rename = "matches_xpath")]
    MatchesXPath {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        matcher: Option<Box<ValueMatcher>>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        namespaces: BTreeMap<String, String>,
    },
    /// The value must not be present at all
    Absent,
}

impl ValueMatcher {
    pub fn equal_to(value: impl Into<String>) -> Self {
        ValueMatcher::EqualTo {
            value: value.into(),
        }
    }

    pub fn equal_to_ignore_case(value: impl Into<String>) -> Self {
        ValueMatcher::EqualToIgnoreCase {
            value: value.into(),
        }
    }

    pub fn containing(value: impl Into<String>) -> Self {
        ValueMatcher::Contains {
            value: value.into(),
        }
    }

    pub fn matching(pattern: impl Into<String>) -> Self {
        ValueMatcher::Matches {
            pattern: pattern.into(),
        }
    }

    pub fn not_matching(pattern: impl Into<String>) -> Self {
        ValueMatcher::DoesNotMatch {
            pattern: pattern.into(),
        }
    }

    /// Strict JSON equality against a JSON text.
    pub fn equal_to_json(json: impl Into<String>) -> Self {
        Self::equal_to_json_with(json, false, false)
    }

    pub fn equal_to_json_with(
        json: impl Into<String>,
        ignore_array_order: bool,
        ignore_extra_elements: bool,
    ) -> Self {
        ValueMatcher::EqualToJson {
            value: serde_json::Value::String(json.into()),
            ignore_array_order,
            ignore_extra_elements,
        }
    }

    pub fn matching_json_path(expression: impl Into<String>) -> Self {
        ValueMatcher::MatchesJsonPath {
            expression: expression.into(),
            matcher: None,
        }
    }

    pub fn matching_json_path_with(expression: impl Into<String>, matcher: ValueMatcher) -> Self {
        ValueMatcher::MatchesJsonPath {
            expression: expression.into(),
            matcher: Some(Box::new(matcher)),
        }
    }

    pub fn equal_to_xml(xml: impl Into<String>) -> Self {
        ValueMatcher::EqualToXml { value: xml.into() }
    }

    pub fn matching_xpath(expression: impl Into<String>) -> Self {
        ValueMatcher::MatchesXPath {
            expression: expression.into(),
            matcher: None,
            namespaces: BTreeMap::new(),
        }
    }

    pub fn matching_xpath_with(expression: impl Into<String>, matcher: ValueMatcher) -> Self {
        ValueMatcher::MatchesXPath {
            expression: expression.into(),
            matcher: Some(Box::new(matcher)),
            namespaces: BTreeMap::new(),
        }
    }

    /// Bind a namespace prefix for XPath evaluation. No-op on other variants.
    pub fn with_xpath_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        if let ValueMatcher::MatchesXPath { namespaces, .. } = &mut self {
            namespaces.insert(prefix.into(), uri.into());
        }
        self
    }

    pub fn absent() -> Self {
        ValueMatcher::Absent
    }
}

/// A [`ValueMatcher`] with regexes built and expected documents parsed.
#[derive(Debug, Clone)]
pub enum CompiledMatcher {
    EqualTo(String),
    EqualToIgnoreCase(String),
    Contains(String),
    Matches(Regex),
    DoesNotMatch(Regex),
    EqualToJson {
        /// `None` when the expected text is not JSON; never matches.
        expected: Option<serde_json::Value>,
        options: JsonCompareOptions,
    },
    JsonPath {
        expression: String,
        matcher: Option<Box<CompiledMatcher>>,
    },
    EqualToXml(String),
    XPath {
        expression: String,
        matcher: Option<Box<CompiledMatcher>>,
        namespaces: BTreeMap<String, String>,
    },
    Absent,
}

impl CompiledMatcher {
    /// Compile a declarative matcher, validating regexes and path expressions.
    pub fn compile(matcher: &ValueMatcher) -> Result<Self, RegistrationError> {
        let compiled = match matcher {
            ValueMatcher::EqualTo { value } => CompiledMatcher::EqualTo(value.clone()),
            ValueMatcher::EqualToIgnoreCase { value } => {
                CompiledMatcher::EqualToIgnoreCase(value.to_lowercase())
            }
            ValueMatcher::Contains { value } => CompiledMatcher::Contains(value.clone()),
            ValueMatcher::Matches { pattern } => CompiledMatcher::Matches(full_match(pattern)?),
            ValueMatcher::DoesNotMatch { pattern } => {
                CompiledMatcher::DoesNotMatch(full_match(pattern)?)
            }
            ValueMatcher::EqualToJson {
                value,
                ignore_array_order,
                ignore_extra_elements,
            } => CompiledMatcher::EqualToJson {
                expected: expected_json(value),
                options: JsonCompareOptions {
                    ignore_array_order: *ignore_array_order,
                    ignore_extra_elements: *ignore_extra_elements,
                },
            },
            ValueMatcher::MatchesJsonPath {
                expression,
                matcher,
            } => {
                json::validate_json_path(expression).map_err(|reason| {
                    RegistrationError::InvalidJsonPath {
                        expression: expression.clone(),
                        reason,
                    }
                })?;
                CompiledMatcher::JsonPath {
                    expression: expression.clone(),
                    matcher: compile_nested(matcher.as_deref())?,
                }
            }
            ValueMatcher::EqualToXml { value } => CompiledMatcher::EqualToXml(value.clone()),
            ValueMatcher::MatchesXPath {
                expression,
                matcher,
                namespaces,
            } => {
                xml::validate_xpath(expression, namespaces).map_err(|reason| {
                    RegistrationError::InvalidXPath {
                        expression: expression.clone(),
                        reason,
                    }
                })?;
                CompiledMatcher::XPath {
                    expression: expression.clone(),
                    matcher: compile_nested(matcher.as_deref())?,
                    namespaces: namespaces.clone(),
                }
            }
            ValueMatcher::Absent => CompiledMatcher::Absent,
        };
        Ok(compiled)
    }

    /// Test a present value.
    pub fn matches(&self, actual: &str) -> bool {
        match self {
            CompiledMatcher::EqualTo(expected) => actual == expected,
            CompiledMatcher::EqualToIgnoreCase(expected) => actual.to_lowercase() == *expected,
            CompiledMatcher::Contains(expected) => actual.contains(expected.as_str()),
            CompiledMatcher::Matches(regex) => regex.is_match(actual),
            CompiledMatcher::DoesNotMatch(regex) => !regex.is_match(actual),
            CompiledMatcher::EqualToJson { expected, options } => {
                let Some(expected) = expected else {
                    return false;
                };
                match serde_json::from_str::<serde_json::Value>(actual) {
                    Ok(actual) => json::json_equals(expected, &actual, *options),
                    Err(e) => {
                        debug!(error = %e, "Value is not JSON, equal_to_json does not match");
                        false
                    }
                }
            }
            CompiledMatcher::JsonPath {
                expression,
                matcher,
            } => matches_json_path(actual, expression, matcher.as_deref()),
            CompiledMatcher::EqualToXml(expected) => xml::xml_equals(expected, actual),
            CompiledMatcher::XPath {
                expression,
                matcher,
                namespaces,
            } => {
                let Some(selection) = xml::evaluate_xpath(actual, expression, namespaces) else {
                    debug!(expression = %expression, "XPath could not be evaluated against value");
                    return false;
                };
                match matcher {
                    None => selection.exists,
                    Some(sub) => selection.values.iter().any(|v| sub.matches(v)),
                }
            }
            CompiledMatcher::Absent => false,
        }
    }

    /// Test every value a request carries under one name.
    ///
    /// A missing value only satisfies [`CompiledMatcher::Absent`]; otherwise
    /// any single value matching is enough.
    pub fn matches_any<'a>(&self, mut values: impl Iterator<Item = &'a str>) -> bool {
        match self {
            CompiledMatcher::Absent => values.next().is_none(),
            _ => values.any(|v| self.matches(v)),
        }
    }
}

/// Compile a regex that must match the whole input.
pub(crate) fn full_match(pattern: &str) -> Result<Regex, RegistrationError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| RegistrationError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn expected_json(value: &serde_json::Value) -> Option<serde_json::Value> {
    match value {
        serde_json::Value::String(text) => serde_json::from_str(text).ok(),
        other => Some(other.clone()),
    }
}

fn compile_nested(
    matcher: Option<&ValueMatcher>,
) -> Result<Option<Box<CompiledMatcher>>, RegistrationError> {
    matcher
        .map(|m| CompiledMatcher::compile(m).map(Box::new))
        .transpose()
}

fn matches_json_path(actual: &str, expression: &str, matcher: Option<&CompiledMatcher>) -> bool {
    let document = match serde_json::from_str::<serde_json::Value>(actual) {
        Ok(document) => document,
        Err(e) => {
            debug!(error = %e, "Value is not JSON, JSON path does not match");
            return false;
        }
    };
    let Some(selected) = json::select(&document, expression) else {
        return false;
    };

    match matcher {
        None => !selected.is_empty(),
        Some(sub) => selected
            .iter()
            .any(|value| sub.matches(&json::render_value(value))),
    }
}
