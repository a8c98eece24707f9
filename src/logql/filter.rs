// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed label and line filters with their textual emitter.
//!
//! Both filter kinds write into a caller-provided buffer. The JSON-field
//! regex that turns an emitted line filter back into a label filter lives
//! here too, next to the emitter it has to mirror.

use std::sync::LazyLock;

use regex::Regex;

use super::{QueryError, more_than::more_than_regex};

/// Recovers `name`, string-or-regex value and number from the tail of a
/// rendered line filter value such as `SrcK8S_Name":"(?i)[^"]*foo.*"`.
static JSON_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\w.\-]*)":(?:"((?:\^"|[^"])*)"?|(\d+))$"#).expect("valid JSON field regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMatcher {
    Equal,
    Matches,
    NotEqual,
    NotMatches,
    MoreThanOrEqual,
}

impl LabelMatcher {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelMatcher::Equal => "=",
            LabelMatcher::Matches => "=~",
            LabelMatcher::NotEqual => "!=",
            LabelMatcher::NotMatches => "!~",
            LabelMatcher::MoreThanOrEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Number,
    Bool,
    String,
    Regex,
    RegexContains,
    RegexArrayContains,
    Ip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub key: String,
    pub matcher: LabelMatcher,
    pub value: String,
    pub value_type: ValueType,
}

impl LabelFilter {
    pub fn new(
        key: impl Into<String>,
        matcher: LabelMatcher,
        value: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Self {
            key: key.into(),
            matcher,
            value: value.into(),
            value_type,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>, not: bool) -> Self {
        let matcher = if not {
            LabelMatcher::NotEqual
        } else {
            LabelMatcher::Equal
        };
        Self::new(key, matcher, value, ValueType::String)
    }

    pub fn regex(key: impl Into<String>, value: impl Into<String>, not: bool) -> Self {
        let matcher = if not {
            LabelMatcher::NotMatches
        } else {
            LabelMatcher::Matches
        };
        Self::new(key, matcher, value, ValueType::Regex)
    }

    pub fn number(key: impl Into<String>, value: impl Into<String>, not: bool) -> Self {
        let matcher = if not {
            LabelMatcher::NotEqual
        } else {
            LabelMatcher::Equal
        };
        Self::new(key, matcher, value, ValueType::Number)
    }

    pub fn more_than_or_equal(key: impl Into<String>, value: &str) -> Result<Self, QueryError> {
        if !is_number(value) {
            return Err(QueryError::NotANumber(value.into()));
        }
        Ok(Self::new(
            key,
            LabelMatcher::MoreThanOrEqual,
            value,
            ValueType::Number,
        ))
    }

    pub fn ip(key: impl Into<String>, value: impl Into<String>, not: bool) -> Self {
        let matcher = if not {
            LabelMatcher::NotEqual
        } else {
            LabelMatcher::Equal
        };
        Self::new(key, matcher, value, ValueType::Ip)
    }

    /// Combines value atoms into one double-quoted regex: unquoted atoms
    /// become case-insensitive substrings, quoted atoms are anchored on the
    /// sides that do not start or end with `*`.
    pub fn multi_values_regex<'a, I>(key: impl Into<String>, atoms: I, not: bool) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let alternatives = atoms
            .into_iter()
            .map(|atom| match strip_quotes(atom) {
                Some(inner) => {
                    let mut regex = String::with_capacity(inner.len() + 2);
                    if !inner.starts_with('*') {
                        regex.push('^');
                    }
                    regex.push_str(&atom_regex(inner));
                    if !inner.ends_with('*') {
                        regex.push('$');
                    }
                    regex
                }
                None => format!("(?i).*{}.*", atom_regex(atom)),
            })
            .collect::<Vec<_>>();
        let matcher = if not {
            LabelMatcher::NotMatches
        } else {
            LabelMatcher::Matches
        };
        Self::new(key, matcher, alternatives.join("|"), ValueType::String)
    }

    /// Label view of a user match: a single exact atom is a plain equality,
    /// anything else goes through [`LabelFilter::multi_values_regex`].
    pub fn from_atoms(key: impl Into<String>, atoms: &[&str], not: bool) -> Self {
        match atoms {
            [atom] if is_exact(atom) => Self::string(key, strip_quotes(atom).unwrap_or_default(), not),
            _ => Self::multi_values_regex(key, atoms.iter().copied(), not),
        }
    }

    pub fn write_into(&self, buf: &mut String) {
        buf.push_str(&self.key);
        buf.push_str(self.matcher.as_str());
        match self.value_type {
            ValueType::Number | ValueType::Bool => buf.push_str(&self.value),
            ValueType::String => {
                buf.push('"');
                push_escaped(buf, &self.value);
                buf.push('"');
            }
            ValueType::Ip => {
                buf.push_str("ip(\"");
                buf.push_str(&self.value);
                buf.push_str("\")");
            }
            ValueType::Regex => {
                buf.push('`');
                buf.push_str(&self.value);
                buf.push('`');
            }
            ValueType::RegexContains => {
                buf.push_str("`(?i)[^\"]*");
                buf.push_str(&self.value);
                buf.push_str(".*`");
            }
            ValueType::RegexArrayContains => {
                buf.push_str("`\\[(?i)[^]]*");
                buf.push_str(&self.value);
                buf.push_str("[^]]*]`");
            }
        }
    }

    #[cfg(test)]
    pub fn render(&self) -> String {
        let mut buf = String::new();
        self.write_into(&mut buf);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    pub value_type: ValueType,
    pub value: String,
}

/// How a non-label field is compared inside the raw JSON line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFieldKind {
    Numeric,
    Array,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFilter {
    pub key: String,
    pub strict_key: bool,
    pub values: Vec<LineMatch>,
    pub not: bool,
    pub allow_empty: bool,
    pub more_than: bool,
}

impl LineFilter {
    fn new(key: impl Into<String>, strict_key: bool) -> Self {
        Self {
            key: key.into(),
            strict_key,
            values: Vec::new(),
            not: false,
            allow_empty: false,
            more_than: false,
        }
    }

    /// Builds the filter for a user match on a field that is neither a
    /// label nor an IP.
    pub fn for_atoms<'a, I>(
        key: &str,
        atoms: I,
        kind: LineFieldKind,
        strict_key: bool,
        not: bool,
        more_than: bool,
    ) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut filter = Self::new(key, strict_key);
        filter.not = not;
        filter.more_than = more_than;
        for atom in atoms {
            let line_match = match kind {
                LineFieldKind::Numeric => {
                    let value = strip_quotes(atom).unwrap_or(atom);
                    let valid = if more_than {
                        !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
                    } else {
                        is_number(value)
                    };
                    if !valid {
                        return Err(QueryError::InvalidNumber {
                            key: key.into(),
                            value: atom.into(),
                        });
                    }
                    LineMatch {
                        value_type: ValueType::Number,
                        value: atom_regex(value),
                    }
                }
                _ if more_than => return Err(QueryError::NotANumber(atom.into())),
                LineFieldKind::Array => LineMatch {
                    value_type: ValueType::RegexArrayContains,
                    value: atom_regex(strip_quotes(atom).unwrap_or(atom)),
                },
                LineFieldKind::Text => match strip_quotes(atom) {
                    Some(inner) => LineMatch {
                        value_type: ValueType::String,
                        value: atom_regex(inner),
                    },
                    None => LineMatch {
                        value_type: ValueType::RegexContains,
                        value: atom_regex(atom),
                    },
                },
            };
            filter.values.push(line_match);
        }
        Ok(filter)
    }

    pub fn bool(key: impl Into<String>, value: bool, strict_key: bool, not: bool) -> Self {
        let mut filter = Self::new(key, strict_key);
        filter.not = not;
        filter.allow_empty = true;
        filter.values.push(LineMatch {
            value_type: ValueType::Bool,
            value: value.to_string(),
        });
        filter
    }

    pub fn number(key: impl Into<String>, value: impl Into<String>, strict_key: bool) -> Self {
        let mut filter = Self::new(key, strict_key);
        filter.values.push(LineMatch {
            value_type: ValueType::Number,
            value: value.into(),
        });
        filter
    }

    /// Matches any of the given string values exactly.
    pub fn exact<'a, I>(key: impl Into<String>, values: I, strict_key: bool) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut filter = Self::new(key, strict_key);
        for value in values {
            filter.values.push(LineMatch {
                value_type: ValueType::String,
                value: atom_regex(value),
            });
        }
        filter
    }

    pub fn regex(key: impl Into<String>, regex: impl Into<String>, strict_key: bool) -> Self {
        let mut filter = Self::new(key, strict_key);
        filter.values.push(LineMatch {
            value_type: ValueType::Regex,
            value: regex.into(),
        });
        filter
    }

    /// Matches lines where the field is present.
    pub fn presence(key: impl Into<String>, strict_key: bool) -> Self {
        Self::new(key, strict_key)
    }

    pub fn write_into(&self, buf: &mut String) {
        if self.not {
            // fields with empty or zero values are omitted from records, so a
            // negative match also requires the field to be there
            if !self.allow_empty && !self.values.is_empty() {
                buf.push_str("|~`");
                self.push_key(buf);
                buf.push('`');
            }
            buf.push_str("!~`");
        } else {
            buf.push_str("|~`");
        }
        if self.values.is_empty() {
            self.push_key(buf);
        } else {
            for (idx, value) in self.values.iter().enumerate() {
                if idx > 0 {
                    buf.push('|');
                }
                self.push_value(buf, value);
            }
        }
        buf.push('`');
    }

    /// The alternation body without the surrounding operator and quotes.
    pub fn body(&self) -> String {
        let mut buf = String::new();
        if self.values.is_empty() {
            self.push_key(&mut buf);
        } else {
            for (idx, value) in self.values.iter().enumerate() {
                if idx > 0 {
                    buf.push('|');
                }
                self.push_value(&mut buf, value);
            }
        }
        buf
    }

    /// Converts the filter into JSON label filters, one per value, by parsing
    /// each rendered value back with [`JSON_FIELD`]. Returns `None` when any
    /// value cannot be expressed that way.
    pub fn to_label_filters(&self) -> Option<Vec<LabelFilter>> {
        if self.values.is_empty() {
            return Some(vec![LabelFilter::string(&self.key, "", !self.not)]);
        }
        if self.more_than {
            return self
                .values
                .iter()
                .map(|value| LabelFilter::more_than_or_equal(&self.key, &value.value).ok())
                .collect();
        }

        let mut parsed = Vec::with_capacity(self.values.len());
        for value in &self.values {
            let mut fragment = String::new();
            self.push_fragment(&mut fragment, value);
            let captures = JSON_FIELD.captures(&fragment)?;
            let name = captures.get(1)?.as_str().to_string();
            if let Some(number) = captures.get(3) {
                parsed.push((name, number.as_str().to_string(), ValueType::Number));
            } else {
                let text = captures.get(2).map_or("", |m| m.as_str());
                parsed.push((name, text.to_string(), ValueType::Regex));
            }
        }

        if !self.not {
            return Some(
                parsed
                    .into_iter()
                    .map(|(name, value, value_type)| match value_type {
                        ValueType::Number => LabelFilter::number(name, value, false),
                        _ => LabelFilter::regex(name, value, false),
                    })
                    .collect(),
            );
        }
        if let [(name, value, value_type)] = parsed.as_slice() {
            let filter = match value_type {
                ValueType::Number => LabelFilter::number(name, value, true),
                _ => LabelFilter::regex(name, value, true),
            };
            return Some(vec![filter]);
        }
        // a negated alternation stays a single filter so it keeps AND semantics
        let name = parsed.first()?.0.clone();
        let alternation = parsed
            .iter()
            .map(|(_, value, _)| format!("({value})"))
            .collect::<Vec<_>>()
            .join("|");
        Some(vec![LabelFilter::regex(name, alternation, true)])
    }

    fn push_key(&self, buf: &mut String) {
        if self.strict_key {
            buf.push('"');
        }
        buf.push_str(&self.key);
        buf.push_str("\":");
    }

    fn push_value(&self, buf: &mut String, value: &LineMatch) {
        self.push_fragment(buf, value);
        // a number can be followed by `}` when it is the last JSON property
        if matches!(value.value_type, ValueType::Number | ValueType::Regex) {
            buf.push_str("[,}]");
        }
    }

    fn push_fragment(&self, buf: &mut String, value: &LineMatch) {
        self.push_key(buf);
        match value.value_type {
            ValueType::Number | ValueType::Regex => {
                if self.more_than {
                    match more_than_regex(&value.value) {
                        Ok(regex) => buf.push_str(&regex),
                        Err(_) => buf.push_str(&value.value),
                    }
                } else {
                    buf.push_str(&value.value);
                }
            }
            ValueType::Bool => buf.push_str(&value.value),
            ValueType::String | ValueType::Ip => {
                buf.push('"');
                buf.push_str(&value.value);
                buf.push('"');
            }
            ValueType::RegexContains => {
                buf.push_str("\"(?i)[^\"]*");
                buf.push_str(&value.value);
                buf.push_str(".*\"");
            }
            ValueType::RegexArrayContains => {
                buf.push_str("\\[(?i)[^]]*");
                buf.push_str(&value.value);
                buf.push_str("[^]]*]");
            }
        }
    }

    #[cfg(test)]
    pub fn render(&self) -> String {
        let mut buf = String::new();
        self.write_into(&mut buf);
        buf
    }
}

/// Returns the inner text of a `"…"` atom.
pub fn strip_quotes(atom: &str) -> Option<&str> {
    (atom.len() >= 2 && atom.starts_with('"') && atom.ends_with('"'))
        .then(|| &atom[1..atom.len() - 1])
}

/// A quoted atom without wildcard, which maps to plain string equality.
pub fn is_exact(atom: &str) -> bool {
    strip_quotes(atom).is_some_and(|inner| !inner.contains('*'))
}

/// Escapes regex metacharacters of an atom and turns `*` into `.*`.
pub fn atom_regex(atom: &str) -> String {
    let mut out = String::with_capacity(atom.len() + 4);
    for ch in atom.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '\\' | '.' | '+' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

fn is_number(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let mut parts = digits.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_ok = parts
        .next()
        .is_none_or(|frac| !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()));
    !int_part.is_empty() && int_part.bytes().all(|b| b.is_ascii_digit()) && frac_ok
}

fn push_escaped(buf: &mut String, value: &str) {
    for ch in value.chars() {
        if matches!(ch, '\\' | '"') {
            buf.push('\\');
        }
        buf.push(ch);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn text(key: &str, atoms: &[&str], not: bool) -> LineFilter {
        LineFilter::for_atoms(key, atoms.iter().copied(), LineFieldKind::Text, false, not, false)
            .unwrap()
    }

    fn numeric(key: &str, atoms: &[&str], more_than: bool) -> LineFilter {
        LineFilter::for_atoms(
            key,
            atoms.iter().copied(),
            LineFieldKind::Numeric,
            false,
            false,
            more_than,
        )
        .unwrap()
    }

    #[test]
    fn label_filter_quoting() {
        assert_eq!(LabelFilter::string("app", "netobserv", false).render(), "app=\"netobserv\"");
        assert_eq!(LabelFilter::number("Proto", "6", true).render(), "Proto!=6");
        assert_eq!(
            LabelFilter::ip("SrcAddr", "10.128.0.1", false).render(),
            "SrcAddr=ip(\"10.128.0.1\")"
        );
        assert_eq!(LabelFilter::regex("Name", "a.*", true).render(), "Name!~`a.*`");
        assert_eq!(
            LabelFilter::new("Name", LabelMatcher::Matches, "foo", ValueType::RegexContains)
                .render(),
            "Name=~`(?i)[^\"]*foo.*`"
        );
        assert_eq!(
            LabelFilter::more_than_or_equal("Bytes", "100").unwrap().render(),
            "Bytes>=100"
        );
        assert!(LabelFilter::more_than_or_equal("Bytes", "abc").is_err());
    }

    #[test]
    fn multi_values_regex_anchors_quoted_atoms() {
        let filter = LabelFilter::multi_values_regex("SrcK8S_Namespace", ["ns1", "ns2"], false);
        assert_eq!(
            filter.render(),
            "SrcK8S_Namespace=~\"(?i).*ns1.*|(?i).*ns2.*\""
        );
        let filter =
            LabelFilter::multi_values_regex("DstK8S_Type", ["\"\"", "\"Service\""], false);
        assert_eq!(filter.render(), "DstK8S_Type=~\"^$|^Service$\"");
        let filter = LabelFilter::multi_values_regex("Name", ["\"*end\"", "\"start*\""], true);
        assert_eq!(filter.render(), "Name!~\".*end$|^start.*\"");
    }

    #[test]
    fn from_atoms_prefers_equality() {
        assert_eq!(
            LabelFilter::from_atoms("SrcK8S_Namespace", &["\"default\""], false).render(),
            "SrcK8S_Namespace=\"default\""
        );
        assert_eq!(
            LabelFilter::from_atoms("SrcK8S_Namespace", &["\"def*\""], true).render(),
            "SrcK8S_Namespace!~\"^def.*\""
        );
        assert_eq!(
            LabelFilter::from_atoms("SrcK8S_Namespace", &["default"], false).render(),
            "SrcK8S_Namespace=~\"(?i).*default.*\""
        );
    }

    #[test]
    fn exact_line_filter_alternates_values() {
        let filter = LineFilter::exact("_RecordType", ["newConnection", "heartbeat"], false);
        assert_eq!(
            filter.render(),
            "|~`_RecordType\":\"newConnection\"|_RecordType\":\"heartbeat\"`"
        );
    }

    #[test]
    fn multi_values_regex_escapes_dots_inside_string() {
        let filter = LabelFilter::multi_values_regex("Name", ["a.b"], false);
        assert_eq!(filter.value, "(?i).*a\\.b.*");
        assert_eq!(filter.render(), "Name=~\"(?i).*a\\\\.b.*\"");
    }

    #[test]
    fn line_filter_substring_and_exact() {
        assert_eq!(
            text("SrcK8S_Name", &["test-pod"], false).render(),
            "|~`SrcK8S_Name\":\"(?i)[^\"]*test-pod.*\"`"
        );
        assert_eq!(
            text("SrcK8S_Name", &["\"test-pod\""], false).render(),
            "|~`SrcK8S_Name\":\"test-pod\"`"
        );
        assert_eq!(
            text("SrcK8S_Name", &["a", "\"b\""], false).render(),
            "|~`SrcK8S_Name\":\"(?i)[^\"]*a.*\"|SrcK8S_Name\":\"b\"`"
        );
    }

    #[test]
    fn negated_line_filter_requires_field_presence() {
        assert_eq!(
            text("SrcK8S_Name", &["\"x\""], true).render(),
            "|~`SrcK8S_Name\":`!~`SrcK8S_Name\":\"x\"`"
        );
        assert_eq!(
            LineFilter::bool("Duplicate", true, false, true).render(),
            "!~`Duplicate\":true`"
        );
        assert_eq!(
            LineFilter::bool("Duplicate", false, false, false).render(),
            "|~`Duplicate\":false`"
        );
    }

    #[test]
    fn numeric_line_filter_guards_json_boundary() {
        let filter = numeric("Key", &["10"], false);
        let rendered = filter.render();
        assert_eq!(rendered, "|~`Key\":10[,}]`");
        let re = Regex::new(&filter.body()).unwrap();
        assert!(re.is_match("{\"Key\":10,\"Other\":1}"));
        assert!(re.is_match("{\"Other\":1,\"Key\":10}"));
        assert!(!re.is_match("{\"Key\":100,\"Other\":1}"));
        assert!(!re.is_match("{\"Key\":100}"));
    }

    #[test]
    fn numeric_line_filter_more_than() {
        let filter = numeric("Bytes", &["123"], true);
        assert_eq!(
            filter.render(),
            "|~`Bytes\":(12[3-9]|1[3-9][0-9]|[2-9][0-9]{2,}|[1-9][0-9]{3,})[,}]`"
        );
        assert!(
            LineFilter::for_atoms("Bytes", ["1.5"], LineFieldKind::Numeric, false, false, true)
                .is_err()
        );
        assert!(
            LineFilter::for_atoms("Name", ["x"], LineFieldKind::Text, false, false, true).is_err()
        );
    }

    #[test]
    fn numeric_line_filter_rejects_text() {
        let err = LineFilter::for_atoms("Proto", ["tcp"], LineFieldKind::Numeric, false, false, false)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidNumber { .. }));
        assert_eq!(numeric("Proto", &["\"6\""], false).render(), "|~`Proto\":6[,}]`");
    }

    #[test]
    fn array_line_filter() {
        let filter = LineFilter::for_atoms(
            "Interfaces",
            ["eth0"],
            LineFieldKind::Array,
            false,
            false,
            false,
        )
        .unwrap();
        assert_eq!(filter.render(), "|~`Interfaces\":\\[(?i)[^]]*eth0[^]]*]`");
        let re = Regex::new(&filter.body()).unwrap();
        assert!(re.is_match("{\"Interfaces\":[\"br-ex\",\"ETH0\"],\"Proto\":6}"));
        assert!(!re.is_match("{\"Interfaces\":[\"br-ex\"],\"Name\":\"eth0\"}"));
    }

    #[test]
    fn strict_key_prefixes_quote() {
        assert_eq!(
            LineFilter::number("Packets", "0", true).render(),
            "|~`\"Packets\":0[,}]`"
        );
        assert_eq!(LineFilter::presence("DnsId", false).render(), "|~`DnsId\":`");
    }

    #[test]
    fn json_field_regex_parses_every_rendered_value() {
        let cases: Vec<(LineFilter, Vec<LabelFilter>)> = vec![
            (
                text("SrcK8S_Name", &["test-pod"], false),
                vec![LabelFilter::regex("SrcK8S_Name", "(?i)[^\"]*test-pod.*", false)],
            ),
            (
                text("SrcK8S_Name", &["\"test-pod\""], false),
                vec![LabelFilter::regex("SrcK8S_Name", "test-pod", false)],
            ),
            (
                text("SrcK8S_Name", &["\"a.b\""], false),
                vec![LabelFilter::regex("SrcK8S_Name", "a\\.b", false)],
            ),
            (
                numeric("Proto", &["6", "17"], false),
                vec![
                    LabelFilter::number("Proto", "6", false),
                    LabelFilter::number("Proto", "17", false),
                ],
            ),
            (
                LineFilter::number("Packets", "0", true),
                vec![LabelFilter::number("Packets", "0", false)],
            ),
            (
                numeric("Bytes", &["100"], true),
                vec![LabelFilter::more_than_or_equal("Bytes", "100").unwrap()],
            ),
            (
                text("SrcK8S_Name", &["\"x\""], true),
                vec![LabelFilter::regex("SrcK8S_Name", "x", true)],
            ),
            (
                text("SrcK8S_Name", &["a", "\"b\""], true),
                vec![LabelFilter::regex(
                    "SrcK8S_Name",
                    "((?i)[^\"]*a.*)|(b)",
                    true,
                )],
            ),
            (
                LineFilter::presence("DnsId", false),
                vec![LabelFilter::string("DnsId", "", true)],
            ),
        ];
        for (filter, expected) in cases {
            assert_eq!(filter.to_label_filters(), Some(expected), "{}", filter.render());
        }
    }

    #[test]
    fn json_field_regex_rejects_arrays_and_decimals() {
        let array = LineFilter::for_atoms(
            "Interfaces",
            ["eth0"],
            LineFieldKind::Array,
            false,
            false,
            false,
        )
        .unwrap();
        assert_eq!(array.to_label_filters(), None);
        assert_eq!(numeric("Sampling", &["1.5"], false).to_label_filters(), None);
    }
}
