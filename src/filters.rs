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

//! Filter expressions sent by the console.
//!
//! The `filters` request parameter is a URL-encoded, two-level boolean
//! expression: `k1=v1&k2=v2|k3=v3` reads as `(k1 AND k2) OR k3`. A key may
//! carry a `!` (not), `>` (more than or equal) or `~` (raw regex) suffix
//! before its `=`. Values are comma separated atoms, where `"x"` is an exact
//! match, `*` a wildcard and a bare word a case-insensitive substring.

use std::{fmt::Display, sync::LazyLock};

use nom::{
    IResult, Parser,
    bytes::complete::{take_till, take_till1},
    character::complete::char,
    combinator::{all_consuming, rest},
    error::Error as NomError,
    multi::separated_list1,
    sequence::separated_pair,
};
use regex::Regex;
use thiserror::Error;

static VALUE_ALLOW_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[\w\-_.,"*:/]*$"#).expect("valid value allow-list"));
static KEY_ALLOW_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][\w.]*$").expect("valid key allow-list"));

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("could not decode filters: {0}")]
    Decode(String),
    #[error("unauthorized sign in flows request: {0}")]
    Unauthorized(String),
}

/// One predicate of a filter group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Match {
    pub key: String,
    pub values: String,
    pub not: bool,
    pub more_than_or_equal: bool,
    pub regex: bool,
}

impl Match {
    pub fn new(key: impl Into<String>, values: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: values.into(),
            not: false,
            more_than_or_equal: false,
            regex: false,
        }
    }

    pub fn not(key: impl Into<String>, values: impl Into<String>) -> Self {
        Self {
            not: true,
            ..Self::new(key, values)
        }
    }

    pub fn more_than_or_equal(key: impl Into<String>, values: impl Into<String>) -> Self {
        Self {
            more_than_or_equal: true,
            ..Self::new(key, values)
        }
    }

    pub fn atoms(&self) -> impl Iterator<Item = &str> {
        self.values.split(',')
    }

    fn validate(&self) -> Result<(), FilterError> {
        if !KEY_ALLOW_LIST.is_match(&self.key) {
            return Err(FilterError::Unauthorized(self.key.clone()));
        }
        if !VALUE_ALLOW_LIST.is_match(&self.values) {
            return Err(FilterError::Unauthorized(self.values.clone()));
        }
        Ok(())
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let suffix = if self.not {
            "!"
        } else if self.more_than_or_equal {
            ">"
        } else if self.regex {
            "~"
        } else {
            ""
        };
        write!(f, "{}{}={}", self.key, suffix, self.values)
    }
}

/// Matches composed with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleQuery(Vec<Match>);

impl SingleQuery {
    pub fn new(matches: Vec<Match>) -> Self {
        Self(matches)
    }

    pub fn matches(&self) -> &[Match] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.0.iter().any(|m| m.key == key)
    }

    pub fn find(&self, key: &str) -> Option<&Match> {
        self.0.iter().find(|m| m.key == key)
    }

    pub fn push(&mut self, m: Match) {
        self.0.push(m);
    }

    /// Returns a copy of this group with `prefix` matches placed first.
    pub fn prepended(&self, prefix: &SingleQuery) -> SingleQuery {
        let mut matches = prefix.0.clone();
        matches.extend(self.0.iter().cloned());
        SingleQuery(matches)
    }
}

impl Display for SingleQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, m) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("&")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a SingleQuery {
    type Item = &'a Match;
    type IntoIter = std::slice::Iter<'a, Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Groups composed with OR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiQueries(Vec<SingleQuery>);

impl MultiQueries {
    pub fn new(groups: Vec<SingleQuery>) -> Self {
        Self(groups)
    }

    /// Decodes and parses the raw `filters` parameter. Segments without an
    /// `=` are dropped; a key or value outside the allow-list fails the
    /// whole expression.
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let plus_decoded = raw.replace('+', " ");
        let decoded = urlencoding::decode(&plus_decoded)
            .map_err(|err| FilterError::Decode(err.to_string()))?;
        let (_, raw_groups) = all_consuming(groups)
            .parse(decoded.as_ref())
            .map_err(|err| FilterError::Decode(err.to_string()))?;

        let mut parsed = Vec::with_capacity(raw_groups.len());
        for segments in raw_groups {
            let mut group = SingleQuery::default();
            for segment in segments {
                if let Some(m) = predicate(segment) {
                    m.validate()?;
                    group.push(m);
                }
            }
            parsed.push(group);
        }
        Ok(Self(parsed))
    }

    pub fn groups(&self) -> &[SingleQuery] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SingleQuery> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps every group accepted by `ignore` as is, and replaces the others
    /// by one copy per injectable group, with the injectable matches first.
    pub fn distribute<F>(&self, injectables: &[SingleQuery], ignore: F) -> MultiQueries
    where
        F: Fn(&SingleQuery) -> bool,
    {
        let mut out = Vec::new();
        for group in &self.0 {
            if ignore(group) {
                out.push(group.clone());
                continue;
            }
            for injectable in injectables {
                out.push(group.prepended(injectable));
            }
        }
        MultiQueries(out)
    }
}

impl Display for MultiQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, group) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("|")?;
            }
            write!(f, "{group}")?;
        }
        Ok(())
    }
}

impl IntoIterator for MultiQueries {
    type Item = SingleQuery;
    type IntoIter = std::vec::IntoIter<SingleQuery>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MultiQueries {
    type Item = &'a SingleQuery;
    type IntoIter = std::slice::Iter<'a, SingleQuery>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

type NomResult<'a, T> = IResult<&'a str, T, NomError<&'a str>>;

fn groups(input: &str) -> NomResult<'_, Vec<Vec<&str>>> {
    separated_list1(char('|'), separated_list1(char('&'), segment)).parse(input)
}

fn segment(input: &str) -> NomResult<'_, &str> {
    take_till(|c| c == '&' || c == '|').parse(input)
}

/// Splits at the first `=`; anything after it, further `=` included, is the
/// value and goes through the allow-list.
fn key_value(input: &str) -> NomResult<'_, (&str, &str)> {
    separated_pair(take_till1(|c| c == '='), char('='), rest).parse(input)
}

fn predicate(segment: &str) -> Option<Match> {
    let (_, (key, values)) = key_value(segment).ok()?;
    let m = if let Some(key) = key.strip_suffix('!') {
        Match::not(key, values)
    } else if let Some(key) = key.strip_suffix('>') {
        Match::more_than_or_equal(key, values)
    } else if let Some(key) = key.strip_suffix('~') {
        Match {
            regex: true,
            ..Match::new(key, values)
        }
    } else {
        Match::new(key, values)
    };
    Some(m)
}
