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

//! Duration literals accepted by Loki and Prometheus (`30s`, `2m`, `1h30m`).

use std::fmt::{self, Display};

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res},
    error::Error as NomError,
    multi::many1,
};

type NomResult<'a, T> = IResult<&'a str, T, NomError<&'a str>>;

const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SECOND: i64 = 1_000 * NANOS_PER_MILLI;

const UNITS: [(&str, i64); 7] = [
    ("y", 365 * 24 * 3_600 * NANOS_PER_SECOND),
    ("w", 7 * 24 * 3_600 * NANOS_PER_SECOND),
    ("d", 24 * 3_600 * NANOS_PER_SECOND),
    ("h", 3_600 * NANOS_PER_SECOND),
    ("m", 60 * NANOS_PER_SECOND),
    ("s", NANOS_PER_SECOND),
    ("ms", NANOS_PER_MILLI),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DurationValue {
    nanos: i64,
}

impl DurationValue {
    pub fn new(nanos: i64) -> Result<Self, String> {
        if nanos <= 0 {
            return Err("duration must be positive".into());
        }
        Ok(Self { nanos })
    }

    pub fn from_seconds(seconds: i64) -> Result<Self, String> {
        seconds
            .checked_mul(NANOS_PER_SECOND)
            .ok_or_else(|| format!("duration of {seconds}s overflows"))
            .and_then(Self::new)
    }

    /// Parses a literal made of one or more `<integer><unit>` parts, units
    /// being `ms`, `s`, `m`, `h`, `d`, `w` or `y`.
    pub fn parse_literal(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        let (_, parts) = all_consuming(many1(component))
            .parse(trimmed)
            .map_err(|err| format!("invalid duration `{trimmed}`: {err}"))?;
        let mut total: i64 = 0;
        for (value, unit) in parts {
            total = value
                .checked_mul(unit)
                .and_then(|part| total.checked_add(part))
                .ok_or_else(|| format!("duration `{trimmed}` overflows"))?;
        }
        Self::new(total)
    }

    pub fn as_nanoseconds(&self) -> i64 {
        self.nanos
    }

    pub fn as_seconds(&self) -> i64 {
        self.nanos / NANOS_PER_SECOND
    }
}

impl Display for DurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.nanos;
        for (unit, size) in UNITS.iter().skip(3) {
            let count = rest / size;
            if count > 0 {
                write!(f, "{count}{unit}")?;
                rest -= count * size;
            }
        }
        Ok(())
    }
}

fn component(input: &str) -> NomResult<'_, (i64, i64)> {
    (map_res(digit1, str::parse::<i64>), unit).parse(input)
}

fn unit(input: &str) -> NomResult<'_, i64> {
    // `ms` must be tried before `m`.
    alt((
        tag("ms").map(|_| NANOS_PER_MILLI),
        tag("y").map(|_| UNITS[0].1),
        tag("w").map(|_| UNITS[1].1),
        tag("d").map(|_| UNITS[2].1),
        tag("h").map(|_| UNITS[3].1),
        tag("m").map(|_| UNITS[4].1),
        tag("s").map(|_| UNITS[5].1),
    ))
    .parse(input)
}
