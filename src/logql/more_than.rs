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

use super::QueryError;

/// Builds a regex alternation matching every decimal integer greater than or
/// equal to `value`, written without leading zeros.
///
/// For `123` this yields `(12[3-9]|1[3-9][0-9]|[2-9][0-9]{2,}|[1-9][0-9]{3,})`:
/// one branch per digit position, from the last digit to the first, plus a
/// final branch for any longer number.
pub fn more_than_regex(value: &str) -> Result<String, QueryError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QueryError::NotANumber(value.into()));
    }
    let trimmed = value.trim_start_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed };
    let bytes = digits.as_bytes();
    let len = bytes.len();

    let mut branches = Vec::with_capacity(len + 1);
    for pos in (0..len).rev() {
        let digit = bytes[pos] - b'0';
        let low = if pos == len - 1 { digit } else { digit + 1 };
        if low > 9 {
            continue;
        }
        let mut branch = String::with_capacity(len * 5);
        branch.push_str(&digits[..pos]);
        if low == 9 {
            branch.push('9');
        } else {
            branch.push_str(&format!("[{low}-9]"));
        }
        match len - 1 - pos {
            0 => {}
            1 => branch.push_str("[0-9]"),
            rest if pos == 0 => branch.push_str(&format!("[0-9]{{{rest},}}")),
            rest => branch.push_str(&format!("[0-9]{{{rest}}}")),
        }
        branches.push(branch);
    }
    branches.push(format!("[1-9][0-9]{{{len},}}"));
    Ok(format!("({})", branches.join("|")))
}
