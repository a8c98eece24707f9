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

//! Reporter handling for topology queries.
//!
//! Every flow crossing two nodes is reported twice, once by each side. To
//! count it once, a group without explicit direction is split into the flows
//! seen by the receiving side (ingress, plus inner flows that never leave the
//! node) and the egress flows whose destination is outside the cluster or a
//! service, which no receiving node would report.

use std::str::FromStr;

use crate::{
    error::AppError,
    fields::{DST_NAMESPACE, DST_TYPE, Direction, FLOW_DIRECTION, SRC_NAMESPACE},
    filters::{Match, MultiQueries, SingleQuery},
};

/// `FlowDirection` values counted on the receiving side.
const RECEIVED_DIRECTIONS: &str = "\"0\",\"2\"";
/// `FlowDirection` value of flows counted on the sending side.
const SENT_DIRECTION: &str = "\"1\"";
/// Destination types the receiving side never reports.
const UNREPORTED_DESTINATIONS: &str = "\"\",\"Service\"";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reporter {
    Source,
    Destination,
    #[default]
    Both,
}

impl Reporter {
    /// Direction a single reporter stands for.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Reporter::Source => Some(Direction::Egress),
            Reporter::Destination => Some(Direction::Ingress),
            Reporter::Both => None,
        }
    }
}

impl FromStr for Reporter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Reporter::Source),
            "destination" => Ok(Reporter::Destination),
            "both" => Ok(Reporter::Both),
            other => Err(AppError::BadRequest(format!("unknown reporter `{other}`"))),
        }
    }
}

/// Splits every group without a `FlowDirection` match that `is_prom_handled`
/// rejects into its received and sent halves. With a namespace, every
/// resulting group is further scoped to flows leaving or entering it.
pub fn expand_reporters<F>(
    queries: &MultiQueries,
    namespace: Option<&str>,
    is_prom_handled: F,
) -> MultiQueries
where
    F: Fn(&SingleQuery) -> bool,
{
    let directions = [
        SingleQuery::new(vec![Match::new(FLOW_DIRECTION, RECEIVED_DIRECTIONS)]),
        SingleQuery::new(vec![
            Match::new(FLOW_DIRECTION, SENT_DIRECTION),
            Match::new(DST_TYPE, UNREPORTED_DESTINATIONS),
        ]),
    ];
    let expanded = queries.distribute(&directions, |group| {
        group.has_key(FLOW_DIRECTION) || is_prom_handled(group)
    });
    match namespace {
        Some(namespace) => scope_namespace(&expanded, namespace),
        None => expanded,
    }
}

/// Restricts every group to one reporter by prepending its direction.
pub fn restrict_reporter(queries: &MultiQueries, reporter: Reporter) -> MultiQueries {
    let Some(code) = reporter.direction().and_then(Direction::code) else {
        return queries.clone();
    };
    let injected = [SingleQuery::new(vec![Match::new(
        FLOW_DIRECTION,
        format!("\"{code}\""),
    )])];
    queries.distribute(&injected, |group| group.has_key(FLOW_DIRECTION))
}

fn scope_namespace(queries: &MultiQueries, namespace: &str) -> MultiQueries {
    let value = format!("\"{namespace}\"");
    let scopes = [
        SingleQuery::new(vec![Match::new(SRC_NAMESPACE, value.clone())]),
        SingleQuery::new(vec![Match::new(DST_NAMESPACE, value)]),
    ];
    queries.distribute(&scopes, |_| false)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(raw: &str) -> MultiQueries {
        MultiQueries::parse(raw).unwrap()
    }

    #[test]
    fn splits_groups_without_direction() {
        let out = expand_reporters(&parse("SrcK8S_Name=a|Proto=6"), None, |_| false);
        assert_eq!(
            out.to_string(),
            "FlowDirection=\"0\",\"2\"&SrcK8S_Name=a\
             |FlowDirection=\"1\"&DstK8S_Type=\"\",\"Service\"&SrcK8S_Name=a\
             |FlowDirection=\"0\",\"2\"&Proto=6\
             |FlowDirection=\"1\"&DstK8S_Type=\"\",\"Service\"&Proto=6"
        );
    }

    #[test]
    fn keeps_explicit_direction_and_prom_groups() {
        let input = parse("FlowDirection=\"1\"&Proto=6|SrcK8S_Namespace=x|Proto=17");
        let out = expand_reporters(&input, None, |group| group.has_key("SrcK8S_Namespace"));
        assert_eq!(
            out.to_string(),
            "FlowDirection=\"1\"&Proto=6\
             |SrcK8S_Namespace=x\
             |FlowDirection=\"0\",\"2\"&Proto=17\
             |FlowDirection=\"1\"&DstK8S_Type=\"\",\"Service\"&Proto=17"
        );
    }

    #[test]
    fn namespace_scope_doubles_every_group() {
        let out = expand_reporters(&parse("Proto=6"), Some("ns"), |_| false);
        assert_eq!(out.len(), 4);
        assert_eq!(
            out.groups()[0].to_string(),
            "SrcK8S_Namespace=\"ns\"&FlowDirection=\"0\",\"2\"&Proto=6"
        );
        assert_eq!(
            out.groups()[1].to_string(),
            "DstK8S_Namespace=\"ns\"&FlowDirection=\"0\",\"2\"&Proto=6"
        );
        let kept = expand_reporters(&parse("FlowDirection=\"0\""), Some("ns"), |_| false);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn empty_filters_still_expand() {
        let out = expand_reporters(&parse(""), None, |_| false);
        assert_eq!(
            out.to_string(),
            "FlowDirection=\"0\",\"2\"|FlowDirection=\"1\"&DstK8S_Type=\"\",\"Service\""
        );
    }

    #[test]
    fn single_reporter_injects_direction() {
        let out = restrict_reporter(&parse("Proto=6|FlowDirection=\"0\""), Reporter::Source);
        assert_eq!(out.to_string(), "FlowDirection=\"1\"&Proto=6|FlowDirection=\"0\"");
        let same = restrict_reporter(&parse("Proto=6"), Reporter::Both);
        assert_eq!(same.to_string(), "Proto=6");
        assert!("sideways".parse::<Reporter>().is_err());
    }
}
