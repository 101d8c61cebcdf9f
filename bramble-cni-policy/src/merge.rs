use std::collections::btree_map::Entry;

use crate::api::{L4Proto, L7Rules, PortProtocol, PortRule, Rule};
use crate::l4::{L4Filter, L4Policy, L4PolicyMap, L7DataMap, L7ParserType};
use crate::labels::LabelArray;
use crate::selector::{EndpointSelector, SelectsAllEndpoints};
use crate::trace::{SearchContext, TraceState};
use crate::{Error, Result};

impl Rule {
    /// Folds this rule's ingress clauses into `result`. Returns whether
    /// the rule contributed anything. The caller must already know the
    /// context labels; rules that do not select them are skipped.
    pub(crate) fn resolve_l4_ingress_policy(
        &self,
        ctx: &SearchContext<'_>,
        state: &mut TraceState,
        result: &mut L4Policy,
    ) -> Result<bool> {
        if !self.endpoint_selector.matches(&ctx.to) {
            state.unselect_rule(ctx, self);
            return Ok(false);
        }
        state.select_rule(ctx, self);

        let mut found = 0;
        for clause in &self.ingress {
            found += merge_port_rules(
                ctx,
                &clause.from_endpoints,
                &clause.to_ports,
                &self.labels,
                &mut result.ingress,
                true,
            )?;
        }
        Ok(found > 0)
    }

    pub(crate) fn resolve_l4_egress_policy(
        &self,
        ctx: &SearchContext<'_>,
        state: &mut TraceState,
        result: &mut L4Policy,
    ) -> Result<bool> {
        if !self.endpoint_selector.matches(&ctx.from) {
            state.unselect_rule(ctx, self);
            return Ok(false);
        }
        state.select_rule(ctx, self);

        let mut found = 0;
        for clause in &self.egress {
            found += merge_port_rules(
                ctx,
                &clause.to_endpoints,
                &clause.to_ports,
                &self.labels,
                &mut result.egress,
                false,
            )?;
        }
        Ok(found > 0)
    }
}

fn merge_port_rules(
    ctx: &SearchContext<'_>,
    peers: &[EndpointSelector],
    to_ports: &[PortRule],
    rule_labels: &LabelArray,
    map: &mut L4PolicyMap,
    ingress: bool,
) -> Result<usize> {
    let mut found = 0;
    for port_rule in to_ports {
        let ports = port_rule
            .ports
            .iter()
            .map(|pp| format!("{}/{}", pp.port, pp.protocol))
            .collect::<Vec<_>>()
            .join(" ");
        ctx.policy_trace(format_args!(
            "  Allows {} port [{ports}]",
            if ingress { "ingress" } else { "egress" }
        ));

        for port_protocol in &port_rule.ports {
            for protocol in port_protocol.protocol.expand() {
                let candidate = create_filter(peers, port_rule, port_protocol, *protocol, ingress)?;
                found += add_filter(ctx, map, candidate, rule_labels)?;
            }
        }
    }
    Ok(found)
}

/// Builds the candidate filter for one concrete `{port, protocol}` pair
/// of a port rule. An empty peer list stands for the wildcard selector.
fn create_filter(
    peers: &[EndpointSelector],
    port_rule: &PortRule,
    port_protocol: &PortProtocol,
    protocol: L4Proto,
    ingress: bool,
) -> Result<L4Filter> {
    let port = port_protocol.parse_port()?;
    let endpoints = if peers.is_empty() {
        vec![EndpointSelector::wildcard()]
    } else {
        peers.to_vec()
    };

    let mut filter = L4Filter {
        port,
        protocol,
        u8_proto: protocol.u8_proto(),
        ingress,
        endpoints,
        l7_parser: L7ParserType::None,
        l7_rules_per_ep: L7DataMap::new(),
        derived_from_rules: Vec::new(),
    };

    if let Some(rules) = &port_rule.rules {
        let parser = rules.parser_type();
        if !parser.is_none() {
            for endpoint in &filter.endpoints {
                filter
                    .l7_rules_per_ep
                    .insert(endpoint.clone(), rules.clone());
            }
            filter.l7_parser = parser;
        }
    }

    Ok(filter)
}

/// Inserts `candidate` into `map`, merging with any existing filter under
/// the same `"<port>/<proto>"` key. Two different L7 parsers on one key
/// abort the whole resolve, whichever was imported first.
fn add_filter(
    ctx: &SearchContext<'_>,
    map: &mut L4PolicyMap,
    mut candidate: L4Filter,
    rule_labels: &LabelArray,
) -> Result<usize> {
    let key = format!("{}/{}", candidate.port, candidate.protocol);
    let existing = match map.entry(key.clone()) {
        Entry::Vacant(slot) => {
            candidate.derived_from_rules.push(rule_labels.clone());
            slot.insert(candidate);
            return Ok(1);
        }
        Entry::Occupied(slot) => slot.into_mut(),
    };

    if existing.l7_parser != candidate.l7_parser {
        if existing.l7_parser.is_none() {
            // Peers the existing filter admitted without any L7
            // restriction stay allow-all under the adopted parser.
            existing.l7_parser = candidate.l7_parser.clone();
            widen_allow_all(
                &mut existing.l7_rules_per_ep,
                &existing.endpoints,
                &existing.l7_parser,
            );
        } else if candidate.l7_parser.is_none() {
            // The candidate allows everything at L7 for the peers it
            // names; any earlier restriction on them is lifted.
            widen_allow_all(
                &mut existing.l7_rules_per_ep,
                &candidate.endpoints,
                &existing.l7_parser,
            );
        } else {
            ctx.policy_trace(format_args!(
                "  Merge failed: mismatching L7 parsers {}/{} on {key}",
                existing.l7_parser, candidate.l7_parser
            ));
            return Err(Error::ParserConflict {
                existing: existing.l7_parser.to_string(),
                incoming: candidate.l7_parser.to_string(),
                port: key,
            });
        }
    }

    merge_endpoints(&mut existing.endpoints, &candidate.endpoints);

    for (selector, rules) in candidate.l7_rules_per_ep.iter() {
        let current = existing
            .l7_rules_per_ep
            .get_or_insert_with(selector, || rules.clone());
        merge_l7_rules(current, rules);
    }

    existing.derived_from_rules.push(rule_labels.clone());
    Ok(1)
}

/// Gives every directly-named peer an empty allow-all record under
/// `parser`, replacing any restriction recorded earlier. The wildcard
/// selector is absorbed by the L3 union and never receives an entry.
fn widen_allow_all(map: &mut L7DataMap, peers: &[EndpointSelector], parser: &L7ParserType) {
    for peer in peers {
        if peer.is_wildcard() {
            continue;
        }
        map.insert(peer.clone(), parser.allow_all_rules());
    }
}

/// First-seen-order union. A wildcard on either side absorbs every
/// specific selector.
fn merge_endpoints(existing: &mut Vec<EndpointSelector>, incoming: &[EndpointSelector]) {
    if existing.selects_all_endpoints() {
        return;
    }
    if incoming.selects_all_endpoints() {
        existing.clear();
        existing.push(EndpointSelector::wildcard());
        return;
    }
    for selector in incoming {
        if !existing.contains(selector) {
            existing.push(selector.clone());
        }
    }
}

/// Appends incoming match records that are not already present. An
/// empty record already admits everything for its peer, so incoming
/// restrictions never narrow it. The parser compatibility check
/// guarantees both sides carry the same variant by the time this runs.
fn merge_l7_rules(current: &mut L7Rules, incoming: &L7Rules) {
    if current.is_empty() {
        return;
    }
    match (current, incoming) {
        (L7Rules::Http(current), L7Rules::Http(incoming)) => {
            for rule in incoming {
                if !current.contains(rule) {
                    current.push(rule.clone());
                }
            }
        }
        (L7Rules::Kafka(current), L7Rules::Kafka(incoming)) => {
            for rule in incoming {
                if !current.contains(rule) {
                    current.push(rule.clone());
                }
            }
        }
        (
            L7Rules::Generic { rules: current, .. },
            L7Rules::Generic {
                rules: incoming, ..
            },
        ) => {
            for rule in incoming {
                if !current.contains(rule) {
                    current.push(rule.clone());
                }
            }
        }
        _ => {}
    }
}
