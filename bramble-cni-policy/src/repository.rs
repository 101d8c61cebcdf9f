use std::sync::RwLock;

use tracing::debug;

use crate::api::Rule;
use crate::config::{AllowLocalhost, ResolverConfig};
use crate::l4::{L4Policy, L4PolicyMap};
use crate::labels::format_labels;
use crate::selector::host_selector;
use crate::trace::{SearchContext, TraceState};
use crate::Result;

/// Holds the imported rule set. Many resolves may run concurrently;
/// rule insertion excludes them for its duration.
#[derive(Debug, Default)]
pub struct Repository {
    rules: RwLock<Vec<Rule>>,
    config: ResolverConfig,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Sanitizes and appends a rule. Returns the new rule count.
    pub fn add(&self, rule: Rule) -> Result<usize> {
        rule.sanitize()?;
        let mut rules = self.rules.write().unwrap();
        rules.push(rule);
        Ok(rules.len())
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the ingress filter map for the endpoint described by
    /// `ctx.to`. Returns `None` when no rule applies.
    pub fn resolve_l4_ingress_policy(
        &self,
        ctx: &SearchContext<'_>,
    ) -> Result<Option<L4PolicyMap>> {
        let rules = self.rules.read().unwrap();
        debug!(rules = rules.len(), "resolving ingress port policy");
        ctx.policy_trace(format_args!(
            "Resolving ingress port policy for {}",
            format_labels(&ctx.to)
        ));

        let mut state = TraceState::default();
        let mut result = L4Policy::new();
        for rule in rules.iter() {
            let matched = rule.resolve_l4_ingress_policy(ctx, &mut state, &mut result)?;
            if matched {
                state.matched_rules += 1;
            }
            state.rule_id += 1;
        }
        state.trace(ctx, rules.len());

        if state.selected_rules == 0 && result.ingress.is_empty() {
            return Ok(None);
        }

        let mut map = result.ingress;
        if self.config.allow_localhost == AllowLocalhost::Always {
            wildcard_localhost(&mut map);
        }
        Ok(Some(map))
    }

    /// Resolves the egress filter map for the endpoint described by
    /// `ctx.from`. Returns `None` when no rule applies.
    pub fn resolve_l4_egress_policy(
        &self,
        ctx: &SearchContext<'_>,
    ) -> Result<Option<L4PolicyMap>> {
        let rules = self.rules.read().unwrap();
        debug!(rules = rules.len(), "resolving egress port policy");
        ctx.policy_trace(format_args!(
            "Resolving egress port policy for {}",
            format_labels(&ctx.from)
        ));

        let mut state = TraceState::default();
        let mut result = L4Policy::new();
        for rule in rules.iter() {
            let matched = rule.resolve_l4_egress_policy(ctx, &mut state, &mut result)?;
            if matched {
                state.matched_rules += 1;
            }
            state.rule_id += 1;
        }
        state.trace(ctx, rules.len());

        if state.selected_rules == 0 && result.egress.is_empty() {
            return Ok(None);
        }

        let mut map = result.egress;
        if self.config.allow_localhost == AllowLocalhost::Always {
            wildcard_localhost(&mut map);
        }
        Ok(Some(map))
    }
}

/// Guarantees the host identity is never blocked by an L7 restriction:
/// every proxied filter gets an empty allow-all entry for the host
/// selector unless one already exists.
fn wildcard_localhost(map: &mut L4PolicyMap) {
    let host = host_selector();
    for filter in map.values_mut() {
        if filter.l7_parser.is_none() {
            continue;
        }
        if !filter.l7_rules_per_ep.contains(&host) {
            let allow_all = filter.l7_parser.allow_all_rules();
            filter.l7_rules_per_ep.insert(host.clone(), allow_all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{HttpRule, IngressRule, L4Proto, L7Rules, PortProtocol, PortRule};
    use crate::l4::L7ParserType;
    use crate::labels::parse_label_array;
    use crate::selector::EndpointSelector;
    use crate::trace::BufferSink;
    use crate::Error;

    fn selector_a() -> EndpointSelector {
        EndpointSelector::from_pairs([("id", "a")])
    }

    fn http_get_root() -> L7Rules {
        L7Rules::Http(vec![HttpRule {
            method: "GET".into(),
            path: "/".into(),
            ..Default::default()
        }])
    }

    fn ingress_clause(peers: Vec<EndpointSelector>, rules: Option<L7Rules>) -> IngressRule {
        IngressRule {
            from_endpoints: peers,
            to_ports: vec![PortRule {
                ports: vec![PortProtocol {
                    port: "80".into(),
                    protocol: L4Proto::Tcp,
                }],
                rules,
            }],
        }
    }

    fn rule_for_a(clauses: Vec<IngressRule>) -> Rule {
        Rule {
            endpoint_selector: selector_a(),
            ingress: clauses,
            ..Default::default()
        }
    }

    #[test]
    fn resolves_the_filter_map_for_selected_endpoints() {
        let repo = Repository::new();
        repo.add(rule_for_a(vec![ingress_clause(
            vec![EndpointSelector::wildcard()],
            None,
        )]))
        .unwrap();

        let ctx = SearchContext::ingress(parse_label_array(&["id=a"]));
        let map = repo.resolve_l4_ingress_policy(&ctx).unwrap().unwrap();
        let filter = &map["80/TCP"];
        assert_eq!(filter.port, 80);
        assert!(filter.ingress);
        assert_eq!(filter.l7_parser, L7ParserType::None);
    }

    #[test]
    fn returns_none_when_no_rule_applies() {
        let repo = Repository::new();
        repo.add(rule_for_a(vec![ingress_clause(vec![], None)]))
            .unwrap();

        let ctx = SearchContext::ingress(parse_label_array(&["id=other"]));
        assert!(repo.resolve_l4_ingress_policy(&ctx).unwrap().is_none());

        let empty = Repository::new();
        assert!(empty.resolve_l4_ingress_policy(&ctx).unwrap().is_none());
    }

    #[test]
    fn add_rejects_malformed_rules() {
        let repo = Repository::new();
        let mut rule = rule_for_a(vec![ingress_clause(vec![], None)]);
        rule.ingress[0].to_ports[0].ports[0].port = "not-a-port".into();
        assert!(matches!(repo.add(rule), Err(Error::InvalidPort(_))));
        assert!(repo.is_empty());
    }

    #[test]
    fn parser_conflict_discards_the_partial_policy() {
        let repo = Repository::new();
        repo.add(rule_for_a(vec![ingress_clause(
            vec![EndpointSelector::wildcard()],
            Some(http_get_root()),
        )]))
        .unwrap();
        repo.add(rule_for_a(vec![ingress_clause(
            vec![EndpointSelector::wildcard()],
            Some(L7Rules::Kafka(vec![crate::api::KafkaRule {
                topic: "foo".into(),
                ..Default::default()
            }])),
        )]))
        .unwrap();

        let ctx = SearchContext::ingress(parse_label_array(&["id=a"]));
        assert!(matches!(
            repo.resolve_l4_ingress_policy(&ctx),
            Err(Error::ParserConflict { .. })
        ));
    }

    #[test]
    fn trace_reports_selected_and_matched_counts() {
        let repo = Repository::new();
        repo.add(rule_for_a(vec![ingress_clause(vec![], None)]))
            .unwrap();
        repo.add(Rule {
            endpoint_selector: EndpointSelector::from_pairs([("id", "b")]),
            ingress: vec![ingress_clause(vec![], None)],
            ..Default::default()
        })
        .unwrap();

        let sink = BufferSink::new();
        let ctx = SearchContext::ingress(parse_label_array(&["id=a"])).with_trace(&sink);
        let map = repo.resolve_l4_ingress_policy(&ctx).unwrap();
        assert!(map.is_some());

        let trace = sink.contents();
        assert!(trace.contains("Resolving ingress port policy for [id=a]"));
        assert!(trace.contains("1/2 rules selected"));
        assert!(trace.contains("Found allow rule"));
    }

    #[test]
    fn trace_reports_no_allow_rule_when_nothing_matches() {
        let repo = Repository::new();
        repo.add(rule_for_a(vec![ingress_clause(vec![], None)]))
            .unwrap();

        let sink = BufferSink::new();
        let ctx = SearchContext::ingress(parse_label_array(&["id=zzz"])).with_trace(&sink);
        assert!(repo.resolve_l4_ingress_policy(&ctx).unwrap().is_none());
        assert!(sink.contents().contains("0/1 rules selected"));
        assert!(sink.contents().contains("Found no allow rule"));
    }

    // With AllowLocalhost::Always every proxied filter admits the host
    // identity with an empty allow-all record.
    #[test]
    fn always_allow_localhost_wildcards_the_host_at_l7() {
        let repo = Repository::with_config(ResolverConfig {
            allow_localhost: AllowLocalhost::Always,
        });
        repo.add(rule_for_a(vec![ingress_clause(
            vec![EndpointSelector::wildcard()],
            Some(http_get_root()),
        )]))
        .unwrap();

        let ctx = SearchContext::ingress(parse_label_array(&["id=a"]));
        let map = repo.resolve_l4_ingress_policy(&ctx).unwrap().unwrap();
        let filter = &map["80/TCP"];

        assert_eq!(filter.l7_parser, L7ParserType::Http);
        assert_eq!(filter.l7_rules_per_ep.len(), 2);
        assert_eq!(
            filter.l7_rules_per_ep.get(&EndpointSelector::wildcard()),
            Some(&http_get_root())
        );
        let host_entry = filter.l7_rules_per_ep.get(&host_selector()).unwrap();
        assert!(host_entry.is_empty());
        assert_eq!(filter.derived_from_rules.len(), 1);
    }

    // Filters without a parser are untouched by the host wildcarding.
    #[test]
    fn always_allow_localhost_skips_unproxied_filters() {
        let repo = Repository::with_config(ResolverConfig {
            allow_localhost: AllowLocalhost::Always,
        });
        repo.add(rule_for_a(vec![ingress_clause(vec![], None)]))
            .unwrap();

        let ctx = SearchContext::ingress(parse_label_array(&["id=a"]));
        let map = repo.resolve_l4_ingress_policy(&ctx).unwrap().unwrap();
        assert!(map["80/TCP"].l7_rules_per_ep.is_empty());
    }

    // Auto and Disabled leave the result alone.
    #[test]
    fn auto_allow_localhost_is_a_noop_at_resolve_time() {
        for allow_localhost in [AllowLocalhost::Auto, AllowLocalhost::Disabled] {
            let repo = Repository::with_config(ResolverConfig { allow_localhost });
            repo.add(rule_for_a(vec![ingress_clause(
                vec![EndpointSelector::wildcard()],
                Some(http_get_root()),
            )]))
            .unwrap();

            let ctx = SearchContext::ingress(parse_label_array(&["id=a"]));
            let map = repo.resolve_l4_ingress_policy(&ctx).unwrap().unwrap();
            assert_eq!(map["80/TCP"].l7_rules_per_ep.len(), 1);
            assert!(!map["80/TCP"].l7_rules_per_ep.contains(&host_selector()));
        }
    }

    #[test]
    fn resolves_egress_for_the_source_endpoint() {
        let repo = Repository::new();
        repo.add(Rule {
            endpoint_selector: selector_a(),
            egress: vec![crate::api::EgressRule {
                to_endpoints: vec![EndpointSelector::from_pairs([("id", "c")])],
                to_ports: vec![PortRule {
                    ports: vec![PortProtocol {
                        port: "443".into(),
                        protocol: L4Proto::Tcp,
                    }],
                    rules: None,
                }],
            }],
            ..Default::default()
        })
        .unwrap();

        let ctx = SearchContext::egress(
            parse_label_array(&["id=a"]),
            parse_label_array(&["id=c"]),
        );
        let map = repo.resolve_l4_egress_policy(&ctx).unwrap().unwrap();
        let filter = &map["443/TCP"];
        assert!(!filter.ingress);
        assert_eq!(filter.port, 443);

        // The same repository yields nothing for a different source.
        let other = SearchContext::egress(parse_label_array(&["id=zzz"]), vec![]);
        assert!(repo.resolve_l4_egress_policy(&other).unwrap().is_none());
    }

    // Two resolves over the same rules and context agree exactly.
    #[test]
    fn resolution_is_deterministic() {
        let repo = Repository::new();
        repo.add(rule_for_a(vec![
            ingress_clause(vec![selector_a()], Some(http_get_root())),
            ingress_clause(vec![EndpointSelector::wildcard()], None),
        ]))
        .unwrap();

        let ctx = SearchContext::ingress(parse_label_array(&["id=a"]));
        let first = repo.resolve_l4_ingress_policy(&ctx).unwrap();
        let second = repo.resolve_l4_ingress_policy(&ctx).unwrap();
        assert_eq!(first, second);
    }
}
