use std::borrow::Cow;
use std::str::FromStr;

use anyhow::{Context, anyhow, bail};
use bramble_cni_common::policy::{PolicyKey, PolicyValue, TrafficDirection};
use bramble_cni_common::proto::Protocol;
use bramble_cni_policy::Repository;
use bramble_cni_policy::api::Rule;
use bramble_cni_policy::identity::ReservedIdentity;
use bramble_cni_policy::l4::L4PolicyMap;
use bramble_cni_policy::labels::Label;
use bramble_cni_policy::trace::{BufferSink, SearchContext};
use tabled::{Table, Tabled, settings::Style};
use tracing::info;

use crate::cli::{PolicyCommands, TraceArgs, UpdateArgs};

pub(crate) fn run(cmd: PolicyCommands) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Update(args) => update(&args),
        PolicyCommands::Delete(args) => delete(&args),
        PolicyCommands::Trace(args) => trace(&args),
    }
}

/// Parsed form of the `policy update` positional arguments.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PolicyUpdateArgs {
    pub endpoint_id: String,
    pub traffic_direction: TrafficDirection,
    pub label: u32,
    pub port: u16,
    pub protocols: Vec<u8>,
}

/// Maps the raw CLI arguments to their canonical form. Reserved identity
/// names become `reserved_<N>` endpoint IDs; a missing port spec stands
/// for any port on any protocol, and a bare port expands to every known
/// IP protocol.
pub(crate) fn parse_policy_update_args(args: &UpdateArgs) -> anyhow::Result<PolicyUpdateArgs> {
    let endpoint_id = if args.endpoint_id.chars().all(|c| c.is_ascii_digit()) {
        args.endpoint_id.clone()
    } else {
        let identity = ReservedIdentity::from_name(&args.endpoint_id)
            .ok_or_else(|| anyhow!("unknown endpoint identity {:?}", args.endpoint_id))?;
        format!("reserved_{}", identity.id())
    };

    let traffic_direction = TrafficDirection::from_str(&args.direction)?;

    let label: u32 = args
        .peer_label
        .parse()
        .with_context(|| format!("invalid peer label {:?}", args.peer_label))?;

    let port: u16 = match &args.port_spec {
        None => 0,
        Some(spec) => {
            let port_str = spec.split_once('/').map_or(spec.as_str(), |(port, _)| port);
            port_str
                .parse()
                .with_context(|| format!("invalid port {port_str:?}"))?
        }
    };

    let protocols = if port == 0 {
        vec![Protocol::Any as u8]
    } else {
        match args.port_spec.as_ref().and_then(|spec| spec.split_once('/')) {
            Some((_, proto)) => vec![Protocol::from_str(proto)? as u8],
            None => Protocol::ALL.iter().map(|proto| *proto as u8).collect(),
        }
    };

    Ok(PolicyUpdateArgs {
        endpoint_id,
        traffic_direction,
        label,
        port,
        protocols,
    })
}

fn endpoint_numeric_id(endpoint_id: &str) -> anyhow::Result<u32> {
    let raw = endpoint_id.strip_prefix("reserved_").unwrap_or(endpoint_id);
    raw.parse()
        .with_context(|| format!("invalid endpoint ID {endpoint_id:?}"))
}

fn policy_keys(parsed: &PolicyUpdateArgs) -> anyhow::Result<Vec<PolicyKey>> {
    let endpoint = endpoint_numeric_id(&parsed.endpoint_id)?;
    let (src_id, dst_id) = match parsed.traffic_direction {
        TrafficDirection::Ingress => (parsed.label, endpoint),
        TrafficDirection::Egress => (endpoint, parsed.label),
        TrafficDirection::Invalid => bail!("invalid traffic direction"),
    };
    Ok(parsed
        .protocols
        .iter()
        .map(|proto| PolicyKey::new(src_id, dst_id, parsed.port, *proto))
        .collect())
}

fn update(args: &UpdateArgs) -> anyhow::Result<()> {
    let parsed = parse_policy_update_args(args)?;
    let mut cache = PolicyMapCache::default();
    for key in policy_keys(&parsed)? {
        cache.update(key, PolicyValue::allow());
    }
    info!(entries = cache.len(), "computed policy map update");
    print_entries(&cache);
    Ok(())
}

fn delete(args: &UpdateArgs) -> anyhow::Result<()> {
    let parsed = parse_policy_update_args(args)?;
    let mut cache = PolicyMapCache::default();
    for key in policy_keys(&parsed)? {
        cache.delete(&key);
        println!(
            "deleted {} -> {} port {} proto {}",
            key.src_id,
            key.dst_id,
            key.dst_port,
            Protocol::from(key.proto)
        );
    }
    Ok(())
}

fn trace(args: &TraceArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.rules)
        .with_context(|| format!("failed to read {}", args.rules.display()))?;
    let rules: Vec<Rule> = serde_json::from_str(&raw)?;

    let repo = Repository::new();
    for rule in rules {
        repo.add(rule)?;
    }

    let sink = BufferSink::new();
    let mut ctx = SearchContext::egress(
        args.from.iter().map(|s| Label::parse(s)).collect(),
        args.to.iter().map(|s| Label::parse(s)).collect(),
    );
    if args.verbose {
        ctx = ctx.with_trace(&sink);
    }

    let resolved = if args.egress {
        repo.resolve_l4_egress_policy(&ctx)?
    } else {
        repo.resolve_l4_ingress_policy(&ctx)?
    };

    if args.verbose {
        print!("{}", sink.contents());
    }

    match resolved {
        None => println!("No policy applies"),
        Some(map) if args.json => println!("{}", serde_json::to_string_pretty(&map)?),
        Some(map) => print_filters(&map),
    }
    Ok(())
}

/// Userspace cache of the flat policy map, skipping writes that would
/// not change an entry.
#[derive(Debug, Default)]
pub(crate) struct PolicyMapCache {
    cache: ahash::HashMap<PolicyKey, PolicyValue>,
}

impl PolicyMapCache {
    pub(crate) fn update(&mut self, key: PolicyKey, value: PolicyValue) -> bool {
        if let Some(current) = self.cache.get(&key)
            && *current == value
        {
            return false;
        }
        self.cache.insert(key, value);
        true
    }

    pub(crate) fn delete(&mut self, key: &PolicyKey) -> bool {
        self.cache.remove(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn entries(&self) -> Vec<PolicyEntry> {
        let mut entries: Vec<PolicyEntry> = self
            .cache
            .iter()
            .map(|(key, value)| PolicyEntry {
                key: *key,
                value: *value,
            })
            .collect();
        entries.sort_by_key(|e| (e.key.src_id, e.key.dst_id, e.key.dst_port, e.key.proto));
        entries
    }
}

pub(crate) struct PolicyEntry {
    pub key: PolicyKey,
    pub value: PolicyValue,
}

impl Tabled for PolicyEntry {
    const LENGTH: usize = 5;

    fn fields(&self) -> Vec<Cow<'_, str>> {
        let port = if self.key.dst_port == 0 {
            "any".to_string()
        } else {
            self.key.dst_port.to_string()
        };
        vec![
            Cow::Owned(self.key.src_id.to_string()),
            Cow::Owned(self.key.dst_id.to_string()),
            Cow::Owned(port),
            Cow::Owned(Protocol::from(self.key.proto).to_string()),
            Cow::Owned(self.value.action().to_string()),
        ]
    }

    fn headers() -> Vec<Cow<'static, str>> {
        vec![
            Cow::Borrowed("SRC"),
            Cow::Borrowed("DST"),
            Cow::Borrowed("PORT"),
            Cow::Borrowed("PROTO"),
            Cow::Borrowed("ACTION"),
        ]
    }
}

fn print_entries(cache: &PolicyMapCache) {
    let table = Table::new(cache.entries()).with(Style::empty()).to_string();
    println!("{table}");
}

struct FilterRow {
    key: String,
    endpoints: String,
    parser: String,
    l7_rules: String,
}

impl Tabled for FilterRow {
    const LENGTH: usize = 4;

    fn fields(&self) -> Vec<Cow<'_, str>> {
        vec![
            Cow::Borrowed(&self.key),
            Cow::Borrowed(&self.endpoints),
            Cow::Borrowed(&self.parser),
            Cow::Borrowed(&self.l7_rules),
        ]
    }

    fn headers() -> Vec<Cow<'static, str>> {
        vec![
            Cow::Borrowed("PORT/PROTO"),
            Cow::Borrowed("ENDPOINTS"),
            Cow::Borrowed("L7 PARSER"),
            Cow::Borrowed("L7 RULES"),
        ]
    }
}

fn print_filters(map: &L4PolicyMap) {
    let rows: Vec<FilterRow> = map
        .iter()
        .map(|(key, filter)| FilterRow {
            key: key.clone(),
            endpoints: filter
                .endpoints
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            parser: filter.l7_parser.to_string(),
            l7_rules: filter.l7_rules_per_ep.len().to_string(),
        })
        .collect();
    let table = Table::new(rows).with(Style::empty()).to_string();
    println!("{table}");
}
