//! Seeded synthetic resource graphs for benchmarks and tests.
//!
//! Every generated edge points from a later resource to an earlier one, so
//! all shapes are acyclic and have a valid apply order.

use ahash::AHashMap;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

use crate::codec::Attributes;
use crate::graph::{Edge, Node};

#[derive(Clone, Debug)]
pub struct ResourceDataset {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl ResourceDataset {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The id with the most incident edges; the first one on ties.
    pub fn hub_id(&self) -> Option<&str> {
        let position: AHashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        let mut counts = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            counts[position[edge.source_id.as_str()]] += 1;
            counts[position[edge.target_id.as_str()]] += 1;
        }
        let mut best: Option<(usize, usize)> = None;
        for (idx, degree) in counts.into_iter().enumerate() {
            if best.is_none_or(|(d, _)| degree > d) {
                best = Some((degree, idx));
            }
        }
        best.map(|(_, idx)| self.nodes[idx].id.as_str())
    }
}

#[derive(Clone, Debug)]
pub enum ResourceShape {
    /// vpc <- subnet <- instance trees.
    Layered {
        vpcs: usize,
        subnets_per_vpc: usize,
        instances_per_subnet: usize,
    },
    Chain { length: usize },
    /// Many resources depending on one shared resource.
    Star { leaves: usize },
    RandomDag { nodes: usize, edges: usize },
    ScaleFree { nodes: usize, m: usize },
}

pub fn generate_resources(shape: ResourceShape, seed: u64) -> ResourceDataset {
    match shape {
        ResourceShape::Layered {
            vpcs,
            subnets_per_vpc,
            instances_per_subnet,
        } => layered(vpcs, subnets_per_vpc, instances_per_subnet, seed),
        ResourceShape::Chain { length } => {
            let nodes = numbered("module", "terraform_module", length);
            let edges = (1..length)
                .map(|i| link(&nodes[i], &nodes[i - 1], "depends_on"))
                .collect();
            ResourceDataset { nodes, edges }
        }
        ResourceShape::Star { leaves } => {
            let mut nodes = vec![resource("kms-shared", "aws_kms_key", 0)];
            nodes.extend(numbered("bucket", "aws_s3_bucket", leaves));
            let edges = (1..nodes.len())
                .map(|i| link(&nodes[i], &nodes[0], "encrypted_by"))
                .collect();
            ResourceDataset { nodes, edges }
        }
        ResourceShape::RandomDag { nodes, edges } => random_dag(nodes, edges, seed),
        ResourceShape::ScaleFree { nodes, m } => scale_free(nodes, m, seed),
    }
}

/// A heavy attribute map, roughly `approx_bytes` of repetitive JSON.
pub fn bulky_attributes(approx_bytes: usize) -> Attributes {
    let statement = r#"{"Effect":"Allow","Action":"s3:GetObject","Resource":"arn:aws:s3:::bucket/*"}"#;
    let copies = (approx_bytes / statement.len()).max(1);
    let mut attrs = Attributes::new();
    attrs.insert("policy".into(), json!(statement.repeat(copies)));
    attrs.insert("tags".into(), json!({"env": "prod", "team": "platform"}));
    attrs
}

fn layered(vpcs: usize, subnets: usize, instances: usize, seed: u64) -> ResourceDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for v in 0..vpcs {
        let vpc = resource(&format!("vpc-{v:04}"), "aws_vpc", v);
        for s in 0..subnets {
            let subnet = resource(&format!("subnet-{v:04}-{s:03}"), "aws_subnet", s);
            edges.push(link(&subnet, &vpc, "belongs_to"));
            for i in 0..instances {
                let mut instance = resource(
                    &format!("i-{v:04}-{s:03}-{i:03}"),
                    "aws_instance",
                    rng.gen_range(0..1000),
                );
                instance
                    .attributes
                    .insert("instance_type".into(), json!(pick_type(&mut rng)));
                edges.push(link(&instance, &subnet, "runs_in"));
                nodes.push(instance);
            }
            nodes.push(subnet);
        }
        nodes.push(vpc);
    }
    ResourceDataset { nodes, edges }
}

fn random_dag(node_count: usize, edge_count: usize, seed: u64) -> ResourceDataset {
    assert!(node_count > 1, "node_count must exceed 1");
    let total_pairs = pair_count(node_count);
    assert!(
        edge_count as u128 <= total_pairs,
        "edge_count exceeds possible pairs"
    );
    let nodes = numbered("res", "aws_resource", node_count);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut edges = Vec::with_capacity(edge_count);
    let mut idx = 0u64;
    let mut remaining_edges = edge_count as u64;
    while remaining_edges > 0 && idx < total_pairs as u64 {
        let remaining_pairs = total_pairs as u64 - idx;
        let p = remaining_edges as f64 / remaining_pairs as f64;
        idx += sample_geometric(&mut rng, p);
        if idx >= total_pairs as u64 {
            break;
        }
        let (earlier, later) = pair_from_index(idx, node_count as u64);
        edges.push(link(&nodes[later as usize], &nodes[earlier as usize], "depends_on"));
        idx += 1;
        remaining_edges -= 1;
    }
    ResourceDataset { nodes, edges }
}

fn scale_free(node_count: usize, m: usize, seed: u64) -> ResourceDataset {
    assert!(m > 0, "m must be positive");
    assert!(node_count > m + 1, "node_count must exceed m + 1");
    let nodes = numbered("svc", "aws_service", node_count);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut degrees = vec![0usize; node_count];
    let mut edges = Vec::new();
    let seed_nodes = m + 1;
    for u in 0..seed_nodes {
        for v in (u + 1)..seed_nodes {
            edges.push(link(&nodes[v], &nodes[u], "depends_on"));
            degrees[u] += 1;
            degrees[v] += 1;
        }
    }
    let mut total_degree: usize = degrees.iter().sum();
    for new_node in seed_nodes..node_count {
        let mut targets = Vec::new();
        while targets.len() < m {
            let pick = rng.gen_range(0..total_degree);
            let mut cumulative = 0usize;
            for candidate in 0..new_node {
                cumulative += degrees[candidate];
                if pick < cumulative {
                    if !targets.contains(&candidate) {
                        targets.push(candidate);
                    }
                    break;
                }
            }
        }
        targets.sort_unstable();
        for target in targets {
            edges.push(link(&nodes[new_node], &nodes[target], "depends_on"));
            degrees[target] += 1;
            degrees[new_node] += 1;
            total_degree += 2;
        }
    }
    ResourceDataset { nodes, edges }
}

fn resource(id: &str, node_type: &str, idx: usize) -> Node {
    let mut attrs = Attributes::new();
    attrs.insert("idx".into(), json!(idx));
    attrs.insert("tags".into(), json!({"Name": id}));
    Node::new(id, node_type)
        .with_name(id)
        .with_region("us-east-1")
        .with_account("123456789012")
        .with_attributes(attrs)
}

fn numbered(prefix: &str, node_type: &str, count: usize) -> Vec<Node> {
    (0..count)
        .map(|idx| resource(&format!("{prefix}-{idx:06}"), node_type, idx))
        .collect()
}

fn link(source: &Node, target: &Node, relation: &str) -> Edge {
    Edge::new(source.id.clone(), target.id.clone(), relation)
}

fn pick_type(rng: &mut StdRng) -> &'static str {
    const TYPES: [&str; 4] = ["t3.micro", "t3.large", "m5.xlarge", "c6g.2xlarge"];
    TYPES[rng.gen_range(0..TYPES.len())]
}

fn pair_count(nodes: usize) -> u128 {
    let n = nodes as u128;
    n * (n - 1) / 2
}

fn sample_geometric(rng: &mut StdRng, p: f64) -> u64 {
    let u = rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
    ((u.ln() / (1.0 - p).ln()).floor().max(0.0)) as u64
}

fn pair_from_index(idx: u64, nodes: u64) -> (u64, u64) {
    let mut left = 0;
    let mut start = 0u64;
    while left < nodes - 1 {
        let remaining = nodes - left - 1;
        if idx < start + remaining {
            return (left, left + 1 + (idx - start));
        }
        start += remaining;
        left += 1;
    }
    (nodes - 2, nodes - 1)
}
