use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::GraphView;
use crate::config::CentralityConfig;
use crate::errors::{CloudGraphError, Result};

/// Score per node id.
pub type CentralityScores = BTreeMap<String, f64>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentralityKind {
    #[default]
    Degree,
    Betweenness,
    #[serde(rename = "pagerank")]
    PageRank,
}

impl fmt::Display for CentralityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CentralityKind::Degree => "degree",
            CentralityKind::Betweenness => "betweenness",
            CentralityKind::PageRank => "pagerank",
        })
    }
}

impl FromStr for CentralityKind {
    type Err = CloudGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degree" => Ok(CentralityKind::Degree),
            "betweenness" => Ok(CentralityKind::Betweenness),
            "pagerank" | "page_rank" => Ok(CentralityKind::PageRank),
            other => Err(CloudGraphError::invalid_input(format!(
                "unknown centrality kind {other:?}"
            ))),
        }
    }
}

/// Scores every node with the requested measure.
///
/// Betweenness and PageRank need the `centrality` feature; without it they
/// fail with [`CloudGraphError::Unsupported`].
pub fn centrality(
    view: &GraphView,
    kind: CentralityKind,
    config: &CentralityConfig,
) -> Result<CentralityScores> {
    let scores = match kind {
        CentralityKind::Degree => degree(view),
        CentralityKind::Betweenness => betweenness(view)?,
        CentralityKind::PageRank => pagerank(view, config)?,
    };
    Ok(view.ids().iter().cloned().zip(scores).collect())
}

/// Highest scores first, ties by id, at most `top_n` entries.
pub fn rank_scores(scores: &CentralityScores, top_n: usize) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = scores.iter().map(|(id, s)| (id.clone(), *s)).collect();
    ranked.sort_by(|(ia, a), (ib, b)| {
        b.partial_cmp(a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| ia.cmp(ib))
    });
    ranked.truncate(top_n);
    ranked
}

/// `(in + out) / (n - 1)` over distinct neighbours.
fn degree(view: &GraphView) -> Vec<f64> {
    let n = view.node_count();
    let scale = if n > 1 { 1.0 / (n - 1) as f64 } else { 0.0 };
    (0..n)
        .map(|i| (view.outgoing(i).len() + view.incoming(i).len()) as f64 * scale)
        .collect()
}

#[cfg(feature = "centrality")]
fn betweenness(view: &GraphView) -> Result<Vec<f64>> {
    use std::collections::VecDeque;

    let n = view.node_count();
    let mut score = vec![0.0f64; n];
    let mut stack = Vec::with_capacity(n);
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut sigma = vec![0.0f64; n];
    let mut dist = vec![-1i64; n];
    let mut delta = vec![0.0f64; n];
    let mut queue = VecDeque::new();

    for s in 0..n {
        stack.clear();
        for p in preds.iter_mut() {
            p.clear();
        }
        sigma.iter_mut().for_each(|x| *x = 0.0);
        dist.iter_mut().for_each(|d| *d = -1);
        delta.iter_mut().for_each(|x| *x = 0.0);
        sigma[s] = 1.0;
        dist[s] = 0;
        queue.push_back(s);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &w in view.outgoing(v) {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }
        while let Some(w) = stack.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                score[w] += delta[w];
            }
        }
    }

    if n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        score.iter_mut().for_each(|x| *x *= scale);
    }
    Ok(score)
}

/// Power iteration with rank flowing from each dependent to what it depends
/// on. Mass held by nodes without dependencies is spread evenly.
#[cfg(feature = "centrality")]
fn pagerank(view: &GraphView, config: &CentralityConfig) -> Result<Vec<f64>> {
    let n = view.node_count();
    if n == 0 {
        return Ok(Vec::new());
    }
    if !(0.0..=1.0).contains(&config.damping) {
        return Err(CloudGraphError::invalid_input(format!(
            "damping {} outside [0, 1]",
            config.damping
        )));
    }
    let nf = n as f64;
    let d = config.damping;
    let mut rank = vec![1.0 / nf; n];
    let mut next = vec![0.0f64; n];
    let mut converged = false;

    for _ in 0..config.max_iterations.max(1) {
        let dangling: f64 = (0..n)
            .filter(|&i| view.outgoing(i).is_empty())
            .map(|i| rank[i])
            .sum();
        let base = (1.0 - d) / nf + d * dangling / nf;
        next.iter_mut().for_each(|x| *x = base);
        for (i, &r) in rank.iter().enumerate() {
            let targets = view.outgoing(i);
            if targets.is_empty() {
                continue;
            }
            let share = d * r / targets.len() as f64;
            for &t in targets {
                next[t] += share;
            }
        }
        let err: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut rank, &mut next);
        if err < nf * config.tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        tracing::warn!(
            iterations = config.max_iterations,
            "algo.pagerank.not_converged"
        );
    }
    let total: f64 = rank.iter().sum();
    if total > 0.0 {
        rank.iter_mut().for_each(|x| *x /= total);
    }
    Ok(rank)
}

#[cfg(not(feature = "centrality"))]
fn betweenness(_view: &GraphView) -> Result<Vec<f64>> {
    Err(CloudGraphError::unsupported(
        "betweenness centrality requires the `centrality` feature",
    ))
}

#[cfg(not(feature = "centrality"))]
fn pagerank(_view: &GraphView, _config: &CentralityConfig) -> Result<Vec<f64>> {
    Err(CloudGraphError::unsupported(
        "pagerank requires the `centrality` feature",
    ))
}
