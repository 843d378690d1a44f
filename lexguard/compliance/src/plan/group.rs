use std::collections::HashMap;

use indexmap::IndexMap;

use crate::{
    aggregate::RiskModel,
    model::{ClauseId, FindingId, Severity},
};

/// Findings resolved by a single remediation item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Response-local reference (`K1`, `K2`, ...).
    pub reference: String,
    /// Indices into [`RiskModel::findings`], ascending.
    pub findings: Vec<usize>,
    /// Maximum effective severity over the findings.
    pub severity: Severity,
}

impl Candidate {
    /// Position of the earliest finding; ties in the roadmap fall back to it.
    pub fn order_key(&self) -> usize {
        self.findings.first().copied().unwrap_or(usize::MAX)
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // lower index stays root so groups keep discovery order
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Groups findings sharing a clause or linked by the matcher. Every finding
/// lands in exactly one candidate; candidates are in discovery order.
pub fn candidates(risk: &RiskModel) -> Vec<Candidate> {
    let findings = &risk.findings;
    let mut set = DisjointSet::new(findings.len());
    let mut first_on_clause: HashMap<&ClauseId, usize> = HashMap::new();
    let index: HashMap<&FindingId, usize> = findings
        .iter()
        .enumerate()
        .map(|(idx, finding)| (&finding.id, idx))
        .collect();

    for (idx, finding) in findings.iter().enumerate() {
        let anchor = *first_on_clause.entry(&finding.clause_id).or_insert(idx);
        set.union(anchor, idx);
        for related in &finding.related_finding_ids {
            if let Some(&other) = index.get(related) {
                set.union(idx, other);
            }
        }
    }

    let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for idx in 0..findings.len() {
        groups.entry(set.find(idx)).or_default().push(idx);
    }
    groups
        .into_values()
        .enumerate()
        .map(|(n, members)| Candidate {
            reference: format!("K{}", n + 1),
            severity: members
                .iter()
                .map(|&idx| risk.effective_severity(&findings[idx]))
                .max()
                .unwrap_or(Severity::Low),
            findings: members,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::RiskAggregator,
        fixtures::{model_finding, sample_clauses},
        model::FindingKind,
        regulation::Regulation,
    };

    #[test]
    fn same_clause_and_linked_findings_merge() {
        let mut linked =
            model_finding(Regulation::Gdpr, 3, "C3", FindingKind::Conflict, Severity::Low);
        linked.related_finding_ids = vec![FindingId::namespaced(Regulation::Hipaa, 1)];
        let mut counterpart = model_finding(
            Regulation::Hipaa,
            1,
            "C2",
            FindingKind::Conflict,
            Severity::Medium,
        );
        counterpart.related_finding_ids = vec![FindingId::namespaced(Regulation::Gdpr, 3)];
        let findings = vec![
            model_finding(Regulation::Gdpr, 1, "C1", FindingKind::Violation, Severity::High),
            model_finding(Regulation::Ccpa, 1, "C1", FindingKind::Gap, Severity::Low),
            linked,
            counterpart,
        ];
        let risk = RiskAggregator.aggregate(&sample_clauses(), findings);
        let groups = candidates(&risk);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].reference, "K1");
        assert_eq!(groups[0].findings, vec![0, 1]);
        assert_eq!(groups[0].severity, Severity::High);
        // C2 precedes C3 in canonical order
        assert_eq!(groups[1].findings, vec![2, 3]);
        assert_eq!(groups[1].severity, Severity::Medium);
        assert_eq!(groups[1].order_key(), 2);
    }

    #[test]
    fn every_finding_in_exactly_one_candidate() {
        let findings = (1..=6)
            .map(|n| {
                let clause = format!("C{}", n % 3 + 1);
                model_finding(Regulation::Soc2, n, &clause, FindingKind::Gap, Severity::Medium)
            })
            .collect();
        let risk = RiskAggregator.aggregate(&sample_clauses(), findings);
        let mut covered: Vec<usize> = candidates(&risk)
            .into_iter()
            .flat_map(|candidate| candidate.findings)
            .collect();
        covered.sort_unstable();
        assert_eq!(covered, (0..6).collect::<Vec<_>>());
    }
}
