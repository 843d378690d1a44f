use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    matcher::DataQualityDefect,
    model::{Clause, ClauseId, Finding, FindingId, FindingKind, Severity},
    regulation::Regulation,
};

const MAX_SCORE: u32 = 100;

/// Finding counts per (regulation, severity). Only non-zero cells are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskAggregate {
    counts: BTreeMap<Regulation, BTreeMap<Severity, usize>>,
}

impl RiskAggregate {
    /// Counts `findings` by their own severity.
    #[must_use]
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts: BTreeMap<Regulation, BTreeMap<Severity, usize>> = BTreeMap::new();
        for finding in findings {
            *counts
                .entry(finding.regulation)
                .or_default()
                .entry(finding.severity)
                .or_default() += 1;
        }
        Self { counts }
    }

    /// Count for one heatmap cell.
    #[must_use]
    pub fn count(&self, regulation: Regulation, severity: Severity) -> usize {
        self.counts
            .get(&regulation)
            .and_then(|row| row.get(&severity))
            .copied()
            .unwrap_or(0)
    }

    /// Findings counted for `regulation`.
    #[must_use]
    pub fn regulation_total(&self, regulation: Regulation) -> usize {
        self.counts
            .get(&regulation)
            .map_or(0, |row| row.values().sum())
    }

    /// Findings counted overall.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().flat_map(BTreeMap::values).sum()
    }

    /// Non-zero rows keyed by regulation.
    #[must_use]
    pub const fn rows(&self) -> &BTreeMap<Regulation, BTreeMap<Severity, usize>> {
        &self.counts
    }
}

/// One finding's contribution to a clause's heatmap row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseRiskEntry {
    /// Finding id.
    pub finding_id: FindingId,
    /// Raising regulation.
    pub regulation: Regulation,
    /// Severity as assessed by that regulation.
    pub severity: Severity,
    /// Finding kind; never reconciled across regulations.
    pub kind: FindingKind,
}

/// Per-clause risk, listing every finding on the clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseRisk {
    /// Clause id.
    pub clause_id: ClauseId,
    /// Effective severity: the maximum over `entries`.
    pub max_severity: Severity,
    /// Findings on the clause in canonical order.
    pub entries: Vec<ClauseRiskEntry>,
}

/// Reconciled findings plus every derived aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskModel {
    /// Findings in canonical order (clause order, then arrival order) with
    /// symmetric `related_finding_ids`.
    pub findings: Vec<Finding>,
    /// Heatmap counts.
    pub aggregate: RiskAggregate,
    /// Effective severity per clause carrying at least one finding, in clause order.
    pub clause_max_severity: IndexMap<ClauseId, Severity>,
    /// Heatmap rows per clause, in clause order.
    pub clause_risks: Vec<ClauseRisk>,
    /// Findings per severity.
    pub severity_distribution: BTreeMap<Severity, usize>,
    /// Findings per regulation.
    pub regulation_totals: BTreeMap<Regulation, usize>,
    /// Number of findings.
    pub total_findings: usize,
    /// 0-100, higher is better.
    pub compliance_score: u32,
    /// Conflict findings dropped because no finding is linked to them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defects: Vec<DataQualityDefect>,
}

impl RiskModel {
    /// Effective severity of the clause behind `finding`.
    #[must_use]
    pub fn effective_severity(&self, finding: &Finding) -> Severity {
        self.clause_max_severity
            .get(&finding.clause_id)
            .copied()
            .unwrap_or(finding.severity)
    }

    /// Finding lookup by id.
    #[must_use]
    pub fn finding(&self, id: &str) -> Option<&Finding> {
        self.findings.iter().find(|finding| finding.id.as_str() == id)
    }
}

/// Merges per-regulation findings into a single deterministic risk model.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAggregator;

impl RiskAggregator {
    /// Reconciles `findings` against the clause order of the run.
    ///
    /// Conflict findings sharing a clause are cross-linked, every link is made
    /// symmetric, and links to ids outside `findings` are discarded. A conflict
    /// left with no linked finding is dropped as a data-quality defect.
    /// Per-finding severities are untouched; the clause maximum is reported
    /// separately.
    #[must_use]
    pub fn aggregate(&self, clauses: &[Clause], mut findings: Vec<Finding>) -> RiskModel {
        let position: HashMap<&ClauseId, usize> = clauses
            .iter()
            .enumerate()
            .map(|(idx, clause)| (&clause.id, idx))
            .collect();
        findings.sort_by_key(|finding| {
            position
                .get(&finding.clause_id)
                .copied()
                .unwrap_or(usize::MAX)
        });

        let links = link_findings(&findings);
        let alive = counterparted(&findings, &links);
        let ids: Vec<FindingId> = findings.iter().map(|finding| finding.id.clone()).collect();
        let mut defects = Vec::new();
        let mut kept = Vec::with_capacity(findings.len());
        for (idx, mut finding) in findings.into_iter().enumerate() {
            if !alive[idx] {
                defects.push(DataQualityDefect {
                    regulation: finding.regulation,
                    reference: finding.id.to_string(),
                    clause_id: finding.clause_id.to_string(),
                    reason: "conflict without a counterpart".into(),
                });
                continue;
            }
            finding.related_finding_ids = links[idx]
                .iter()
                .map(|&other| ids[other].clone())
                .collect();
            kept.push(finding);
        }
        let findings = kept;

        let mut clause_risks: IndexMap<ClauseId, ClauseRisk> = IndexMap::new();
        for finding in &findings {
            let risk = clause_risks
                .entry(finding.clause_id.clone())
                .or_insert_with(|| ClauseRisk {
                    clause_id: finding.clause_id.clone(),
                    max_severity: finding.severity,
                    entries: Vec::new(),
                });
            risk.max_severity = risk.max_severity.max(finding.severity);
            risk.entries.push(ClauseRiskEntry {
                finding_id: finding.id.clone(),
                regulation: finding.regulation,
                severity: finding.severity,
                kind: finding.kind,
            });
        }

        let mut severity_distribution = BTreeMap::new();
        let mut regulation_totals = BTreeMap::new();
        for finding in &findings {
            *severity_distribution.entry(finding.severity).or_insert(0) += 1;
            *regulation_totals.entry(finding.regulation).or_insert(0) += 1;
        }

        RiskModel {
            aggregate: RiskAggregate::from_findings(&findings),
            clause_max_severity: clause_risks
                .iter()
                .map(|(id, risk)| (id.clone(), risk.max_severity))
                .collect(),
            clause_risks: clause_risks.into_values().collect(),
            severity_distribution,
            regulation_totals,
            total_findings: findings.len(),
            compliance_score: compliance_score(&findings),
            findings,
            defects,
        }
    }
}

/// Symmetric adjacency over finding indices.
fn link_findings(findings: &[Finding]) -> Vec<BTreeSet<usize>> {
    let index: HashMap<&FindingId, usize> = findings
        .iter()
        .enumerate()
        .map(|(idx, finding)| (&finding.id, idx))
        .collect();
    let mut links = vec![BTreeSet::new(); findings.len()];
    let mut connect = |a: usize, b: usize| {
        if a != b {
            links[a].insert(b);
            links[b].insert(a);
        }
    };

    for (idx, finding) in findings.iter().enumerate() {
        for related in &finding.related_finding_ids {
            if let Some(&other) = index.get(related) {
                connect(idx, other);
            }
        }
    }

    let mut conflicts_by_clause: HashMap<&ClauseId, Vec<usize>> = HashMap::new();
    for (idx, finding) in findings.iter().enumerate() {
        if finding.kind == FindingKind::Conflict {
            conflicts_by_clause
                .entry(&finding.clause_id)
                .or_default()
                .push(idx);
        }
    }
    for group in conflicts_by_clause.values() {
        for (pos, &a) in group.iter().enumerate() {
            for &b in &group[pos + 1..] {
                connect(a, b);
            }
        }
    }
    links
}

/// Which findings survive: everything but conflicts with no link.
///
/// Links are symmetric, so dropping a lone conflict never orphans another
/// finding and one pass reaches the fixed point.
fn counterparted(findings: &[Finding], links: &[BTreeSet<usize>]) -> Vec<bool> {
    findings
        .iter()
        .zip(links)
        .map(|(finding, linked)| finding.kind != FindingKind::Conflict || !linked.is_empty())
        .collect()
}

fn compliance_score(findings: &[Finding]) -> u32 {
    let penalty: u32 = findings
        .iter()
        .map(|finding| finding.severity.score_weight())
        .sum();
    MAX_SCORE.saturating_sub(penalty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{model_finding, sample_clauses};

    #[test]
    fn aggregate_counts_by_regulation_and_severity() {
        let findings = vec![
            model_finding(Regulation::Gdpr, 1, "C1", FindingKind::Violation, Severity::High),
            model_finding(Regulation::Gdpr, 2, "C2", FindingKind::Violation, Severity::Critical),
        ];
        let model = RiskAggregator.aggregate(&sample_clauses(), findings);
        assert_eq!(model.aggregate.count(Regulation::Gdpr, Severity::Critical), 1);
        assert_eq!(model.aggregate.count(Regulation::Gdpr, Severity::High), 1);
        assert_eq!(model.aggregate.count(Regulation::Hipaa, Severity::High), 0);
        assert_eq!(model.aggregate.rows().len(), 1);
        assert_eq!(model.aggregate.total(), 2);
        assert_eq!(model.compliance_score, 65);
    }

    #[test]
    fn clause_max_severity_dominates_every_finding() {
        let findings = vec![
            model_finding(Regulation::Hipaa, 1, "C2", FindingKind::Gap, Severity::Low),
            model_finding(Regulation::Gdpr, 1, "C2", FindingKind::Violation, Severity::High),
            model_finding(
                Regulation::Ccpa,
                1,
                "C2",
                FindingKind::PartialCompliance,
                Severity::Medium,
            ),
            model_finding(Regulation::Ccpa, 2, "C1", FindingKind::Gap, Severity::Low),
        ];
        let model = RiskAggregator.aggregate(&sample_clauses(), findings);
        for finding in &model.findings {
            assert!(model.clause_max_severity[&finding.clause_id] >= finding.severity);
        }
        assert_eq!(model.clause_max_severity[&ClauseId::sequential(2)], Severity::High);
        let kinds: Vec<FindingKind> =
            model.clause_risks[1].entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![FindingKind::Gap, FindingKind::Violation, FindingKind::PartialCompliance]
        );
        // provenance: per-finding severity unchanged
        assert_eq!(model.finding("HIPAA-F1").unwrap().severity, Severity::Low);
    }

    #[test]
    fn findings_follow_clause_order() {
        let findings = vec![
            model_finding(Regulation::Gdpr, 1, "C3", FindingKind::Gap, Severity::Low),
            model_finding(Regulation::Gdpr, 2, "C1", FindingKind::Gap, Severity::Low),
            model_finding(Regulation::Hipaa, 1, "C1", FindingKind::Gap, Severity::Low),
        ];
        let model = RiskAggregator.aggregate(&sample_clauses(), findings);
        let ids: Vec<&str> = model.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["GDPR-F2", "HIPAA-F1", "GDPR-F1"]);
        let clauses: Vec<&str> = model.clause_max_severity.keys().map(ClauseId::as_str).collect();
        assert_eq!(clauses, vec!["C1", "C3"]);
    }

    #[test]
    fn conflicts_on_a_clause_are_symmetric() {
        let mut one_sided =
            model_finding(Regulation::Gdpr, 1, "C1", FindingKind::Conflict, Severity::High);
        one_sided.related_finding_ids = vec![FindingId::namespaced(Regulation::Gdpr, 2)];
        let findings = vec![
            one_sided,
            model_finding(Regulation::Gdpr, 2, "C3", FindingKind::Conflict, Severity::Medium),
            model_finding(Regulation::Hipaa, 1, "C1", FindingKind::Conflict, Severity::Low),
        ];
        let model = RiskAggregator.aggregate(&sample_clauses(), findings);
        let related = |id: &str| -> Vec<String> {
            model
                .finding(id)
                .unwrap()
                .related_finding_ids
                .iter()
                .map(ToString::to_string)
                .collect()
        };
        assert_eq!(related("GDPR-F1"), vec!["HIPAA-F1", "GDPR-F2"]);
        assert_eq!(related("HIPAA-F1"), vec!["GDPR-F1"]);
        assert_eq!(related("GDPR-F2"), vec!["GDPR-F1"]);
        for finding in &model.findings {
            for other in &finding.related_finding_ids {
                let back = &model.finding(other.as_str()).unwrap().related_finding_ids;
                assert!(back.contains(&finding.id));
            }
        }
    }

    #[test]
    fn lone_conflicts_on_one_clause_link_across_regulations() {
        let findings = vec![
            model_finding(Regulation::Gdpr, 1, "C2", FindingKind::Conflict, Severity::High),
            model_finding(Regulation::Hipaa, 1, "C2", FindingKind::Conflict, Severity::Medium),
        ];
        let model = RiskAggregator.aggregate(&sample_clauses(), findings);
        assert!(model.defects.is_empty());
        assert_eq!(model.total_findings, 2);
        assert_eq!(
            model.finding("GDPR-F1").unwrap().related_finding_ids,
            vec![FindingId::namespaced(Regulation::Hipaa, 1)]
        );
        assert_eq!(
            model.finding("HIPAA-F1").unwrap().related_finding_ids,
            vec![FindingId::namespaced(Regulation::Gdpr, 1)]
        );
    }

    #[test]
    fn conflicts_without_counterpart_are_dropped() {
        let mut lone =
            model_finding(Regulation::Gdpr, 2, "C1", FindingKind::Conflict, Severity::Low);
        lone.related_finding_ids = vec![FindingId::namespaced(Regulation::Gdpr, 9)];
        let mut linked =
            model_finding(Regulation::Gdpr, 3, "C2", FindingKind::Conflict, Severity::Low);
        linked.related_finding_ids = vec![FindingId::namespaced(Regulation::Gdpr, 4)];
        let gap = model_finding(Regulation::Gdpr, 4, "C3", FindingKind::Gap, Severity::Low);
        let model = RiskAggregator.aggregate(&sample_clauses(), vec![gap, linked, lone]);

        let ids: Vec<&str> = model.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["GDPR-F3", "GDPR-F4"]);
        assert_eq!(model.total_findings, 2);
        assert_eq!(model.compliance_score, 98);
        assert_eq!(model.defects.len(), 1);
        assert_eq!(model.defects[0].reference, "GDPR-F2");
        assert_eq!(model.defects[0].clause_id, "C1");
        assert!(model.clause_max_severity.get(&ClauseId::sequential(1)).is_none());
        assert_eq!(
            model.finding("GDPR-F4").unwrap().related_finding_ids,
            vec![FindingId::namespaced(Regulation::Gdpr, 3)]
        );
    }

    #[test]
    fn dangling_links_are_discarded() {
        let mut finding =
            model_finding(Regulation::Soc2, 1, "C1", FindingKind::Violation, Severity::Low);
        finding.related_finding_ids = vec![FindingId::namespaced(Regulation::Soc2, 9)];
        let model = RiskAggregator.aggregate(&sample_clauses(), vec![finding]);
        assert!(model.findings[0].related_finding_ids.is_empty());
    }

    #[test]
    fn score_floors_at_zero() {
        let findings = (1..=5)
            .map(|n| {
                model_finding(
                    Regulation::PciDss,
                    n,
                    "C1",
                    FindingKind::Violation,
                    Severity::Critical,
                )
            })
            .collect();
        let model = RiskAggregator.aggregate(&sample_clauses(), findings);
        assert_eq!(model.compliance_score, 0);
        assert_eq!(model.severity_distribution[&Severity::Critical], 5);
        assert_eq!(model.regulation_totals[&Regulation::PciDss], 5);
    }

    #[test]
    fn empty_input_scores_full() {
        let model = RiskAggregator.aggregate(&sample_clauses(), Vec::new());
        assert_eq!(model.compliance_score, 100);
        assert_eq!(model.total_findings, 0);
        assert!(model.clause_risks.is_empty());
    }
}
