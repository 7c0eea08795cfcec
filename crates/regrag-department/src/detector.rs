//! Dual-signal department detection.
//!
//! The caller's declared department and the query keywords are compared
//! first. Only when they disagree is the query embedded and matched against
//! each candidate department's representative embedding, after which all
//! signals take part in a weighted vote.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use regrag_core::DepartmentConfig;
use regrag_graph::vector::{cosine, normalized};
use regrag_infer::BatchEmbedder;

use crate::keywords::keyword_signals;
use crate::permissions::PermissionTable;
use crate::types::{CallerMetadata, DepartmentDecision, Signal, SignalSource};

/// Totals closer than this count as a tie.
const TIE_EPSILON: f32 = 1e-6;

pub struct DepartmentDetector {
    config: DepartmentConfig,
    permissions: PermissionTable,
    embedder: BatchEmbedder,
    department_embeddings: RwLock<HashMap<String, Vec<f32>>>,
}

impl DepartmentDetector {
    pub fn new(config: DepartmentConfig, embedder: BatchEmbedder) -> Self {
        let permissions = PermissionTable::from_config(&config);
        Self {
            config,
            permissions,
            embedder,
            department_embeddings: RwLock::new(HashMap::new()),
        }
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    pub fn set_department_embedding(&self, department: &str, embedding: Vec<f32>) {
        self.department_embeddings
            .write()
            .insert(department.to_string(), embedding);
    }

    pub fn set_department_embeddings(&self, embeddings: HashMap<String, Vec<f32>>) {
        self.department_embeddings.write().extend(embeddings);
    }

    pub fn has_department_embedding(&self, department: &str) -> bool {
        self.department_embeddings.read().contains_key(department)
    }

    /// Representative embedding per department: mean of the normalised
    /// embeddings of its sample texts. Departments whose samples all fail
    /// to embed are left out.
    pub async fn compute_department_embeddings(
        embedder: &BatchEmbedder,
        samples: &BTreeMap<String, Vec<String>>,
    ) -> HashMap<String, Vec<f32>> {
        let mut out = HashMap::new();
        for (department, texts) in samples {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let vectors: Vec<Vec<f32>> = embedder
                .embed_all(&refs)
                .await
                .into_iter()
                .flatten()
                .map(|v| normalized(&v))
                .collect();
            let Some(dim) = vectors.first().map(Vec::len) else {
                warn!("No usable samples for department '{}'", department);
                continue;
            };
            let mut mean = vec![0.0f32; dim];
            for v in vectors.iter().filter(|v| v.len() == dim) {
                for (m, x) in mean.iter_mut().zip(v) {
                    *m += x;
                }
            }
            let count = vectors.iter().filter(|v| v.len() == dim).count() as f32;
            for m in mean.iter_mut() {
                *m /= count;
            }
            debug!("Representative embedding for '{}' from {} samples", department, count);
            out.insert(department.clone(), mean);
        }
        out
    }

    /// Decide which department graph serves `query` for this caller.
    pub async fn decide(&self, query: &str, caller: &CallerMetadata) -> DepartmentDecision {
        let Some(declared) = caller.declared_department() else {
            let general = self.config.general.clone();
            return DepartmentDecision {
                chosen_department: general.clone(),
                confidence: self.config.general_confidence,
                conflict_detected: false,
                permission_granted: true,
                signals: vec![Signal::new(
                    general,
                    self.config.general_confidence,
                    SignalSource::UserMetadata,
                )],
            };
        };

        let user = Signal::new(declared, self.config.user_metadata_confidence, SignalSource::UserMetadata);
        let keywords = keyword_signals(query);
        let top_keyword = keywords.first().cloned();
        let mut signals = vec![user.clone()];
        signals.extend(keywords);

        let conflict = top_keyword
            .as_ref()
            .map(|k| k.department != declared)
            .unwrap_or(false);

        let (chosen, confidence) = if !conflict {
            let agreeing: Vec<f32> = std::iter::once(user.confidence)
                .chain(top_keyword.as_ref().map(|k| k.confidence))
                .collect();
            let average = agreeing.iter().sum::<f32>() / agreeing.len() as f32;
            (declared.to_string(), average)
        } else {
            let candidates: BTreeSet<String> = signals.iter().map(|s| s.department.clone()).collect();
            if let Some(semantic) = self.semantic_signal(query, &candidates).await {
                signals.push(semantic);
            }
            let resolved = resolve(&signals).unwrap_or_else(|| (declared.to_string(), user.confidence));
            info!(
                "Department conflict: declared '{}', keywords '{}' -> '{}' ({:.2})",
                declared,
                top_keyword.as_ref().map(|k| k.department.as_str()).unwrap_or("-"),
                resolved.0,
                resolved.1
            );
            resolved
        };

        let permission_granted = self
            .permissions
            .is_granted(caller.role.as_deref(), Some(declared), &chosen);
        if !permission_granted {
            warn!(
                "Permission denied: department '{}' (role {:?}) may not read '{}'",
                declared, caller.role, chosen
            );
        }

        DepartmentDecision {
            chosen_department: chosen,
            confidence: confidence.clamp(0.0, 1.0),
            conflict_detected: conflict,
            permission_granted,
            signals,
        }
    }

    /// Best-matching candidate by representative embedding, if any can be
    /// compared. The query is embedded at most once.
    async fn semantic_signal(&self, query: &str, candidates: &BTreeSet<String>) -> Option<Signal> {
        let references: Vec<(String, Vec<f32>)> = {
            let embeddings = self.department_embeddings.read();
            candidates
                .iter()
                .filter_map(|d| embeddings.get(d).map(|e| (d.clone(), e.clone())))
                .collect()
        };
        if references.is_empty() || !self.embedder.is_available() {
            return None;
        }
        let query_embedding = match self.embedder.embed_one(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Semantic department signal unavailable ({})", e);
                return None;
            }
        };
        references
            .into_iter()
            .map(|(d, e)| (d, cosine(&query_embedding, &e).max(0.0)))
            .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.0.cmp(&a.0))
            })
            .map(|(d, sim)| Signal::new(d, sim, SignalSource::SemanticSimilarity))
    }
}

/// Weighted vote over signals. Returns the winner and its share of the
/// total weighted mass. Ties go to the department backed by the
/// higher-priority source, then to the lexically smaller name.
pub fn resolve(signals: &[Signal]) -> Option<(String, f32)> {
    let mut totals: BTreeMap<&str, (f32, u8)> = BTreeMap::new();
    for signal in signals {
        let entry = totals.entry(signal.department.as_str()).or_insert((0.0, 0));
        entry.0 += signal.source.weight() * signal.confidence;
        entry.1 = entry.1.max(signal.source.priority());
    }
    let mass: f32 = totals.values().map(|(t, _)| t).sum();

    let mut ranked: Vec<(&str, f32, u8)> = totals.into_iter().map(|(d, (t, p))| (d, t, p)).collect();
    ranked.sort_by(|a, b| {
        if (a.1 - b.1).abs() > TIE_EPSILON {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            b.2.cmp(&a.2).then(a.0.cmp(b.0))
        }
    });
    let (department, total, _) = ranked.first().copied()?;
    let share = if mass > 0.0 { total / mass } else { 0.0 };
    Some((department.to_string(), share))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use regrag_core::EmbeddingError;
    use regrag_infer::{EmbeddingProvider, NoopEmbedder, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    /// "học bổng" points at axis 0, everything else at axis 1.
    struct ScholarshipAxis;

    #[async_trait]
    impl EmbeddingProvider for ScholarshipAxis {
        async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("học bổng") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn embedder(provider: Arc<dyn EmbeddingProvider>) -> BatchEmbedder {
        let policy = RetryPolicy {
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        BatchEmbedder::new(provider, policy, 5, Duration::ZERO)
    }

    fn detector(provider: Arc<dyn EmbeddingProvider>) -> DepartmentDetector {
        DepartmentDetector::new(DepartmentConfig::default(), embedder(provider))
    }

    #[tokio::test]
    async fn test_no_declared_department_short_circuits() {
        let d = detector(Arc::new(NoopEmbedder::new(2)));
        let decision = d.decide("học phí bao nhiêu", &CallerMetadata::default()).await;
        assert_eq!(decision.chosen_department, "general");
        assert!(decision.permission_granted);
        assert!(!decision.conflict_detected);
        assert_eq!(decision.signals.len(), 1);
    }

    #[tokio::test]
    async fn test_agreement_averages_confidence() {
        let d = detector(Arc::new(NoopEmbedder::new(2)));
        let caller = CallerMetadata::new(Some("finance"), Some("staff"));
        let decision = d.decide("miễn giảm học phí", &caller).await;
        assert_eq!(decision.chosen_department, "finance");
        assert!(!decision.conflict_detected);
        assert!(decision.permission_granted);
        assert!((decision.confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_semantic_signal_breaks_conflict() {
        let d = detector(Arc::new(ScholarshipAxis));
        d.set_department_embedding("student_affairs", vec![1.0, 0.0]);
        d.set_department_embedding("academic_affairs", vec![0.0, 1.0]);
        let caller = CallerMetadata::new(Some("academic_affairs"), Some("staff"));
        let decision = d.decide("điều kiện nhận học bổng", &caller).await;
        assert!(decision.conflict_detected);
        assert_eq!(decision.chosen_department, "student_affairs");
        assert!(decision.permission_granted);
        assert!(decision
            .signals
            .iter()
            .any(|s| s.source == SignalSource::SemanticSimilarity));
    }

    #[tokio::test]
    async fn test_denied_decision_is_not_an_error() {
        let d = detector(Arc::new(ScholarshipAxis));
        d.set_department_embedding("personnel", vec![0.0, 1.0]);
        let caller = CallerMetadata::new(Some("finance"), Some("staff"));
        let decision = d.decide("quy trình tuyển dụng giảng viên", &caller).await;
        assert!(decision.conflict_detected);
        assert_eq!(decision.chosen_department, "personnel");
        assert!(!decision.permission_granted);
    }

    #[test]
    fn test_resolve_weighted_vote() {
        let signals = vec![
            Signal::new("finance", 0.8, SignalSource::UserMetadata),
            Signal::new("student_affairs", 0.5, SignalSource::QueryKeyword),
            Signal::new("student_affairs", 0.6, SignalSource::SemanticSimilarity),
        ];
        let (winner, share) = resolve(&signals).unwrap();
        assert_eq!(winner, "student_affairs");
        assert!((share - 1.7 / 2.9).abs() < 1e-5);
    }

    #[test]
    fn test_resolve_tie_prefers_semantic_source() {
        // 1.5 * 0.8 == 2.0 * 0.6
        let signals = vec![
            Signal::new("finance", 0.8, SignalSource::UserMetadata),
            Signal::new("research", 0.6, SignalSource::SemanticSimilarity),
        ];
        for _ in 0..3 {
            assert_eq!(resolve(&signals).unwrap().0, "research");
        }
        let reversed: Vec<Signal> = signals.iter().rev().cloned().collect();
        assert_eq!(resolve(&reversed).unwrap().0, "research");
        assert!(resolve(&[]).is_none());
    }

    #[tokio::test]
    async fn test_compute_department_embeddings() {
        let e = embedder(Arc::new(ScholarshipAxis));
        let mut samples = BTreeMap::new();
        samples.insert("student_affairs".to_string(), vec!["học bổng A".to_string(), "học bổng B".to_string()]);
        samples.insert("empty".to_string(), Vec::new());
        let map = DepartmentDetector::compute_department_embeddings(&e, &samples).await;
        assert_eq!(map.len(), 1);
        assert_eq!(map["student_affairs"], vec![1.0, 0.0]);
    }
}
