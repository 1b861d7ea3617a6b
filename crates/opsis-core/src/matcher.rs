//! Probe-vs-gallery cosine matching.

use crate::types::{Embedding, EnrolledIdentity};
use serde::Serialize;

/// Outcome of comparing one query against the enrolled set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Best similarity seen, whether or not it cleared the threshold.
    pub similarity: f32,
    pub identity_id: Option<String>,
    pub display_name: Option<String>,
}

impl MatchResult {
    fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            identity_id: None,
            display_name: None,
        }
    }
}

pub trait Matcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult;
}

/// Dot-product similarity. Both query and gallery must be L2-normalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult {
        let mut best: Option<(&EnrolledIdentity, f32)> = None;
        for identity in gallery {
            if identity.embedding.values.len() != query.values.len() {
                tracing::warn!(
                    id = %identity.id,
                    enrolled_dim = identity.embedding.values.len(),
                    query_dim = query.values.len(),
                    "skipping identity with mismatched embedding size"
                );
                continue;
            }
            let similarity = query.dot(&identity.embedding);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((identity, similarity));
            }
        }

        let Some((identity, similarity)) = best else {
            return MatchResult::no_match(0.0);
        };

        if similarity < threshold {
            tracing::debug!(similarity, threshold, "best candidate below threshold");
            return MatchResult::no_match(similarity);
        }

        MatchResult {
            matched: true,
            similarity,
            identity_id: Some(identity.id.clone()),
            display_name: Some(identity.display_name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(angle_cos: f32) -> Embedding {
        Embedding::new(vec![angle_cos, (1.0 - angle_cos * angle_cos).sqrt()])
    }

    fn identity(id: &str, similarity_to_query: f32) -> EnrolledIdentity {
        EnrolledIdentity {
            id: id.to_string(),
            display_name: format!("User {id}"),
            embedding: unit(similarity_to_query),
        }
    }

    fn query() -> Embedding {
        Embedding::new(vec![1.0, 0.0])
    }

    #[test]
    fn test_best_match_above_threshold() {
        let gallery = vec![identity("a", 0.50), identity("b", 0.85), identity("c", 0.60)];
        let result = CosineMatcher.compare(&query(), &gallery, 0.80);
        assert!(result.matched);
        assert_eq!(result.identity_id.as_deref(), Some("b"));
        assert_eq!(result.display_name.as_deref(), Some("User b"));
        assert!((result.similarity - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_best_below_threshold_is_no_match() {
        let gallery = vec![identity("a", 0.50), identity("b", 0.79)];
        let result = CosineMatcher.compare(&query(), &gallery, 0.80);
        assert!(!result.matched);
        assert_eq!(result.identity_id, None);
        assert!((result.similarity - 0.79).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let gallery = vec![identity("a", 0.5)];
        let result = CosineMatcher.compare(&query(), &gallery, 0.5);
        assert!(result.matched);
    }

    #[test]
    fn test_empty_gallery_is_no_match() {
        let result = CosineMatcher.compare(&query(), &[], 0.80);
        assert_eq!(result, MatchResult::no_match(0.0));
    }

    #[test]
    fn test_ties_keep_first_enrolled() {
        let gallery = vec![identity("a", 0.9), identity("b", 0.9)];
        let result = CosineMatcher.compare(&query(), &gallery, 0.80);
        assert_eq!(result.identity_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_mismatched_dimension_skipped() {
        let mut odd = identity("odd", 1.0);
        odd.embedding = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![odd, identity("b", 0.85)];
        let result = CosineMatcher.compare(&query(), &gallery, 0.80);
        assert_eq!(result.identity_id.as_deref(), Some("b"));
    }
}
