use crate::storage::Chunk;
use serde::{Deserialize, Serialize};

/// Which retrieval tier produced a [`SearchResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// Embedding similarity against the chunk store
    Vector,
    /// Keyword pre-filter plus model ranking
    Keyword,
    /// Fused from both tiers
    Hybrid,
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMethod::Vector => write!(f, "vector"),
            SearchMethod::Keyword => write!(f, "keyword"),
            SearchMethod::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vector" | "semantic" => Ok(SearchMethod::Vector),
            "keyword" | "lexical" => Ok(SearchMethod::Keyword),
            "hybrid" => Ok(SearchMethod::Hybrid),
            _ => Err(format!(
                "Invalid search method: '{s}'. Valid values are: vector, keyword, hybrid"
            )),
        }
    }
}

/// A scored reference to a chunk, produced and discarded within one query.
///
/// `score` carries the tier-specific meaning: cosine similarity for
/// [`SearchMethod::Vector`], normalised ranker relevance in `[0, 1]` for
/// [`SearchMethod::Keyword`], and the fused score for [`SearchMethod::Hybrid`].
/// The per-tier fields are diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_score: Option<f32>,
    pub method: SearchMethod,
}

impl SearchResult {
    /// Result of the vector tier with its cosine similarity
    pub fn vector(chunk: Chunk, similarity: f32) -> Self {
        Self {
            chunk,
            score: similarity,
            vector_score: Some(similarity),
            keyword_score: None,
            combined_score: None,
            method: SearchMethod::Vector,
        }
    }

    /// Result of the keyword tier with its normalised relevance
    pub fn keyword(chunk: Chunk, relevance: f32) -> Self {
        Self {
            chunk,
            score: relevance,
            vector_score: None,
            keyword_score: Some(relevance),
            combined_score: None,
            method: SearchMethod::Keyword,
        }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        for method in [
            SearchMethod::Vector,
            SearchMethod::Keyword,
            SearchMethod::Hybrid,
        ] {
            assert_eq!(method.to_string().parse::<SearchMethod>().unwrap(), method);
            assert_eq!(
                serde_json::to_value(method).unwrap(),
                serde_json::json!(method.to_string())
            );
        }
        assert_eq!("Semantic".parse::<SearchMethod>().unwrap(), SearchMethod::Vector);
        assert!("fuzzy".parse::<SearchMethod>().is_err());
    }

    #[test]
    fn test_constructors_fill_tier_scores() {
        let vector = SearchResult::vector(Chunk::new("a", "text"), 0.8);
        assert_eq!(vector.vector_score, Some(0.8));
        assert_eq!(vector.keyword_score, None);
        assert_eq!(vector.method, SearchMethod::Vector);

        let keyword = SearchResult::keyword(Chunk::new("b", "text"), 0.4);
        assert_eq!(keyword.score, 0.4);
        assert_eq!(keyword.keyword_score, Some(0.4));
        assert_eq!(keyword.id(), "b");

        let json = serde_json::to_value(&keyword).unwrap();
        assert_eq!(json["method"], "keyword");
        assert!(json.get("vector_score").is_none());
    }
}
