//! Query analysis
//!
//! Provides:
//! - Intent classification and execution-pattern selection
//! - Keyword and entity extraction with stop-word filtering
//! - Synonym expansion
//! - Comparison subjects and scatter-gather sub-queries

use answerforge_common::cache::keys;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Detected query intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Looking for specific information
    Factual,
    /// Comparing concepts or tools
    Comparison,
    /// Seeking understanding/explanation
    Exploratory,
    /// Looking for a how-to
    Procedural,
    /// Reviewing what is known about a topic
    Research,
    General,
}

/// How the pipeline schedules its stages for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPattern {
    /// Retrieval, fact-check, synthesis, citation in order
    Sequential,
    /// Retrieval and fact-check concurrently
    ForkJoin,
    /// Several retrieval sub-queries in parallel, merged before fact-check
    ScatterGather,
}

impl ExecutionPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPattern::Sequential => "sequential",
            ExecutionPattern::ForkJoin => "fork_join",
            ExecutionPattern::ScatterGather => "scatter_gather",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Multi-word known concept
    Concept,
    /// Algorithm, tool or technique
    Method,
    /// Year or recency term
    Temporal,
    /// Any other content word
    Term,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub entity_type: EntityType,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQueryKind {
    /// The full query, for semantic-style matching
    Semantic,
    /// Content keywords only
    Keyword,
    /// Entities plus expansions, for related-concept lookups
    Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub kind: SubQueryKind,
    pub query: String,
}

/// Query understanding result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub normalized_query: String,
    pub intent: QueryIntent,
    pub pattern: ExecutionPattern,
    pub keywords: Vec<String>,
    pub entities: Vec<Entity>,
    pub expanded_terms: Vec<String>,
    /// Subjects being compared, for fork-join fact checking
    pub comparison_subjects: Vec<String>,
    pub sub_queries: Vec<SubQuery>,
}

#[derive(Debug, Clone)]
pub struct QueryAnalyzerConfig {
    pub max_expansions: usize,
    pub min_entity_confidence: f64,
}

impl Default for QueryAnalyzerConfig {
    fn default() -> Self {
        Self {
            max_expansions: 5,
            min_entity_confidence: 0.5,
        }
    }
}

const COMPARISON_MARKERS: &[&str] = &[
    " vs ",
    " vs. ",
    " versus ",
    "compare",
    "comparison",
    "difference between",
    "differences between",
    "better than",
    "pros and cons",
];

const RESEARCH_MARKERS: &[&str] = &[
    "research",
    "survey",
    "literature",
    "studies",
    "papers",
    "state of the art",
    "review of",
    "comprehensive",
    "in depth",
    "overview",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "in", "on", "at", "to", "for",
    "of", "with", "by", "from", "and", "or", "but", "not", "this", "that", "these", "those",
    "it", "its", "as", "do", "does", "did", "has", "have", "had", "can", "could", "will",
    "would", "should", "may", "might", "what", "which", "who", "whom", "why", "how", "when",
    "where", "i", "me", "my", "we", "you", "your", "about", "into", "there", "their", "than",
    "then", "so", "if", "any", "some", "vs", "versus", "between", "compare", "difference",
];

const METHOD_KEYWORDS: &[&str] = &[
    "algorithm", "model", "network", "transformer", "attention", "embedding", "classifier",
    "regression", "clustering", "compiler", "database", "protocol", "framework", "library",
    "runtime", "garbage", "scheduler", "cache", "index", "encryption", "consensus",
];

const KNOWN_CONCEPTS: &[&str] = &[
    "machine learning", "deep learning", "neural network", "natural language",
    "computer vision", "reinforcement learning", "language model", "knowledge graph",
    "garbage collection", "memory safety", "type system", "distributed systems",
    "operating system", "climate change", "quantum computing", "public key",
];

/// Heuristic query analyzer
pub struct QueryAnalyzer {
    config: QueryAnalyzerConfig,
    synonyms: HashMap<&'static str, &'static [&'static str]>,
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new(QueryAnalyzerConfig::default())
    }
}

impl QueryAnalyzer {
    pub fn new(config: QueryAnalyzerConfig) -> Self {
        Self {
            config,
            synonyms: Self::default_synonyms(),
        }
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let normalized = normalize(query);
        let intent = self.detect_intent(&normalized);
        let pattern = match intent {
            QueryIntent::Comparison => ExecutionPattern::ForkJoin,
            QueryIntent::Research => ExecutionPattern::ScatterGather,
            _ => ExecutionPattern::Sequential,
        };

        let keywords = self.keywords(&normalized);
        let entities = self.extract_entities(&normalized);
        let expanded_terms = self.expand(&normalized);
        let comparison_subjects = if intent == QueryIntent::Comparison {
            comparison_subjects(&normalized)
        } else {
            Vec::new()
        };
        let sub_queries = build_sub_queries(query, &keywords, &entities, &expanded_terms);

        QueryAnalysis {
            normalized_query: normalized,
            intent,
            pattern,
            keywords,
            entities,
            expanded_terms,
            comparison_subjects,
            sub_queries,
        }
    }

    fn detect_intent(&self, query: &str) -> QueryIntent {
        let padded = format!(" {} ", query);

        if COMPARISON_MARKERS.iter().any(|m| padded.contains(m)) {
            return QueryIntent::Comparison;
        }
        if RESEARCH_MARKERS.iter().any(|m| padded.contains(m)) {
            return QueryIntent::Research;
        }
        if query.starts_with("how to")
            || query.starts_with("how do i")
            || query.contains("step by step")
            || query.contains("implement")
        {
            return QueryIntent::Procedural;
        }
        if query.starts_with("what is")
            || query.starts_with("what are")
            || query.starts_with("who is")
            || query.starts_with("when")
            || query.starts_with("define")
        {
            return QueryIntent::Factual;
        }
        if query.starts_with("why")
            || query.starts_with("explain")
            || query.starts_with("how does")
            || query.contains("understand")
        {
            return QueryIntent::Exploratory;
        }

        QueryIntent::General
    }

    fn keywords(&self, query: &str) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for word in query.split_whitespace() {
            if word.chars().count() > 2 && !is_stop_word(word) && !keywords.iter().any(|k| k == word) {
                keywords.push(word.to_string());
            }
        }
        keywords
    }

    fn extract_entities(&self, query: &str) -> Vec<Entity> {
        let words: Vec<&str> = query.split_whitespace().collect();
        let mut entities = Vec::new();
        let mut i = 0;

        while i < words.len() {
            let word = words[i];
            if is_stop_word(word) {
                i += 1;
                continue;
            }

            if i + 1 < words.len() {
                let bigram = format!("{} {}", word, words[i + 1]);
                if KNOWN_CONCEPTS.contains(&bigram.as_str()) {
                    entities.push(entity(bigram, EntityType::Concept, 0.85));
                    i += 2;
                    continue;
                }
            }

            if METHOD_KEYWORDS.contains(&word) {
                entities.push(entity(word, EntityType::Method, 0.7));
            } else if is_temporal(word) {
                entities.push(entity(word, EntityType::Temporal, 0.9));
            } else if word.chars().count() > 3 {
                entities.push(entity(word, EntityType::Term, 0.5));
            }

            i += 1;
        }

        entities
            .into_iter()
            .filter(|e| e.confidence >= self.config.min_entity_confidence)
            .collect()
    }

    fn expand(&self, query: &str) -> Vec<String> {
        let mut expansions: Vec<String> = Vec::new();
        for word in query.split_whitespace() {
            if let Some(synonyms) = self.synonyms.get(word) {
                for synonym in synonyms.iter() {
                    if !expansions.iter().any(|e| e == synonym) {
                        expansions.push(synonym.to_string());
                    }
                }
            }
        }
        expansions.truncate(self.config.max_expansions);
        expansions
    }

    fn default_synonyms() -> HashMap<&'static str, &'static [&'static str]> {
        let mut synonyms: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        synonyms.insert("ml", &["machine learning"]);
        synonyms.insert("ai", &["artificial intelligence"]);
        synonyms.insert("nlp", &["natural language processing"]);
        synonyms.insert("llm", &["large language model"]);
        synonyms.insert("gc", &["garbage collection"]);
        synonyms.insert("db", &["database"]);
        synonyms.insert("os", &["operating system"]);
        synonyms.insert("js", &["javascript"]);
        synonyms.insert("k8s", &["kubernetes"]);
        synonyms.insert("async", &["asynchronous programming"]);
        synonyms
    }
}

fn entity(text: impl Into<String>, entity_type: EntityType, confidence: f64) -> Entity {
    Entity {
        text: text.into(),
        entity_type,
        confidence,
    }
}

/// Same normalization as the cache keys, so analysis and caching agree
pub fn normalize(query: &str) -> String {
    keys::normalize_query(query)
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

fn is_temporal(word: &str) -> bool {
    if let Ok(year) = word.parse::<i32>() {
        return (1900..=2100).contains(&year);
    }
    matches!(word, "recent" | "latest" | "current" | "today" | "modern")
}

/// Content words of `text`: lowercased, stop words and short words removed
pub fn content_words(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|w| w.chars().count() > 2 && !is_stop_word(w))
        .map(str::to_string)
        .collect()
}

/// The things being compared in a comparison query
fn comparison_subjects(query: &str) -> Vec<String> {
    let body = query
        .trim_start_matches("compare ")
        .trim_start_matches("comparison of ");

    let parts: Vec<&str> = if let Some((_, rest)) = body.split_once("difference between ") {
        rest.split(" and ").collect()
    } else if let Some((_, rest)) = body.split_once("differences between ") {
        rest.split(" and ").collect()
    } else if body.contains(" vs ") {
        body.split(" vs ").collect()
    } else if body.contains(" versus ") {
        body.split(" versus ").collect()
    } else if body.contains(" and ") {
        body.split(" and ").collect()
    } else if body.contains(" with ") {
        body.split(" with ").collect()
    } else {
        body.split(" or ").collect()
    };

    let mut subjects: Vec<String> = Vec::new();
    for part in parts {
        let trimmed = cut_at_qualifier(part);
        let words: Vec<&str> = trimmed
            .split_whitespace()
            .skip_while(|w| is_stop_word(w))
            .collect();
        let subject = words.join(" ");
        if !subject.is_empty() && !subjects.contains(&subject) {
            subjects.push(subject);
        }
    }

    if subjects.len() >= 2 {
        subjects
    } else {
        Vec::new()
    }
}

/// Drop trailing qualifiers like "for web servers" from a subject
fn cut_at_qualifier(part: &str) -> &str {
    [" for ", " in ", " when ", " on ", " regarding "]
        .iter()
        .filter_map(|q| part.find(q))
        .min()
        .map(|idx| &part[..idx])
        .unwrap_or(part)
        .trim()
}

fn build_sub_queries(
    query: &str,
    keywords: &[String],
    entities: &[Entity],
    expansions: &[String],
) -> Vec<SubQuery> {
    let mut sub_queries = vec![SubQuery {
        kind: SubQueryKind::Semantic,
        query: query.trim().to_string(),
    }];

    if !keywords.is_empty() {
        let keyword_query = keywords.join(" ");
        if keyword_query != sub_queries[0].query.to_lowercase() {
            sub_queries.push(SubQuery {
                kind: SubQueryKind::Keyword,
                query: keyword_query,
            });
        }
    }

    let mut entity_terms: Vec<String> = entities
        .iter()
        .filter(|e| e.entity_type != EntityType::Term)
        .map(|e| e.text.clone())
        .collect();
    entity_terms.extend(expansions.iter().cloned());
    if !entity_terms.is_empty() {
        sub_queries.push(SubQuery {
            kind: SubQueryKind::Entity,
            query: entity_terms.join(" "),
        });
    }

    sub_queries
}
