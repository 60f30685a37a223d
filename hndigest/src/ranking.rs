//! Scoring of enriched articles against learned tag weights.
//!
//! `score = 0.7 * Σ weight(tag) + 0.3 * log10(popularity + 1)`
//!
//! A tag with no learned weight counts as [`NEUTRAL_TAG_WEIGHT`] rather than zero, so topics
//! the reader has never reacted to still compete.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::EnrichedArticle;

pub const NEUTRAL_TAG_WEIGHT: f64 = 1.0;
pub const PREFERENCE_SHARE: f64 = 0.7;
pub const POPULARITY_SHARE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct ScoredArticle {
    pub article: EnrichedArticle,
    pub score: f64,
}

pub fn tag_score(article: &EnrichedArticle, weights: &HashMap<String, f64>) -> f64 {
    article
        .tags
        .iter()
        .map(|tag| weights.get(tag).copied().unwrap_or(NEUTRAL_TAG_WEIGHT))
        .sum()
}

pub fn popularity_score(popularity: u32) -> f64 {
    (f64::from(popularity) + 1.0).log10()
}

pub fn score(article: &EnrichedArticle, weights: &HashMap<String, f64>) -> f64 {
    PREFERENCE_SHARE * tag_score(article, weights)
        + POPULARITY_SHARE * popularity_score(article.item.popularity)
}

/// Highest score first; equal scores fall back to the smaller source id.
pub fn rank(articles: Vec<EnrichedArticle>, weights: &HashMap<String, f64>) -> Vec<ScoredArticle> {
    let mut scored: Vec<ScoredArticle> = articles
        .into_iter()
        .map(|article| {
            let score = score(&article, weights);
            ScoredArticle { article, score }
        })
        .collect();
    scored.sort_by(compare);
    scored
}

fn compare(a: &ScoredArticle, b: &ScoredArticle) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.article.id().cmp(&b.article.id()))
}
