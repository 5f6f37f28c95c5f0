//! In-process product search
//!
//! Runs over candidates already narrowed by the SQL filter. Two tiers:
//! fuzzy matching per whitespace token (skim algorithm), then a plain
//! case-insensitive substring match of the whole query when fuzzy finds
//! nothing.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::config::SearchConfig;
use crate::models::Product;

/// How a result set was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Fuzzy,
    Substring,
    None,
}

pub struct ProductMatcher {
    matcher: SkimMatcherV2,
    min_score_per_char: i64,
}

impl ProductMatcher {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            matcher: SkimMatcherV2::default().ignore_case(),
            min_score_per_char: config.min_score_per_char.max(0),
        }
    }

    /// Filter `candidates` by `query`. With `by_relevance` the result is
    /// ordered by descending score, otherwise the candidate order is kept.
    /// Equal scores keep candidate order either way.
    pub fn search(
        &self,
        candidates: Vec<Product>,
        query: &str,
        by_relevance: bool,
    ) -> (Vec<Product>, MatchTier) {
        let query = query.trim();
        let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if tokens.is_empty() {
            return (candidates, MatchTier::None);
        }

        let mut scored: Vec<(i64, Product)> = Vec::new();
        let mut rest: Vec<Product> = Vec::new();
        for product in candidates {
            match self.score(&product, &tokens) {
                Some(score) => scored.push((score, product)),
                None => rest.push(product),
            }
        }

        if !scored.is_empty() {
            if by_relevance {
                scored.sort_by(|a, b| b.0.cmp(&a.0));
            }
            return (scored.into_iter().map(|(_, p)| p).collect(), MatchTier::Fuzzy);
        }

        let needle = query.to_lowercase();
        let substring: Vec<Product> = rest
            .into_iter()
            .filter(|p| searchable_fields(p).iter().any(|f| f.to_lowercase().contains(&needle)))
            .collect();
        if substring.is_empty() {
            (substring, MatchTier::None)
        } else {
            (substring, MatchTier::Substring)
        }
    }

    /// Sum of each token's best field score; `None` unless every token
    /// clears its threshold.
    fn score(&self, product: &Product, tokens: &[String]) -> Option<i64> {
        let fields = searchable_fields(product);
        let mut total = 0;
        for token in tokens {
            let threshold = self.min_score_per_char * token.chars().count() as i64;
            let best = fields
                .iter()
                .filter_map(|field| self.matcher.fuzzy_match(field, token))
                .max()?;
            if best < threshold {
                return None;
            }
            total += best;
        }
        Some(total)
    }
}

fn searchable_fields(product: &Product) -> Vec<&str> {
    let mut fields = vec![
        product.name.as_str(),
        product.brand.as_str(),
        product.model.as_str(),
        product.sku.as_str(),
        product.size.as_str(),
        product.description.as_str(),
    ];
    if let Some(season) = &product.season_type {
        fields.push(season);
    }
    fields.extend(product.tags.iter().map(String::as_str));
    fields.retain(|f| !f.is_empty());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductStatus;
    use chrono::Utc;
    use proptest::prelude::*;

    fn product(id: i64, name: &str, brand: &str, sku: &str) -> Product {
        Product {
            id,
            name: name.to_string(),
            slug: format!("p-{}", id),
            sku: sku.to_string(),
            brand: brand.to_string(),
            model: String::new(),
            size: "205/55R16".to_string(),
            width: Some(205),
            aspect_ratio: Some(55),
            rim_diameter: Some(16.0),
            load_index: None,
            speed_rating: None,
            season_type: None,
            price: 100.0,
            sale_price: None,
            stock_quantity: 5,
            status: ProductStatus::Active,
            description: String::new(),
            tags: Vec::new(),
            is_featured: false,
            rating_average: 0.0,
            review_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn catalog() -> Vec<Product> {
        vec![
            product(1, "Pilot Sport 4", "Michelin", "MICH-PS4"),
            product(2, "Blizzak WS90", "Bridgestone", "BRID-WS90"),
            product(3, "CrossClimate 2", "Michelin", "MICH-CC2"),
        ]
    }

    fn matcher(min_score_per_char: i64) -> ProductMatcher {
        ProductMatcher::new(&SearchConfig {
            min_score_per_char,
            ..SearchConfig::default()
        })
    }

    fn ids(products: &[Product]) -> Vec<i64> {
        products.iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_fuzzy_matches_brand() {
        let (found, tier) = matcher(10).search(catalog(), "michelin", false);
        assert_eq!(tier, MatchTier::Fuzzy);
        assert_eq!(ids(&found), vec![1, 3]);
    }

    #[test]
    fn test_fuzzy_tolerates_typo() {
        let (found, tier) = matcher(10).search(catalog(), "blizak", false);
        assert_eq!(tier, MatchTier::Fuzzy);
        assert_eq!(ids(&found), vec![2]);
    }

    #[test]
    fn test_every_token_must_match() {
        let (found, _) = matcher(10).search(catalog(), "michelin pilot", false);
        assert_eq!(ids(&found), vec![1]);
    }

    #[test]
    fn test_substring_fallback_when_fuzzy_rejects() {
        // No fuzzy score can reach this threshold
        let (found, tier) = matcher(10_000).search(catalog(), "Sport 4", false);
        assert_eq!(tier, MatchTier::Substring);
        assert_eq!(ids(&found), vec![1]);
    }

    #[test]
    fn test_no_match_is_empty() {
        let (found, tier) = matcher(10).search(catalog(), "qqqqxxxx", false);
        assert_eq!(tier, MatchTier::None);
        assert!(found.is_empty());
    }

    #[test]
    fn test_relevance_ordering_prefers_better_match() {
        let mut products = catalog();
        let mut scattered = product(4, "Weather Pro", "Generic", "GEN-WP");
        scattered.description = "cqqqrqqqoqqqsqqqsqqqcqqqlqqqiqqqmqqqaqqqtqqqe".to_string();
        products.insert(0, scattered);

        let (found, _) = matcher(1).search(products, "crossclimate", true);
        assert_eq!(ids(&found), vec![3, 4]);
    }

    proptest! {
        #[test]
        fn prop_results_are_subset_in_candidate_order(query in "[a-z0-9 ]{0,12}") {
            let candidates = catalog();
            let (found, _) = matcher(10).search(candidates.clone(), &query, false);
            let candidate_ids = ids(&candidates);
            let mut last = None;
            for id in ids(&found) {
                let pos = candidate_ids.iter().position(|c| *c == id);
                prop_assert!(pos.is_some());
                prop_assert!(last.map_or(true, |l| pos.unwrap() > l));
                last = pos;
            }
        }
    }
}
