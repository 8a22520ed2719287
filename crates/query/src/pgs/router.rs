//! Centroid-based partition routing.
//!
//! Without a query embedding (or for deliberately broad questions) routing
//! degrades to the first `max_sweep_partitions` in partition order;
//! otherwise partitions are ranked by query↔centroid cosine similarity.

use std::sync::OnceLock;

use regex::Regex;

use cerebra_config::PgsConfig;

use super::enrich::Partition;

fn broad_query_patterns() -> &'static [Regex; 5] {
    static RES: OnceLock<[Regex; 5]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?i)what.*(surpris|miss|gap)").expect("static pattern compiles"),
            Regex::new(r"(?i)don.*t.*know").expect("static pattern compiles"),
            Regex::new(r"(?i)everything").expect("static pattern compiles"),
            Regex::new(r"(?i)all.*partition").expect("static pattern compiles"),
            Regex::new(r"(?i)comprehensive.*overview").expect("static pattern compiles"),
        ]
    })
}

pub fn is_broad_query(query: &str) -> bool {
    broad_query_patterns().iter().any(|re| re.is_match(query))
}

/// Pick the partitions to sweep, in priority order.
pub fn route_partitions<'a>(
    partitions: &'a [Partition],
    query: &str,
    query_vec: Option<&[f32]>,
    config: &PgsConfig,
) -> Vec<&'a Partition> {
    let max = config.max_sweep_partitions;

    let Some(query_vec) = query_vec else {
        return partitions.iter().take(max).collect();
    };
    if is_broad_query(query) {
        return partitions.iter().take(max).collect();
    }

    let mut scored: Vec<(&Partition, f64)> = partitions
        .iter()
        .map(|partition| {
            let similarity = partition
                .centroid_embedding
                .as_deref()
                .map(|centroid| cosine(query_vec, centroid))
                .unwrap_or(0.0);
            (partition, similarity)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));

    let mut routed: Vec<&Partition> = scored
        .iter()
        .filter(|(_, similarity)| *similarity >= config.relevance_threshold)
        .map(|(partition, _)| *partition)
        .collect();

    // Padding only applies when a positive floor is configured.
    if config.min_sweep_partitions > 0 && routed.len() < config.min_sweep_partitions {
        for (partition, _) in &scored {
            if routed.len() >= config.min_sweep_partitions {
                break;
            }
            if !routed.iter().any(|p| p.id == partition.id) {
                routed.push(partition);
            }
        }
    }

    routed.truncate(max);
    routed
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let mag_a: f64 = a.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(id: &str, centroid: Option<Vec<f32>>) -> Partition {
        Partition {
            id: id.to_string(),
            node_ids: vec![],
            node_count: 0,
            summary: String::new(),
            keywords: vec![],
            centroid_embedding: centroid,
            adjacent_partitions: vec![],
        }
    }

    fn config() -> PgsConfig {
        PgsConfig::default()
    }

    #[test]
    fn broad_queries_detected() {
        assert!(is_broad_query("what is surprising here?"));
        assert!(is_broad_query("What do we miss?"));
        assert!(is_broad_query("things I don't know yet"));
        assert!(is_broad_query("give me everything"));
        assert!(is_broad_query("sweep all partitions"));
        assert!(is_broad_query("a comprehensive overview please"));
        assert!(!is_broad_query("how does the cache evict entries"));
    }

    #[test]
    fn no_embedding_routes_first_in_order() {
        let partitions: Vec<Partition> = (0..20)
            .map(|i| partition(&format!("p{i}"), Some(vec![1.0, 0.0])))
            .collect();
        let routed = route_partitions(&partitions, "specific question", None, &config());
        assert_eq!(routed.len(), 15);
        assert_eq!(routed[0].id, "p0");
    }

    #[test]
    fn similarity_routing_filters_by_threshold() {
        let partitions = vec![
            partition("near", Some(vec![1.0, 0.0])),
            partition("far", Some(vec![-1.0, 0.0])),
            partition("blank", None),
        ];
        let query_vec = [1.0f32, 0.0];
        let routed =
            route_partitions(&partitions, "specific question", Some(&query_vec), &config());
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "near");
    }

    #[test]
    fn padding_applies_only_with_positive_floor() {
        let partitions = vec![
            partition("near", Some(vec![1.0, 0.0])),
            partition("far", Some(vec![-1.0, 0.0])),
        ];
        let query_vec = [1.0f32, 0.0];

        let unpadded =
            route_partitions(&partitions, "specific", Some(&query_vec), &config());
        assert_eq!(unpadded.len(), 1);

        let mut padded_config = config();
        padded_config.min_sweep_partitions = 2;
        let padded =
            route_partitions(&partitions, "specific", Some(&query_vec), &padded_config);
        assert_eq!(padded.len(), 2);
    }

    #[test]
    fn broad_query_with_embedding_still_routes_in_order() {
        let partitions: Vec<Partition> = (0..4)
            .map(|i| partition(&format!("p{i}"), Some(vec![0.0, 1.0])))
            .collect();
        let query_vec = [1.0f32, 0.0];
        let routed = route_partitions(
            &partitions,
            "what is surprising about everything",
            Some(&query_vec),
            &config(),
        );
        assert_eq!(routed.len(), 4);
        assert_eq!(routed[0].id, "p0");
    }
}
