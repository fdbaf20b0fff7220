//! Temporal alignment over nearest-neighbor hits.
//!
//! Each neighbor of query second `i` proposes the offset
//! `round(db_timestamp - query_timestamp[i])`; a genuine match piles most
//! proposals onto one `(video, offset)` bucket, unrelated hits scatter.
//! The vote ratio divides by the query length so short and long clips are
//! judged on the same scale.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::store::MetadataStore;
use crate::types::AlignmentResult;

#[derive(Debug, Clone, Copy)]
pub struct AlignmentConfig {
    pub min_vote_count: u32,
    pub min_vote_ratio: f32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        let search = SearchConfig::default();
        Self {
            min_vote_count: search.min_vote_count,
            min_vote_ratio: search.min_vote_ratio,
        }
    }
}

pub struct AlignmentEngine {
    store: Arc<MetadataStore>,
    config: AlignmentConfig,
}

impl AlignmentEngine {
    pub fn new(store: Arc<MetadataStore>, config: AlignmentConfig) -> Self {
        Self { store, config }
    }

    /// Turn per-second neighbor ids plus query timestamps into a single
    /// (video, offset) answer, or a structured rejection.
    pub fn align(
        &self,
        neighbor_ids: &[Vec<i64>],
        query_timestamps: &[f32],
    ) -> Result<AlignmentResult> {
        if neighbor_ids.is_empty() || neighbor_ids.iter().all(|row| row.is_empty()) {
            return Ok(AlignmentResult::rejected("No nearest neighbors found"));
        }
        if query_timestamps.is_empty() {
            return Ok(AlignmentResult::rejected("Query had no timestamps"));
        }
        if neighbor_ids.len() != query_timestamps.len() {
            return Ok(AlignmentResult::rejected(
                "Neighbor/timestamp length mismatch",
            ));
        }

        let flat: Vec<i64> = neighbor_ids.iter().flatten().copied().collect();
        let rows = self.store.get_fingerprint_rows(&flat)?;
        if rows.is_empty() {
            return Ok(AlignmentResult::rejected("No fingerprint rows resolved"));
        }

        let id_to_row: HashMap<i64, (i64, f64)> = rows
            .iter()
            .map(|r| (r.id, (r.video_id, r.timestamp_seconds)))
            .collect();

        // Votes keyed by (video_id, offset); `order` remembers first-seen
        // order so ties break toward the earliest bucket.
        let mut votes: HashMap<(i64, i64), u32> = HashMap::new();
        let mut order: Vec<(i64, i64)> = Vec::new();

        for (row_neighbors, &q_time) in neighbor_ids.iter().zip(query_timestamps) {
            for fp_id in row_neighbors {
                let Some(&(video_id, db_time)) = id_to_row.get(fp_id) else {
                    continue;
                };
                let offset_seconds = (db_time - q_time as f64).round() as i64;
                let key = (video_id, offset_seconds);
                let count = votes.entry(key).or_insert_with(|| {
                    order.push(key);
                    0
                });
                *count += 1;
            }
        }

        if votes.is_empty() {
            return Ok(AlignmentResult::rejected("No alignment candidates"));
        }

        let mut best_key = order[0];
        let mut best_votes = votes[&best_key];
        for key in &order[1..] {
            let count = votes[key];
            if count > best_votes {
                best_votes = count;
                best_key = *key;
            }
        }

        let (best_video_id, best_offset) = best_key;
        let vote_ratio = best_votes as f32 / query_timestamps.len() as f32;
        debug!(
            video_id = best_video_id,
            offset = best_offset,
            votes = best_votes,
            ratio = vote_ratio,
            "alignment candidate"
        );

        if best_votes < self.config.min_vote_count {
            return Ok(AlignmentResult::rejected(format!(
                "Best candidate vote count {} is below min_vote_count {}",
                best_votes, self.config.min_vote_count
            )));
        }

        if vote_ratio < self.config.min_vote_ratio {
            return Ok(AlignmentResult::rejected(format!(
                "Best candidate vote ratio {:.3} is below min_vote_ratio {:.3}",
                vote_ratio, self.config.min_vote_ratio
            )));
        }

        Ok(AlignmentResult {
            found: true,
            video_id: Some(best_video_id),
            timestamp_seconds: Some(best_offset),
            score: Some(vote_ratio),
            reason: Some(format!(
                "Accepted with {best_votes} votes ({vote_ratio:.3} ratio)"
            )),
        })
    }
}
