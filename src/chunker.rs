//! Chunker (component F): splits OCR text into overlapping windows, with
//! page-aware and atomic-region-aware variants (§4.3).

use crate::model::{EntityMention, PageOffset};

pub const DEFAULT_CHUNK_SIZE: i64 = 2000;
pub const DEFAULT_OVERLAP_RATIO: f64 = 0.10;

/// A Table/Code/Figure/TableGroup span the chunker must never split.
#[derive(Debug, Clone, Copy)]
pub struct AtomicRegion {
    pub start: i64,
    pub end: i64,
}

/// One proposed chunk boundary before it is materialized into a [`crate::model::Chunk`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: i64,
    pub end: i64,
    pub is_atomic: bool,
}

/// Fixed windowing over `[0, length)`: `O = round(chunk_size * overlap_ratio)`,
/// `K = chunk_size - O`; a trailing remainder of length ≤ O is merged into the
/// previous chunk rather than emitted on its own (§4.3).
pub fn fixed_spans(length: i64, chunk_size: i64, overlap_ratio: f64) -> Vec<ChunkSpan> {
    if length <= 0 || chunk_size <= 0 {
        return Vec::new();
    }
    let overlap = (chunk_size as f64 * overlap_ratio).round() as i64;
    let step = (chunk_size - overlap).max(1);

    let mut spans: Vec<ChunkSpan> = Vec::new();
    let mut start = 0i64;
    loop {
        if start >= length {
            break;
        }
        let remaining = length - start;
        if remaining <= overlap && !spans.is_empty() {
            spans.last_mut().unwrap().end = length;
            break;
        }
        let end = (start + chunk_size).min(length);
        spans.push(ChunkSpan { start, end, is_atomic: false });
        if end >= length {
            break;
        }
        start += step;
    }
    spans
}

/// Runs [`fixed_spans`] independently within each page's `[char_start, char_end)`
/// range so a chunk never crosses a page boundary; returns `(span, page_number)`.
pub fn page_aware_spans(
    page_offsets: &[PageOffset],
    chunk_size: i64,
    overlap_ratio: f64,
) -> Vec<(ChunkSpan, i64)> {
    let mut out = Vec::new();
    for offset in page_offsets {
        let page_len = offset.char_end - offset.char_start;
        for span in fixed_spans(page_len, chunk_size, overlap_ratio) {
            out.push((
                ChunkSpan {
                    start: span.start + offset.char_start,
                    end: span.end + offset.char_start,
                    is_atomic: false,
                },
                offset.page,
            ));
        }
    }
    out
}

/// Fixed windowing extended so a cut never falls inside an atomic region: when a
/// computed boundary lands strictly inside `[region.start, region.end)`, the chunk
/// is extended to `region.end`. Regions larger than `chunk_size` become a single
/// oversize chunk marked `is_atomic` (§4.3).
pub fn atomic_aware_spans(
    length: i64,
    regions: &[AtomicRegion],
    chunk_size: i64,
    overlap_ratio: f64,
) -> Vec<ChunkSpan> {
    if length <= 0 || chunk_size <= 0 {
        return Vec::new();
    }
    let overlap = (chunk_size as f64 * overlap_ratio).round() as i64;
    let step = (chunk_size - overlap).max(1);

    let mut regions: Vec<AtomicRegion> = regions.to_vec();
    regions.sort_by_key(|r| r.start);

    let mut spans = Vec::new();
    let mut start = 0i64;
    loop {
        if start >= length {
            break;
        }

        if let Some(region) = regions.iter().find(|r| r.start <= start && start < r.end) {
            if region.end - region.start > chunk_size {
                spans.push(ChunkSpan {
                    start: start.max(region.start),
                    end: region.end.min(length),
                    is_atomic: true,
                });
                start = region.end;
                continue;
            }
        }

        let mut end = (start + chunk_size).min(length);
        if let Some(region) = regions.iter().find(|r| r.start < end && end < r.end) {
            end = region.end.min(length);
        }

        let remaining = length - start;
        if remaining <= overlap && !spans.is_empty() {
            spans.last_mut().unwrap().end = length;
            break;
        }

        spans.push(ChunkSpan { start, end, is_atomic: false });
        if end >= length {
            break;
        }
        start = (start + step).max(end.min(start + step));
        if start <= spans.last().unwrap().start {
            start = spans.last().unwrap().end;
        }
    }
    spans
}

/// Entity mentions whose `[character_start, character_end)` crosses a chunk
/// boundary — for monitoring only, not correctness enforcement (§4.3).
pub fn boundary_crossings(chunks: &[crate::model::Chunk], mentions: &[EntityMention]) -> Vec<String> {
    let mut crossing = Vec::new();
    for mention in mentions {
        let containing = chunks
            .iter()
            .find(|c| c.character_start <= mention.character_start && mention.character_start < c.character_end);
        if let Some(chunk) = containing {
            if mention.character_end > chunk.character_end {
                crossing.push(mention.id.clone());
            }
        }
    }
    crossing
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S1: text length 4000, chunk_size 2000, overlap 10% ⇒ exactly 3
    /// chunks at [0,2000), [1800,3800), [3600,4000), overlaps 0/200/200/0.
    #[test]
    fn s1_fixed_chunking_at_boundary() {
        let spans = fixed_spans(4000, 2000, 0.10);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0], ChunkSpan { start: 0, end: 2000, is_atomic: false });
        assert_eq!(spans[1], ChunkSpan { start: 1800, end: 3800, is_atomic: false });
        assert_eq!(spans[2], ChunkSpan { start: 3600, end: 4000, is_atomic: false });

        let overlaps: Vec<i64> = spans.windows(2).map(|w| w[0].end - w[1].start).collect();
        assert_eq!(overlaps, vec![200, 200]);
    }

    #[test]
    fn short_text_produces_single_chunk() {
        let spans = fixed_spans(500, 2000, 0.10);
        assert_eq!(spans, vec![ChunkSpan { start: 0, end: 500, is_atomic: false }]);
    }

    #[test]
    fn trailing_remainder_merges_into_previous_chunk() {
        // length 2100, size 2000, overlap 10% (O=200, step=1800): first chunk
        // [0,2000), then start=1800 and the remaining 300 chars is > O, so the
        // tail is emitted as its own [1800,2100) chunk rather than merged — a
        // merge only happens when the remainder is <= O.
        let spans = fixed_spans(2100, 2000, 0.10);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].end, 2100);
    }

    #[test]
    fn trailing_remainder_at_or_under_overlap_merges_into_previous_chunk() {
        // length 2000 + 150, overlap 10% of 2000 is O=200: after [0,2000), the
        // remaining 150 <= O, so it is absorbed into the previous chunk instead
        // of being emitted on its own.
        let spans = fixed_spans(2150, 2000, 0.10);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end, 2150);
    }

    #[test]
    fn page_aware_chunks_never_cross_page_boundaries() {
        let pages = vec![
            PageOffset { page: 1, char_start: 0, char_end: 2500 },
            PageOffset { page: 2, char_start: 2500, char_end: 4500 },
        ];
        let spans = page_aware_spans(&pages, 2000, 0.10);
        for (span, _) in &spans {
            assert!(span.end <= 2500 || span.start >= 2500);
        }
    }

    #[test]
    fn atomic_region_extends_chunk_past_cut_point() {
        // A table spans [1900, 2300); a fixed cut at 2000 would split it, so the
        // chunk must extend to 2300.
        let regions = vec![AtomicRegion { start: 1900, end: 2300 }];
        let spans = atomic_aware_spans(4000, &regions, 2000, 0.10);
        assert_eq!(spans[0].end, 2300);
    }

    #[test]
    fn oversize_region_becomes_single_atomic_chunk() {
        let regions = vec![AtomicRegion { start: 0, end: 5000 }];
        let spans = atomic_aware_spans(5000, &regions, 2000, 0.10);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_atomic);
        assert_eq!(spans[0].end, 5000);
    }

    #[test]
    fn boundary_report_flags_crossing_mentions() {
        use crate::model::{Chunk, EmbeddingStatus, PageLocation};
        let now = chrono::Utc::now();
        let chunk_a = Chunk {
            id: "c1".into(),
            document_id: "d1".into(),
            ocr_result_id: "o1".into(),
            chunk_index: 0,
            character_start: 0,
            character_end: 100,
            text: String::new(),
            text_hash: String::new(),
            page_location: PageLocation::Single(1),
            overlap_with_previous: 0,
            overlap_with_next: 0,
            is_atomic: false,
            embedding_status: EmbeddingStatus::Pending,
            provenance_id: "p1".into(),
            created_at: now,
        };
        let mention = EntityMention {
            id: "m1".into(),
            entity_id: "e1".into(),
            chunk_id: "c1".into(),
            page_number: 1,
            character_start: 95,
            character_end: 110,
            context_snippet: String::new(),
        };
        let crossing = boundary_crossings(std::slice::from_ref(&chunk_a), &[mention]);
        assert_eq!(crossing, vec!["m1".to_string()]);
    }
}
