//! Sentence segmentation.
//!
//! [`DelimiterSegmenter`] splits on a literal character with no boundary
//! heuristics: abbreviations, decimals, and ellipses all split, and a
//! trailing delimiter leaves an empty final fragment. Those fragments are
//! stored like any other sentence.

pub trait SentenceSegmenter: Send + Sync {
    fn segment(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct DelimiterSegmenter {
    delimiter: char,
}

impl DelimiterSegmenter {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }
}

impl Default for DelimiterSegmenter {
    fn default() -> Self {
        Self::new('.')
    }
}

impl SentenceSegmenter for DelimiterSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        text.split(self.delimiter).map(str::to_string).collect()
    }
}

/// Segment each page and concatenate the results in page order.
pub fn segment_pages(segmenter: &dyn SentenceSegmenter, pages: &[String]) -> Vec<String> {
    pages
        .iter()
        .flat_map(|page| segmenter.segment(page))
        .collect()
}
