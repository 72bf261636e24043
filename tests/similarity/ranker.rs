use std::sync::Mutex;

use docquery::{SimilarityError, SimilaritySearch, Value};

/// Scores every known id by a fixed table and records the candidate sets it
/// was asked to rank.
pub struct TableRanker {
    scores: Vec<(String, f64)>,
    pub calls: Mutex<Vec<Option<Vec<String>>>>,
}

impl TableRanker {
    pub fn new(scores: Vec<(String, f64)>) -> Self {
        Self {
            scores,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Ids `0..n`, each scoring a tenth of itself.
    pub fn linear(n: i64) -> Self {
        Self::new((0..n).map(|i| (i.to_string(), i as f64 / 10.0)).collect())
    }
}

impl SimilaritySearch for TableRanker {
    fn rank(
        &self,
        _query: &Value,
        candidate_ids: Option<&[String]>,
        _index: &str,
        top_n: usize,
    ) -> Result<(Vec<String>, Vec<f64>), SimilarityError> {
        self.calls
            .lock()
            .map_err(|_| SimilarityError::new("poisoned"))?
            .push(candidate_ids.map(<[String]>::to_vec));

        let mut ranked: Vec<(String, f64)> = self
            .scores
            .iter()
            .filter(|(id, _)| candidate_ids.map_or(true, |c| c.contains(id)))
            .cloned()
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top_n);
        Ok(ranked.into_iter().unzip())
    }
}

/// Returns more ids than scores.
pub struct MisalignedRanker;

impl SimilaritySearch for MisalignedRanker {
    fn rank(
        &self,
        _query: &Value,
        _candidate_ids: Option<&[String]>,
        _index: &str,
        _top_n: usize,
    ) -> Result<(Vec<String>, Vec<f64>), SimilarityError> {
        Ok((vec!["1".into(), "2".into()], vec![0.9]))
    }
}
