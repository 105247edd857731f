use crate::data::Table;
use crate::error::ExecError;
use crate::runtime::{execute, ExecOutput};
use crate::spec::ChartSpec;
use std::collections::HashMap;
use tracing::debug;

/// Caller-chosen identity for a table, e.g. a dataset id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId(pub String);

impl From<&str> for TableId {
    fn from(id: &str) -> Self {
        TableId(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    table: TableId,
    fingerprint: String,
}

#[derive(Debug, Clone)]
struct CachedResult {
    output: ExecOutput,
    /// Insertion order, for oldest-first eviction
    seq: u64,
}

/// Execution results keyed by table and normalized spec. The cache never
/// notices table changes on its own: callers invalidate explicitly.
#[derive(Debug)]
pub struct ResultCache {
    cache: HashMap<CacheKey, CachedResult>,
    max_size: usize,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

/// Canonical JSON of the parts of a spec that affect execution
pub fn spec_fingerprint(spec: &ChartSpec) -> String {
    let mut normalized = spec.clone();
    normalized.style = None;
    normalized.to_json().to_string()
}

impl ResultCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::new(),
            max_size: max_size.max(1),
            next_seq: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, table_id: &TableId, spec: &ChartSpec) -> Option<ExecOutput> {
        let key = CacheKey {
            table: table_id.clone(),
            fingerprint: spec_fingerprint(spec),
        };
        match self.cache.get(&key) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.output.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, table_id: &TableId, spec: &ChartSpec, output: ExecOutput) {
        let key = CacheKey {
            table: table_id.clone(),
            fingerprint: spec_fingerprint(spec),
        };
        while !self.cache.contains_key(&key) && self.cache.len() >= self.max_size {
            self.evict_oldest();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.cache.insert(key, CachedResult { output, seq });
    }

    /// Serve from cache or execute and remember. Failures are not cached.
    pub fn get_or_execute(
        &mut self,
        table_id: &TableId,
        table: &Table,
        spec: &ChartSpec,
    ) -> Result<ExecOutput, ExecError> {
        if let Some(hit) = self.get(table_id, spec) {
            debug!(table = %table_id.0, "Result cache hit");
            return Ok(hit);
        }
        let output = execute(table, spec)?;
        self.insert(table_id, spec, output.clone());
        Ok(output)
    }

    /// Drop every entry computed from `table_id`
    pub fn invalidate_table(&mut self, table_id: &TableId) {
        let before = self.cache.len();
        self.cache.retain(|key, _| &key.table != table_id);
        debug!(table = %table_id.0, removed = before - self.cache.len(), "Invalidated cached results");
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .cache
            .iter()
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.cache.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::spec::{Aggregation, ChartStyle, ChartType};

    fn table() -> Table {
        Table::new(
            vec!["category".to_string(), "price".to_string()],
            vec![
                vec![Value::Str("A".to_string()), Value::Int(10)],
                vec![Value::Str("B".to_string()), Value::Int(5)],
            ],
        )
    }

    fn spec(agg: Aggregation) -> ChartSpec {
        ChartSpec::new(ChartType::Bar, "category", "price", agg)
    }

    #[test]
    fn test_hit_after_miss() {
        let mut cache = ResultCache::new(8);
        let id = TableId::from("sales");
        let first = cache.get_or_execute(&id, &table(), &spec(Aggregation::Sum)).unwrap();
        let second = cache.get_or_execute(&id, &table(), &spec(Aggregation::Sum)).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_style_does_not_change_fingerprint() {
        let plain = spec(Aggregation::Sum);
        let mut styled = plain.clone();
        styled.style = Some(ChartStyle {
            title: Some("Revenue".to_string()),
            ..ChartStyle::default()
        });
        assert_eq!(spec_fingerprint(&plain), spec_fingerprint(&styled));
        assert_ne!(spec_fingerprint(&plain), spec_fingerprint(&spec(Aggregation::Mean)));
    }

    #[test]
    fn test_invalidate_table() {
        let mut cache = ResultCache::new(8);
        let sales = TableId::from("sales");
        let other = TableId::from("other");
        cache.get_or_execute(&sales, &table(), &spec(Aggregation::Sum)).unwrap();
        cache.get_or_execute(&other, &table(), &spec(Aggregation::Sum)).unwrap();
        cache.invalidate_table(&sales);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&sales, &spec(Aggregation::Sum)).is_none());
        assert!(cache.get(&other, &spec(Aggregation::Sum)).is_some());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut cache = ResultCache::new(2);
        let id = TableId::from("sales");
        for agg in [Aggregation::Sum, Aggregation::Mean, Aggregation::Max] {
            cache.get_or_execute(&id, &table(), &spec(agg)).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&id, &spec(Aggregation::Sum)).is_none());
        assert!(cache.get(&id, &spec(Aggregation::Max)).is_some());
    }

    #[test]
    fn test_failures_not_cached() {
        let mut cache = ResultCache::new(8);
        let id = TableId::from("sales");
        let mut bad = spec(Aggregation::Sum);
        bad.y = "missing".to_string();
        assert!(cache.get_or_execute(&id, &table(), &bad).is_err());
        assert!(cache.is_empty());
    }
}
