//! Pattern generator registry.
//!
//! Drawing algorithms themselves live outside this crate; they plug in here by
//! implementing [`PatternGenerator`] and registering under a name. The demo
//! picks generators uniformly at random, randomizes their parameters from the
//! declared schema, and rejection-samples until an estimate fits the
//! configured draw-time bounds.

use crate::chains::Drawing;
use crate::error::Result;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One randomizable parameter of a generator
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    /// Lower bound used by randomization
    pub min: f64,
    /// Upper bound used by randomization
    pub max: f64,
    /// Human-readable description shown in editors
    pub doc: &'static str,
}

/// A concrete parameter assignment handed to `generate`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, f64>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

/// A drawing algorithm plugged into the table
pub trait PatternGenerator: Send + Sync {
    /// Produce a drawing for the given parameters
    fn generate(&self, params: &Params) -> Result<Drawing>;

    /// Parameters this generator accepts, with randomization bounds
    fn schema(&self) -> &[ParamSpec];

    /// Documentation text attached to the generator
    fn doc(&self) -> &str;
}

/// Name-keyed registry of pattern generators
#[derive(Default, Clone)]
pub struct PatternRegistry {
    generators: BTreeMap<String, Arc<dyn PatternGenerator>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator under a name, replacing any previous entry
    pub fn register(&mut self, name: &str, generator: Arc<dyn PatternGenerator>) {
        self.generators.insert(name.to_string(), generator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PatternGenerator>> {
        self.generators.get(name).cloned()
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.generators.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Pick one generator uniformly at random
    pub fn pick_random<R: Rng>(&self, rng: &mut R) -> Option<(&str, Arc<dyn PatternGenerator>)> {
        if self.generators.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.generators.len());
        self.generators
            .iter()
            .nth(index)
            .map(|(name, generator)| (name.as_str(), generator.clone()))
    }

    /// Draw a uniform random value for every parameter in the schema
    pub fn randomize<R: Rng>(schema: &[ParamSpec], rng: &mut R) -> Params {
        let mut params = Params::new();
        for spec in schema {
            let value = if spec.max > spec.min {
                rng.gen_range(spec.min..=spec.max)
            } else {
                spec.min
            };
            params.set(spec.name, value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Line;

    impl PatternGenerator for Line {
        fn generate(&self, params: &Params) -> Result<Drawing> {
            let length = params
                .get("length")
                .ok_or_else(|| Error::Generation("missing length".to_string()))?;
            Ok(vec![vec![(0.0, 0.0), (length, 0.0)]])
        }

        fn schema(&self) -> &[ParamSpec] {
            &[ParamSpec {
                name: "length",
                min: 1.0,
                max: 10.0,
                doc: "line length in table units",
            }]
        }

        fn doc(&self) -> &str {
            "A straight line"
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = PatternRegistry::new();
        assert!(registry.is_empty());
        registry.register("line", Arc::new(Line));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["line"]);
        assert!(registry.get("line").is_some());
        assert!(registry.get("spiral").is_none());
    }

    #[test]
    fn test_randomize_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let params = PatternRegistry::randomize(Line.schema(), &mut rng);
            let length = params.get("length").unwrap();
            assert!((1.0..=10.0).contains(&length));
        }
    }

    #[test]
    fn test_pick_random_covers_entries() {
        let mut registry = PatternRegistry::new();
        registry.register("a", Arc::new(Line));
        registry.register("b", Arc::new(Line));
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..64 {
            let (name, _) = registry.pick_random(&mut rng).unwrap();
            seen.insert(name.to_string());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_pick_random_empty() {
        let registry = PatternRegistry::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(registry.pick_random(&mut rng).is_none());
    }

    #[test]
    fn test_generate_uses_params() {
        let mut params = Params::new();
        params.set("length", 4.0);
        let drawing = Line.generate(&params).unwrap();
        assert_eq!(drawing[0][1], (4.0, 0.0));
    }
}
