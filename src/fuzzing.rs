//! Structural mutation of JSON response bodies. Mutation operates on the
//! decoded value tree, so fuzzed output is always syntactically valid JSON
//! and downstream parsers fail only on semantic grounds.

use serde_json::Value;

use crate::engine::ChaosEngine;
use crate::models::ChaosRules;

/// Per-leaf mutation probability applied when the rule does not set one.
pub const DEFAULT_MUTATION_RATE: f64 = 0.1;

impl ChaosEngine {
    /// Whether this particular response should be fuzzed.
    pub fn should_fuzz(&self, rules: &ChaosRules) -> bool {
        let Some(fuzzing) = &rules.response_fuzzing else {
            return false;
        };
        if !fuzzing.enabled || fuzzing.probability <= 0.0 {
            return false;
        }
        self.sample() < fuzzing.probability
    }

    /// Mutates a JSON body according to the rules. Returns the new bytes and
    /// whether at least one leaf actually changed. Empty or non-JSON input
    /// passes through untouched, as does input whose effective mutation rate
    /// is zero.
    pub fn fuzz_body(&self, body: &[u8], rules: &ChaosRules) -> (Vec<u8>, bool) {
        if body.is_empty() {
            return (body.to_vec(), false);
        }

        let Ok(mut value) = serde_json::from_slice::<Value>(body) else {
            // Not JSON; byte-level corruption would conflate transport
            // errors with schema errors, so leave it alone.
            return (body.to_vec(), false);
        };

        let rate = rules
            .response_fuzzing
            .as_ref()
            .and_then(|f| f.mutation_rate)
            .unwrap_or(DEFAULT_MUTATION_RATE);
        if rate <= 0.0 {
            return (body.to_vec(), false);
        }

        let mutated = self.mutate_value(&mut value, rate);
        if !mutated {
            return (body.to_vec(), false);
        }

        match serde_json::to_vec(&value) {
            Ok(new_body) => (new_body, true),
            Err(_) => (body.to_vec(), false),
        }
    }

    /// Walks the tree, mutating leaves with probability `rate`. Containers
    /// are never replaced, so the top-level shape is preserved.
    fn mutate_value(&self, value: &mut Value, rate: f64) -> bool {
        match value {
            Value::Object(map) => {
                let mut mutated = false;
                for (_, inner) in map.iter_mut() {
                    mutated |= self.mutate_value(inner, rate);
                }
                mutated
            }
            Value::Array(items) => {
                let mut mutated = false;
                for inner in items.iter_mut() {
                    mutated |= self.mutate_value(inner, rate);
                }
                mutated
            }
            leaf => {
                if self.sample() < rate {
                    let replacement = self.apply_mutation(leaf);
                    if replacement != *leaf {
                        *leaf = replacement;
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Picks one of four mutations uniformly: nullify, type swap, value
    /// corruption, or an edge-case value.
    fn apply_mutation(&self, value: &Value) -> Value {
        match self.sample_choice(4) {
            0 => Value::Null,
            1 => match value {
                Value::String(_) => Value::from(12345),
                Value::Number(_) => Value::from("should_be_number"),
                Value::Bool(_) => Value::from(0),
                Value::Null => Value::from("was_null"),
                _ => Value::from("swapped_type"),
            },
            2 => match value {
                Value::String(s) => Value::from(format!("{}_CHAOS", s)),
                Value::Number(n) => match n.as_f64() {
                    Some(f) => Value::from(f * 9999.0),
                    None => value.clone(),
                },
                Value::Bool(b) => Value::from(!b),
                _ => value.clone(),
            },
            _ => match value {
                Value::Number(_) => Value::from(-1),
                Value::String(_) => Value::from(""),
                _ => Value::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FuzzingConfig;

    fn fuzz_rules(probability: f64, mutation_rate: Option<f64>) -> ChaosRules {
        ChaosRules {
            response_fuzzing: Some(FuzzingConfig {
                enabled: true,
                probability,
                mutation_rate,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_should_fuzz_disabled() {
        let engine = ChaosEngine::with_seed(1);
        assert!(!engine.should_fuzz(&ChaosRules::default()));

        let mut rules = fuzz_rules(1.0, None);
        if let Some(f) = rules.response_fuzzing.as_mut() {
            f.enabled = false;
        }
        assert!(!engine.should_fuzz(&rules));
    }

    #[test]
    fn test_should_fuzz_probability_one() {
        let engine = ChaosEngine::with_seed(1);
        let rules = fuzz_rules(1.0, None);
        for _ in 0..1_000 {
            assert!(engine.should_fuzz(&rules));
        }
    }

    #[test]
    fn test_should_fuzz_burns_no_sample_when_closed() {
        let a = ChaosEngine::with_seed(3);
        let b = ChaosEngine::with_seed(3);
        let rules = fuzz_rules(0.0, None);
        for _ in 0..100 {
            assert!(!a.should_fuzz(&rules));
        }
        assert_eq!(a.sample().to_bits(), b.sample().to_bits());
    }

    #[test]
    fn test_empty_body_passthrough() {
        let engine = ChaosEngine::with_seed(1);
        let (body, mutated) = engine.fuzz_body(b"", &fuzz_rules(1.0, Some(1.0)));
        assert!(body.is_empty());
        assert!(!mutated);
    }

    #[test]
    fn test_non_json_passthrough() {
        let engine = ChaosEngine::with_seed(1);
        let input = b"<html>not json</html>";
        let (body, mutated) = engine.fuzz_body(input, &fuzz_rules(1.0, Some(1.0)));
        assert_eq!(body, input);
        assert!(!mutated);
    }

    #[test]
    fn test_zero_mutation_rate_passthrough() {
        let engine = ChaosEngine::with_seed(1);
        let input = br#"{"a":1,"b":"x"}"#;
        let (body, mutated) = engine.fuzz_body(input, &fuzz_rules(1.0, Some(0.0)));
        assert_eq!(body, input);
        assert!(!mutated);
    }

    #[test]
    fn test_full_mutation_changes_leaves_and_stays_valid() {
        let engine = ChaosEngine::with_seed(99);
        let input = br#"{"a":1,"b":"x","c":[true,null]}"#;
        let rules = fuzz_rules(1.0, Some(1.0));

        for _ in 0..100 {
            let (body, mutated) = engine.fuzz_body(input, &rules);
            let value: Value = serde_json::from_slice(&body).expect("fuzzed body must be JSON");
            // The top-level shape is preserved.
            let object = value.as_object().expect("root must stay an object");
            assert_eq!(object.len(), 3);
            assert!(object["c"].is_array());
            if mutated {
                assert_ne!(body.as_slice(), input.as_slice());
            }
        }
    }

    #[test]
    fn test_full_mutation_usually_mutates() {
        // With rate 1 every leaf draws a mutation; the only way a leaf
        // survives is the rare identity arm (e.g. corruption of null).
        let engine = ChaosEngine::with_seed(5);
        let input = br#"{"a":1,"b":"x"}"#;
        let mutated_count = (0..100)
            .filter(|_| engine.fuzz_body(input, &fuzz_rules(1.0, Some(1.0))).1)
            .count();
        assert!(mutated_count > 90, "only {} of 100 mutated", mutated_count);
    }

    #[test]
    fn test_default_rate_applies_when_unset() {
        let engine = ChaosEngine::with_seed(11);
        let input = br#"[1,2,3,4,5,6,7,8,9,10]"#;
        let rules = fuzz_rules(1.0, None);
        // With the 0.1 default and 1000 trials of 10 leaves each, some
        // mutations are statistically certain.
        let mutated_count = (0..1_000)
            .filter(|_| engine.fuzz_body(input, &rules).1)
            .count();
        assert!(mutated_count > 0);
        assert!(mutated_count < 1_000);
    }

    #[test]
    fn test_mutation_arms() {
        let engine = ChaosEngine::with_seed(17);
        // Exercise each arm directly against representative leaves.
        let string = Value::from("hello");
        let number = Value::from(7);
        let boolean = Value::from(true);

        for _ in 0..200 {
            for original in [&string, &number, &boolean] {
                let replacement = engine.apply_mutation(original);
                match original {
                    Value::String(s) => assert!(
                        replacement == Value::Null
                            || replacement == Value::from(12345)
                            || replacement == Value::from(format!("{}_CHAOS", s))
                            || replacement == Value::from(""),
                        "unexpected string mutation: {:?}",
                        replacement
                    ),
                    Value::Number(_) => assert!(
                        replacement == Value::Null
                            || replacement == Value::from("should_be_number")
                            || replacement == Value::from(7.0 * 9999.0)
                            || replacement == Value::from(-1),
                        "unexpected number mutation: {:?}",
                        replacement
                    ),
                    Value::Bool(b) => assert!(
                        replacement == Value::Null
                            || replacement == Value::from(0)
                            || replacement == Value::from(!b),
                        "unexpected bool mutation: {:?}",
                        replacement
                    ),
                    _ => unreachable!(),
                }
            }
        }
    }
}
