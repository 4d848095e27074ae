use serde::{Deserialize, Serialize};

/// Intent name the classifier reports when nothing matched.
pub const NONE_INTENT: &str = "None";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub value: String,
    pub score: f64,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, value: impl Into<String>, score: f64) -> Self {
        Self { entity_type: entity_type.into(), value: value.into(), score }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    pub score: f64,
    pub entities: Vec<Entity>,
}

impl IntentResult {
    pub fn new(intent: impl Into<String>, score: f64, entities: Vec<Entity>) -> Self {
        Self { intent: intent.into(), score, entities }
    }

    /// The result used whenever classification fails or produces nothing usable.
    pub fn none() -> Self {
        Self::new(NONE_INTENT, 0.0, Vec::new())
    }

    pub fn is_none_intent(&self) -> bool {
        self.intent == NONE_INTENT
    }

    pub fn entity(&self, entity_type: &str) -> Option<&Entity> {
        find_entity(&self.entities, entity_type)
    }
}

/// Returns the first entity whose declared type matches `entity_type` exactly.
///
/// Matching is case-sensitive and ignores confidence scores; callers that need
/// fallbacks between entity types chain lookups themselves.
pub fn find_entity<'a>(entities: &'a [Entity], entity_type: &str) -> Option<&'a Entity> {
    entities.iter().find(|entity| entity.entity_type == entity_type)
}

#[cfg(test)]
mod tests {
    use super::{find_entity, Entity, IntentResult, NONE_INTENT};

    fn entities() -> Vec<Entity> {
        vec![
            Entity::new("AirportCode", "LAX", 0.71),
            Entity::new("builtin.geography.city", "Seattle", 0.93),
            Entity::new("builtin.geography.city", "Portland", 0.99),
        ]
    }

    #[test]
    fn returns_first_entity_of_requested_type() {
        let entities = entities();
        let found = find_entity(&entities, "builtin.geography.city").expect("city entity");

        assert_eq!(found.value, "Seattle");
    }

    #[test]
    fn ignores_confidence_when_selecting() {
        let entities = entities();
        let found = find_entity(&entities, "builtin.geography.city").expect("city entity");

        assert!(found.score < entities[2].score);
    }

    #[test]
    fn absent_type_yields_none() {
        assert!(find_entity(&entities(), "Hotel").is_none());
        assert!(find_entity(&[], "Hotel").is_none());
    }

    #[test]
    fn type_match_is_exact() {
        let entities = entities();

        assert!(find_entity(&entities, "airportcode").is_none());
        assert!(find_entity(&entities, "builtin.geography").is_none());
    }

    #[test]
    fn lookup_is_deterministic_across_calls() {
        let entities = entities();
        let first = find_entity(&entities, "AirportCode").cloned();
        let second = find_entity(&entities, "AirportCode").cloned();

        assert_eq!(first, second);
    }

    #[test]
    fn none_result_is_flagged() {
        let result = IntentResult::none();

        assert_eq!(result.intent, NONE_INTENT);
        assert!(result.is_none_intent());
        assert!(result.entities.is_empty());
    }
}
