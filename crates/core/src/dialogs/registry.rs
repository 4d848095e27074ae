use std::collections::HashMap;

use thiserror::Error;

use crate::dialogs::states::{InterruptHandler, Step};

#[derive(Clone, Debug)]
pub struct DialogDefinition {
    name: String,
    steps: Vec<Step>,
    trigger: Option<String>,
    on_interrupted: Option<InterruptHandler>,
}

impl DialogDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self { name: name.into(), steps, trigger: None, on_interrupted: None }
    }

    pub fn triggered_by(mut self, intent: impl Into<String>) -> Self {
        self.trigger = Some(intent.into());
        self
    }

    pub fn on_interrupted(mut self, handler: InterruptHandler) -> Self {
        self.on_interrupted = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> Option<&str> {
        self.trigger.as_deref()
    }

    pub fn step(&self, index: usize) -> Option<Step> {
        self.steps.get(index).copied()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn interrupt_handler(&self) -> Option<InterruptHandler> {
        self.on_interrupted
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("dialog `{0}` is registered more than once")]
    DuplicateDialog(String),
    #[error("intent `{intent}` triggers both `{first}` and `{second}`")]
    DuplicateTrigger { intent: String, first: String, second: String },
    #[error("dialog `{0}` has no steps")]
    EmptyDialog(String),
    #[error("fallback dialog `{0}` is not registered")]
    MissingFallback(String),
    #[error("no fallback dialog configured")]
    NoFallback,
}

/// Immutable dialog lookup table. Built once at startup and shared by
/// reference; nothing mutates it afterwards.
#[derive(Debug)]
pub struct DialogRegistry {
    dialogs: HashMap<String, DialogDefinition>,
    triggers: HashMap<String, String>,
    fallback: String,
}

impl DialogRegistry {
    pub fn builder() -> DialogRegistryBuilder {
        DialogRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&DialogDefinition> {
        self.dialogs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dialogs.contains_key(name)
    }

    pub fn find_by_trigger(&self, intent: &str) -> Option<&DialogDefinition> {
        self.triggers.get(intent).and_then(|name| self.dialogs.get(name))
    }

    /// Dialog that should handle `intent` from an empty stack.
    pub fn route(&self, intent: &str) -> &str {
        self.triggers.get(intent).map(String::as_str).unwrap_or(&self.fallback)
    }

    pub fn fallback_name(&self) -> &str {
        &self.fallback
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.dialogs.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }
}

#[derive(Default)]
pub struct DialogRegistryBuilder {
    dialogs: Vec<DialogDefinition>,
    fallback: Option<String>,
}

impl DialogRegistryBuilder {
    pub fn register(mut self, definition: DialogDefinition) -> Self {
        self.dialogs.push(definition);
        self
    }

    pub fn fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    pub fn build(self) -> Result<DialogRegistry, RegistryError> {
        let mut dialogs = HashMap::with_capacity(self.dialogs.len());
        let mut triggers: HashMap<String, String> = HashMap::new();

        for definition in self.dialogs {
            if definition.steps.is_empty() {
                return Err(RegistryError::EmptyDialog(definition.name));
            }
            if dialogs.contains_key(&definition.name) {
                return Err(RegistryError::DuplicateDialog(definition.name));
            }
            if let Some(intent) = &definition.trigger {
                if let Some(first) = triggers.get(intent) {
                    return Err(RegistryError::DuplicateTrigger {
                        intent: intent.clone(),
                        first: first.clone(),
                        second: definition.name.clone(),
                    });
                }
                triggers.insert(intent.clone(), definition.name.clone());
            }
            dialogs.insert(definition.name.clone(), definition);
        }

        let fallback = self.fallback.ok_or(RegistryError::NoFallback)?;
        if !dialogs.contains_key(&fallback) {
            return Err(RegistryError::MissingFallback(fallback));
        }

        Ok(DialogRegistry { dialogs, triggers, fallback })
    }
}

#[cfg(test)]
mod tests {
    use super::{DialogDefinition, DialogRegistry, RegistryError};
    use crate::dialogs::states::{StepContext, StepInput, StepOutcome};

    fn finish(_ctx: &mut StepContext<'_>, _input: StepInput) -> StepOutcome {
        StepOutcome::end()
    }

    #[test]
    fn routes_registered_trigger_and_falls_back_otherwise() {
        let registry = DialogRegistry::builder()
            .register(DialogDefinition::new("Help", vec![finish]).triggered_by("Help"))
            .register(DialogDefinition::new("None", vec![finish]).triggered_by("None"))
            .fallback("None")
            .build()
            .expect("valid registry");

        assert_eq!(registry.route("Help"), "Help");
        assert_eq!(registry.route("BookFlight"), "None");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["Help", "None"]);
    }

    #[test]
    fn duplicate_trigger_is_a_configuration_error() {
        let error = DialogRegistry::builder()
            .register(DialogDefinition::new("Help", vec![finish]).triggered_by("Help"))
            .register(DialogDefinition::new("Help2", vec![finish]).triggered_by("Help"))
            .register(DialogDefinition::new("None", vec![finish]))
            .fallback("None")
            .build()
            .expect_err("duplicate trigger must be rejected");

        assert_eq!(
            error,
            RegistryError::DuplicateTrigger {
                intent: "Help".to_owned(),
                first: "Help".to_owned(),
                second: "Help2".to_owned(),
            }
        );
    }

    #[test]
    fn duplicate_names_and_empty_dialogs_are_rejected() {
        let duplicate = DialogRegistry::builder()
            .register(DialogDefinition::new("None", vec![finish]))
            .register(DialogDefinition::new("None", vec![finish]))
            .fallback("None")
            .build();
        assert!(matches!(duplicate, Err(RegistryError::DuplicateDialog(name)) if name == "None"));

        let empty = DialogRegistry::builder()
            .register(DialogDefinition::new("None", Vec::new()))
            .fallback("None")
            .build();
        assert!(matches!(empty, Err(RegistryError::EmptyDialog(_))));
    }

    #[test]
    fn fallback_must_be_configured_and_registered() {
        let missing = DialogRegistry::builder()
            .register(DialogDefinition::new("Help", vec![finish]))
            .fallback("None")
            .build();
        assert!(matches!(missing, Err(RegistryError::MissingFallback(_))));

        let unset =
            DialogRegistry::builder().register(DialogDefinition::new("Help", vec![finish])).build();
        assert!(matches!(unset, Err(RegistryError::NoFallback)));
    }
}
