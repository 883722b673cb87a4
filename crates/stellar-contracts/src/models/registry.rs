use indexmap::IndexMap;

use crate::settings::SpeedTier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub thinking_budget: Option<u32>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Model and thinking budget a speed tier resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    pub model: String,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }

    /// Resolves a speed tier to its chat model. A zero budget is dropped so
    /// the request carries no thinking config at all.
    pub fn tier_config(&self, tier: SpeedTier) -> TierConfig {
        let name = tier_model_name(tier);
        let budget = self
            .get(name)
            .and_then(|model| model.thinking_budget)
            .filter(|budget| *budget > 0);
        TierConfig {
            model: name.to_string(),
            thinking_budget: budget,
        }
    }
}

fn tier_model_name(tier: SpeedTier) -> &'static str {
    match tier {
        SpeedTier::DeepThinking => "gemini-3-pro-preview",
        SpeedTier::Normal | SpeedTier::Fast => "gemini-2.5-flash",
        SpeedTier::VeryFast | SpeedTier::ExtremelyFast => "gemini-flash-lite-latest",
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, provider: &str, capabilities: &[&str], thinking_budget: Option<u32>| {
            map.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    provider: provider.to_string(),
                    capabilities: capabilities
                        .iter()
                        .map(|item| (*item).to_string())
                        .collect(),
                    thinking_budget,
                },
            );
        };

    insert("gemini-3-pro-preview", "gemini", &["text"], Some(16000));
    insert("gemini-2.5-flash", "gemini", &["text"], Some(0));
    insert("gemini-flash-lite-latest", "gemini", &["text"], Some(0));
    insert("imagen-3.0-generate-001", "imagen", &["image"], None);
    insert("gemini-2.5-flash-image", "gemini", &["image"], None);
    insert("dryrun-text", "dryrun", &["text"], None);
    insert("dryrun-image", "dryrun", &["image"], None);

    map
}

#[cfg(test)]
mod tests {
    use crate::settings::SpeedTier;

    use super::ModelRegistry;

    #[test]
    fn deep_thinking_carries_budget_and_fast_tiers_do_not() {
        let registry = ModelRegistry::new(None);
        let deep = registry.tier_config(SpeedTier::DeepThinking);
        assert_eq!(deep.model, "gemini-3-pro-preview");
        assert_eq!(deep.thinking_budget, Some(16000));

        let normal = registry.tier_config(SpeedTier::Normal);
        assert_eq!(normal.model, "gemini-2.5-flash");
        assert_eq!(normal.thinking_budget, None);

        assert_eq!(
            registry.tier_config(SpeedTier::Fast).model,
            "gemini-2.5-flash"
        );
        assert_eq!(
            registry.tier_config(SpeedTier::VeryFast).model,
            "gemini-flash-lite-latest"
        );
        assert_eq!(
            registry.tier_config(SpeedTier::ExtremelyFast).model,
            "gemini-flash-lite-latest"
        );
    }

    #[test]
    fn capability_lookup_keeps_insertion_order() {
        let registry = ModelRegistry::new(None);
        let images: Vec<String> = registry
            .by_capability("image")
            .into_iter()
            .map(|model| model.name)
            .collect();
        assert_eq!(
            images,
            vec![
                "imagen-3.0-generate-001",
                "gemini-2.5-flash-image",
                "dryrun-image"
            ]
        );
        assert!(registry.ensure("gemini-2.5-flash", "image").is_none());
    }
}
