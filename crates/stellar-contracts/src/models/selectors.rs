use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

/// Primary image model and the one tried when it fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRoute {
    pub primary: ModelSpec,
    pub fallback: ModelSpec,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }

    /// Image route for live providers: Imagen first, then Gemini image output.
    /// With `dryrun` both legs use the offline provider.
    pub fn image_route(&self, dryrun: bool) -> Result<ImageRoute, String> {
        let (primary, fallback) = if dryrun {
            ("dryrun-image", "dryrun-image")
        } else {
            ("imagen-3.0-generate-001", "gemini-2.5-flash-image")
        };
        let primary = self.select(Some(primary), "image")?.model;
        let fallback = self.select(Some(fallback), "image")?.model;
        Ok(ImageRoute { primary, fallback })
    }
}
