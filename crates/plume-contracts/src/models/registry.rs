use indexmap::IndexMap;

pub const CAPABILITY_TEXT: &str = "text";
pub const CAPABILITY_VISION: &str = "vision";
pub const CAPABILITY_NSFW: &str = "nsfw";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub max_output_tokens: u64,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
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

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Models supporting `capability`, in registration order.
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
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], max_output_tokens: u64| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                max_output_tokens,
            },
        );
    };

    insert(
        "gpt-4o-mini",
        "openai",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        2048,
    );
    insert("gpt-5.2", "openai", &[CAPABILITY_TEXT], 4096);
    insert(
        "gemini-2.5-flash",
        "gemini",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        4096,
    );
    insert(
        "gemini-3-pro-preview",
        "gemini",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        4096,
    );
    insert(
        "grok-4-fast",
        "xai",
        &[CAPABILITY_TEXT, CAPABILITY_VISION, CAPABILITY_NSFW],
        2048,
    );
    insert(
        "dryrun-text-1",
        "dryrun",
        &[CAPABILITY_TEXT, CAPABILITY_VISION, CAPABILITY_NSFW],
        2048,
    );

    map
}
