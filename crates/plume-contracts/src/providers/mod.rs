use thiserror::Error;

pub trait NamedProvider {
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider '{name}' (registered: {registered})")]
pub struct UnknownProvider {
    pub name: String,
    pub registered: String,
}

/// Providers in registration order, looked up by name.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    /// Adds a provider, replacing any earlier one with the same name.
    pub fn register(&mut self, provider: T) {
        self.providers
            .retain(|existing| existing.name() != provider.name());
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    pub fn require(&self, name: &str) -> Result<&T, UnknownProvider> {
        self.get(name).ok_or_else(|| UnknownProvider {
            name: name.to_string(),
            registered: self.list().join(", "),
        })
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }
}
