use std::fmt;

use serde::{Deserialize, Serialize};

use crate::facts::ImageFacts;
use crate::platforms::Platform;

/// Which entry point produced a request. Drives the prompt shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Image,
    Rewrite,
    Text,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Image => "image",
            Flavor::Rewrite => "rewrite",
            Flavor::Text => "text",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation request.
///
/// Requests are immutable once built: a retry derives a new request through
/// [`GenerationRequest::with_fix_hint`], which copies every other field,
/// including the tone fields (voice, style, mood), verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    flavor: Flavor,
    platform: Platform,
    voice: String,
    style: String,
    mood: String,
    theme: Option<String>,
    context: Option<String>,
    existing_caption: Option<String>,
    image_facts: Option<ImageFacts>,
    nsfw: bool,
    fix_hint: Option<String>,
}

impl GenerationRequest {
    pub fn new(
        flavor: Flavor,
        platform: Platform,
        voice: impl Into<String>,
        style: impl Into<String>,
        mood: impl Into<String>,
    ) -> Self {
        Self {
            flavor,
            platform,
            voice: voice.into(),
            style: style.into(),
            mood: mood.into(),
            theme: None,
            context: None,
            existing_caption: None,
            image_facts: None,
            nsfw: false,
            fix_hint: None,
        }
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = non_blank(theme.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = non_blank(context.into());
        self
    }

    pub fn with_existing_caption(mut self, caption: impl Into<String>) -> Self {
        self.existing_caption = non_blank(caption.into());
        self
    }

    pub fn with_image_facts(mut self, facts: ImageFacts) -> Self {
        self.image_facts = if facts.is_empty() { None } else { Some(facts) };
        self
    }

    pub fn with_nsfw(mut self, nsfw: bool) -> Self {
        self.nsfw = nsfw;
        self
    }

    /// Derive the retry request. Only the fix hint changes.
    pub fn with_fix_hint(&self, hint: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.fix_hint = non_blank(hint.into());
        next
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    pub fn mood(&self) -> &str {
        &self.mood
    }

    pub fn theme(&self) -> Option<&str> {
        self.theme.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn existing_caption(&self) -> Option<&str> {
        self.existing_caption.as_deref()
    }

    pub fn image_facts(&self) -> Option<&ImageFacts> {
        self.image_facts.as_ref()
    }

    pub fn nsfw(&self) -> bool {
        self.nsfw
    }

    pub fn fix_hint(&self) -> Option<&str> {
        self.fix_hint.as_deref()
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
