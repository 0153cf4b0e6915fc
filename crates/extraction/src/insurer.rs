//! Insurer profiles: per-document-type rules and canonical names
//!
//! The orchestrator never branches on a specific insurer. Each supported
//! document type is an `InsurerProfile` in the registry; adding an insurer
//! means registering another profile (built in, or loaded from config).

use std::sync::LazyLock;

const RELIANCE_RULES: &str = include_str!("../prompts/reliance.txt");
const SHRIRAM_RULES: &str = include_str!("../prompts/shriram.txt");

/// Registry holding only the built-in profiles.
pub static BUILTIN: LazyLock<InsurerRegistry> = LazyLock::new(InsurerRegistry::builtin);

/// Everything the pipeline knows about one document type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsurerProfile {
    /// Document-type label, matched case-insensitively (e.g. "reliance")
    pub id: String,
    pub display_name: String,
    /// Value forced into INSURANCE_COMPANY_NAME when the model gets it wrong
    pub canonical_name: String,
    /// Lower-case fragment an acceptable company name must contain
    pub name_fragment: String,
    /// Extraction rules inserted into the prompt
    pub rules: String,
}

impl InsurerProfile {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        canonical_name: impl Into<String>,
        name_fragment: impl Into<String>,
        rules: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into().trim().to_lowercase(),
            display_name: display_name.into(),
            canonical_name: canonical_name.into(),
            name_fragment: name_fragment.into().to_lowercase(),
            rules: rules.into(),
        }
    }

    pub fn reliance() -> Self {
        Self::new(
            "reliance",
            "Reliance General Insurance",
            "Reliance General Insurance",
            "reliance",
            RELIANCE_RULES,
        )
    }

    pub fn shriram() -> Self {
        Self::new(
            "shriram",
            "Shriram General Insurance",
            "SHRIRAM GENERAL INSURANCE COMPANY LIMITED",
            "shriram",
            SHRIRAM_RULES,
        )
    }

    /// Whether an extracted company name is acceptable for this insurer.
    pub fn matches_company(&self, company_name: &str) -> bool {
        company_name.to_lowercase().contains(&self.name_fragment)
    }
}

/// Ordered collection of profiles keyed by document-type label.
#[derive(Debug, Clone, Default)]
pub struct InsurerRegistry {
    profiles: Vec<InsurerProfile>,
}

impl InsurerRegistry {
    /// Registry with no profiles.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the Reliance and Shriram profiles.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(InsurerProfile::reliance());
        registry.register(InsurerProfile::shriram());
        registry
    }

    /// Add a profile, replacing any existing profile with the same id.
    pub fn register(&mut self, profile: InsurerProfile) {
        match self.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Look up a document-type label (case-insensitive, surrounding
    /// whitespace ignored).
    pub fn get(&self, document_type: &str) -> Option<&InsurerProfile> {
        let wanted = document_type.trim();
        self.profiles
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(wanted))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InsurerProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
