//! Prompt construction.
//!
//! The generative model binds images to the prompt by position: the K-th image sent is
//! `{imageK}` in the text. [`ImageSet`] owns that numbering (customer photos first, then
//! products) and every prompt, composed or overridden, is paired with `ImageSet::ordered`.

use crate::models::{FetchedImage, ImageRole, ScenarioDescriptor};

/// Fetched images renumbered into one placeholder sequence.
#[derive(Debug, Clone)]
pub struct ImageSet {
    images: Vec<FetchedImage>,
    customer_count: usize,
}

impl ImageSet {
    pub fn new(customers: Vec<FetchedImage>, products: Vec<FetchedImage>) -> Self {
        let customer_count = customers.len();
        let images = customers
            .into_iter()
            .map(|img| (ImageRole::Customer, img))
            .chain(products.into_iter().map(|img| (ImageRole::Product, img)))
            .enumerate()
            .map(|(i, (role, img))| FetchedImage { role, index: i + 1, ..img })
            .collect();
        Self { images, customer_count }
    }

    /// Images in placeholder order; element `i` is `{image<i+1>}`.
    pub fn ordered(&self) -> &[FetchedImage] {
        &self.images
    }

    pub fn customers(&self) -> &[FetchedImage] {
        &self.images[..self.customer_count]
    }

    pub fn products(&self) -> &[FetchedImage] {
        &self.images[self.customer_count..]
    }

    /// Keeps the first `limit.customers` photos and `limit.products` garments and
    /// renumbers them. The flag tells whether anything was dropped.
    pub fn limited(&self, limit: InputLimit) -> (ImageSet, bool) {
        let customers: Vec<FetchedImage> = self.customers().iter().take(limit.customers).cloned().collect();
        let products: Vec<FetchedImage> = self.products().iter().take(limit.products).cloned().collect();
        let truncated = customers.len() + products.len() < self.images.len();
        (ImageSet::new(customers, products), truncated)
    }
}

/// How many inputs of each role a provider accepts. Extra inputs are dropped, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLimit {
    pub customers: usize,
    pub products: usize,
}

/// Optional per-garment details, each list parallel to `product_image_urls`.
#[derive(Debug, Clone, Default)]
pub struct ProductLabels {
    pub names: Vec<String>,
    pub categories: Vec<String>,
    pub styles: Vec<String>,
}

impl ProductLabels {
    pub fn new(names: Option<&[String]>, categories: Option<&[String]>, styles: Option<&[String]>) -> Self {
        let owned = |v: Option<&[String]>| v.map(<[String]>::to_vec).unwrap_or_default();
        Self { names: owned(names), categories: owned(categories), styles: owned(styles) }
    }

    /// Label for the garment that sat at `position` in the request list.
    fn label(&self, position: usize) -> Option<String> {
        let pick = |v: &[String]| v.get(position).map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string);
        let parts: Vec<String> = [
            pick(self.names.as_slice()),
            pick(self.categories.as_slice()),
            pick(self.styles.as_slice()).map(|style| format!("{style} style")),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    fn has_any(&self, products: &[FetchedImage]) -> bool {
        products.iter().any(|img| self.label(img.position).is_some())
    }
}

/// Canned settings keyed by the names shops use for them.
const PRESETS: &[(&[&str], &str)] = &[
    (&["montagna", "mountain"], "Set the scene in a mountain environment with snow and trees, winter atmosphere, natural lighting."),
    (&["spiaggia", "beach"], "Set the scene on a beautiful beach with sand and ocean, summer atmosphere, bright sunlight."),
    (&["città", "citta", "city"], "Set the scene in an urban city setting with modern architecture, street style, urban lighting."),
    (&["festa", "party"], "Set the scene at a party or celebration, festive atmosphere, elegant setting, party lighting."),
    (&["lavoro", "office", "work"], "Set the scene in a professional office environment, business casual, office lighting."),
    (&["casual"], "Set the scene in a casual everyday setting, natural lighting, relaxed atmosphere."),
];

pub fn preset_clause(preset: &str) -> Option<&'static str> {
    let key = preset.trim().to_lowercase();
    PRESETS
        .iter()
        .find(|(names, _)| names.contains(&key.as_str()))
        .map(|(_, clause)| *clause)
}

/// Ordered list of prompt clauses, joined with single spaces.
#[derive(Debug, Default)]
struct PromptBuilder {
    clauses: Vec<String>,
}

impl PromptBuilder {
    fn push(&mut self, clause: impl Into<String>) -> &mut Self {
        self.clauses.push(clause.into());
        self
    }

    fn push_field(&mut self, label: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.clauses.push(format!("{label}: {v}."));
        }
        self
    }

    fn build(&self) -> String {
        self.clauses.join(" ")
    }
}

fn join_placeholders(images: &[FetchedImage]) -> String {
    let tokens: Vec<String> = images.iter().map(FetchedImage::placeholder).collect();
    match tokens.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    }
}

pub struct PromptComposer;

impl PromptComposer {
    /// Builds the instruction text for `images`. A non-blank `prompt_override` replaces
    /// the wording but the image order stays that of `images`.
    pub fn compose(
        images: &ImageSet,
        scenario: Option<&ScenarioDescriptor>,
        labels: &ProductLabels,
        prompt_override: Option<&str>,
    ) -> String {
        if let Some(text) = prompt_override.map(str::trim).filter(|t| !t.is_empty()) {
            return text.to_string();
        }

        let customers = images.customers();
        let products = images.products();
        let mut prompt = PromptBuilder::default();

        prompt.push(format!(
            "Create a photorealistic image of the person shown in {}. \
             The face, body shape and skin tone must match {} exactly; do not invent a different person.",
            join_placeholders(customers),
            if customers.len() == 1 { "that photo" } else { "those photos" },
        ));

        if labels.has_any(products) {
            let garments: Vec<String> = products
                .iter()
                .map(|img| match labels.label(img.position) {
                    Some(label) => format!("{} ({})", img.placeholder(), label),
                    None => img.placeholder(),
                })
                .collect();
            let lead = match products.len() {
                1 => "The person is wearing this garment".to_string(),
                n => format!("The person is wearing all {n} of these garments at the same time"),
            };
            prompt.push(format!(
                "{lead}: {}. \
                 Every garment must be fully visible and actually worn, with its colors, patterns and details preserved.",
                garments.join("; "),
            ));
        } else {
            prompt.push(format!(
                "The person is wearing the clothing shown in {}. \
                 Every item must be fully visible and actually worn, with its colors, patterns and details preserved.",
                join_placeholders(products),
            ));
        }

        match scenario {
            Some(s) => {
                if let Some(clause) = s.preset.as_deref().and_then(preset_clause) {
                    prompt.push(clause);
                }
                prompt
                    .push_field("Scene", s.description.as_deref())
                    .push_field("Pose", s.position.as_deref())
                    .push_field("Environment", s.environment.as_deref())
                    .push_field("Lighting", s.lighting.as_deref())
                    .push_field("Background", s.background.as_deref())
                    .push_field("Additional instructions", s.custom_text.as_deref());
            }
            None => {
                prompt.push("Show the person standing in a natural pose against a clean, neutral background.");
            }
        }

        prompt.push(
            "High quality professional fashion photography, proper lighting, realistic fabric and fit, \
             with every garment clearly visible.",
        );
        prompt.build()
    }
}
