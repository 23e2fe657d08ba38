//! Generation request types and payload assembly
//!
//! [`RequestBuilder::build`] is pure: it validates field combinations and
//! turns a [`GenerationRequest`] plus asset handles into a [`Payload`] whose
//! serialized bytes depend only on its inputs. Field order is fixed by the
//! wire structs below, so repeated submissions diff cleanly in the dev view.

use crate::asset::AssetHandle;
use crate::config::LimitsConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use vista_core::{Result, VistaError};

/// Style image strength accepted by the service
pub const STYLE_STRENGTH_MAX: u8 = 100;
/// Strength used when a style image is given without one
pub const DEFAULT_STYLE_STRENGTH: u8 = 70;

/// Image generation model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageModel {
    #[default]
    Image3Fast,
    Image4Standard,
    /// Experimental: one image per request
    Image4Ultra,
}

impl ImageModel {
    pub const ALL: [ImageModel; 3] = [
        ImageModel::Image3Fast,
        ImageModel::Image4Standard,
        ImageModel::Image4Ultra,
    ];

    /// Identifier sent to the service
    pub fn id(&self) -> &'static str {
        match self {
            ImageModel::Image3Fast => "image3_fast",
            ImageModel::Image4Standard => "image4_standard",
            ImageModel::Image4Ultra => "image4_ultra",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ImageModel::Image3Fast => "Firefly Image 3 Fast",
            ImageModel::Image4Standard => "Firefly Image 4",
            ImageModel::Image4Ultra => "Firefly Image 4 Ultra",
        }
    }

    pub fn is_experimental(&self) -> bool {
        matches!(self, ImageModel::Image4Ultra)
    }

    /// Accepts the id or the display name, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.id().eq_ignore_ascii_case(s) || m.display_name().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ImageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Style category hint for the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Photo,
    Art,
}

impl ContentClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "photo" => Some(ContentClass::Photo),
            "art" => Some(ContentClass::Art),
            _ => None,
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentClass::Photo => write!(f, "photo"),
            ContentClass::Art => write!(f, "art"),
        }
    }
}

/// Output size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Sizes offered by the service, with their UI labels
pub const RESOLUTION_PRESETS: [(&str, Resolution); 8] = [
    ("2048 × 2048 | 1:1", Resolution::new(2048, 2048)),
    ("2304 × 1792 | 4:3", Resolution::new(2304, 1792)),
    ("1792 × 2304 | 3:4", Resolution::new(1792, 2304)),
    ("2688 × 1536 | 16:9", Resolution::new(2688, 1536)),
    ("1344 × 768 | 7:4", Resolution::new(1344, 768)),
    ("1152 × 896 | 9:7", Resolution::new(1152, 896)),
    ("896 × 1152 | 7:9", Resolution::new(896, 1152)),
    ("1024 × 1024 | 1:1", Resolution::new(1024, 1024)),
];

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a preset label or an explicit `WxH` / `W×H`
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = squeeze_spaces(s);
        if let Some((_, res)) = RESOLUTION_PRESETS
            .iter()
            .find(|(label, _)| squeeze_spaces(label) == normalized)
        {
            return Ok(*res);
        }

        let dims = normalized.split('|').next().unwrap_or_default();
        let mut parts = dims.split(|c: char| c == 'x' || c == 'X' || c == '×');
        let (w, h) = match (parts.next(), parts.next(), parts.next()) {
            (Some(w), Some(h), None) => (w.trim(), h.trim()),
            _ => {
                return Err(VistaError::Validation(format!(
                    "Invalid resolution '{}': expected WIDTHxHEIGHT or a preset label",
                    s
                )))
            }
        };
        let parse_dim = |v: &str| {
            v.parse::<u32>().map_err(|_| {
                VistaError::Validation(format!("Invalid resolution '{}': '{}' is not a size", s, v))
            })
        };
        Ok(Self::new(parse_dim(w)?, parse_dim(h)?))
    }

    /// Preset label matching this size, if any
    pub fn preset_label(&self) -> Option<&'static str> {
        RESOLUTION_PRESETS
            .iter()
            .find(|(_, r)| r == self)
            .map(|(label, _)| *label)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        RESOLUTION_PRESETS[0].1
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn squeeze_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validated, strongly typed generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Name of the product mesh inside the scene; matched by the service
    pub hero: String,
    /// Name of a camera inside the scene; matched by the service
    pub camera: String,
    pub model: ImageModel,
    pub image_count: u32,
    /// First seed; variation `i` uses `seed + i`. `None` lets the service pick.
    pub seed: Option<u32>,
    pub resolution: Resolution,
    pub content_class: Option<ContentClass>,
    /// 0..=100; only meaningful with a style image
    pub style_strength: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SpaceRef {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Source {
    space: SpaceRef,
}

impl Source {
    fn space(handle: &AssetHandle) -> Self {
        Self {
            space: SpaceRef {
                id: handle.id().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ImageReference {
    source: Source,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct StyleBody {
    image_reference: ImageReference,
    strength: u8,
}

/// Wire shape of the compose request. Field order is the serialization
/// order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComposeBody {
    camera_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_class: Option<ContentClass>,
    hero_asset: String,
    model_version: &'static str,
    num_variations: u32,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seeds: Option<Vec<u64>>,
    size: Resolution,
    sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<StyleBody>,
}

/// A serialized compose request, ready to submit
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    body: ComposeBody,
    bytes: Vec<u8>,
}

impl Payload {
    /// Exact bytes sent on the wire
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.bytes).unwrap_or(serde_json::Value::Null)
    }

    pub fn num_variations(&self) -> u32 {
        self.body.num_variations
    }

    pub fn seeds(&self) -> Option<&[u64]> {
        self.body.seeds.as_deref()
    }
}

/// Validates requests against the configured limits and assembles payloads
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    limits: LimitsConfig,
}

impl RequestBuilder {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    pub fn max_images_for(&self, model: ImageModel) -> u32 {
        self.limits.max_images_for(model)
    }

    /// Check field combinations without building anything
    pub fn validate(&self, request: &GenerationRequest, has_style: bool) -> Result<()> {
        if request.prompt.trim().is_empty() {
            return Err(VistaError::Validation("Missing prompt.".to_string()));
        }
        if request.hero.trim().is_empty() {
            return Err(VistaError::Validation("Missing hero object.".to_string()));
        }
        if request.camera.trim().is_empty() {
            return Err(VistaError::Validation("Missing camera.".to_string()));
        }
        if request.resolution.width == 0 || request.resolution.height == 0 {
            return Err(VistaError::Validation(format!(
                "Resolution must be positive in both dimensions (got {}).",
                request.resolution
            )));
        }

        let max = self.max_images_for(request.model);
        if request.image_count == 0 || request.image_count > max {
            let note = if request.model.is_experimental() {
                format!(" {} is experimental.", request.model.display_name())
            } else {
                String::new()
            };
            return Err(VistaError::Validation(format!(
                "Image count must be between 1 and {} for {} (got {}).{}",
                max,
                request.model.id(),
                request.image_count,
                note
            )));
        }

        if let Some(strength) = request.style_strength {
            if !has_style {
                return Err(VistaError::Validation(
                    "Style strength given without a style image.".to_string(),
                ));
            }
            if strength > STYLE_STRENGTH_MAX {
                return Err(VistaError::Validation(format!(
                    "Style strength must be between 0 and {} (got {}).",
                    STYLE_STRENGTH_MAX, strength
                )));
            }
        }
        Ok(())
    }

    /// Assemble the compose payload
    pub fn build(
        &self,
        request: &GenerationRequest,
        scene: &AssetHandle,
        style: Option<&AssetHandle>,
    ) -> Result<Payload> {
        self.validate(request, style.is_some())?;

        let seeds = request.seed.map(|seed| {
            (0..request.image_count as u64)
                .map(|i| seed as u64 + i)
                .collect::<Vec<_>>()
        });

        let style = style.map(|handle| StyleBody {
            image_reference: ImageReference {
                source: Source::space(handle),
            },
            strength: request.style_strength.unwrap_or(DEFAULT_STYLE_STRENGTH),
        });

        let body = ComposeBody {
            camera_name: request.camera.clone(),
            content_class: request.content_class,
            hero_asset: request.hero.clone(),
            model_version: request.model.id(),
            num_variations: request.image_count,
            prompt: request.prompt.clone(),
            seeds,
            size: request.resolution,
            sources: vec![Source::space(scene)],
            style,
        };
        let bytes = serde_json::to_vec(&body).map_err(|e| {
            VistaError::Validation(format!("Failed to serialize payload: {}", e))
        })?;
        Ok(Payload { body, bytes })
    }
}
