//! Vision analysis of advertisement images.
//!
//! An image loaded into the room is validated, content-hashed, and described
//! once by a vision model; the structured result is cached on disk keyed by
//! hash so reloading the same bytes never repeats the call. Cache writes are
//! best-effort: a failed write is logged and the fresh analysis is used
//! anyway.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::focusroom::clients::ollama::OllamaClient;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
pub const MAX_IMAGE_SIZE_BYTES: usize = 20 * 1024 * 1024;

const ANALYSIS_TEMPERATURE: f32 = 0.2;

/// Failures surfaced to the moderator; none of them mutate room state.
#[derive(Debug)]
pub enum ImageError {
    UnsupportedFormat(String),
    TooLarge(usize),
    Io(String),
    AnalysisFailed(String),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::UnsupportedFormat(ext) => write!(
                f,
                "Unsupported format: {}. Accepted: {}.",
                ext,
                SUPPORTED_EXTENSIONS.join(", ")
            ),
            ImageError::TooLarge(bytes) => write!(
                f,
                "Image is {} MB, maximum allowed is 20 MB.",
                bytes / (1024 * 1024)
            ),
            ImageError::Io(msg) => write!(f, "Could not read image: {}", msg),
            ImageError::AnalysisFailed(msg) => write!(f, "Vision analysis failed: {}", msg),
        }
    }
}

impl Error for ImageError {}

/// Structured description of one advertisement. Everything beyond the prose
/// description is optional so entries cached under older schemas still load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    #[serde(default)]
    pub vivid_description: String,
    #[serde(default)]
    pub copy_verbatim: Option<String>,
    #[serde(default)]
    pub copy_meaning: Option<String>,
    #[serde(default)]
    pub typography_style: Option<String>,
    #[serde(default)]
    pub typography_hierarchy: Option<String>,
    #[serde(default)]
    pub colour_palette: Vec<String>,
    #[serde(default)]
    pub colour_scheme_type: Option<String>,
    #[serde(default)]
    pub colour_psychology: Option<String>,
    #[serde(default)]
    pub has_deal: Option<bool>,
    #[serde(default)]
    pub pricing_verbatim: Option<String>,
    /// Field name used by older cache entries.
    #[serde(default)]
    pub pricing_text: Option<String>,
    #[serde(default)]
    pub deal_type: Option<String>,
    #[serde(default)]
    pub deal_conditions: Option<String>,
    #[serde(default)]
    pub background_description: Option<String>,
    #[serde(default)]
    pub background_objects: Option<String>,
    #[serde(default)]
    pub visual_layers: Option<String>,
    #[serde(default)]
    pub object_count: Option<u32>,
    #[serde(default)]
    pub people_present: Option<bool>,
    #[serde(default)]
    pub people_description: Option<String>,
    #[serde(default)]
    pub product_placement: Option<String>,
    #[serde(default)]
    pub brand_presence: Option<String>,
    #[serde(default)]
    pub visual_hierarchy: Vec<String>,
    #[serde(default)]
    pub emotional_tone: Option<String>,
    #[serde(default)]
    pub implied_audience: Option<String>,
}

/// One image currently loaded into the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadedImage {
    pub filename: String,
    pub hash: String,
    pub analysis: AnalysisResult,
}

const ANALYSIS_PROMPT: &str = r#"You are a designer and marketing analyst. Your job is to document this advertisement with clinical precision. Be vivid, factual, and strictly neutral. Do not say whether the ad is good or bad. Do not praise or criticise it. Just describe exactly what you see.

Return ONLY a valid JSON object. No markdown, no explanation, no code fences. Start your response with { and end with }.

The JSON must have exactly these fields:

{
  "vivid_description": "<Immersive prose, 250-350 words. Describe spatial layout, the first thing the eye lands on, depth and layers, lighting quality, colour relationships, negative space, overall composition balance, and atmosphere. Write as if the reader cannot see the image at all.>",
  "copy_verbatim": "<Every line of text visible in the ad, copied exactly as written, separated by ' | '. null if no text is present.>",
  "copy_meaning": "<What the text communicates as a complete message. One concise paragraph, neutral, no opinion.>",
  "typography_style": "<The character of the font(s): serif or sans-serif, weight, and whether the style reads as premium, casual, urgent, playful, technical, or something else.>",
  "typography_hierarchy": "<Which text element is primary, secondary, and fine print, with the size and weight contrast between levels.>",
  "colour_palette": ["<most dominant colour, its role and emotional quality>", "<secondary colour and its role>", "<accent colour if present>"],
  "colour_scheme_type": "<e.g. monochromatic, complementary, analogous, high-contrast achromatic, warm-dominant, cool-dominant>",
  "colour_psychology": "<What emotions or associations the colour choices are intended to trigger. Observational, not evaluative.>",
  "has_deal": <true if any discount, bundle, promotional offer, or special pricing is visible; false otherwise>,
  "pricing_verbatim": "<Verbatim price or offer text exactly as it appears, or null>",
  "deal_type": "<one of: bundle, percentage-off, amount-off, limited-time, free-gift, trade-in, financing, membership. null if no deal.>",
  "deal_conditions": "<Terms or fine print related to the offer. null if none visible.>",
  "background_description": "<The physical environment or setting and the mood it creates.>",
  "background_objects": "<Props or supporting elements beyond the main product, each briefly described. 'none' if there are none.>",
  "visual_layers": "<What occupies the foreground, midground, and background.>",
  "object_count": <integer, approximate count of distinct visual elements>,
  "people_present": <true if any people or body parts are visible; false otherwise>,
  "people_description": "<If present: count, apparent age range, gender, activity, and expression. null if no people.>",
  "product_placement": "<Where the product sits in the frame, how large it appears, and what frames it.>",
  "brand_presence": "<Brand name or logo: location, approximate size, and whether it reads as subtle, moderate, or dominant.>",
  "visual_hierarchy": ["<first thing the eye is drawn to>", "<second>", "<third>"],
  "emotional_tone": "<The dominant feeling the ad is designed to evoke. One phrase.>",
  "implied_audience": "<Who this ad is targeting: inferred age range, gender, lifestyle, income level, psychographics, based only on the visual language.>"
}"#;

/// Calls a vision model and parses its structured reply.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze_bytes(&self, raw: &[u8]) -> Result<AnalysisResult, ImageError>;
}

/// Vision analysis through an Ollama chat endpoint.
pub struct OllamaVisionAnalyzer {
    client: OllamaClient,
}

impl OllamaVisionAnalyzer {
    pub fn new(client: OllamaClient) -> Self {
        OllamaVisionAnalyzer { client }
    }
}

#[async_trait]
impl ImageAnalyzer for OllamaVisionAnalyzer {
    async fn analyze_bytes(&self, raw: &[u8]) -> Result<AnalysisResult, ImageError> {
        let b64 = base64::engine::general_purpose::STANDARD.encode(raw);
        let text = self
            .client
            .chat_with_images(ANALYSIS_PROMPT, vec![b64], ANALYSIS_TEMPERATURE)
            .await
            .map_err(|e| ImageError::AnalysisFailed(e.to_string()))?;
        parse_analysis(&text)
    }
}

/// Parse the model's reply, salvaging the outermost JSON object when the
/// model wrapped it in prose or fences despite instructions.
pub fn parse_analysis(raw: &str) -> Result<AnalysisResult, ImageError> {
    let trimmed = raw.trim();
    if let Ok(result) = serde_json::from_str::<AnalysisResult>(trimmed) {
        return Ok(result);
    }
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(result) = serde_json::from_str::<AnalysisResult>(&trimmed[open..=close]) {
                return Ok(result);
            }
        }
    }
    Err(ImageError::AnalysisFailed(
        "response could not be parsed as JSON".to_string(),
    ))
}

pub fn compute_hash(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

fn validate(path: &Path, raw: &[u8]) -> Result<(), ImageError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ImageError::UnsupportedFormat(format!(".{}", ext)));
    }
    if raw.len() > MAX_IMAGE_SIZE_BYTES {
        return Err(ImageError::TooLarge(raw.len()));
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    saved_at: DateTime<Utc>,
    filename: String,
    analysis: AnalysisResult,
}

/// Validation, hashing, caching, and analysis of image files.
pub struct ImageService {
    analyzer: Box<dyn ImageAnalyzer>,
    cache_dir: PathBuf,
    ttl_secs: u64,
}

impl ImageService {
    pub fn new(analyzer: Box<dyn ImageAnalyzer>, cache_dir: &Path, ttl_secs: u64) -> Self {
        ImageService {
            analyzer,
            cache_dir: cache_dir.to_path_buf(),
            ttl_secs,
        }
    }

    fn cache_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", hash))
    }

    fn cache_lookup(&self, hash: &str) -> Option<CacheEntry> {
        let raw = fs::read_to_string(self.cache_path(hash)).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        let age = Utc::now() - entry.saved_at;
        if age > Duration::seconds(self.ttl_secs as i64) {
            debug!("image cache entry {} expired", hash);
            return None;
        }
        Some(entry)
    }

    fn cache_store(&self, hash: &str, filename: &str, analysis: &AnalysisResult) {
        let entry = CacheEntry {
            saved_at: Utc::now(),
            filename: filename.to_string(),
            analysis: analysis.clone(),
        };
        let write = fs::create_dir_all(&self.cache_dir)
            .and_then(|_| {
                let body = serde_json::to_string_pretty(&entry)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                fs::write(self.cache_path(hash), body)
            });
        if let Err(e) = write {
            warn!("image cache write for {} failed: {}", hash, e);
        }
    }

    /// Analyze one image file. Returns the loaded image plus whether the
    /// analysis came from cache.
    pub async fn analyze(&self, path: &Path) -> Result<(LoadedImage, bool), ImageError> {
        let raw = fs::read(path).map_err(|e| ImageError::Io(e.to_string()))?;
        validate(path, &raw)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        let hash = compute_hash(&raw);

        if let Some(entry) = self.cache_lookup(&hash) {
            info!("image {} served from cache", filename);
            return Ok((
                LoadedImage {
                    filename,
                    hash,
                    analysis: entry.analysis,
                },
                true,
            ));
        }

        let analysis = self.analyzer.analyze_bytes(&raw).await?;
        self.cache_store(&hash, &filename, &analysis);
        Ok((
            LoadedImage {
                filename,
                hash,
                analysis,
            },
            false,
        ))
    }
}

fn opt_line(out: &mut String, label: &str, value: &Option<String>) {
    if let Some(v) = value {
        if !v.trim().is_empty() {
            out.push_str(&format!("{}: {}\n", label, v));
        }
    }
}

/// Render every loaded image as one context block for persona injection.
/// Personas can reference images by filename or by position.
pub fn format_for_personas(images: &[LoadedImage]) -> String {
    if images.is_empty() {
        return String::new();
    }

    let mut parts = Vec::with_capacity(images.len());
    for (i, img) in images.iter().enumerate() {
        let r = &img.analysis;
        let mut block = format!("Image {} — {}\n{}\n", i + 1, img.filename, r.vivid_description);

        opt_line(&mut block, "\nText visible in ad", &r.copy_verbatim);
        opt_line(&mut block, "Message", &r.copy_meaning);
        match (&r.typography_style, &r.typography_hierarchy) {
            (Some(style), Some(hier)) => {
                block.push_str(&format!("Typography: {}, hierarchy: {}\n", style, hier))
            }
            (Some(one), None) | (None, Some(one)) => {
                block.push_str(&format!("Typography: {}\n", one))
            }
            (None, None) => {}
        }

        if !r.colour_palette.is_empty() {
            block.push_str(&format!("\nColour palette: {}\n", r.colour_palette.join(", ")));
        }
        opt_line(&mut block, "Colour scheme", &r.colour_scheme_type);
        opt_line(&mut block, "Colour psychology", &r.colour_psychology);

        let pricing = r.pricing_verbatim.as_ref().or(r.pricing_text.as_ref());
        match r.has_deal {
            Some(true) => {
                let mut deal = format!(
                    "\nDeal: {}",
                    r.deal_type.as_deref().unwrap_or("present")
                );
                if let Some(p) = pricing {
                    deal.push_str(&format!(", {}", p));
                }
                if let Some(c) = &r.deal_conditions {
                    deal.push_str(&format!(" ({})", c));
                }
                block.push_str(&deal);
                block.push('\n');
            }
            Some(false) => block.push_str("\nDeal: none\n"),
            None => {
                if let Some(p) = pricing {
                    block.push_str(&format!("\nPricing / offer: {}\n", p));
                }
            }
        }

        opt_line(&mut block, "\nBackground", &r.background_description);
        opt_line(&mut block, "Objects", &r.background_objects);
        opt_line(&mut block, "Layers", &r.visual_layers);
        if let Some(count) = r.object_count {
            block.push_str(&format!("Visual element count: ~{}\n", count));
        }

        match (r.people_present, &r.people_description) {
            (Some(true), Some(desc)) => block.push_str(&format!("People: {}\n", desc)),
            (Some(false), _) => block.push_str("People: none\n"),
            _ => {}
        }

        opt_line(&mut block, "\nProduct placement", &r.product_placement);
        opt_line(&mut block, "Brand", &r.brand_presence);

        if !r.visual_hierarchy.is_empty() {
            block.push_str(&format!("\nEye path: {}\n", r.visual_hierarchy.join(" > ")));
        }
        opt_line(&mut block, "Emotional tone", &r.emotional_tone);
        opt_line(&mut block, "Implied audience", &r.implied_audience);

        parts.push(block.trim_end().to_string());
    }

    let header = format!(
        "{} advertisement image{} been shared in the room.\n\
         You may refer to them by filename or as 'the first image', 'the second image', etc.\n\n",
        images.len(),
        if images.len() == 1 { " has" } else { "s have" },
    );
    header + &parts.join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_result() -> AnalysisResult {
        serde_json::from_str(r#"{"vivid_description": "A console on black."}"#).unwrap()
    }

    #[test]
    fn old_cache_entries_still_deserialize() {
        let r = minimal_result();
        assert_eq!(r.vivid_description, "A console on black.");
        assert!(r.colour_palette.is_empty());
        assert!(r.has_deal.is_none());
    }

    #[test]
    fn salvage_extracts_fenced_json() {
        let raw = "Sure, here you go:\n```json\n{\"vivid_description\": \"desc\", \"has_deal\": false}\n```";
        let r = parse_analysis(raw).unwrap();
        assert_eq!(r.vivid_description, "desc");
        assert_eq!(r.has_deal, Some(false));
        assert!(parse_analysis("no json here at all").is_err());
    }

    #[test]
    fn validation_rejects_bad_input() {
        let small = vec![0u8; 16];
        assert!(matches!(
            validate(Path::new("ad.bmp"), &small),
            Err(ImageError::UnsupportedFormat(_))
        ));
        assert!(validate(Path::new("ad.PNG"), &small).is_ok());
        let big = vec![0u8; MAX_IMAGE_SIZE_BYTES + 1];
        assert!(matches!(
            validate(Path::new("ad.png"), &big),
            Err(ImageError::TooLarge(_))
        ));
    }

    #[test]
    fn briefing_lists_images_in_order() {
        let img = |name: &str| LoadedImage {
            filename: name.to_string(),
            hash: compute_hash(name.as_bytes()),
            analysis: minimal_result(),
        };
        let block = format_for_personas(&[img("a.png"), img("b.png")]);
        assert!(block.contains("2 advertisement images have"));
        assert!(block.contains("Image 1 — a.png"));
        assert!(block.contains("Image 2 — b.png"));
        assert_eq!(format_for_personas(&[]), "");
    }

    #[test]
    fn hashes_are_stable_and_content_addressed() {
        assert_eq!(compute_hash(b"same"), compute_hash(b"same"));
        assert_ne!(compute_hash(b"same"), compute_hash(b"different"));
    }
}
