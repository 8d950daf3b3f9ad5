//! Job descriptor builder
//!
//! Turns a semantic `AssetRequest` into the node graph the inference service
//! executes. Nothing outside this module knows the service's node vocabulary.

use crate::request::AssetRequest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sheetsmith_core::Result;

const CHECKPOINT_NODE: &str = "10";
const ANIMATION_PROMPT_SUFFIX: &str = "smooth animation, consistent character";

/// Fixed generation parameters shared by every job in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTemplate {
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,
    /// Motion module used for animated jobs
    #[serde(default = "default_motion_model")]
    pub motion_model: String,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg")]
    pub cfg: f64,
    #[serde(default = "default_negative")]
    pub negative_prompt: String,
    /// Appended to every prompt (style vocabulary)
    #[serde(default)]
    pub prompt_suffix: Option<String>,
    /// Rotated across still assets: variant `i` gets `style_suffixes[i % len]`
    #[serde(default)]
    pub style_suffixes: Vec<String>,
    /// Latent resolution; frames are normalized to the request size afterwards
    #[serde(default = "default_resolution")]
    pub width: u32,
    #[serde(default = "default_resolution")]
    pub height: u32,
    /// Pin the seed for reproducible runs; a fresh seed is drawn per job otherwise
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_prefix")]
    pub filename_prefix: String,
}

fn default_checkpoint() -> String {
    "sd_xl_base_1.0.safetensors".to_string()
}
fn default_motion_model() -> String {
    "mm_sd_v15_v2.ckpt".to_string()
}
fn default_sampler() -> String {
    "dpmpp_2m".to_string()
}
fn default_scheduler() -> String {
    "karras".to_string()
}
fn default_steps() -> u32 {
    25
}
fn default_cfg() -> f64 {
    7.0
}
fn default_negative() -> String {
    "blurry, low quality, distorted, bad anatomy, watermark".to_string()
}
fn default_resolution() -> u32 {
    512
}
fn default_prefix() -> String {
    "sheetsmith".to_string()
}

impl Default for GenerationTemplate {
    fn default() -> Self {
        Self {
            checkpoint: default_checkpoint(),
            motion_model: default_motion_model(),
            sampler: default_sampler(),
            scheduler: default_scheduler(),
            steps: default_steps(),
            cfg: default_cfg(),
            negative_prompt: default_negative(),
            prompt_suffix: None,
            style_suffixes: Vec::new(),
            width: default_resolution(),
            height: default_resolution(),
            seed: None,
            filename_prefix: default_prefix(),
        }
    }
}

impl GenerationTemplate {
    /// Final positive prompt for a request
    pub fn prompt_for(&self, request: &AssetRequest) -> String {
        self.prompt_for_variant(request, 0)
    }

    /// Final positive prompt for the `variant`-th asset of a run
    pub fn prompt_for_variant(&self, request: &AssetRequest, variant: usize) -> String {
        let mut parts = vec![request.prompt.trim().to_string()];
        if request.is_animated() {
            parts.push(ANIMATION_PROMPT_SUFFIX.to_string());
        } else if !self.style_suffixes.is_empty() {
            push_suffix(&mut parts, &self.style_suffixes[variant % self.style_suffixes.len()]);
        }
        if let Some(suffix) = self.prompt_suffix.as_deref() {
            push_suffix(&mut parts, suffix);
        }
        parts.join(", ")
    }
}

fn push_suffix(parts: &mut Vec<String>, suffix: &str) {
    let suffix = suffix.trim().trim_start_matches(',').trim();
    if !suffix.is_empty() {
        parts.push(suffix.to_string());
    }
}

/// An opaque, ready-to-submit job description
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    asset_key: String,
    frame_count: u32,
    animated: bool,
    prompt: String,
    seed: u64,
    client_id: String,
    graph: Value,
}

impl JobDescriptor {
    pub fn asset_key(&self) -> &str {
        &self.asset_key
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Whether the job renders a video container rather than stills
    pub fn is_animated(&self) -> bool {
        self.animated
    }

    /// The positive prompt baked into the graph
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The service-specific node graph
    pub fn graph(&self) -> &Value {
        &self.graph
    }
}

/// Build a job descriptor. Pure: validates the request and assembles the
/// graph without touching the network.
pub fn build_descriptor(
    request: &AssetRequest,
    template: &GenerationTemplate,
) -> Result<JobDescriptor> {
    build_variant_descriptor(request, template, 0)
}

/// Like `build_descriptor`, picking the style suffix for the `variant`-th asset
pub fn build_variant_descriptor(
    request: &AssetRequest,
    template: &GenerationTemplate,
    variant: usize,
) -> Result<JobDescriptor> {
    request.validate()?;

    let seed = template.seed.unwrap_or_else(fresh_seed);
    let prompt = template.prompt_for_variant(request, variant);
    let prefix = format!("{}_{}", template.filename_prefix, request.asset_key);

    let graph = if let Some(anim) = request.animation {
        animation_graph(template, &prompt, seed, request.frame_count, anim.fps, anim.looping, &prefix)
    } else {
        still_graph(template, &prompt, seed, request.frame_count, &prefix)
    };

    Ok(JobDescriptor {
        asset_key: request.asset_key.clone(),
        frame_count: request.frame_count,
        animated: request.is_animated(),
        prompt,
        seed,
        client_id: uuid::Uuid::new_v4().to_string(),
        graph,
    })
}

fn fresh_seed() -> u64 {
    // keep seeds inside the range JSON consumers represent exactly
    rand::random::<u64>() & ((1u64 << 53) - 1)
}

fn still_graph(
    template: &GenerationTemplate,
    prompt: &str,
    seed: u64,
    batch_size: u32,
    prefix: &str,
) -> Value {
    json!({
        "1": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": prompt, "clip": [CHECKPOINT_NODE, 1] }
        },
        "2": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": template.negative_prompt, "clip": [CHECKPOINT_NODE, 1] }
        },
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": seed,
                "steps": template.steps,
                "cfg": template.cfg,
                "sampler_name": template.sampler,
                "scheduler": template.scheduler,
                "denoise": 1.0,
                "model": [CHECKPOINT_NODE, 0],
                "positive": ["1", 0],
                "negative": ["2", 0],
                "latent_image": ["4", 0]
            }
        },
        "4": {
            "class_type": "EmptyLatentImage",
            "inputs": {
                "width": template.width,
                "height": template.height,
                "batch_size": batch_size
            }
        },
        "5": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": [CHECKPOINT_NODE, 2] }
        },
        "6": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": prefix, "images": ["5", 0] }
        },
        "10": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": template.checkpoint }
        }
    })
}

fn animation_graph(
    template: &GenerationTemplate,
    prompt: &str,
    seed: u64,
    frame_count: u32,
    fps: u32,
    looping: bool,
    prefix: &str,
) -> Value {
    // VHS treats 0 as "loop forever"
    let loop_count = if looping { 0 } else { 1 };
    json!({
        "1": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": prompt, "clip": [CHECKPOINT_NODE, 1] }
        },
        "2": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": template.negative_prompt, "clip": [CHECKPOINT_NODE, 1] }
        },
        "3": {
            "class_type": "AnimateDiffLoaderV1",
            "inputs": { "model": [CHECKPOINT_NODE, 0], "motion_model": template.motion_model }
        },
        "4": {
            "class_type": "KSampler",
            "inputs": {
                "seed": seed,
                "steps": template.steps,
                "cfg": template.cfg,
                "sampler_name": template.sampler,
                "scheduler": template.scheduler,
                "denoise": 1.0,
                "model": ["3", 0],
                "positive": ["1", 0],
                "negative": ["2", 0],
                "latent_image": ["5", 0]
            }
        },
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": {
                "width": template.width,
                "height": template.height,
                "batch_size": frame_count
            }
        },
        "6": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["4", 0], "vae": [CHECKPOINT_NODE, 2] }
        },
        "8": {
            "class_type": "VHS_VideoCombine",
            "inputs": {
                "images": ["6", 0],
                "frame_rate": fps,
                "loop_count": loop_count,
                "filename_prefix": prefix,
                "format": "video/h264-mp4",
                "pingpong": false,
                "save_output": true
            }
        },
        "10": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": template.checkpoint }
        }
    })
}
