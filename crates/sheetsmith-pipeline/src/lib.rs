//! Sheetsmith pipeline - AI sprite generation to engine-ready sprite sheets
//!
//! Submits generation jobs to a ComfyUI-style inference queue, polls them to
//! completion, downloads their artifacts, cleans and normalizes the frames and
//! packs them into sprite sheets with JSON metadata. Batches tolerate
//! per-asset failures and can be recorded in a TOML build manifest.

pub mod client;
pub mod config;
pub mod descriptor;
pub mod fetch;
pub mod manifest;
pub mod pipeline;
pub mod poller;
pub mod process;
pub mod request;
pub mod service;
pub mod sheet;
pub mod stub;

pub use client::ComfyClient;
pub use config::PipelineConfig;
pub use descriptor::{build_descriptor, build_variant_descriptor, GenerationTemplate, JobDescriptor};
pub use manifest::BuildManifest;
pub use pipeline::{AssetOutcome, AssetStatus, BatchReport, Pipeline, ProducedSheet, Stage};
pub use poller::{CompletionPoller, JobResult, JobStatus};
pub use process::{PostProcessor, ProcessedFrame};
pub use request::{load_batch, AnimationParams, AssetRequest};
pub use service::{ArtifactKind, ArtifactRef, InferenceService, JobHandle, ServiceStatus};
pub use sheet::{compose, write_sheet, LayoutPolicy, SheetMetadata, SpriteSheet};
pub use stub::StubService;
