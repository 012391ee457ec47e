//! Shader Library Texture Cache
//!
//! Memory-budgeted texture access for renderers: lazily paged texture
//! layers, pyramid filtering, environment maps and shadow maps over one
//! shared LRU block cache.

pub mod block;
pub mod cache;
pub mod config;
pub mod deep_shadow;
pub mod description;
pub mod environment;
pub mod error;
pub mod file_source;
pub mod filter;
pub mod layer;
pub mod loader;
pub mod math;
pub mod options;
pub mod sample;
pub mod sampler;
pub mod source;
pub mod texture;

pub use block::{BlockId, BlockPool};
pub use cache::{CacheStats, MemoryPressure, TextureCache};
pub use config::{ConfigError, TextureCacheConfig, DEFAULT_MAX_MEMORY_KB};
pub use deep_shadow::{DeepSample, DeepShadowMap, DeepShadowWriter};
pub use description::{Description, TextureSpec};
pub use environment::{Environment, ShadowMap, CUBE_FACES};
pub use error::{TextureError, TextureResult};
pub use file_source::{open_source, ImageFileSource, TiffSource};
pub use filter::Filter;
pub use layer::{LayerInfo, TextureLayer, DEPTH_INFINITY};
pub use loader::TextureLoader;
pub use math::{Color, Matrix, Vec3};
pub use options::LookupOptions;
pub use sample::{Sample, SampleFormat};
pub use sampler::{GridSampler, JitteredSampler, SampleSource};
pub use source::{DirectoryInfo, MemorySource, Region, TextureSource};
pub use texture::{Quad, Texture, WrapMode};
