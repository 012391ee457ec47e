//! Texture and environment loading
//!
//! Resolves names against the search paths, picks a decode back end,
//! reads the image description and assembles the matching texture or
//! environment. Each unique name is loaded at most once.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::TextureCache;
use crate::config::TextureCacheConfig;
use crate::deep_shadow::DeepShadowMap;
use crate::description::{Description, TextureSpec};
use crate::environment::{Environment, ShadowMap};
use crate::error::{TextureError, TextureResult};
use crate::file_source::open_source;
use crate::layer::{LayerInfo, TextureLayer};
use crate::math::{mul_matrix, Matrix};
use crate::source::{DirectoryInfo, TextureSource};
use crate::texture::{Texture, WrapMode};

type Memo<T> = Mutex<HashMap<String, Option<Arc<T>>>>;

/// Loads textures and environments through one shared cache
pub struct TextureLoader {
    cache: TextureCache,
    search_paths: Vec<PathBuf>,
    textures: Memo<Texture>,
    environments: Memo<Environment>,
}

/// Square power-of-two tile size of a directory, if it has one
fn tile_size(info: &DirectoryInfo) -> Option<u32> {
    match info.tile {
        Some((w, h)) if w == h && w.is_power_of_two() => Some(w),
        _ => None,
    }
}

/// Look `name` up in `memo`, loading it with the lock released on a miss
///
/// When two threads load the same name, the first result stored wins.
fn memoized<T, F>(memo: &Memo<T>, name: &str, load: F) -> Option<Arc<T>>
where
    F: FnOnce() -> Option<Arc<T>>,
{
    if let Some(found) = memo
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
    {
        return found.clone();
    }

    let loaded = load();
    memo.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(name.to_string())
        .or_insert(loaded)
        .clone()
}

fn is_deep_shadow(path: &Path) -> TextureResult<bool> {
    let mut magic = [0u8; 4];
    let n = File::open(path)?.read(&mut magic)?;
    Ok(n == 4 && &magic == b"DSM1")
}

impl TextureLoader {
    pub fn new(cache: &TextureCache, config: &TextureCacheConfig) -> Self {
        Self {
            cache: cache.clone(),
            search_paths: config.search_paths.clone(),
            textures: Mutex::new(HashMap::new()),
            environments: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Resolve a texture name to an existing file
    ///
    /// Absolute names are used as given. Relative names are tried under
    /// each search path in order, then against the working directory.
    pub fn locate(&self, name: &str) -> TextureResult<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(TextureError::NotFound(name.to_string()))
            };
        }

        self.search_paths
            .iter()
            .map(|dir| dir.join(path))
            .chain(std::iter::once(path.to_path_buf()))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| TextureError::NotFound(name.to_string()))
    }

    /// Load a texture without memoizing it
    pub fn load_texture(&self, name: &str) -> TextureResult<Texture> {
        let path = self.locate(name)?;
        let source = open_source(&path)?;
        self.texture_from_source(name, source)
    }

    /// Build a texture from any source
    ///
    /// A `#texture` description makes a pyramid over the first `levels`
    /// directories. Anything else is a periodic texture over directory 0.
    pub fn texture_from_source(
        &self,
        name: &str,
        source: Arc<dyn TextureSource>,
    ) -> TextureResult<Texture> {
        let spec = match source.description().map(Description::parse) {
            Some(Ok(Some(Description::Texture(spec)))) => Some(spec),
            Some(Err(e)) => {
                log::warn!("{name}: {e}, loading as a plain texture");
                None
            }
            _ => None,
        };
        self.build_texture(name, &source, 0, spec.as_ref())
    }

    /// Texture starting at `directory`
    fn build_texture(
        &self,
        name: &str,
        source: &Arc<dyn TextureSource>,
        directory: usize,
        spec: Option<&TextureSpec>,
    ) -> TextureResult<Texture> {
        let Some(spec) = spec else {
            let info = source.directory(directory)?;
            let layer = TextureLayer::basic(
                &self.cache,
                Arc::clone(source),
                LayerInfo::from_directory(name, directory, &info),
            );
            return Ok(Texture::regular(
                &self.cache,
                name,
                layer,
                WrapMode::Periodic,
                WrapMode::Periodic,
            ));
        };

        let first = source.directory(directory)?;
        let tiles = tile_size(&first);
        if tiles.is_none() {
            log::warn!("{name}: pyramid is not square tiled, loading levels whole");
        }

        let mut layers = Vec::with_capacity((spec.levels as usize).min(source.directory_count()));
        for level in 0..spec.levels.max(1) {
            let index = directory + level as usize;
            let stored = source.directory(index)?;
            let info = LayerInfo {
                name: name.to_string(),
                directory: index,
                width: spec.width.checked_shr(level).unwrap_or(0).max(1),
                height: spec.height.checked_shr(level).unwrap_or(0).max(1),
                samples: stored.samples,
                format: stored.format,
                file_width: stored.width,
                file_height: stored.height,
            };
            let layer = match tiles {
                Some(size) => TextureLayer::tiled(&self.cache, Arc::clone(source), info, size)?,
                None => TextureLayer::basic(&self.cache, Arc::clone(source), info),
            };
            layers.push(layer);
        }

        Texture::pyramid(
            &self.cache,
            name,
            spec.width,
            spec.height,
            spec.smode,
            spec.tmode,
            layers,
        )
    }

    /// Load an environment or shadow map without memoizing it
    ///
    /// `to_world` maps lookup positions or directions into world space.
    pub fn load_environment(&self, name: &str, to_world: &Matrix) -> TextureResult<Environment> {
        let path = self.locate(name)?;
        if is_deep_shadow(&path)? {
            let map = DeepShadowMap::open(&self.cache, &path, to_world)?;
            return Ok(Environment::DeepShadow(map));
        }
        let source = open_source(&path)?;
        self.environment_from_source(name, source, to_world)
    }

    /// Build an environment from a source whose description says what it
    /// holds
    pub fn environment_from_source(
        &self,
        name: &str,
        source: Arc<dyn TextureSource>,
        to_world: &Matrix,
    ) -> TextureResult<Environment> {
        let description = source
            .description()
            .map(Description::parse)
            .transpose()?
            .flatten();

        match description {
            Some(Description::CubicEnvironment(faces)) => {
                let mut directory = 0;
                let mut sides = Vec::with_capacity(6);
                for face in &faces {
                    sides.push(self.build_texture(name, &source, directory, face.as_ref())?);
                    directory += face.map_or(1, |spec| spec.levels.max(1) as usize);
                }
                let sides: [Texture; 6] = sides.try_into().map_err(|_| {
                    TextureError::BadDescription(format!("{name}: cubic environment needs 6 sides"))
                })?;
                Ok(Environment::Cubic(Box::new(sides)))
            }
            Some(Description::SphericalEnvironment(spec)) => {
                let texture = self.build_texture(name, &source, 0, Some(&spec))?;
                Ok(Environment::Spherical(texture))
            }
            Some(Description::Shadow(world_to_ndc)) => {
                let stored = source.directory(0)?;
                let info = LayerInfo::from_directory(name, 0, &stored);
                let layer = match tile_size(&stored) {
                    Some(size) => TextureLayer::tiled(&self.cache, Arc::clone(&source), info, size)?,
                    None => TextureLayer::basic(&self.cache, Arc::clone(&source), info),
                };
                let to_ndc = mul_matrix(to_world, &world_to_ndc);
                Ok(Environment::Shadow(ShadowMap::new(layer, to_ndc)))
            }
            Some(Description::Texture(_)) | None => {
                Err(TextureError::NotAnEnvironment(name.to_string()))
            }
        }
    }

    /// Memoized [`Self::load_texture`]
    ///
    /// Failures are logged once and remembered; later calls for the same
    /// name return `None` without touching the disk.
    pub fn texture(&self, name: &str) -> Option<Arc<Texture>> {
        memoized(&self.textures, name, || match self.load_texture(name) {
            Ok(texture) => {
                log::debug!("loaded texture {name}");
                Some(Arc::new(texture))
            }
            Err(e) => {
                log::error!("could not load texture \"{name}\": {e}");
                None
            }
        })
    }

    /// Memoized [`Self::load_environment`]
    ///
    /// Keyed by name only: `to_world` is applied on the first load.
    pub fn environment(&self, name: &str, to_world: &Matrix) -> Option<Arc<Environment>> {
        memoized(&self.environments, name, || {
            match self.load_environment(name, to_world) {
                Ok(environment) => {
                    log::debug!("loaded {} {name}", environment.kind());
                    Some(Arc::new(environment))
                }
                Err(e) => {
                    log::error!("could not load environment \"{name}\": {e}");
                    None
                }
            }
        })
    }

    /// Drop memoized results for `name` so the next request reloads it
    pub fn forget(&self, name: &str) {
        self.textures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        self.environments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

impl std::fmt::Debug for TextureLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureLoader")
            .field("search_paths", &self.search_paths)
            .finish_non_exhaustive()
    }
}
