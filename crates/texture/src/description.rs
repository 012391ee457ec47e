//! Metadata strings stored in a texture file's image description
//!
//! Texture makers record how a file should be interpreted:
//!
//! ```text
//! #texture (512x512): smode: periodic tmode: clamp levels: 10
//! #cenvironment #texture (...) ... six #texture specs, one per face
//! #senvironment #texture (...)
//! #shadow [ m00 m01 ... m33 ]
//! WorldToNDC=[ m00 m01 ... m33 ]
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{TextureError, TextureResult};
use crate::math::Matrix;
use crate::texture::WrapMode;

const TEXTURE_TAG: &str = "#texture";

/// A pyramid made from consecutive directories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSpec {
    /// Base resolution
    pub width: u32,
    pub height: u32,
    pub smode: WrapMode,
    pub tmode: WrapMode,
    /// Number of directories holding the pyramid
    pub levels: u32,
}

impl TextureSpec {
    pub fn new(width: u32, height: u32, smode: WrapMode, tmode: WrapMode, levels: u32) -> Self {
        Self {
            width,
            height,
            smode,
            tmode,
            levels,
        }
    }
}

fn bad(text: &str) -> TextureError {
    TextureError::BadDescription(text.trim().to_string())
}

/// Wrap mode strings from files fall back to periodic
fn wrap_mode(token: &str, axis: char) -> WrapMode {
    token.parse().unwrap_or_else(|e| {
        log::warn!("{e} in {axis}, using periodic");
        WrapMode::Periodic
    })
}

impl FromStr for TextureSpec {
    type Err = TextureError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let rest = text
            .trim_start()
            .strip_prefix(TEXTURE_TAG)
            .ok_or_else(|| bad(text))?;
        let open = rest.find('(').ok_or_else(|| bad(text))?;
        let close = rest.find(')').ok_or_else(|| bad(text))?;
        let (width, height) = rest
            .get(open + 1..close)
            .and_then(|dims| dims.split_once('x'))
            .ok_or_else(|| bad(text))?;
        let width = width.trim().parse().map_err(|_| bad(text))?;
        let height = height.trim().parse().map_err(|_| bad(text))?;

        let mut tokens = rest[close + 1..].trim_start_matches(':').split_whitespace();
        let mut field = |key: &str| {
            match (tokens.next(), tokens.next()) {
                (Some(k), Some(value)) if k == key => Ok(value),
                _ => Err(bad(text)),
            }
        };
        let smode = wrap_mode(field("smode:")?, 's');
        let tmode = wrap_mode(field("tmode:")?, 't');
        let levels = field("levels:")?.parse().map_err(|_| bad(text))?;

        Ok(Self::new(width, height, smode, tmode, levels))
    }
}

impl fmt::Display for TextureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{TEXTURE_TAG} ({}x{}): smode: {} tmode: {} levels: {}",
            self.width, self.height, self.smode, self.tmode, self.levels
        )
    }
}

/// What an image description says about its file
#[derive(Debug, Clone, PartialEq)]
pub enum Description {
    /// Pyramid texture
    Texture(TextureSpec),
    /// Six faces; `None` marks a face stored as a single plain directory
    CubicEnvironment(Vec<Option<TextureSpec>>),
    SphericalEnvironment(TextureSpec),
    /// Depth map with its world to NDC matrix
    Shadow(Matrix),
}

fn parse_matrix(text: &str) -> TextureResult<Matrix> {
    let open = text.find('[').ok_or_else(|| bad(text))?;
    let close = text.find(']').ok_or_else(|| bad(text))?;
    let values = text
        .get(open + 1..close)
        .ok_or_else(|| bad(text))?
        .split_whitespace()
        .map(str::parse::<f32>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| bad(text))?;
    values.try_into().map_err(|_| bad(text))
}

/// Every `#texture ...` spec in `text`, in order
fn texture_specs(text: &str) -> Vec<&str> {
    let starts: Vec<usize> = text.match_indices(TEXTURE_TAG).map(|(i, _)| i).collect();
    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| &text[start..starts.get(n + 1).copied().unwrap_or(text.len())])
        .collect()
}

impl Description {
    /// Parse an image description
    ///
    /// Returns `Ok(None)` for descriptions that carry no texture metadata.
    pub fn parse(text: &str) -> TextureResult<Option<Self>> {
        let text = text.trim();

        if text.starts_with(TEXTURE_TAG) {
            return text.parse().map(Description::Texture).map(Some);
        }

        if text.starts_with("#cenvironment") {
            let faces: Vec<_> = texture_specs(text)
                .into_iter()
                .map(|spec| spec.parse::<TextureSpec>().ok())
                .collect();
            if faces.len() != 6 {
                return Err(TextureError::BadDescription(format!(
                    "cubic environment has {} of 6 sides",
                    faces.len()
                )));
            }
            return Ok(Some(Description::CubicEnvironment(faces)));
        }

        if text.starts_with("#senvironment") {
            let spec = texture_specs(text)
                .first()
                .ok_or_else(|| bad(text))?
                .parse()?;
            return Ok(Some(Description::SphericalEnvironment(spec)));
        }

        if text.starts_with("#shadow") || text.starts_with("WorldToNDC=") {
            return parse_matrix(text).map(Description::Shadow).map(Some);
        }

        Ok(None)
    }
}

fn write_matrix(f: &mut fmt::Formatter<'_>, matrix: &Matrix) -> fmt::Result {
    f.write_str("[")?;
    for value in matrix {
        write!(f, " {value}")?;
    }
    f.write_str(" ]")
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Description::Texture(spec) => write!(f, "{spec}"),
            Description::CubicEnvironment(faces) => {
                f.write_str("#cenvironment")?;
                for face in faces {
                    match face {
                        Some(spec) => write!(f, " {spec}")?,
                        None => write!(f, " {TEXTURE_TAG}")?,
                    }
                }
                Ok(())
            }
            Description::SphericalEnvironment(spec) => write!(f, "#senvironment {spec}"),
            Description::Shadow(matrix) => {
                f.write_str("#shadow ")?;
                write_matrix(f, matrix)
            }
        }
    }
}
