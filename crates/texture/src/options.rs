//! Per-lookup options

use crate::filter::Filter;
use crate::math::{Color, BLACK};

/// How a single lookup filters, blurs and fills
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupOptions {
    /// Reconstruction filter weighting the area samples
    pub filter: Filter,
    /// Footprint scale along s
    pub swidth: f32,
    /// Footprint scale along t
    pub twidth: f32,
    /// Shadow blur, added to the shadow map footprint
    pub blur: f32,
    /// Extra footprint along s, in texture units
    pub sblur: f32,
    /// Extra footprint along t, in texture units
    pub tblur: f32,
    /// Area samples per lookup
    pub samples: usize,
    /// Depth offset before a shadow map comparison
    pub shadow_bias: f32,
    /// First channel read from the texture
    pub channel: u32,
    /// Value for missing channels and for lookups that fall off a black
    /// texture
    pub fill: Color,
}

impl LookupOptions {
    /// Box filtered colour lookup with one sample
    pub fn texture() -> Self {
        Self {
            filter: Filter::Box,
            swidth: 1.0,
            twidth: 1.0,
            blur: 0.0,
            sblur: 0.0,
            tblur: 0.0,
            samples: 1,
            shadow_bias: 0.0,
            channel: 0,
            fill: BLACK,
        }
    }

    /// Box filtered shadow lookup with four samples and a 0.03 bias
    pub fn shadow() -> Self {
        Self {
            samples: 4,
            shadow_bias: 0.03,
            ..Self::texture()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets both footprint scales.
    pub fn with_width(mut self, swidth: f32, twidth: f32) -> Self {
        self.swidth = swidth;
        self.twidth = twidth;
        self
    }

    /// Sets the s and t blur.
    pub fn with_blur(mut self, sblur: f32, tblur: f32) -> Self {
        self.sblur = sblur;
        self.tblur = tblur;
        self
    }

    /// Sets the shadow blur.
    pub fn with_shadow_blur(mut self, blur: f32) -> Self {
        self.blur = blur;
        self
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_shadow_bias(mut self, bias: f32) -> Self {
        self.shadow_bias = bias;
        self
    }

    pub fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_fill(mut self, fill: Color) -> Self {
        self.fill = fill;
        self
    }
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self::texture()
    }
}
