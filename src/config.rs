//! Configuration - all tunable parameters in one place.
//!
//! Every behavioral parameter of the fetcher, decoder, upload strategies and
//! the tile viewer lives here so nothing else carries magic numbers.

use crate::upload::StrategyKind;
use std::time::Duration;

/// Master configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Network fetching
    pub fetch: FetchConfig,
    /// Image decoding
    pub decode: DecodeConfig,
    /// Texture upload
    pub upload: UploadConfig,
    /// Tile viewer
    pub render: RenderConfig,
}

/// Network fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent sent with every request
    pub user_agent: String,
    /// Bodies longer than this are truncated
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("texfetch/{}", env!("CARGO_PKG_VERSION")),
            max_body_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// Decoder configuration
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Largest edge of a decoded image; bigger images are scaled down.
    /// None keeps the original resolution.
    pub max_dimension: Option<u32>,
    /// Decode the payloads of one batch in parallel
    pub parallel: bool,
    /// Threads for parallel decode (0 = use all cores)
    pub max_parallel_tasks: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_dimension: Some(2048),
            parallel: true,
            max_parallel_tasks: 0,
        }
    }
}

impl DecodeConfig {
    /// Target dimensions maintaining aspect ratio, never upscaling
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match self.max_dimension {
            None => (width, height),
            Some(max_dim) => {
                let max_original = width.max(height);
                if max_original <= max_dim {
                    (width, height)
                } else {
                    let scale = max_dim as f64 / max_original as f64;
                    let new_w = (width as f64 * scale).round() as u32;
                    let new_h = (height as f64 * scale).round() as u32;
                    (new_w.max(1), new_h.max(1))
                }
            }
        }
    }
}

/// Upload configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Strategy active when the pipeline starts
    pub strategy: StrategyKind,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Serialized,
        }
    }
}

/// Tile viewer configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Default window width
    pub default_width: u32,
    /// Default window height
    pub default_height: u32,
    /// Background color (RGBA)
    pub background_color: [u8; 4],
    /// Color of a tile still waiting for its texture (RGBA)
    pub placeholder_color: [u8; 4],
    /// Tiles per row
    pub columns: u32,
    /// Gap around each tile in pixels
    pub tile_padding: u32,
    /// How often to poll for finished textures while loading
    pub poll_interval: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_width: 1280,
            default_height: 720,
            background_color: [0, 0, 0, 255],        // Black
            placeholder_color: [40, 40, 48, 255], // Dark slate
            columns: 4,
            tile_padding: 6,
            // ~60 polls per second
            poll_interval: Duration::from_millis(16),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_dimensions() {
        let config = DecodeConfig {
            max_dimension: Some(256),
            ..DecodeConfig::default()
        };

        // Large images scale down
        let (w, h) = config.target_dimensions(1920, 1080);
        assert!(w <= 256 && h <= 256);
        assert_eq!(w, 256);

        // Small images are not upscaled
        assert_eq!(config.target_dimensions(100, 50), (100, 50));

        // Extreme aspect ratios keep at least one pixel
        let (_, h) = config.target_dimensions(10_000, 1);
        assert_eq!(h, 1);
    }

    #[test]
    fn test_unbounded_dimensions() {
        let config = DecodeConfig {
            max_dimension: None,
            ..DecodeConfig::default()
        };
        assert_eq!(config.target_dimensions(8000, 6000), (8000, 6000));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.upload.strategy, StrategyKind::Serialized);
        assert!(config.render.columns > 0);
        assert!(config.fetch.user_agent.starts_with("texfetch/"));
    }
}
