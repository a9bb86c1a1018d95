//! Pure rendering functions.
//!
//! Given the tile world and the device holding its textures, produce pixels.
//! Rendering reads textures through the caller's current context and mutates
//! nothing but the frame.

use crate::config::RenderConfig;
use crate::gpu::{ContextGuard, SoftwareGpu, Texture};
use crate::world::World;

/// Result of a render operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderResult {
    /// Tiles drawn from a texture
    pub drawn: usize,
    /// Tiles drawn as placeholders (no texture yet, or unreadable)
    pub placeholders: usize,
}

/// Pixel rectangle inside the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
}

/// Render every tile of `world` into `frame` as a grid.
///
/// Each tile gets an equal cell, shrunk by the configured padding. Textured
/// tiles are letterboxed into their cell; the rest are filled with the
/// placeholder color.
pub fn render_tiles(
    world: &World,
    gpu: &SoftwareGpu,
    ctx: &ContextGuard<'_>,
    frame: &mut [u8],
    window_width: u32,
    window_height: u32,
    config: &RenderConfig,
) -> RenderResult {
    clear_frame(frame, config.background_color);

    let mut result = RenderResult::default();
    let columns = world
        .iter()
        .map(|(_, t)| t.column + 1)
        .max()
        .unwrap_or(0)
        .max(config.columns.max(1)) as usize;
    let rows = world.rows() as usize;
    let (win_w, win_h) = (window_width as usize, window_height as usize);
    if rows == 0 || win_w == 0 || win_h == 0 {
        return result;
    }

    let cell_w = win_w / columns;
    let cell_h = win_h / rows;
    let pad = config.tile_padding as usize;

    for (_, tile) in world.iter() {
        let cell = Rect {
            x: tile.column as usize * cell_w + pad,
            y: tile.row as usize * cell_h + pad,
            w: cell_w.saturating_sub(2 * pad),
            h: cell_h.saturating_sub(2 * pad),
        };
        if cell.w == 0 || cell.h == 0 {
            continue;
        }

        let drawn = match tile.texture {
            Some(handle) => match gpu.with_texture(ctx, handle, |t| draw_texture(t, frame, win_w, cell)) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Cannot read texture {:?}: {}", handle, e);
                    false
                }
            },
            None => false,
        };

        if drawn {
            result.drawn += 1;
        } else {
            fill_rect(frame, win_w, cell, config.placeholder_color);
            result.placeholders += 1;
        }
    }

    result
}

/// Letterbox a texture into `cell`
fn draw_texture(texture: &Texture, frame: &mut [u8], stride: usize, cell: Rect) {
    let img_w = texture.width as usize;
    let img_h = texture.height as usize;
    if img_w == 0 || img_h == 0 {
        return;
    }

    // Scale to fit while maintaining aspect ratio
    let scale = (cell.w as f64 / img_w as f64).min(cell.h as f64 / img_h as f64);
    let display_w = ((img_w as f64 * scale) as usize).clamp(1, cell.w);
    let display_h = ((img_h as f64 * scale) as usize).clamp(1, cell.h);

    // Center in cell
    let offset_x = cell.x + (cell.w - display_w) / 2;
    let offset_y = cell.y + (cell.h - display_h) / 2;

    blit_scaled(
        &texture.pixels,
        img_w,
        img_h,
        frame,
        stride,
        offset_x,
        offset_y,
        display_w,
        display_h,
    );
}

/// Clear frame buffer to a solid color
#[inline]
pub fn clear_frame(frame: &mut [u8], color: [u8; 4]) {
    // Fast path for black (most common)
    if color == [0, 0, 0, 255] {
        frame.fill(0);
        for chunk in frame.chunks_exact_mut(4) {
            chunk[3] = 255;
        }
    } else {
        for chunk in frame.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
    }
}

fn fill_rect(frame: &mut [u8], stride: usize, rect: Rect, color: [u8; 4]) {
    for y in rect.y..rect.y + rect.h {
        let start = (y * stride + rect.x) * 4;
        let end = (start + rect.w * 4).min(frame.len());
        if start >= end {
            break;
        }
        for px in frame[start..end].chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }
}

/// Blit source image to destination with nearest-neighbor scaling.
#[inline]
#[allow(clippy::too_many_arguments)]
fn blit_scaled(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst: &mut [u8],
    dst_stride: usize,
    dst_x: usize,
    dst_y: usize,
    dst_w: usize,
    dst_h: usize,
) {
    if dst_w == 0 || dst_h == 0 {
        return;
    }

    let x_scale = src_w as f64 / dst_w as f64;
    let y_scale = src_h as f64 / dst_h as f64;

    for dy in 0..dst_h {
        let src_y = ((dy as f64 * y_scale) as usize).min(src_h - 1);
        let src_row_offset = src_y * src_w * 4;
        let dst_row_offset = ((dst_y + dy) * dst_stride + dst_x) * 4;

        for dx in 0..dst_w {
            let src_x = ((dx as f64 * x_scale) as usize).min(src_w - 1);
            let src_idx = src_row_offset + src_x * 4;
            let dst_idx = dst_row_offset + dx * 4;

            if dst_idx + 3 < dst.len() && src_idx + 3 < src.len() {
                dst[dst_idx] = src[src_idx];
                dst[dst_idx + 1] = src[src_idx + 1];
                dst[dst_idx + 2] = src[src_idx + 2];
                dst[dst_idx + 3] = 255; // Force opaque
            }
        }
    }
}
