//! Local contrast enhancement
//!
//! Contrast-limited adaptive histogram equalization on luma. Each tile gets a
//! clipped, equalized lookup table; pixels blend the four nearest tables.

use camera_capture::VideoFrame;
use image::GrayImage;

/// Equalize `gray` with a `tiles` x `tiles` grid and the given clip limit
pub fn equalize_local(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }
    let tiles_x = tiles.clamp(1, width);
    let tiles_y = tiles.clamp(1, height);
    // Tile edges split the frame proportionally, so no tile is empty
    let edge_x = |tx: u32| (tx as u64 * width as u64 / tiles_x as u64) as u32;
    let edge_y = |ty: u32| (ty as u64 * height as u64 / tiles_y as u64) as u32;
    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            luts.push(tile_lut(
                gray,
                edge_x(tx),
                edge_y(ty),
                edge_x(tx + 1),
                edge_y(ty + 1),
                clip_limit,
            ));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = gray.get_pixel(x, y).0[0] as usize;

        // Position relative to tile centers
        let gx = (x as f32 + 0.5) / tile_w - 0.5;
        let gy = (y as f32 + 0.5) / tile_h - 0.5;
        let tx0 = gx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
        let ty0 = gy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = (gx - tx0 as f32).clamp(0.0, 1.0);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        let top = lut_at(tx0, ty0)[value] as f32 * (1.0 - fx) + lut_at(tx1, ty0)[value] as f32 * fx;
        let bottom =
            lut_at(tx0, ty1)[value] as f32 * (1.0 - fx) + lut_at(tx1, ty1)[value] as f32 * fx;
        pixel.0[0] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    let total = x1.saturating_sub(x0) * y1.saturating_sub(y0);

    if clip_limit > 0.0 {
        let limit = ((clip_limit * total as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += share + u32::from(i < remainder);
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (i, count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = ((cdf as f32 * 255.0) / total.max(1) as f32).round().min(255.0) as u8;
    }
    lut
}

/// Enhance frame contrast on luma, scaling RGB to keep chroma
pub fn enhance_contrast(frame: &VideoFrame, tiles: u32, clip_limit: f32) -> VideoFrame {
    let gray = frame.to_grayscale();
    let equalized = equalize_local(&gray, tiles, clip_limit);

    let mut data = Vec::with_capacity(frame.data.len());
    for (rgb, (before, after)) in frame
        .data
        .chunks_exact(3)
        .zip(gray.as_raw().iter().zip(equalized.as_raw().iter()))
    {
        if *before == 0 {
            data.extend_from_slice(&[*after, *after, *after]);
            continue;
        }
        let scale = *after as f32 / *before as f32;
        for channel in rgb {
            data.push((*channel as f32 * scale).round().clamp(0.0, 255.0) as u8);
        }
    }

    VideoFrame {
        data,
        width: frame.width,
        height: frame.height,
        timestamp_ns: frame.timestamp_ns,
        sequence: frame.sequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stddev(img: &GrayImage) -> f32 {
        let n = img.as_raw().len() as f32;
        let mean = img.as_raw().iter().map(|v| *v as f32).sum::<f32>() / n;
        (img.as_raw().iter().map(|v| (*v as f32 - mean).powi(2)).sum::<f32>() / n).sqrt()
    }

    #[test]
    fn test_low_contrast_is_stretched() {
        let gray = GrayImage::from_fn(64, 64, |x, _| image::Luma([100 + (x % 8) as u8]));
        let equalized = equalize_local(&gray, 4, 40.0);
        assert!(stddev(&equalized) > stddev(&gray));
    }

    #[test]
    fn test_dimensions_preserved() {
        let gray = GrayImage::from_fn(33, 17, |x, y| image::Luma([(x * 7 + y) as u8]));
        let equalized = equalize_local(&gray, 8, 2.0);
        assert_eq!(equalized.dimensions(), (33, 17));
    }

    #[test]
    fn test_tiny_image_does_not_panic() {
        let gray = GrayImage::from_pixel(2, 3, image::Luma([50]));
        let equalized = equalize_local(&gray, 8, 2.0);
        assert_eq!(equalized.dimensions(), (2, 3));
    }

    #[test]
    fn test_small_frame_through_enhance() {
        let frame = VideoFrame::filled(20, 20, [120, 80, 40]);
        let enhanced = enhance_contrast(&frame, 8, 2.0);
        assert_eq!((enhanced.width, enhanced.height), (20, 20));
        // A flat frame maps every pixel through the same table
        let first = &enhanced.data[..3];
        assert!(enhanced.data.chunks_exact(3).all(|px| px == first));
        assert!(first.iter().any(|c| *c > 0));
    }

    #[test]
    fn test_every_tile_has_pixels() {
        for (w, h) in [(20, 20), (33, 17), (9, 9), (641, 479)] {
            let gray = GrayImage::from_fn(w, h, |x, y| image::Luma([((x + y) % 256) as u8]));
            let equalized = equalize_local(&gray, 8, 2.0);
            assert_eq!(equalized.dimensions(), (w, h));
        }
    }

    #[test]
    fn test_enhance_keeps_geometry() {
        let frame = VideoFrame::filled(40, 30, [90, 60, 30]);
        let enhanced = enhance_contrast(&frame, 8, 2.0);
        assert_eq!(enhanced.data.len(), frame.data.len());
        assert_eq!((enhanced.width, enhanced.height), (40, 30));
    }
}
