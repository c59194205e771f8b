//! Pixel-level helpers: rotation, region extraction and colour normalisation.

use image::{DynamicImage, Rgba, RgbaImage};

/// Rotate clockwise by a whole number of degrees.
///
/// Quarter turns are exact. Any other angle rotates about the centre onto a
/// canvas just large enough to hold the result; uncovered corners are
/// transparent.
pub fn rotate(image: DynamicImage, degrees: u16) -> DynamicImage {
    match degrees % 360 {
        0 => image,
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        other => rotate_arbitrary(&image, f64::from(other)),
    }
}

fn rotate_arbitrary(image: &DynamicImage, degrees: f64) -> DynamicImage {
    let source = image.to_rgba8();
    let (width, height) = source.dimensions();
    let (w, h) = (f64::from(width), f64::from(height));

    let (sin, cos) = degrees.to_radians().sin_cos();
    let out_width = (w * cos.abs() + h * sin.abs()).ceil().max(1.0) as u32;
    let out_height = (w * sin.abs() + h * cos.abs()).ceil().max(1.0) as u32;

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ocx, ocy) = (f64::from(out_width) / 2.0, f64::from(out_height) / 2.0);

    let rotated = RgbaImage::from_fn(out_width, out_height, |x, y| {
        let dx = f64::from(x) + 0.5 - ocx;
        let dy = f64::from(y) + 0.5 - ocy;
        // Inverse of a clockwise rotation in y-down coordinates
        let sx = dx * cos + dy * sin + cx - 0.5;
        let sy = -dx * sin + dy * cos + cy - 0.5;
        sample_bilinear(&source, sx, sy)
    });

    DynamicImage::ImageRgba8(rotated)
}

/// Bilinear sample with premultiplied alpha; outside the image is transparent.
fn sample_bilinear(source: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (width, height) = source.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let taps = [
        (0i64, 0i64, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ];

    let mut color = [0.0f64; 3];
    let mut alpha = 0.0f64;
    for (ox, oy, weight) in taps {
        let px = x0 as i64 + ox;
        let py = y0 as i64 + oy;
        if weight <= 0.0
            || px < 0
            || py < 0
            || px >= i64::from(width)
            || py >= i64::from(height)
        {
            continue;
        }

        let pixel = source.get_pixel(px as u32, py as u32);
        let a = f64::from(pixel[3]) * weight;
        for (channel, value) in color.iter_mut().zip(pixel.0.iter()) {
            *channel += f64::from(*value) * a;
        }
        alpha += a;
    }

    if alpha <= f64::EPSILON {
        return Rgba([0, 0, 0, 0]);
    }

    let unpremultiply = |c: f64| (c / alpha).round().clamp(0.0, 255.0) as u8;
    Rgba([
        unpremultiply(color[0]),
        unpremultiply(color[1]),
        unpremultiply(color[2]),
        alpha.round().clamp(0.0, 255.0) as u8,
    ])
}

/// Copy out a rectangle. The caller guarantees it lies inside the image.
pub fn extract(image: &DynamicImage, left: u32, top: u32, width: u32, height: u32) -> DynamicImage {
    image.crop_imm(left, top, width, height)
}

/// Convert to 8-bit sRGB, keeping an alpha channel only if one exists.
///
/// Greyscale images are expanded to RGB.
pub fn normalize_color(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// 8-bit RGB or RGBA view of an image, for encoders that take nothing else.
pub fn to_rgb_or_rgba8(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image.clone(),
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Whether the image carries an alpha channel.
pub fn has_alpha(image: &DynamicImage) -> bool {
    image.color().has_alpha()
}
